use crate::{
    availability_stream::{AvailabilityStream, StreamCanceller},
    availability_view::AvailabilityView,
    backend::AppointmentBackend,
    booking_coordinator::BookingCoordinator,
    error::{BookingError, SessionError, StreamError},
    types::{
        AvailabilitySnapshot, BookAppointmentRequest, BookingResult, PatientId, ProviderId, Slot,
        SlotKey,
    },
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::{sync::watch, task::JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Loading,
    Viewing,
    Selected,
    Booking,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Loading => "loading",
            SessionPhase::Viewing => "viewing",
            SessionPhase::Selected => "selected",
            SessionPhase::Booking => "booking",
        }
    }
}

/// What subscribers see after every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub session_id: Uuid,
    pub phase: SessionPhase,
    pub provider_id: Option<ProviderId>,
    pub view: AvailabilityView,
    pub selected_slot: Option<Slot>,
    pub stream_error: Option<String>,
    pub stream_ended: bool,
    pub last_booking: Option<BookingResult>,
}

struct ActiveStream {
    provider_id: ProviderId,
    canceller: StreamCanceller,
    task: JoinHandle<()>,
}

impl ActiveStream {
    fn cancel(self) {
        debug!(provider_id = self.provider_id, "Cancelling availability stream");
        self.canceller.cancel();
        self.task.abort();
    }
}

#[derive(Default)]
struct SessionState {
    phase: SessionPhase,
    provider_id: Option<ProviderId>,
    // Bumped whenever the active stream is replaced or dropped. Snapshots and
    // booking outcomes tagged with an older generation no longer apply.
    generation: u64,
    active_stream: Option<ActiveStream>,
    snapshot: Option<Arc<AvailabilitySnapshot>>,
    view: AvailabilityView,
    selected_slot: Option<Slot>,
    stream_error: Option<String>,
    stream_ended: bool,
    last_booking: Option<BookingResult>,
}

impl SessionState {
    fn restart(&mut self, phase: SessionPhase, provider_id: Option<ProviderId>) -> u64 {
        if let Some(stream) = self.active_stream.take() {
            stream.cancel();
        }
        self.generation += 1;
        self.phase = phase;
        self.provider_id = provider_id;
        self.snapshot = None;
        self.view = AvailabilityView::default();
        self.selected_slot = None;
        self.stream_error = None;
        self.stream_ended = false;
        self.last_booking = None;
        self.generation
    }

    /// True while `slot` is still the selection being booked. A snapshot may have
    /// cleared it mid-flight, and the user may since have selected another slot.
    fn is_booking(&self, slot: &Slot) -> bool {
        self.phase == SessionPhase::Booking
            && self
                .selected_slot
                .is_some_and(|selected| selected.same_slot(slot))
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidStateTransition {
            operation,
            state: self.phase.as_str(),
        }
    }
}

struct Shared<B: AppointmentBackend> {
    id: Uuid,
    backend: B,
    coordinator: BookingCoordinator<B>,
    state: Mutex<SessionState>,
    updates: watch::Sender<SessionUpdate>,
}

impl<B: AppointmentBackend> Shared<B> {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SessionState) {
        self.updates.send_replace(SessionUpdate {
            session_id: self.id,
            phase: state.phase,
            provider_id: state.provider_id,
            view: state.view.clone(),
            selected_slot: state.selected_slot,
            stream_error: state.stream_error.clone(),
            stream_ended: state.stream_ended,
            last_booking: state.last_booking.clone(),
        });
    }

    fn apply_snapshot(&self, generation: u64, snapshot: AvailabilitySnapshot) {
        let mut state = self.state();
        if state.generation != generation {
            debug!(session_id = %self.id, "Discarding snapshot from a cancelled stream");
            return;
        }

        let snapshot = Arc::new(snapshot);
        state.view = AvailabilityView::project(&snapshot);
        match state.phase {
            SessionPhase::Loading | SessionPhase::Viewing => state.phase = SessionPhase::Viewing,
            SessionPhase::Selected | SessionPhase::Booking => {
                if let Some(selected) = state.selected_slot {
                    if !snapshot.is_available(&selected.key()) {
                        info!(
                            session_id = %self.id,
                            slot = %selected.key(),
                            "Selected slot was taken, clearing selection"
                        );
                        state.selected_slot = None;
                        state.phase = SessionPhase::Viewing;
                    }
                }
            }
            SessionPhase::Idle => {}
        }
        debug!(
            session_id = %self.id,
            slots = state.view.slot_count(),
            available = state.view.available_count(),
            "Availability view updated"
        );
        state.snapshot = Some(snapshot);
        self.publish(&state);
    }

    fn end_stream(&self, generation: u64, err: Option<StreamError>) {
        let mut state = self.state();
        if state.generation != generation {
            return;
        }
        if let Some(err) = err {
            warn!(session_id = %self.id, ?err, "Availability stream ended with an error");
            state.stream_error = Some(err.to_string());
        }
        state.stream_ended = true;
        self.publish(&state);
    }
}

impl<B: AppointmentBackend> Drop for Shared<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(stream) = state.active_stream.take() {
            stream.cancel();
        }
    }
}

async fn pump_snapshots<B: AppointmentBackend>(
    session: Weak<Shared<B>>,
    generation: u64,
    mut stream: AvailabilityStream,
) {
    loop {
        let item = stream.next_snapshot().await;
        let Some(shared) = session.upgrade() else {
            return;
        };
        match item {
            Some(Ok(snapshot)) => shared.apply_snapshot(generation, snapshot),
            Some(Err(err)) => return shared.end_stream(generation, Some(err)),
            None => return shared.end_stream(generation, None),
        }
    }
}

/// One user's provider choice, slot choice and booking progress.
///
/// Stream-delivered snapshots and caller operations mutate the same state under
/// one lock, so a snapshot that invalidates the selected slot and a booking
/// confirmation are always applied in a single order. Cloning yields another
/// handle to the same session; dropping the last handle cancels its stream.
#[derive(Clone)]
pub struct SelectionSession<B: AppointmentBackend>(Arc<Shared<B>>);

impl<B: AppointmentBackend> SelectionSession<B> {
    pub fn new(backend: B) -> Self {
        let id = Uuid::new_v4();
        let (updates, _) = watch::channel(SessionUpdate {
            session_id: id,
            ..SessionUpdate::default()
        });
        Self(Arc::new(Shared {
            id,
            coordinator: BookingCoordinator::new(backend.clone()),
            backend,
            state: Mutex::default(),
            updates,
        }))
    }

    pub fn id(&self) -> Uuid {
        self.0.id
    }

    #[cfg(test)]
    pub fn phase(&self) -> SessionPhase {
        self.0.state().phase
    }

    pub fn current(&self) -> SessionUpdate {
        self.0.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> WatchStream<SessionUpdate> {
        WatchStream::new(self.0.updates.subscribe())
    }

    /// Cancels the previous provider's stream before the new one is opened.
    /// Returns once the new subscription is established.
    pub async fn select_provider(&self, provider_id: ProviderId) -> Result<(), SessionError> {
        let generation = {
            let mut state = self.0.state();
            let generation = state.restart(SessionPhase::Loading, Some(provider_id));
            debug!(session_id = %self.0.id, provider_id, "Provider selected");
            self.0.publish(&state);
            generation
        };

        let stream = match AvailabilityStream::open(&self.0.backend, provider_id).await {
            Ok(stream) => stream,
            Err(err) => {
                let mut state = self.0.state();
                if state.generation == generation {
                    state.stream_error = Some(err.to_string());
                    state.stream_ended = true;
                    self.0.publish(&state);
                }
                return Err(err.into());
            }
        };

        let mut state = self.0.state();
        if state.generation != generation {
            debug!(
                session_id = %self.0.id,
                provider_id,
                "Provider selection superseded while subscribing"
            );
            return Ok(());
        }
        let canceller = stream.canceller();
        let task = tokio::spawn(pump_snapshots(Arc::downgrade(&self.0), generation, stream));
        state.active_stream = Some(ActiveStream {
            provider_id,
            canceller,
            task,
        });
        Ok(())
    }

    pub fn select_slot(&self, slot: SlotKey) -> Result<Slot, SessionError> {
        let mut state = self.0.state();
        if state.phase != SessionPhase::Viewing {
            return Err(state.invalid("select_slot"));
        }

        let selected = state
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.get(&slot).copied())
            .filter(|candidate| candidate.available)
            .ok_or(SessionError::SlotNoLongerAvailable(slot))?;

        debug!(session_id = %self.0.id, %slot, "Slot selected");
        state.selected_slot = Some(selected);
        state.phase = SessionPhase::Selected;
        state.last_booking = None;
        self.0.publish(&state);
        Ok(selected)
    }

    pub fn clear_selection(&self) -> Result<(), SessionError> {
        let mut state = self.0.state();
        if state.phase != SessionPhase::Selected {
            return Err(state.invalid("clear_selection"));
        }
        state.selected_slot = None;
        state.phase = SessionPhase::Viewing;
        self.0.publish(&state);
        Ok(())
    }

    /// Books the selected slot for `patient_id`.
    ///
    /// Availability is checked against the snapshot current when this call
    /// starts. Snapshots arriving while the request is in flight may clear the
    /// selection but never change what this call checked. Once the server
    /// answers, the selection is cleared if it is still the slot this call
    /// booked. A slot selected after a mid-flight invalidation is left alone.
    pub async fn confirm_booking(
        &self,
        patient_id: PatientId,
        reason: String,
    ) -> Result<BookingResult, SessionError> {
        let (generation, slot, request, snapshot) = {
            let mut state = self.0.state();
            match state.phase {
                SessionPhase::Selected => {}
                SessionPhase::Booking => return Err(BookingError::InProgress.into()),
                _ => return Err(state.invalid("confirm_booking")),
            }
            let (Some(provider_id), Some(slot), Some(snapshot)) = (
                state.provider_id,
                state.selected_slot,
                state.snapshot.clone(),
            ) else {
                return Err(state.invalid("confirm_booking"));
            };

            state.phase = SessionPhase::Booking;
            state.last_booking = None;
            self.0.publish(&state);

            let request = BookAppointmentRequest {
                doctor_id: provider_id,
                patient_id,
                date: slot.date,
                time: slot.time,
                reason,
            };
            (state.generation, slot, request, snapshot)
        };

        let outcome = self.0.coordinator.submit(request, &snapshot).await;

        let mut state = self.0.state();
        let current = state.generation == generation;
        match outcome {
            Ok(result) => {
                debug!(
                    session_id = %self.0.id,
                    slot = %slot.key(),
                    success = result.success(),
                    appointment_id = ?result.appointment_id(),
                    current,
                    "Booking answered"
                );
                if current {
                    if state.is_booking(&slot) {
                        state.selected_slot = None;
                        state.phase = SessionPhase::Viewing;
                    }
                    state.last_booking = Some(result.clone());
                    self.0.publish(&state);
                }
                Ok(result)
            }
            Err(err) => {
                if current && state.is_booking(&slot) {
                    match err {
                        BookingError::SlotNoLongerAvailable(_) => {
                            state.selected_slot = None;
                            state.phase = SessionPhase::Viewing;
                        }
                        BookingError::Validation(_) | BookingError::InProgress => {
                            state.phase = SessionPhase::Selected;
                        }
                    }
                    self.0.publish(&state);
                }
                Err(err.into())
            }
        }
    }

    /// Cancels the active stream and returns to `Idle`.
    pub fn close(&self) {
        let mut state = self.0.state();
        state.restart(SessionPhase::Idle, None);
        debug!(session_id = %self.0.id, "Session closed");
        self.0.publish(&state);
    }
}
