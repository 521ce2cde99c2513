use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    backend::{AppointmentBackend, BatchStream},
    error::TransportError,
    types::{
        AvailabilityBatch, BookAppointmentReply, BookAppointmentRequest, ProviderId, WireSlot,
    },
};

type Feed = mpsc::UnboundedSender<Result<AvailabilityBatch, TransportError>>;

pub struct MockAppointmentBackendInner {
    pub calls_to_availability_stream: AtomicU64,
    pub calls_to_book_appointment: AtomicU64,
    pub subscribe_failure: Mutex<Option<TransportError>>,
    pub booking_reply: Mutex<Result<BookAppointmentReply, TransportError>>,
    pub booked_requests: Mutex<Vec<BookAppointmentRequest>>,
    feeds: Mutex<HashMap<ProviderId, Feed>>,
    booking_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

#[derive(Clone)]
pub struct MockAppointmentBackend(pub Arc<MockAppointmentBackendInner>);

impl MockAppointmentBackendInner {
    fn new() -> Self {
        Self {
            calls_to_availability_stream: AtomicU64::default(),
            calls_to_book_appointment: AtomicU64::default(),
            subscribe_failure: Mutex::default(),
            booking_reply: Mutex::new(Ok(BookAppointmentReply::Booked {
                appointment_id: "appointment-1".into(),
            })),
            booked_requests: Mutex::default(),
            feeds: Mutex::default(),
            booking_gate: Mutex::default(),
        }
    }
}

impl MockAppointmentBackend {
    pub fn new() -> Self {
        Self(Arc::new(MockAppointmentBackendInner::new()))
    }

    /// Pushes a batch to the current subscriber of `provider_id`.
    /// Returns false if nobody is listening anymore.
    pub fn push(&self, provider_id: ProviderId, batch: AvailabilityBatch) -> bool {
        self.send(provider_id, Ok(batch))
    }

    pub fn fail_stream(&self, provider_id: ProviderId, err: TransportError) -> bool {
        self.send(provider_id, Err(err))
    }

    pub fn close_stream(&self, provider_id: ProviderId) {
        self.0.feeds.lock().unwrap().remove(&provider_id);
    }

    pub async fn wait_for_unsubscribe(&self, provider_id: ProviderId) {
        let feed = self.0.feeds.lock().unwrap().get(&provider_id).cloned();
        if let Some(feed) = feed {
            feed.closed().await;
        }
    }

    pub fn set_booking_reply(&self, reply: Result<BookAppointmentReply, TransportError>) {
        *self.0.booking_reply.lock().unwrap() = reply;
    }

    /// The next booking request stays in flight until the returned sender fires.
    pub fn hold_next_booking(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.0.booking_gate.lock().unwrap() = Some(gate);
        release
    }

    pub fn booking_calls(&self) -> u64 {
        self.0.calls_to_book_appointment.load(Ordering::SeqCst)
    }

    fn send(
        &self,
        provider_id: ProviderId,
        item: Result<AvailabilityBatch, TransportError>,
    ) -> bool {
        match self.0.feeds.lock().unwrap().get(&provider_id) {
            Some(feed) => feed.send(item).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl AppointmentBackend for MockAppointmentBackend {
    async fn availability_stream(
        &self,
        provider_id: ProviderId,
    ) -> Result<BatchStream, TransportError> {
        self.0
            .calls_to_availability_stream
            .fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.0.subscribe_failure.lock().unwrap().clone() {
            return Err(err);
        }
        let (feed, receiver) = mpsc::unbounded_channel();
        self.0.feeds.lock().unwrap().insert(provider_id, feed);
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<BookAppointmentReply, TransportError> {
        self.0
            .calls_to_book_appointment
            .fetch_add(1, Ordering::SeqCst);
        self.0.booked_requests.lock().unwrap().push(request);

        let gate = self.0.booking_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.0.booking_reply.lock().unwrap().clone()
    }
}

pub fn batch(as_of: &str, slots: &[(&str, &str, bool)]) -> AvailabilityBatch {
    AvailabilityBatch {
        as_of: as_of.into(),
        slots: slots
            .iter()
            .map(|&(date, time, available)| WireSlot {
                date: date.into(),
                time: time.into(),
                available,
            })
            .collect(),
    }
}
