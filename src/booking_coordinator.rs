use crate::{
    backend::AppointmentBackend,
    error::BookingError,
    types::{
        AvailabilitySnapshot, BookAppointmentReply, BookAppointmentRequest, BookingResult,
        ErrorKind, FailureReason,
    },
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info, warn};
use validator::Validate;

/// Issues booking requests, at most one at a time.
#[derive(Clone)]
pub struct BookingCoordinator<B: AppointmentBackend> {
    backend: B,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag however `submit` ends, including when its future is dropped.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<B: AppointmentBackend> BookingCoordinator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Local checks run in order: request validation, the in-flight guard, then
    /// slot availability in `current`. Only then is the request sent. Whatever the
    /// server or transport answers is returned as a `BookingResult`, never retried.
    pub async fn submit(
        &self,
        request: BookAppointmentRequest,
        current: &AvailabilitySnapshot,
    ) -> Result<BookingResult, BookingError> {
        if let Err(err) = request.validate() {
            warn!(?err, "Rejecting invalid booking request");
            return Err(BookingError::Validation(err.to_string()));
        }

        let _guard = self.begin()?;

        let slot = request.slot_key();
        if !current.is_available(&slot) {
            warn!(%slot, "Slot is no longer available, not sending booking request");
            return Err(BookingError::SlotNoLongerAvailable(slot));
        }

        let doctor_id = request.doctor_id;
        let result = match self.backend.book_appointment(request).await {
            Ok(BookAppointmentReply::Booked { appointment_id }) => {
                info!(doctor_id, %slot, %appointment_id, "Appointment booked");
                BookingResult::Booked { appointment_id }
            }
            Ok(BookAppointmentReply::Failed {
                error_kind,
                message,
            }) => {
                warn!(doctor_id, %slot, ?error_kind, reason = %message, "Booking rejected by server");
                let reason = match error_kind {
                    ErrorKind::Conflict => FailureReason::Conflict(message),
                    ErrorKind::Validation => FailureReason::Validation(message),
                    ErrorKind::Internal => FailureReason::Server(message),
                };
                BookingResult::Rejected { reason }
            }
            Err(err) => {
                error!(doctor_id, %slot, ?err, "Booking request failed");
                BookingResult::Rejected {
                    reason: FailureReason::Transport(err.to_string()),
                }
            }
        };
        Ok(result)
    }

    fn begin(&self) -> Result<InFlightGuard, BookingError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| BookingError::InProgress)?;
        Ok(InFlightGuard(self.in_flight.clone()))
    }
}
