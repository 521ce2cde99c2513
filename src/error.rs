use crate::types::{ProviderId, SlotKey};
use thiserror::Error;

/// Faults reported by an `AppointmentBackend` implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected status {0}: {1}")]
    Status(u16, String),

    #[error("undecodable message: {0}")]
    Decode(String),
}

/// Terminal failure of one availability stream instance.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("failed to open availability stream: {0}")]
    Subscribe(TransportError),

    #[error("availability stream broke: {0}")]
    Transport(TransportError),
}

/// Rejections decided locally, before any booking request is sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    #[error("invalid booking request: {0}")]
    Validation(String),

    #[error("a booking request is already in flight")]
    InProgress,

    #[error("slot {0} is no longer available")]
    SlotNoLongerAvailable(SlotKey),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{operation} is not allowed while {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: &'static str,
    },

    #[error("slot {0} is no longer available")]
    SlotNoLongerAvailable(SlotKey),

    #[error("unknown provider {0}")]
    UnknownProvider(ProviderId),

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}
