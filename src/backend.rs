use crate::{
    error::TransportError,
    types::{AvailabilityBatch, BookAppointmentReply, BookAppointmentRequest, Provider, ProviderId},
};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub type BatchStream = BoxStream<'static, Result<AvailabilityBatch, TransportError>>;

/// Client side of the appointment service. Dropping a `BatchStream` cancels the subscription.
#[async_trait]
pub trait AppointmentBackend: Clone + Send + Sync + 'static {
    async fn availability_stream(&self, provider_id: ProviderId)
        -> Result<BatchStream, TransportError>;

    async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<BookAppointmentReply, TransportError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait ProviderDirectory: Send + Sync {
    fn providers(&self) -> Vec<Provider>;

    fn provider(&self, id: ProviderId) -> Option<Provider> {
        self.providers()
            .into_iter()
            .find(|provider| provider.id == id)
    }
}
