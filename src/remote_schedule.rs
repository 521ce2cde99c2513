use crate::{
    backend::{AppointmentBackend, BatchStream},
    error::TransportError,
    types::{AvailabilityBatch, BookAppointmentReply, BookAppointmentRequest, ErrorKind, ProviderId},
};
use async_trait::async_trait;
use futures::{future, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use std::io;
use tokio::io::AsyncRead;
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    io::StreamReader,
};
use tracing::debug;

#[derive(Debug, Deserialize)]
struct BookedBody {
    appointment_id: String,
}

#[derive(Debug, Deserialize)]
struct FailedBody {
    error_kind: ErrorKind,
    message: String,
}

/// Appointment service reached over HTTP. Availability arrives as
/// newline-delimited JSON batches on a long-lived response body.
#[derive(Debug, Clone)]
pub struct RemoteSchedule {
    client: Client,
    base_url: String,
}

impl RemoteSchedule {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

fn network_error(err: reqwest::Error) -> TransportError {
    TransportError::Network(err.to_string())
}

#[async_trait]
impl AppointmentBackend for RemoteSchedule {
    async fn availability_stream(
        &self,
        provider_id: ProviderId,
    ) -> Result<BatchStream, TransportError> {
        let url = format!("{}/providers/{provider_id}/availability", self.base_url);
        debug!(%url, "Subscribing to availability");

        let response = self.client.get(url).send().await.map_err(network_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status(status.as_u16(), body));
        }
        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        Ok(ndjson_batches(StreamReader::new(chunks)))
    }

    async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<BookAppointmentReply, TransportError> {
        let url = format!("{}/appointments", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(network_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(network_error)?;

        if status.is_success() {
            let booked: BookedBody = serde_json::from_slice(&body)
                .map_err(|err| TransportError::Decode(err.to_string()))?;
            return Ok(BookAppointmentReply::Booked {
                appointment_id: booked.appointment_id,
            });
        }

        let reply = match serde_json::from_slice::<FailedBody>(&body) {
            Ok(failed) => BookAppointmentReply::Failed {
                error_kind: failed.error_kind,
                message: failed.message,
            },
            Err(_) => BookAppointmentReply::Failed {
                error_kind: ErrorKind::Internal,
                message: format!("{status}: {}", String::from_utf8_lossy(&body)),
            },
        };
        Ok(reply)
    }
}

/// Longest accepted availability line.
const MAX_LINE_LENGTH: usize = 1 << 20;

fn decode_line(
    line: Result<String, LinesCodecError>,
) -> Option<Result<AvailabilityBatch, TransportError>> {
    let result = match line {
        Ok(line) if line.trim().is_empty() => return None,
        Ok(line) => {
            serde_json::from_str(&line).map_err(|err| TransportError::Decode(err.to_string()))
        }
        Err(LinesCodecError::Io(err)) if err.kind() == io::ErrorKind::InvalidData => {
            Err(TransportError::Decode(err.to_string()))
        }
        Err(LinesCodecError::Io(err)) => Err(TransportError::Network(err.to_string())),
        Err(err @ LinesCodecError::MaxLineLengthExceeded) => {
            Err(TransportError::Decode(err.to_string()))
        }
    };
    Some(result)
}

/// Splits a response body into newline-delimited batches. The first error ends the stream.
fn ndjson_batches<R>(body: R) -> BatchStream
where
    R: AsyncRead + Send + 'static,
{
    FramedRead::new(body, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
        .filter_map(|line| future::ready(decode_line(line)))
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}
