use crate::{
    backend::{AppointmentBackend, BatchStream},
    error::StreamError,
    types::{parse_as_of, AvailabilityBatch, AvailabilitySnapshot, ProviderId},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Cancels an `AvailabilityStream` from outside the task consuming it.
#[derive(Debug, Clone)]
pub struct StreamCanceller(Arc<watch::Sender<bool>>);

impl StreamCanceller {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Server-push availability subscription for one provider.
///
/// Every accepted batch becomes a full replacement snapshot. Batches whose
/// `as_of` is not strictly newer than the last delivered snapshot are dropped.
/// The sequence ends when the server closes the stream, after the first
/// transport error, or once cancellation is requested.
pub struct AvailabilityStream {
    provider_id: ProviderId,
    batches: BatchStream,
    cancel: Arc<watch::Sender<bool>>,
    cancelled: watch::Receiver<bool>,
    last_as_of: Option<DateTime<Utc>>,
    finished: bool,
}

impl AvailabilityStream {
    /// Returns once the subscription is established, not per snapshot.
    pub async fn open<B: AppointmentBackend>(
        backend: &B,
        provider_id: ProviderId,
    ) -> Result<Self, StreamError> {
        let batches = backend
            .availability_stream(provider_id)
            .await
            .map_err(|err| {
                error!(provider_id, ?err, "Failed to open availability stream");
                StreamError::Subscribe(err)
            })?;
        debug!(provider_id, "Availability stream opened");

        let (cancel, cancelled) = watch::channel(false);
        Ok(Self {
            provider_id,
            batches,
            cancel: Arc::new(cancel),
            cancelled,
            last_as_of: None,
            finished: false,
        })
    }

    pub fn canceller(&self) -> StreamCanceller {
        StreamCanceller(self.cancel.clone())
    }

    pub async fn next_snapshot(&mut self) -> Option<Result<AvailabilitySnapshot, StreamError>> {
        loop {
            if self.finished {
                return None;
            }
            if *self.cancelled.borrow() {
                self.release();
                return None;
            }

            let next = tokio::select! {
                biased;
                _ = wait_cancelled(&mut self.cancelled) => None,
                item = self.batches.next() => Some(item),
            };
            let Some(item) = next else {
                self.release();
                return None;
            };

            match item {
                None => {
                    debug!(provider_id = self.provider_id, "Availability stream closed by server");
                    self.release();
                    return None;
                }
                Some(Err(err)) => {
                    error!(provider_id = self.provider_id, ?err, "Availability stream failed");
                    self.release();
                    return Some(Err(StreamError::Transport(err)));
                }
                Some(Ok(batch)) => {
                    let Some(snapshot) = snapshot_from_batch(self.provider_id, &batch) else {
                        continue;
                    };
                    if let Some(last_as_of) = self.last_as_of {
                        if snapshot.as_of() <= last_as_of {
                            debug!(
                                provider_id = self.provider_id,
                                as_of = %snapshot.as_of(),
                                %last_as_of,
                                "Dropping stale availability snapshot"
                            );
                            continue;
                        }
                    }
                    self.last_as_of = Some(snapshot.as_of());
                    debug!(
                        provider_id = self.provider_id,
                        as_of = %snapshot.as_of(),
                        slots = snapshot.len(),
                        "Availability snapshot accepted"
                    );
                    return Some(Ok(snapshot));
                }
            }
        }
    }

    fn release(&mut self) {
        self.finished = true;
        self.batches = futures::stream::empty().boxed();
    }
}

async fn wait_cancelled(cancelled: &mut watch::Receiver<bool>) {
    while !*cancelled.borrow_and_update() {
        if cancelled.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Builds the replacement snapshot for one batch. Malformed slots are dropped,
/// a batch without a readable `as_of` cannot be ordered and is dropped whole.
fn snapshot_from_batch(
    provider_id: ProviderId,
    batch: &AvailabilityBatch,
) -> Option<AvailabilitySnapshot> {
    let as_of = match parse_as_of(&batch.as_of) {
        Ok(as_of) => as_of,
        Err(err) => {
            warn!(provider_id, %err, "Dropping availability batch");
            return None;
        }
    };

    let mut snapshot = AvailabilitySnapshot::new(as_of);
    for wire_slot in &batch.slots {
        match wire_slot.parse() {
            Ok(slot) => {
                if snapshot.insert(slot) {
                    warn!(provider_id, slot = %slot.key(), "Duplicate slot in batch, keeping the last one");
                }
            }
            Err(err) => warn!(provider_id, %err, "Dropping malformed slot"),
        }
    }
    if snapshot.is_empty() && !batch.slots.is_empty() {
        warn!(provider_id, as_of = %as_of, "No readable slot in batch");
    }
    Some(snapshot)
}
