use crate::{
    backend::{AppointmentBackend, BatchStream},
    error::TransportError,
    types::{
        AvailabilityBatch, BookAppointmentReply, BookAppointmentRequest, ErrorKind, ProviderId,
        Slot, SlotKey, WireSlot,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveTime, SecondsFormat, Utc};
use futures::StreamExt;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::watch::{self, Sender};
use tokio_stream::wrappers::WatchStream;
use tracing::{error, info};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug)]
struct ProviderSchedule {
    slots: BTreeMap<SlotKey, bool>,
    as_of: DateTime<Utc>,
    sender: Sender<AvailabilityBatch>,
}

impl ProviderSchedule {
    fn new() -> Self {
        let (sender, _) = watch::channel(AvailabilityBatch {
            as_of: String::new(),
            slots: vec![],
        });
        let mut schedule = Self {
            slots: BTreeMap::new(),
            as_of: DateTime::<Utc>::MIN_UTC,
            sender,
        };
        schedule.send_slots();
        schedule
    }

    /// Publishes the full slot table. Each batch gets an `as_of` strictly newer than the last one.
    fn send_slots(&mut self) {
        let now = Utc::now();
        self.as_of = if now > self.as_of {
            now
        } else {
            self.as_of + Duration::microseconds(1)
        };

        let slots = self
            .slots
            .iter()
            .map(|(key, &available)| WireSlot::from(&Slot::new(key.date, key.time, available)))
            .collect();
        self.sender.send_replace(AvailabilityBatch {
            as_of: self.as_of.to_rfc3339_opts(SecondsFormat::Micros, true),
            slots,
        });
    }
}

/// In-process appointment service. Keeps every provider's slots in memory and
/// pushes the whole table to subscribers after each change.
#[derive(Debug, Clone, Default)]
pub struct LocalSchedule {
    providers: Arc<Mutex<HashMap<ProviderId, ProviderSchedule>>>,
}

impl LocalSchedule {
    fn providers(&self) -> MutexGuard<'_, HashMap<ProviderId, ProviderSchedule>> {
        self.providers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Half-hour slots from 09:00 to 11:30 on each of the next `days` days.
    pub fn insert_example_slots(&self, provider_ids: &[ProviderId], days: i64) {
        let Some(first_slot) = NaiveTime::from_hms_opt(9, 0, 0) else {
            return;
        };
        let today = Local::now().date_naive();

        let mut providers = self.providers();
        for &provider_id in provider_ids {
            let schedule = providers
                .entry(provider_id)
                .or_insert_with(ProviderSchedule::new);
            for day in 1..=days {
                for step in 0..6 {
                    let slot = SlotKey {
                        date: today + Duration::days(day),
                        time: first_slot + Duration::minutes(30 * step),
                    };
                    schedule.slots.entry(slot).or_insert(true);
                }
            }
            schedule.send_slots();
        }
        info!(?provider_ids, days, "Inserted example slots");
    }

    #[cfg(test)]
    pub fn add_slot(&self, provider_id: ProviderId, slot: SlotKey) {
        let mut providers = self.providers();
        let schedule = providers
            .entry(provider_id)
            .or_insert_with(ProviderSchedule::new);
        schedule.slots.insert(slot, true);
        schedule.send_slots();
    }

    #[cfg(test)]
    pub fn remove_slot(&self, provider_id: ProviderId, slot: SlotKey) -> Result<(), String> {
        let mut providers = self.providers();
        let Some(schedule) = providers.get_mut(&provider_id) else {
            let err = "Provider has no schedule";
            error!(provider_id, "{err}");
            return Err(err.into());
        };
        if schedule.slots.remove(&slot).is_none() {
            let err = "Slot does not exist and can't therefore not be removed";
            error!(provider_id, %slot, "{err}");
            return Err(err.into());
        }
        schedule.send_slots();
        Ok(())
    }

    pub fn slots(&self, provider_id: ProviderId) -> Vec<Slot> {
        self.providers()
            .get(&provider_id)
            .map(|schedule| {
                schedule
                    .slots
                    .iter()
                    .map(|(key, &available)| Slot::new(key.date, key.time, available))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn book(&self, request: &BookAppointmentRequest) -> Result<(), (ErrorKind, String)> {
        if let Err(err) = request.validate() {
            return Err((ErrorKind::Validation, err.to_string()));
        }

        let slot = request.slot_key();
        let mut providers = self.providers();
        let schedule = providers
            .get_mut(&request.doctor_id)
            .ok_or((ErrorKind::Validation, "Unknown provider".to_string()))?;
        match schedule.slots.get_mut(&slot) {
            None => Err((
                ErrorKind::Validation,
                "Slot does not exist and can't therefore not be booked".into(),
            )),
            Some(false) => Err((ErrorKind::Conflict, "Slot was already booked".into())),
            Some(_) if slot.date.and_time(slot.time) < Local::now().naive_local() => {
                Err((ErrorKind::Validation, "Slot already passed".into()))
            }
            Some(available) => {
                *available = false;
                schedule.send_slots();
                Ok(())
            }
        }
    }
}

#[async_trait]
impl AppointmentBackend for LocalSchedule {
    async fn availability_stream(
        &self,
        provider_id: ProviderId,
    ) -> Result<BatchStream, TransportError> {
        let receiver = self
            .providers()
            .entry(provider_id)
            .or_insert_with(ProviderSchedule::new)
            .sender
            .subscribe();
        Ok(WatchStream::new(receiver).map(Ok).boxed())
    }

    async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<BookAppointmentReply, TransportError> {
        let reply = match self.book(&request) {
            Ok(()) => BookAppointmentReply::Booked {
                appointment_id: Uuid::new_v4().to_string(),
            },
            Err((error_kind, message)) => {
                error!(doctor_id = request.doctor_id, ?error_kind, %message, "Booking refused");
                BookAppointmentReply::Failed {
                    error_kind,
                    message,
                }
            }
        };
        Ok(reply)
    }
}
