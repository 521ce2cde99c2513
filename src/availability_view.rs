use crate::types::{AvailabilitySnapshot, Slot};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub slots: Vec<Slot>,
}

/// Slots grouped by date, dates ascending, each day's slots by time ascending.
/// Unavailable slots stay in the grouping so they can be shown as taken.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityView {
    pub as_of: Option<DateTime<Utc>>,
    pub days: Vec<DayAvailability>,
}

impl AvailabilityView {
    pub fn project(snapshot: &AvailabilitySnapshot) -> Self {
        let mut days: BTreeMap<NaiveDate, Vec<Slot>> = BTreeMap::new();
        for slot in snapshot.slots() {
            days.entry(slot.date).or_default().push(*slot);
        }

        let days = days
            .into_iter()
            .map(|(date, mut slots)| {
                slots.sort_by_key(|slot| slot.time);
                DayAvailability { date, slots }
            })
            .collect();

        Self {
            as_of: Some(snapshot.as_of()),
            days,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.days.iter().map(|day| day.slots.len()).sum()
    }

    pub fn available_count(&self) -> usize {
        self.days
            .iter()
            .flat_map(|day| &day.slots)
            .filter(|slot| slot.available)
            .count()
    }
}
