use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};
use validator::{Validate, ValidationError};

pub type ProviderId = i64;
pub type PatientId = i64;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub specialty: String,
}

/// Identity of a slot. Availability is state attached to it, not part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date.format(DATE_FORMAT), self.time.format("%H:%M"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub available: bool,
}

impl Slot {
    pub fn new(date: NaiveDate, time: NaiveTime, available: bool) -> Self {
        Self {
            date,
            time,
            available,
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey {
            date: self.date,
            time: self.time,
        }
    }

    pub fn same_slot(&self, other: &Slot) -> bool {
        self.key() == other.key()
    }
}

pub fn parse_date(text: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|err| format!("invalid date {text:?}: {err}"))
}

pub fn parse_time(text: &str) -> Result<NaiveTime, String> {
    let text = text.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
        .ok_or_else(|| format!("invalid time {text:?}"))
}

pub fn parse_as_of(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|as_of| as_of.with_timezone(&Utc))
        .map_err(|err| format!("invalid as_of {text:?}: {err}"))
}

/// One slot as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSlot {
    pub date: String,
    pub time: String,
    pub available: bool,
}

impl WireSlot {
    pub fn parse(&self) -> Result<Slot, String> {
        Ok(Slot::new(
            parse_date(&self.date)?,
            parse_time(&self.time)?,
            self.available,
        ))
    }
}

impl From<&Slot> for WireSlot {
    fn from(slot: &Slot) -> Self {
        Self {
            date: slot.date.format(DATE_FORMAT).to_string(),
            time: slot.time.format("%H:%M").to_string(),
            available: slot.available,
        }
    }
}

/// A complete availability declaration pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityBatch {
    pub as_of: String,
    pub slots: Vec<WireSlot>,
}

/// Full replacement view of one provider's slots, kept in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilitySnapshot {
    as_of: DateTime<Utc>,
    slots: Vec<Slot>,
    index: HashMap<SlotKey, usize>,
}

impl AvailabilitySnapshot {
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn from_slots(as_of: DateTime<Utc>, slots: impl IntoIterator<Item = Slot>) -> Self {
        let mut snapshot = Self::new(as_of);
        for slot in slots {
            snapshot.insert(slot);
        }
        snapshot
    }

    /// Returns true if the slot replaced an earlier entry with the same identity.
    pub fn insert(&mut self, slot: Slot) -> bool {
        match self.index.get(&slot.key()) {
            Some(&position) => {
                self.slots[position] = slot;
                true
            }
            None => {
                self.index.insert(slot.key(), self.slots.len());
                self.slots.push(slot);
                false
            }
        }
    }

    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn get(&self, key: &SlotKey) -> Option<&Slot> {
        self.index.get(key).map(|&position| &self.slots[position])
    }

    pub fn is_available(&self, key: &SlotKey) -> bool {
        self.get(key).is_some_and(|slot| slot.available)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BookAppointmentRequest {
    #[validate(range(min = 1))]
    pub doctor_id: ProviderId,
    #[validate(range(min = 1))]
    pub patient_id: PatientId,
    pub date: NaiveDate,
    pub time: NaiveTime,
    #[validate(custom(function = "not_blank"))]
    pub reason: String,
}

impl BookAppointmentRequest {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            date: self.date,
            time: self.time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    Validation,
    Internal,
}

/// What the appointment service answered to a booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookAppointmentReply {
    Booked { appointment_id: String },
    Failed { error_kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    Transport(String),
    Conflict(String),
    Validation(String),
    Server(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(message) => write!(f, "transport failure: {message}"),
            FailureReason::Conflict(message) => write!(f, "slot already taken: {message}"),
            FailureReason::Validation(message) => write!(f, "rejected by server: {message}"),
            FailureReason::Server(message) => write!(f, "server failure: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BookingResult {
    Booked { appointment_id: String },
    Rejected { reason: FailureReason },
}

impl BookingResult {
    pub fn success(&self) -> bool {
        matches!(self, BookingResult::Booked { .. })
    }

    pub fn appointment_id(&self) -> Option<&str> {
        match self {
            BookingResult::Booked { appointment_id } => Some(appointment_id),
            BookingResult::Rejected { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            BookingResult::Booked { .. } => None,
            BookingResult::Rejected { reason } => Some(reason),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_case::test_case("09:00", 9, 0, 0)]
    #[test_case::test_case("14:30:15", 14, 30, 15)]
    #[test_case::test_case(" 08:05 ", 8, 5, 0)]
    fn test_parse_time(text: &str, hour: u32, minute: u32, second: u32) {
        assert_eq!(
            parse_time(text).unwrap(),
            NaiveTime::from_hms_opt(hour, minute, second).unwrap()
        );
    }

    #[test_case::test_case("9am")]
    #[test_case::test_case("25:00")]
    #[test_case::test_case("")]
    fn test_parse_time_rejects_malformed(text: &str) {
        parse_time(text).unwrap_err();
    }

    #[test]
    fn test_wire_slot_parse() {
        let wire = WireSlot {
            date: "2024-06-01".into(),
            time: "09:00".into(),
            available: true,
        };
        let slot = wire.parse().unwrap();
        assert_eq!(slot.date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(slot.time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert!(slot.available);

        let wire = WireSlot {
            date: "2024-02-30".into(),
            time: "09:00".into(),
            available: true,
        };
        wire.parse().unwrap_err();
    }

    #[test]
    fn test_slot_identity_ignores_availability() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let open = Slot::new(date, time, true);
        let taken = Slot::new(date, time, false);

        assert!(open.same_slot(&taken));
        assert_eq!(open.key(), taken.key());
        assert_ne!(open, taken);
    }

    #[test]
    fn test_snapshot_duplicate_keeps_position_and_last_state() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap();

        let snapshot = AvailabilitySnapshot::from_slots(
            Utc::now(),
            [
                Slot::new(date, nine, true),
                Slot::new(date, ten, true),
                Slot::new(date, nine, false),
            ],
        );

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.slots()[0].time, nine);
        assert!(!snapshot.slots()[0].available);
        assert!(!snapshot.is_available(&Slot::new(date, nine, true).key()));
        assert!(snapshot.is_available(&Slot::new(date, ten, false).key()));
    }

    #[test]
    fn test_booking_request_validation() {
        let request = BookAppointmentRequest {
            doctor_id: 1,
            patient_id: 42,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            reason: "Checkup".into(),
        };
        request.validate().unwrap();

        let mut invalid = request.clone();
        invalid.patient_id = 0;
        invalid.validate().unwrap_err();

        let mut invalid = request.clone();
        invalid.doctor_id = -3;
        invalid.validate().unwrap_err();

        let mut invalid = request;
        invalid.reason = "   ".into();
        invalid.validate().unwrap_err();
    }

    #[test]
    fn test_booking_result_serialization() {
        let booked = BookingResult::Booked {
            appointment_id: "A-1".into(),
        };
        assert_eq!(
            serde_json::to_value(&booked).unwrap(),
            serde_json::json!({"outcome": "booked", "appointment_id": "A-1"})
        );

        let rejected = BookingResult::Rejected {
            reason: FailureReason::Conflict("taken".into()),
        };
        assert!(!rejected.success());
        assert_eq!(
            serde_json::to_value(&rejected).unwrap(),
            serde_json::json!({
                "outcome": "rejected",
                "reason": {"kind": "conflict", "message": "taken"}
            })
        );
    }
}
