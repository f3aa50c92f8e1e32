use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::engine::StoreError;
use crate::model::Minute;
use crate::time::{format_date, minutes_to_time};

/// What the caller should do about a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Remedy {
    /// Pick a different slot or fix the request.
    ChangeInput,
    /// Nothing wrong with the request; the system is unavailable right now.
    RetryLater,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingField(&'static str),
    UnknownResource(String),
    InvalidDate(String),
    InvalidCursor(String),
    DateInPast(NaiveDate),
    InvalidTime(String),
    MisalignedStart { start: Minute, slot_minutes: Minute },
    InvalidDuration(Minute),
    NameTooShort { min: usize },
    NameTooLong { max: usize },
    InvalidPhone { digits: usize, prefix: String },
    InvalidPin { length: usize },
    SearchTermTooLong { max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "{field} is required"),
            ValidationError::UnknownResource(id) => write!(f, "unknown machine: {id}"),
            ValidationError::InvalidDate(s) => write!(f, "invalid date {s:?}, expected YYYY-MM-DD"),
            ValidationError::InvalidCursor(s) => write!(
                f,
                "invalid history position {s:?}, expected YYYY-MM-DD or a next cursor"
            ),
            ValidationError::DateInPast(date) => {
                write!(f, "{} is in the past", format_date(*date))
            }
            ValidationError::InvalidTime(s) => write!(f, "invalid time {s:?}, expected HH:MM"),
            ValidationError::MisalignedStart {
                start,
                slot_minutes,
            } => write!(
                f,
                "start time {} is not on a {slot_minutes}-minute boundary",
                minutes_to_time(*start)
            ),
            ValidationError::InvalidDuration(d) => write!(f, "duration of {d} minutes is not offered"),
            ValidationError::NameTooShort { min } => write!(f, "name must be at least {min} characters"),
            ValidationError::NameTooLong { max } => write!(f, "name must be at most {max} characters"),
            ValidationError::InvalidPhone { digits, prefix } => {
                write!(f, "phone number must have {digits} digits and start with {prefix}")
            }
            ValidationError::InvalidPin { length } => write!(f, "PIN must be exactly {length} digits"),
            ValidationError::SearchTermTooLong { max } => {
                write!(f, "search term must be at most {max} characters")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum BookingError {
    Validation(ValidationError),
    Maintenance,
    /// The slot is occupied, either seen by the pre-check or lost at commit.
    SlotConflict {
        resource_id: String,
        date: NaiveDate,
        start: Minute,
        conflicting: Option<Ulid>,
    },
    QuotaExceeded { limit: usize },
    /// The commit did not answer in time. It may still land; re-query
    /// before submitting again.
    OutcomeUnknown,
    Store(StoreError),
    Internal(String),
}

impl BookingError {
    pub fn remedy(&self) -> Remedy {
        match self {
            BookingError::Validation(_)
            | BookingError::SlotConflict { .. }
            | BookingError::QuotaExceeded { .. } => Remedy::ChangeInput,
            BookingError::Maintenance
            | BookingError::OutcomeUnknown
            | BookingError::Store(_)
            | BookingError::Internal(_) => Remedy::RetryLater,
        }
    }

    /// Metric label.
    pub fn outcome(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "invalid",
            BookingError::Maintenance => "maintenance",
            BookingError::SlotConflict { .. } => "conflict",
            BookingError::QuotaExceeded { .. } => "quota",
            BookingError::OutcomeUnknown => "unknown",
            BookingError::Store(_) | BookingError::Internal(_) => "error",
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Validation(e) => write!(f, "{e}"),
            BookingError::Maintenance => write!(f, "bookings are paused for maintenance"),
            BookingError::SlotConflict {
                resource_id,
                date,
                start,
                ..
            } => write!(
                f,
                "{resource_id} is already booked at {} on {}; choose another time",
                minutes_to_time(*start),
                format_date(*date)
            ),
            BookingError::QuotaExceeded { limit } => {
                write!(f, "you already hold {limit} upcoming reservations")
            }
            BookingError::OutcomeUnknown => write!(
                f,
                "booking outcome unknown; check your reservations before trying again"
            ),
            BookingError::Store(e) => write!(f, "store error: {e}"),
            BookingError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<ValidationError> for BookingError {
    fn from(e: ValidationError) -> Self {
        BookingError::Validation(e)
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        BookingError::Store(e)
    }
}

#[derive(Debug)]
pub enum DeleteError {
    NotFound(Ulid),
    Unauthorized,
    Store(StoreError),
}

impl DeleteError {
    pub fn remedy(&self) -> Remedy {
        match self {
            DeleteError::NotFound(_) | DeleteError::Unauthorized => Remedy::ChangeInput,
            DeleteError::Store(_) => Remedy::RetryLater,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            DeleteError::NotFound(_) => "not_found",
            DeleteError::Unauthorized => "unauthorized",
            DeleteError::Store(_) => "error",
        }
    }
}

impl std::fmt::Display for DeleteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteError::NotFound(id) => write!(f, "reservation not found: {id}"),
            DeleteError::Unauthorized => write!(f, "wrong PIN for this reservation"),
            DeleteError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for DeleteError {}

impl From<StoreError> for DeleteError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => DeleteError::NotFound(id),
            other => DeleteError::Store(other),
        }
    }
}

/// Admin-only settings changes.
#[derive(Debug)]
pub enum SettingsError {
    Forbidden,
    Store(StoreError),
}

impl SettingsError {
    pub fn remedy(&self) -> Remedy {
        match self {
            SettingsError::Forbidden => Remedy::ChangeInput,
            SettingsError::Store(_) => Remedy::RetryLater,
        }
    }
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Forbidden => write!(f, "admin access required"),
            SettingsError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<StoreError> for SettingsError {
    fn from(e: StoreError) -> Self {
        SettingsError::Store(e)
    }
}

/// Read-side failures: bad filters, admin-only views, store trouble.
#[derive(Debug)]
pub enum QueryError {
    Validation(ValidationError),
    Forbidden,
    Store(StoreError),
}

impl QueryError {
    pub fn remedy(&self) -> Remedy {
        match self {
            QueryError::Validation(_) | QueryError::Forbidden => Remedy::ChangeInput,
            QueryError::Store(_) => Remedy::RetryLater,
        }
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::Validation(e) => write!(f, "{e}"),
            QueryError::Forbidden => write!(f, "admin access required"),
            QueryError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<ValidationError> for QueryError {
    fn from(e: ValidationError) -> Self {
        QueryError::Validation(e)
    }
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        QueryError::Store(e)
    }
}
