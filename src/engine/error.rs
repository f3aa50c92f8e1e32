use ulid::Ulid;

use crate::model::SlotKey;

#[derive(Debug)]
pub enum StoreError {
    NotFound(Ulid),
    UnknownResource(String),
    /// The lock key names a different slot than the reservation it guards.
    KeyMismatch(SlotKey),
    /// A fresh lock already guards this key. The race-losing outcome.
    SlotTaken(SlotKey),
    /// The commit-time overlap check found this reservation in the way.
    Conflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl StoreError {
    /// Both ways of losing a slot at commit time.
    pub fn is_slot_contention(&self) -> bool {
        matches!(self, StoreError::SlotTaken(_) | StoreError::Conflict(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "reservation not found: {id}"),
            StoreError::UnknownResource(id) => write!(f, "unknown resource: {id}"),
            StoreError::KeyMismatch(key) => write!(f, "lock key does not match reservation: {key}"),
            StoreError::SlotTaken(key) => write!(f, "slot already taken: {key}"),
            StoreError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
