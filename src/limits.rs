//! Hard limits enforced by the store and the admission path.

use crate::model::Minute;

pub const MAX_RESOURCES: usize = 64;
pub const MAX_RESOURCE_ID_LEN: usize = 64;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;
pub const MAX_NAME_LEN: usize = 80;

/// A reservation may spill into the next day but never past it.
pub const MAX_DURATION_MINUTES: Minute = 1440;

/// Largest encoded WAL record; longer length words are treated as corruption.
pub const MAX_WAL_RECORD_BYTES: usize = 1 << 20;

pub const MAX_HISTORY_LIMIT: usize = 500;
pub const MAX_SEARCH_TERM_LEN: usize = 80;

/// Argon2id cost for PIN hashes (KiB of memory, passes).
pub const PIN_HASH_MEMORY_KIB: u32 = 4096;
pub const PIN_HASH_ITERATIONS: u32 = 2;
