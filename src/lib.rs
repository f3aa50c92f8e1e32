pub mod admission;
pub mod config;
pub mod console;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod overlap;
pub mod pin;
pub mod quota;
pub mod reaper;
pub mod store;
pub mod time;
pub mod wal;
