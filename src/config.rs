//! Runtime configuration. Defaults match the laundry-room deployment; every
//! field can be overridden through a `WASHSLOT_*` environment variable.

use std::path::PathBuf;
use std::str::FromStr;

use crate::limits::{MAX_DURATION_MINUTES, MAX_RESOURCE_ID_LEN, MAX_RESOURCES};
use crate::model::{Minute, Ms};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    pub id: String,
    pub name: String,
}

impl ResourceConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub resources: Vec<ResourceConfig>,
    /// Max reservations dated today or later per user.
    pub booking_limit: usize,
    /// Age at which a slot lock may be reclaimed.
    pub lock_expiration_ms: Ms,
    /// Start times must be a multiple of this.
    pub slot_minutes: Minute,
    pub allowed_durations: Vec<Minute>,
    pub phone_prefix: String,
    pub phone_digits: usize,
    pub pin_length: usize,
    /// When false a PIN is optional; PIN-less reservations are admin-only deletable.
    pub require_pin: bool,
    pub min_name_len: usize,
    pub history_limit: usize,
    /// A commit slower than this is reported as an unknown outcome.
    pub commit_timeout_ms: u64,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            resources: vec![
                ResourceConfig::new("masina1", "Mașină Spălat 1"),
                ResourceConfig::new("masina2", "Mașină Spălat 2"),
                ResourceConfig::new("uscator1", "Uscător 1"),
                ResourceConfig::new("uscator2", "Uscător 2"),
            ],
            booking_limit: 4,
            lock_expiration_ms: 300_000,
            slot_minutes: 30,
            allowed_durations: vec![30, 60, 90, 120],
            phone_prefix: "07".into(),
            phone_digits: 10,
            pin_length: 4,
            require_pin: true,
            min_name_len: 3,
            history_limit: 50,
            commit_timeout_ms: 5_000,
            compact_threshold: 1_000,
            metrics_port: None,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `id=Display Name,id2=Other` -> resources. Entries without `=` use the id as name.
pub fn parse_resources(raw: &str) -> Option<Vec<ResourceConfig>> {
    let mut out: Vec<ResourceConfig> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, name) = entry.split_once('=').unwrap_or((entry, entry));
        let (id, name) = (id.trim(), name.trim());
        if id.is_empty() || id.len() > MAX_RESOURCE_ID_LEN || out.iter().any(|r| r.id == id) {
            return None;
        }
        out.push(ResourceConfig::new(id, name));
    }
    if out.is_empty() || out.len() > MAX_RESOURCES {
        return None;
    }
    Some(out)
}

/// `30,60,90` -> sorted, deduplicated, each in `1..=1440`.
pub fn parse_durations(raw: &str) -> Option<Vec<Minute>> {
    let mut out = raw
        .split(',')
        .map(|s| s.trim().parse::<Minute>().ok())
        .collect::<Option<Vec<_>>>()?;
    if out.is_empty() || out.iter().any(|&d| d == 0 || d > MAX_DURATION_MINUTES) {
        return None;
    }
    out.sort_unstable();
    out.dedup();
    Some(out)
}

impl Config {
    /// Defaults overridden by whatever `WASHSLOT_*` variables parse. Malformed
    /// values fall back to the default.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(dir) = std::env::var("WASHSLOT_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(resources) = std::env::var("WASHSLOT_RESOURCES")
            .ok()
            .and_then(|raw| parse_resources(&raw))
        {
            cfg.resources = resources;
        }
        if let Some(durations) = std::env::var("WASHSLOT_DURATIONS")
            .ok()
            .and_then(|raw| parse_durations(&raw))
        {
            cfg.allowed_durations = durations;
        }
        if let Ok(prefix) = std::env::var("WASHSLOT_PHONE_PREFIX") {
            cfg.phone_prefix = prefix.trim().to_string();
        }
        cfg.booking_limit = env_parse("WASHSLOT_BOOKING_LIMIT").unwrap_or(cfg.booking_limit);
        cfg.lock_expiration_ms = env_parse("WASHSLOT_LOCK_EXPIRATION_MS")
            .filter(|&ms: &Ms| ms > 0)
            .unwrap_or(cfg.lock_expiration_ms);
        cfg.slot_minutes = env_parse("WASHSLOT_SLOT_MINUTES")
            .filter(|&m: &Minute| m > 0 && MAX_DURATION_MINUTES % m == 0)
            .unwrap_or(cfg.slot_minutes);
        cfg.phone_digits = env_parse("WASHSLOT_PHONE_DIGITS").unwrap_or(cfg.phone_digits);
        cfg.pin_length = env_parse("WASHSLOT_PIN_LENGTH")
            .filter(|&n: &usize| n > 0)
            .unwrap_or(cfg.pin_length);
        cfg.require_pin = env_bool("WASHSLOT_REQUIRE_PIN").unwrap_or(cfg.require_pin);
        cfg.min_name_len = env_parse("WASHSLOT_MIN_NAME_LEN").unwrap_or(cfg.min_name_len);
        cfg.history_limit = env_parse("WASHSLOT_HISTORY_LIMIT").unwrap_or(cfg.history_limit);
        cfg.commit_timeout_ms =
            env_parse("WASHSLOT_COMMIT_TIMEOUT_MS").unwrap_or(cfg.commit_timeout_ms);
        cfg.compact_threshold =
            env_parse("WASHSLOT_COMPACT_THRESHOLD").unwrap_or(cfg.compact_threshold);
        cfg.metrics_port = env_parse("WASHSLOT_METRICS_PORT");
        cfg
    }

    pub fn resource(&self, id: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
