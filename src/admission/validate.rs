//! Request validation. Pure, no store access: everything here fails fast.

use chrono::NaiveDate;

use crate::config::Config;
use crate::limits::{MAX_NAME_LEN, MAX_SEARCH_TERM_LEN};
use crate::model::Minute;
use crate::time::{parse_date, parse_time};

use super::BookingRequest;
use super::error::ValidationError;

/// A request whose fields are all well-formed and canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidBooking {
    pub resource_id: String,
    pub date: NaiveDate,
    pub start: Minute,
    pub duration: Minute,
    pub user_name: String,
    pub phone_number: String,
    pub pin: Option<String>,
}

/// Trim, collapse inner whitespace, title-case each word.
pub fn canonical_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Strip separators; the rest must be exactly `phone_digits` digits with the
/// configured prefix.
pub fn normalize_phone(raw: &str, cfg: &Config) -> Result<String, ValidationError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != cfg.phone_digits || !digits.starts_with(&cfg.phone_prefix) {
        return Err(ValidationError::InvalidPhone {
            digits: cfg.phone_digits,
            prefix: cfg.phone_prefix.clone(),
        });
    }
    Ok(digits)
}

/// `None` is accepted only when PINs are optional.
pub fn check_pin(pin: Option<&str>, cfg: &Config) -> Result<Option<String>, ValidationError> {
    let invalid = ValidationError::InvalidPin {
        length: cfg.pin_length,
    };
    match pin.map(str::trim).filter(|p| !p.is_empty()) {
        None if cfg.require_pin => Err(invalid),
        None => Ok(None),
        Some(p) if p.len() == cfg.pin_length && p.bytes().all(|b| b.is_ascii_digit()) => {
            Ok(Some(p.to_string()))
        }
        Some(_) => Err(invalid),
    }
}

pub fn check_resource(resource_id: &str, cfg: &Config) -> Result<String, ValidationError> {
    let id = resource_id.trim();
    if id.is_empty() {
        return Err(ValidationError::MissingField("machine"));
    }
    cfg.resource(id)
        .map(|r| r.id.clone())
        .ok_or_else(|| ValidationError::UnknownResource(id.to_string()))
}

pub fn check_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    parse_date(raw).ok_or_else(|| ValidationError::InvalidDate(raw.to_string()))
}

pub fn check_search_term(term: &str) -> Result<String, ValidationError> {
    let term = term.trim();
    if term.chars().count() > MAX_SEARCH_TERM_LEN {
        return Err(ValidationError::SearchTermTooLong {
            max: MAX_SEARCH_TERM_LEN,
        });
    }
    Ok(term.to_lowercase())
}

pub fn validate_booking(req: &BookingRequest, cfg: &Config) -> Result<ValidBooking, ValidationError> {
    let start_raw = req.start_time.trim();
    if start_raw.is_empty() {
        return Err(ValidationError::MissingField("start time"));
    }
    let resource_id = check_resource(&req.resource_id, cfg)?;
    let date = check_date(&req.date)?;
    let start =
        parse_time(start_raw).ok_or_else(|| ValidationError::InvalidTime(start_raw.to_string()))?;
    if start % cfg.slot_minutes != 0 {
        return Err(ValidationError::MisalignedStart {
            start,
            slot_minutes: cfg.slot_minutes,
        });
    }
    if !cfg.allowed_durations.contains(&req.duration_minutes) {
        return Err(ValidationError::InvalidDuration(req.duration_minutes));
    }

    let user_name = canonical_name(&req.user_name);
    let name_len = user_name.chars().count();
    if name_len < cfg.min_name_len.max(1) {
        return Err(ValidationError::NameTooShort {
            min: cfg.min_name_len.max(1),
        });
    }
    if user_name.len() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong { max: MAX_NAME_LEN });
    }

    let phone_number = normalize_phone(&req.phone_number, cfg)?;
    let pin = check_pin(req.pin.as_deref(), cfg)?;

    Ok(ValidBooking {
        resource_id,
        date,
        start,
        duration: req.duration_minutes,
        user_name,
        phone_number,
        pin,
    })
}
