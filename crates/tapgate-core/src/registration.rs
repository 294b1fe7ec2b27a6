//! Card registration and the re-registration conflict policy.
//!
//! A card may be registered over an existing record only when that record
//! is not currently active. Active means a non-guest tier whose expiry is
//! absent or today-or-later. A stored expiry that does not parse counts as
//! inactive, so a corrupt date never locks a card out of re-registration.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::card::{
    AccessLevel, CardRecord, EXPIRY_FORMAT, Expiry, normalize_optional, require_field,
};
use crate::error::{Error, Result};

/// Message returned when an active card blocks registration.
pub const CONFLICT_MESSAGE: &str = "Card already active - cannot register";

/// Raw registration fields as submitted by a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationForm {
    pub card_id: Option<String>,
    pub name: Option<String>,
    pub employee_id: Option<String>,
    pub access_level: Option<String>,
    pub valid_until: Option<String>,
    pub site_id: Option<String>,
}

/// A validated registration with defaults resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub card_id: String,
    pub name: String,
    pub employee_id: Option<String>,
    pub access_level: AccessLevel,
    pub site_id: Option<String>,
    pub valid_until: Option<String>,
}

impl TryFrom<&RegistrationForm> for Registration {
    type Error = Error;

    fn try_from(form: &RegistrationForm) -> Result<Self> {
        let card_id = require_field(form.card_id.as_deref(), "card_id")?;
        let name = require_field(form.name.as_deref(), "name")?;
        let access_level = parse_level(form.access_level.as_deref())?;
        let valid_until = parse_valid_until(form.valid_until.as_deref())?;

        Ok(Self {
            card_id,
            name,
            employee_id: normalize_optional(form.employee_id.as_deref()),
            access_level,
            site_id: normalize_optional(form.site_id.as_deref()),
            valid_until,
        })
    }
}

impl Registration {
    /// Build the record that replaces whatever is stored under `card_id`.
    pub fn into_record(self, created_at: i64) -> CardRecord {
        CardRecord {
            card_id: self.card_id,
            name: self.name,
            employee_id: self.employee_id,
            access_level: self.access_level,
            site_id: self.site_id,
            valid_until: self.valid_until,
            created_at,
        }
    }
}

/// An absent or blank level defaults to guest.
pub fn parse_level(raw: Option<&str>) -> Result<AccessLevel> {
    normalize_optional(raw).map_or(Ok(AccessLevel::Guest), |level| level.parse())
}

/// Accept a blank expiry as "none"; anything else must be `YYYY-MM-DD`.
pub fn parse_valid_until(raw: Option<&str>) -> Result<Option<String>> {
    let Some(value) = normalize_optional(raw) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&value, EXPIRY_FORMAT).map_err(|e| Error::InvalidField {
        field: "valid_until",
        reason: format!("expected YYYY-MM-DD ({e})"),
    })?;
    Ok(Some(value))
}

/// What a registration may do given the currently stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationVerdict {
    /// No record exists under the card identifier.
    Insert,
    /// An inactive record exists and will be fully replaced.
    Overwrite,
    /// An active record blocks the registration.
    Conflict,
}

impl RegistrationVerdict {
    pub const fn is_allowed(self) -> bool {
        !matches!(self, Self::Conflict)
    }
}

/// Whether `record` currently holds its card.
pub fn is_active(record: &CardRecord, today: NaiveDate) -> bool {
    if record.access_level == AccessLevel::Guest {
        return false;
    }
    match record.expiry() {
        Expiry::Never => true,
        Expiry::On(date) => date >= today,
        Expiry::Malformed => false,
    }
}

/// Decide whether a registration may write over `existing`.
pub fn check(existing: Option<&CardRecord>, today: NaiveDate) -> RegistrationVerdict {
    match existing {
        None => RegistrationVerdict::Insert,
        Some(record) if is_active(record, today) => RegistrationVerdict::Conflict,
        Some(_) => RegistrationVerdict::Overwrite,
    }
}
