//! Card records and access levels.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Wire and storage format of an expiry date.
pub const EXPIRY_FORMAT: &str = "%Y-%m-%d";

/// Access tier of a card, ordered `guest < basic < premium < admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    Guest,
    Basic,
    Premium,
    Admin,
}

impl AccessLevel {
    /// Every known level, lowest first.
    pub const ALL: [Self; 4] = [Self::Guest, Self::Basic, Self::Premium, Self::Admin];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = Error;

    /// Parses a level name case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == lowered)
            .ok_or_else(|| Error::InvalidField {
                field: "access_level",
                reason: format!("unknown access level '{s}'"),
            })
    }
}

/// Classified expiry of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No expiry date stored.
    Never,
    /// A well-formed calendar date.
    On(NaiveDate),
    /// A stored value that is not a `YYYY-MM-DD` date.
    Malformed,
}

impl Expiry {
    /// Classify a raw stored expiry value.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => Self::Never,
            Some(value) => NaiveDate::parse_from_str(value.trim(), EXPIRY_FORMAT)
                .map_or(Self::Malformed, Self::On),
        }
    }
}

/// A user/card record keyed by card identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub card_id: String,
    pub name: String,
    pub employee_id: Option<String>,
    pub access_level: AccessLevel,
    pub site_id: Option<String>,
    /// Raw stored expiry; classified with [`CardRecord::expiry`].
    pub valid_until: Option<String>,
    pub created_at: i64,
}

impl CardRecord {
    pub fn expiry(&self) -> Expiry {
        Expiry::parse(self.valid_until.as_deref())
    }

    /// The sanitised projection handed to API clients.
    pub fn view(&self) -> UserView {
        UserView {
            card_id: self.card_id.clone(),
            name: self.name.clone(),
            employee_id: self.employee_id.clone(),
            access_level: self.access_level,
            site_id: self.site_id.clone(),
            valid_until: self.valid_until.clone(),
        }
    }

    /// Case-insensitive name comparison used by login and secondary lookups.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.trim().to_lowercase()
    }
}

/// Sanitised user view. Never carries storage-internal fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    pub card_id: String,
    pub name: String,
    pub employee_id: Option<String>,
    pub access_level: AccessLevel,
    pub site_id: Option<String>,
    pub valid_until: Option<String>,
}

/// Trim an optional text field; blank collapses to `None`.
pub fn normalize_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Trim a required text field, rejecting blanks.
pub fn require_field(value: Option<&str>, field: &'static str) -> Result<String, Error> {
    normalize_optional(value).ok_or(Error::MissingField(field))
}

/// Raw partial-update fields as submitted by a client.
///
/// Absent fields are left untouched; a blank optional field clears it. A
/// blank `access_level` leaves the level untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateForm {
    pub name: Option<String>,
    pub employee_id: Option<String>,
    pub access_level: Option<String>,
    pub valid_until: Option<String>,
    pub site_id: Option<String>,
}

/// A validated partial update of a [`CardRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardPatch {
    pub name: Option<String>,
    pub employee_id: Option<Option<String>>,
    pub access_level: Option<AccessLevel>,
    pub valid_until: Option<Option<String>>,
    pub site_id: Option<Option<String>>,
}

impl TryFrom<&UpdateForm> for CardPatch {
    type Error = Error;

    fn try_from(form: &UpdateForm) -> Result<Self, Self::Error> {
        let name = form
            .name
            .as_deref()
            .map(|n| require_field(Some(n), "name"))
            .transpose()?;
        let access_level = normalize_optional(form.access_level.as_deref())
            .map(|l| l.parse::<AccessLevel>())
            .transpose()?;
        let valid_until = form
            .valid_until
            .as_deref()
            .map(|v| crate::registration::parse_valid_until(Some(v)))
            .transpose()?;

        Ok(Self {
            name,
            employee_id: form.employee_id.as_deref().map(|v| normalize_optional(Some(v))),
            access_level,
            valid_until,
            site_id: form.site_id.as_deref().map(|v| normalize_optional(Some(v))),
        })
    }
}

impl CardPatch {
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.employee_id.is_none()
            && self.access_level.is_none()
            && self.valid_until.is_none()
            && self.site_id.is_none()
    }

    /// Apply the patch. `card_id` and `created_at` never change.
    pub fn apply(self, record: &mut CardRecord) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(employee_id) = self.employee_id {
            record.employee_id = employee_id;
        }
        if let Some(level) = self.access_level {
            record.access_level = level;
        }
        if let Some(valid_until) = self.valid_until {
            record.valid_until = valid_until;
        }
        if let Some(site_id) = self.site_id {
            record.site_id = site_id;
        }
    }
}
