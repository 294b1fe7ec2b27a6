//! Access evaluation for card taps.
//!
//! Decides grant or deny for a presented card at a reader's site. Checks run
//! in a fixed order and the first failing check wins:
//!
//! 1. the card must be registered
//! 2. with site scoping on, a site-bound card must be tapped at its site
//! 3. a stored expiry must parse and must not be before today
//!
//! A malformed stored expiry denies access. Registration treats the same
//! value the other way round, see [`crate::registration`].

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::card::{CardRecord, Expiry, UserView};
use crate::error::Error;

/// Deployment-level knobs for access evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Deny site-bound cards tapped at another site.
    pub site_scoping: bool,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self { site_scoping: true }
    }
}

/// Final outcome of a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOutcome {
    Granted,
    Denied,
}

impl AccessOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for AccessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            other => Err(Error::InvalidField {
                field: "access",
                reason: format!("unknown outcome '{other}'"),
            }),
        }
    }
}

/// Machine-readable reason attached to every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Granted,
    NotRegistered,
    WrongSite,
    Expired,
    InvalidExpiry,
}

impl ReasonCode {
    const ALL: [Self; 5] = [
        Self::Granted,
        Self::NotRegistered,
        Self::WrongSite,
        Self::Expired,
        Self::InvalidExpiry,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::NotRegistered => "not_registered",
            Self::WrongSite => "wrong_site",
            Self::Expired => "expired",
            Self::InvalidExpiry => "invalid_expiry",
        }
    }

    /// Human-readable message shown to readers and dashboards.
    pub const fn message(self) -> &'static str {
        match self {
            Self::Granted => "Access granted",
            Self::NotRegistered => "Card not registered",
            Self::WrongSite => "Wrong site",
            Self::Expired => "Card expired",
            Self::InvalidExpiry => "Invalid expiry",
        }
    }

    pub const fn outcome(self) -> AccessOutcome {
        match self {
            Self::Granted => AccessOutcome::Granted,
            _ => AccessOutcome::Denied,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| Error::InvalidField {
                field: "reason",
                reason: format!("unknown reason code '{s}'"),
            })
    }
}

/// Result of evaluating one tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub reason: ReasonCode,
    /// Present only when access is granted.
    pub user: Option<UserView>,
}

impl AccessDecision {
    const fn deny(reason: ReasonCode) -> Self {
        Self { reason, user: None }
    }

    pub const fn outcome(&self) -> AccessOutcome {
        self.reason.outcome()
    }

    pub const fn is_granted(&self) -> bool {
        matches!(self.outcome(), AccessOutcome::Granted)
    }
}

/// Today's calendar date in the server's local time zone.
pub fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Evaluate a tap of `record`'s card at `site_id` on `today`.
///
/// `record` is `None` when the card identifier has no stored record.
/// Identifiers are compared byte-for-byte.
pub fn evaluate(
    record: Option<&CardRecord>,
    site_id: Option<&str>,
    policy: &AccessPolicy,
    today: NaiveDate,
) -> AccessDecision {
    let Some(record) = record else {
        return AccessDecision::deny(ReasonCode::NotRegistered);
    };

    if policy.site_scoping {
        if let Some(assigned) = record.site_id.as_deref() {
            if site_id != Some(assigned) {
                return AccessDecision::deny(ReasonCode::WrongSite);
            }
        }
    }

    match record.expiry() {
        Expiry::Malformed => return AccessDecision::deny(ReasonCode::InvalidExpiry),
        Expiry::On(date) if date < today => return AccessDecision::deny(ReasonCode::Expired),
        Expiry::On(_) | Expiry::Never => {}
    }

    AccessDecision {
        reason: ReasonCode::Granted,
        user: Some(record.view()),
    }
}
