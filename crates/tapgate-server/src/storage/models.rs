//! Data models for `TapGate` storage.

use serde::{Deserialize, Serialize};
use tapgate_core::access::{AccessOutcome, ReasonCode};
use tapgate_core::card::{AccessLevel, CardRecord};
use tapgate_core::db::DatabaseError;

/// Row shape of the `cards` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CardRow {
    pub card_id: String,
    pub name: String,
    pub employee_id: Option<String>,
    pub access_level: String,
    pub site_id: Option<String>,
    pub valid_until: Option<String>,
    pub created_at: i64,
}

impl TryFrom<CardRow> for CardRecord {
    type Error = DatabaseError;

    fn try_from(row: CardRow) -> Result<Self, Self::Error> {
        let access_level = row.access_level.parse::<AccessLevel>().map_err(|e| {
            DatabaseError::Corrupt(format!("card {}: {e}", row.card_id))
        })?;
        Ok(Self {
            card_id: row.card_id,
            name: row.name,
            employee_id: row.employee_id,
            access_level,
            site_id: row.site_id,
            valid_until: row.valid_until,
            created_at: row.created_at,
        })
    }
}

/// Row shape of the `tap_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TapEventRow {
    pub id: i64,
    pub card_id: String,
    pub site_id: Option<String>,
    pub name: Option<String>,
    pub access: String,
    pub reason: String,
    pub created_at: i64,
}

/// One entry of the append-only tap audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapEvent {
    pub id: i64,
    pub card_id: String,
    pub site_id: Option<String>,
    /// Name of the registered user, when there was one at tap time.
    pub name: Option<String>,
    pub access: AccessOutcome,
    pub reason: ReasonCode,
    pub created_at: i64,
}

impl TryFrom<TapEventRow> for TapEvent {
    type Error = DatabaseError;

    fn try_from(row: TapEventRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt =
            move |e: tapgate_core::Error| DatabaseError::Corrupt(format!("event {id}: {e}"));
        let access = row.access.parse::<AccessOutcome>().map_err(corrupt)?;
        let reason = row.reason.parse::<ReasonCode>().map_err(corrupt)?;
        Ok(Self {
            id,
            card_id: row.card_id,
            site_id: row.site_id,
            name: row.name,
            access,
            reason,
            created_at: row.created_at,
        })
    }
}

/// Parameters for appending a tap event.
pub struct NewTapEvent<'a> {
    pub card_id: &'a str,
    pub site_id: Option<&'a str>,
    pub name: Option<&'a str>,
    pub reason: ReasonCode,
}

/// Filter for listing card records.
#[derive(Debug, Clone, Default)]
pub struct CardFilter {
    /// Only cards assigned to this site.
    pub site_id: Option<String>,
}

/// Filter for listing tap events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub card_id: Option<String>,
    pub limit: Option<u32>,
}
