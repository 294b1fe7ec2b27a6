//! Tap audit log queries.

use tapgate_core::db::{DatabaseError, unix_timestamp};

use super::db::Database;
use super::models::{EventFilter, NewTapEvent, TapEvent, TapEventRow};

/// Page size when a caller does not ask for one.
const DEFAULT_EVENT_LIMIT: u32 = 100;

impl Database {
    /// Append one event to the audit log.
    pub async fn append_event(&self, event: &NewTapEvent<'_>) -> Result<TapEvent, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "INSERT INTO tap_events (card_id, site_id, name, access, reason, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.card_id)
        .bind(event.site_id)
        .bind(event.name)
        .bind(event.reason.outcome().as_str())
        .bind(event.reason.as_str())
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(TapEvent {
            id: result.last_insert_rowid(),
            card_id: event.card_id.to_string(),
            site_id: event.site_id.map(str::to_string),
            name: event.name.map(str::to_string),
            access: event.reason.outcome(),
            reason: event.reason,
            created_at: now,
        })
    }

    /// List events, newest first.
    pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<TapEvent>, DatabaseError> {
        let limit = i64::from(filter.limit.unwrap_or(DEFAULT_EVENT_LIMIT));

        let rows = if let Some(card_id) = &filter.card_id {
            sqlx::query_as::<_, TapEventRow>(
                "SELECT * FROM tap_events WHERE card_id = ? ORDER BY id DESC LIMIT ?",
            )
            .bind(card_id)
            .bind(limit)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, TapEventRow>("SELECT * FROM tap_events ORDER BY id DESC LIMIT ?")
                .bind(limit)
                .fetch_all(self.pool())
                .await?
        };

        rows.into_iter().map(TapEvent::try_from).collect()
    }

    /// Total number of events in the log.
    pub async fn count_events(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tap_events")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Record a manual buzzer trigger. Returns the new row id.
    pub async fn append_buzzer_event(
        &self,
        card_id: &str,
        duration_ms: i64,
    ) -> Result<i64, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO buzzer_events (card_id, duration_ms, created_at) VALUES (?, ?, ?)",
        )
        .bind(card_id)
        .bind(duration_ms)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Delete tap and buzzer events created strictly before `cutoff` (unix
    /// seconds).
    pub async fn prune_events_before(&self, cutoff: i64) -> Result<u64, DatabaseError> {
        let taps = sqlx::query("DELETE FROM tap_events WHERE created_at < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;
        let buzzers = sqlx::query("DELETE FROM buzzer_events WHERE created_at < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;

        Ok(taps.rows_affected() + buzzers.rows_affected())
    }
}
