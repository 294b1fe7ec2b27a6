//! Card record queries.

use std::collections::BTreeMap;

use tapgate_core::card::{AccessLevel, CardPatch, CardRecord};

use super::db::Database;
use super::models::{CardFilter, CardRow};
use tapgate_core::db::DatabaseError;

impl Database {
    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get a card record by its identifier (exact, case-sensitive).
    pub async fn find_by_id(&self, card_id: &str) -> Result<Option<CardRecord>, DatabaseError> {
        sqlx::query_as::<_, CardRow>("SELECT * FROM cards WHERE card_id = ?")
            .bind(card_id)
            .fetch_optional(self.pool())
            .await?
            .map(CardRecord::try_from)
            .transpose()
    }

    /// Find a record by display name (case-insensitive) and employee id (exact).
    ///
    /// Name folding happens in Rust: `SQLite`'s `lower()` only folds ASCII.
    pub async fn find_by_name_and_employee(
        &self,
        name: &str,
        employee_id: &str,
    ) -> Result<Option<CardRecord>, DatabaseError> {
        let rows = sqlx::query_as::<_, CardRow>(
            "SELECT * FROM cards WHERE employee_id = ? ORDER BY created_at, card_id",
        )
        .bind(employee_id)
        .fetch_all(self.pool())
        .await?;

        for row in rows {
            let record = CardRecord::try_from(row)?;
            if record.name_matches(name) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Find a record by card identifier whose name matches case-insensitively.
    pub async fn find_by_id_and_name(
        &self,
        card_id: &str,
        name: &str,
    ) -> Result<Option<CardRecord>, DatabaseError> {
        Ok(self
            .find_by_id(card_id)
            .await?
            .filter(|record| record.name_matches(name)))
    }

    /// List records, optionally restricted to one site.
    pub async fn list(&self, filter: &CardFilter) -> Result<Vec<CardRecord>, DatabaseError> {
        let rows = if let Some(site_id) = &filter.site_id {
            sqlx::query_as::<_, CardRow>(
                "SELECT * FROM cards WHERE site_id = ? ORDER BY created_at, card_id",
            )
            .bind(site_id)
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as::<_, CardRow>("SELECT * FROM cards ORDER BY created_at, card_id")
                .fetch_all(self.pool())
                .await?
        };

        rows.into_iter().map(CardRecord::try_from).collect()
    }

    /// Number of stored records per access level. Every known level is
    /// present, with zero when no record holds it.
    pub async fn count_by_access_level(
        &self,
    ) -> Result<BTreeMap<AccessLevel, i64>, DatabaseError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT access_level, COUNT(*) FROM cards GROUP BY access_level")
                .fetch_all(self.pool())
                .await?;

        let mut counts: BTreeMap<AccessLevel, i64> =
            AccessLevel::ALL.into_iter().map(|level| (level, 0)).collect();
        for (level, count) in rows {
            let level = level
                .parse::<AccessLevel>()
                .map_err(|e| DatabaseError::Corrupt(e.to_string()))?;
            *counts.entry(level).or_default() += count;
        }
        Ok(counts)
    }

    /// Total number of stored records.
    pub async fn count_cards(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cards")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert a record, or fully replace the one stored under its card id.
    pub async fn upsert(&self, record: &CardRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO cards (card_id, name, employee_id, access_level, site_id, valid_until, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(card_id) DO UPDATE SET \
               name = excluded.name, \
               employee_id = excluded.employee_id, \
               access_level = excluded.access_level, \
               site_id = excluded.site_id, \
               valid_until = excluded.valid_until, \
               created_at = excluded.created_at",
        )
        .bind(&record.card_id)
        .bind(&record.name)
        .bind(&record.employee_id)
        .bind(record.access_level.as_str())
        .bind(&record.site_id)
        .bind(&record.valid_until)
        .bind(record.created_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Apply a partial update. Returns the updated record, or `None` when no
    /// record exists under `card_id`.
    pub async fn update(
        &self,
        card_id: &str,
        patch: CardPatch,
    ) -> Result<Option<CardRecord>, DatabaseError> {
        let Some(mut record) = self.find_by_id(card_id).await? else {
            return Ok(None);
        };
        patch.apply(&mut record);

        sqlx::query(
            "UPDATE cards SET name = ?, employee_id = ?, access_level = ?, site_id = ?, valid_until = ? \
             WHERE card_id = ?",
        )
        .bind(&record.name)
        .bind(&record.employee_id)
        .bind(record.access_level.as_str())
        .bind(&record.site_id)
        .bind(&record.valid_until)
        .bind(card_id)
        .execute(self.pool())
        .await?;

        Ok(Some(record))
    }

    /// Delete a record. Returns `true` if a row was removed; deleting an
    /// unknown card is not an error.
    pub async fn delete(&self, card_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM cards WHERE card_id = ?")
            .bind(card_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
