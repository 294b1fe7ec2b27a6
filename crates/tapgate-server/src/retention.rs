//! Background pruning of old tap events.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use tapgate_core::db::{DatabaseError, unix_timestamp};

use crate::storage::Database;

const SECONDS_PER_DAY: i64 = 86_400;
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Delete events older than `days` days. Returns the number removed.
pub async fn prune_once(db: &Database, days: u32) -> Result<u64, DatabaseError> {
    let cutoff = unix_timestamp() - i64::from(days) * SECONDS_PER_DAY;
    db.prune_events_before(cutoff).await
}

/// Spawn the hourly pruning loop. The first pass runs immediately.
pub fn spawn_event_retention(db: Database, days: u32) -> JoinHandle<()> {
    info!(days, "Tap event retention enabled");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            match prune_once(&db, days).await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "Pruned expired tap events");
                }
                Err(e) => {
                    warn!(error = %e, "Tap event pruning failed");
                }
                _ => {}
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::EventFilter;

    #[tokio::test]
    async fn prune_keeps_recent_events() {
        let db = Database::open_in_memory().await.unwrap();
        let old = unix_timestamp() - 10 * SECONDS_PER_DAY;
        sqlx::query(
            "INSERT INTO tap_events (card_id, site_id, name, access, reason, created_at) VALUES ('OLD', NULL, NULL, 'denied', 'not_registered', ?)",
        )
        .bind(old)
        .execute(db.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO tap_events (card_id, site_id, name, access, reason, created_at) VALUES ('NEW', NULL, NULL, 'denied', 'not_registered', ?)",
        )
        .bind(unix_timestamp())
        .execute(db.pool())
        .await
        .unwrap();

        assert_eq!(prune_once(&db, 7).await.unwrap(), 1);

        let left = db.list_events(&EventFilter::default()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].card_id, "NEW");
    }
}
