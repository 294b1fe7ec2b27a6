//! Gate service: the operations behind the HTTP surface.
//!
//! Composes the card store, the access and registration policies from
//! `tapgate-core`, the audit log, and the live notifier.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use tapgate_core::access::{self, AccessDecision, AccessPolicy, ReasonCode};
use tapgate_core::card::{
    AccessLevel, CardPatch, CardRecord, Expiry, UpdateForm, UserView, normalize_optional,
    require_field,
};
use tapgate_core::db::unix_timestamp;
use tapgate_core::registration::{self, Registration, RegistrationForm, RegistrationVerdict};

use crate::error::{ApiError, ApiResult};
use crate::notifier::{EventNotifier, Notification};
use crate::storage::{CardFilter, Database, EventFilter, NewTapEvent, TapEvent};

/// Buzzer duration when the operator does not give one.
pub const DEFAULT_BUZZER_MS: u64 = 200;

/// How the next tap should be treated by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderMode {
    /// Normal access control.
    #[default]
    Read,
    /// Capture the next tapped UID for provisioning, then fall back to read.
    Write,
}

impl fmt::Display for ReaderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

impl FromStr for ReaderMode {
    type Err = tapgate_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            other => Err(tapgate_core::Error::InvalidField {
                field: "mode",
                reason: format!("expected 'read' or 'write', got '{other}'"),
            }),
        }
    }
}

/// Result of one tap.
#[derive(Debug, Clone)]
pub struct TapOutcome {
    pub decision: AccessDecision,
    pub event: TapEvent,
    pub mode: ReaderMode,
}

/// Result of a well-formed registration request.
#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    Saved { created: bool, user: UserView },
    Conflict,
}

/// Result of a buzzer trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuzzerOutcome {
    pub event_id: i64,
    /// Observers the notification was queued for.
    pub delivered: usize,
}

/// Identity presented to `login`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    pub name: Option<String>,
    pub employee_id: Option<String>,
    pub card_id: Option<String>,
}

/// Gate operations over shared state. Cheap to clone.
#[derive(Clone)]
pub struct Gate {
    db: Database,
    notifier: EventNotifier,
    policy: AccessPolicy,
    mode: Arc<RwLock<ReaderMode>>,
}

impl Gate {
    pub fn new(db: Database, notifier: EventNotifier, policy: AccessPolicy) -> Self {
        Self {
            db,
            notifier,
            policy,
            mode: Arc::new(RwLock::new(ReaderMode::Read)),
        }
    }

    pub const fn db(&self) -> &Database {
        &self.db
    }

    pub const fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    // =========================================================================
    // Taps
    // =========================================================================

    /// Evaluate a tap, append one audit event and publish one notification.
    ///
    /// With site scoping on, the reader must name its site.
    #[instrument(skip(self), fields(op = "tap"))]
    pub async fn tap(&self, card_id: Option<&str>, site_id: Option<&str>) -> ApiResult<TapOutcome> {
        let card_id = require_field(card_id, "card_id")?;
        let site_id = normalize_optional(site_id);
        if self.policy.site_scoping && site_id.is_none() {
            return Err(tapgate_core::Error::MissingField("site_id").into());
        }

        let record = self.db.find_by_id(&card_id).await?;
        let decision = access::evaluate(
            record.as_ref(),
            site_id.as_deref(),
            &self.policy,
            access::local_today(),
        );
        if decision.reason == ReasonCode::InvalidExpiry {
            warn!(
                card_id = %card_id,
                valid_until = ?record.as_ref().and_then(|r| r.valid_until.as_deref()),
                "Stored expiry is malformed, denying access"
            );
        }

        let event = self
            .db
            .append_event(&NewTapEvent {
                card_id: &card_id,
                site_id: site_id.as_deref(),
                name: record.as_ref().map(|r| r.name.as_str()),
                reason: decision.reason,
            })
            .await?;

        let mode = self.take_mode().await;

        self.notifier.publish(Notification::CardScanned {
            event_id: event.id,
            card_id: event.card_id.clone(),
            site_id: event.site_id.clone(),
            name: event.name.clone(),
            access: event.access,
            reason: event.reason,
            message: event.reason.message().to_string(),
            mode,
            created_at: event.created_at,
        });

        info!(
            card_id = %card_id,
            site_id = ?site_id,
            access = %decision.outcome(),
            reason = %decision.reason,
            mode = %mode,
            "Tap evaluated"
        );

        Ok(TapOutcome {
            decision,
            event,
            mode,
        })
    }

    // =========================================================================
    // Registration and records
    // =========================================================================

    /// Register a card, replacing an inactive record under the same id.
    ///
    /// The lookup and the write are separate statements; two concurrent
    /// registrations of one card can both pass the conflict check.
    #[instrument(skip(self, form), fields(op = "register"))]
    pub async fn register(&self, form: &RegistrationForm) -> ApiResult<RegisterOutcome> {
        let registration = Registration::try_from(form)?;
        let existing = self.db.find_by_id(&registration.card_id).await?;

        let verdict = registration::check(existing.as_ref(), access::local_today());
        if verdict.is_allowed()
            && existing
                .as_ref()
                .is_some_and(|old| old.expiry() == Expiry::Malformed)
        {
            warn!(card_id = %registration.card_id, "Overwriting record with malformed expiry");
        }

        match verdict {
            RegistrationVerdict::Conflict => {
                info!(card_id = %registration.card_id, "Registration rejected, card active");
                Ok(RegisterOutcome::Conflict)
            }
            RegistrationVerdict::Insert | RegistrationVerdict::Overwrite => {
                let created = verdict == RegistrationVerdict::Insert;
                let record = registration.into_record(unix_timestamp());
                self.db.upsert(&record).await?;

                self.notifier.publish(Notification::UserRegistered {
                    card_id: record.card_id.clone(),
                    name: record.name.clone(),
                    access_level: record.access_level,
                    created,
                });
                info!(
                    card_id = %record.card_id,
                    access_level = %record.access_level,
                    created,
                    "Card registered"
                );

                Ok(RegisterOutcome::Saved {
                    created,
                    user: record.view(),
                })
            }
        }
    }

    /// Identity check by `{name, employee_id}` or `{card_id, name}`.
    /// Names compare case-insensitively, identifiers exactly.
    pub async fn login(&self, form: &LoginForm) -> ApiResult<UserView> {
        let name = require_field(form.name.as_deref(), "name")?;
        let employee_id = normalize_optional(form.employee_id.as_deref());
        let card_id = normalize_optional(form.card_id.as_deref());

        let record = match (employee_id, card_id) {
            (Some(employee_id), _) => {
                self.db
                    .find_by_name_and_employee(&name, &employee_id)
                    .await?
            }
            (None, Some(card_id)) => self.db.find_by_id_and_name(&card_id, &name).await?,
            (None, None) => return Err(tapgate_core::Error::MissingField("employee_id").into()),
        };

        record.map(|r| r.view()).ok_or(ApiError::Unauthorized)
    }

    pub async fn users(&self, site_id: Option<&str>) -> ApiResult<Vec<UserView>> {
        let filter = CardFilter {
            site_id: normalize_optional(site_id),
        };
        let records = self.db.list(&filter).await?;
        Ok(records.iter().map(CardRecord::view).collect())
    }

    pub async fn user(&self, card_id: &str) -> ApiResult<Option<UserView>> {
        Ok(self.db.find_by_id(card_id).await?.map(|r| r.view()))
    }

    #[instrument(skip(self, form), fields(op = "update"))]
    pub async fn update_user(&self, card_id: &str, form: &UpdateForm) -> ApiResult<UserView> {
        let patch = CardPatch::try_from(form)?;
        if patch.is_empty() {
            return Err(tapgate_core::Error::InvalidField {
                field: "body",
                reason: "no fields to update".to_string(),
            }
            .into());
        }
        let updated = self
            .db
            .update(card_id, patch)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("card {card_id}")))?;

        info!(card_id = %card_id, "Card updated");
        Ok(updated.view())
    }

    /// Delete a card record. Deleting an unknown card succeeds.
    #[instrument(skip(self), fields(op = "delete"))]
    pub async fn delete_user(&self, card_id: &str) -> ApiResult<bool> {
        let removed = self.db.delete(card_id).await?;
        if removed {
            self.notifier.publish(Notification::UserDeleted {
                card_id: card_id.to_string(),
            });
            info!(card_id = %card_id, "Card deleted");
        }
        Ok(removed)
    }

    pub async fn user_counts(&self) -> ApiResult<BTreeMap<AccessLevel, i64>> {
        Ok(self.db.count_by_access_level().await?)
    }

    pub async fn events(&self, filter: &EventFilter) -> ApiResult<Vec<TapEvent>> {
        Ok(self.db.list_events(filter).await?)
    }

    // =========================================================================
    // Reader mode and buzzer
    // =========================================================================

    pub async fn mode(&self) -> ReaderMode {
        *self.mode.read().await
    }

    /// Set the reader mode. Last write wins.
    pub async fn set_mode(&self, mode: ReaderMode) {
        *self.mode.write().await = mode;
        info!(mode = %mode, "Reader mode set");
    }

    /// Current mode; a write-mode capture is one-shot.
    async fn take_mode(&self) -> ReaderMode {
        std::mem::take(&mut *self.mode.write().await)
    }

    /// Record a buzzer trigger for `card_id` and ask readers to sound it.
    #[instrument(skip(self), fields(op = "buzzer"))]
    pub async fn trigger_buzzer(
        &self,
        card_id: Option<&str>,
        duration_ms: Option<u64>,
    ) -> ApiResult<BuzzerOutcome> {
        let card_id = require_field(card_id, "card_id")?;
        let duration_ms = duration_ms.unwrap_or(DEFAULT_BUZZER_MS);
        let stored_ms =
            i64::try_from(duration_ms).map_err(|_| tapgate_core::Error::InvalidField {
                field: "duration_ms",
                reason: format!("{duration_ms} is out of range"),
            })?;

        let event_id = self.db.append_buzzer_event(&card_id, stored_ms).await?;
        let delivered = self.notifier.publish(Notification::Buzzer {
            event_id,
            card_id: card_id.clone(),
            duration_ms,
        });

        info!(card_id = %card_id, duration_ms, delivered, "Buzzer triggered");
        Ok(BuzzerOutcome {
            event_id,
            delivered,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Days;
    use tapgate_core::access::AccessOutcome;

    async fn test_gate(site_scoping: bool) -> Gate {
        let db = Database::open_in_memory().await.unwrap();
        Gate::new(db, EventNotifier::new(16), AccessPolicy { site_scoping })
    }

    fn form(card_id: &str, name: &str, level: &str) -> RegistrationForm {
        RegistrationForm {
            card_id: Some(card_id.to_string()),
            name: Some(name.to_string()),
            access_level: Some(level.to_string()),
            ..RegistrationForm::default()
        }
    }

    fn yesterday() -> String {
        access::local_today()
            .checked_sub_days(Days::new(1))
            .unwrap()
            .format("%Y-%m-%d")
            .to_string()
    }

    async fn seed(
        gate: &Gate,
        card_id: &str,
        level: AccessLevel,
        site: Option<&str>,
        valid_until: Option<&str>,
    ) {
        gate.db()
            .upsert(&CardRecord {
                card_id: card_id.to_string(),
                name: "Ana".to_string(),
                employee_id: Some("E-1".to_string()),
                access_level: level,
                site_id: site.map(str::to_string),
                valid_until: valid_until.map(str::to_string),
                created_at: unix_timestamp(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unregistered_tap_appends_one_event_and_notifies_once() {
        let gate = test_gate(true).await;
        let mut rx = gate.notifier().subscribe();

        let outcome = gate.tap(Some("Z9"), Some("C1")).await.unwrap();
        assert_eq!(outcome.decision.reason, ReasonCode::NotRegistered);
        assert_eq!(outcome.event.access, AccessOutcome::Denied);
        assert_eq!(gate.db().count_events().await.unwrap(), 1);

        let Notification::CardScanned { card_id, reason, .. } = rx.recv().await.unwrap() else {
            panic!("expected a card_scanned notification");
        };
        assert_eq!(card_id, "Z9");
        assert_eq!(reason, ReasonCode::NotRegistered);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn expired_card_is_denied_at_its_site() {
        let gate = test_gate(true).await;
        let yesterday = yesterday();
        seed(&gate, "A1", AccessLevel::Premium, Some("C1"), Some(yesterday.as_str())).await;

        let outcome = gate.tap(Some("A1"), Some("C1")).await.unwrap();
        assert_eq!(outcome.decision.reason, ReasonCode::Expired);
        assert_eq!(outcome.decision.reason.message(), "Card expired");
        assert_eq!(outcome.event.name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn empty_card_id_is_rejected_without_event() {
        let gate = test_gate(true).await;
        let err = gate.tap(Some("  "), Some("C1")).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(gate.db().count_events().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn site_required_only_when_scoping() {
        let scoped = test_gate(true).await;
        assert!(matches!(
            scoped.tap(Some("A1"), None).await,
            Err(ApiError::BadRequest(_))
        ));

        let unscoped = test_gate(false).await;
        seed(&unscoped, "A1", AccessLevel::Basic, Some("C1"), None).await;
        let outcome = unscoped.tap(Some("A1"), None).await.unwrap();
        assert!(outcome.decision.is_granted());
    }

    #[tokio::test]
    async fn concurrent_identical_taps_are_each_logged() {
        let gate = test_gate(true).await;
        seed(&gate, "A1", AccessLevel::Basic, Some("C1"), None).await;

        let (a, b) = tokio::join!(
            gate.tap(Some("A1"), Some("C1")),
            gate.tap(Some("A1"), Some("C1"))
        );
        assert!(a.unwrap().decision.is_granted());
        assert!(b.unwrap().decision.is_granted());
        assert_eq!(gate.db().count_events().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn guest_card_can_be_reregistered() {
        let gate = test_gate(true).await;
        let first = gate.register(&form("B2", "Sam", "guest")).await.unwrap();
        assert!(matches!(first, RegisterOutcome::Saved { created: true, .. }));

        let second = gate.register(&form("B2", "Sam2", "admin")).await.unwrap();
        assert!(matches!(second, RegisterOutcome::Saved { created: false, .. }));

        let stored = gate.user("B2").await.unwrap().unwrap();
        assert_eq!(stored.name, "Sam2");
        assert_eq!(stored.access_level, AccessLevel::Admin);
    }

    #[tokio::test]
    async fn active_card_blocks_registration() {
        let gate = test_gate(true).await;
        gate.register(&form("B2", "Sam", "basic")).await.unwrap();

        let outcome = gate.register(&form("B2", "Eve", "admin")).await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::Conflict));
        assert_eq!(gate.user("B2").await.unwrap().unwrap().name, "Sam");
    }

    #[tokio::test]
    async fn expired_and_malformed_records_are_overwritten() {
        let gate = test_gate(true).await;
        let yesterday = yesterday();
        seed(&gate, "E1", AccessLevel::Admin, None, Some(yesterday.as_str())).await;
        seed(&gate, "M1", AccessLevel::Admin, None, Some("not-a-date")).await;

        for card_id in ["E1", "M1"] {
            let outcome = gate.register(&form(card_id, "New", "basic")).await.unwrap();
            assert!(matches!(outcome, RegisterOutcome::Saved { created: false, .. }));
        }
    }

    #[tokio::test]
    async fn malformed_expiry_denies_tap() {
        let gate = test_gate(true).await;
        seed(&gate, "M1", AccessLevel::Admin, Some("C1"), Some("31.12.2099")).await;
        let outcome = gate.tap(Some("M1"), Some("C1")).await.unwrap();
        assert_eq!(outcome.decision.reason, ReasonCode::InvalidExpiry);
    }

    #[tokio::test]
    async fn login_by_employee_or_card() {
        let gate = test_gate(true).await;
        seed(&gate, "A1", AccessLevel::Basic, None, None).await;

        let by_employee = gate
            .login(&LoginForm {
                name: Some("ANA".to_string()),
                employee_id: Some("E-1".to_string()),
                card_id: None,
            })
            .await
            .unwrap();
        assert_eq!(by_employee.card_id, "A1");

        let by_card = gate
            .login(&LoginForm {
                name: Some("ana".to_string()),
                employee_id: None,
                card_id: Some("A1".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(by_card.name, "Ana");

        let wrong = gate
            .login(&LoginForm {
                name: Some("ana".to_string()),
                employee_id: None,
                card_id: Some("a1".to_string()),
            })
            .await;
        assert!(matches!(wrong, Err(ApiError::Unauthorized)));

        let incomplete = gate
            .login(&LoginForm {
                name: Some("ana".to_string()),
                ..LoginForm::default()
            })
            .await;
        assert!(matches!(incomplete, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn write_mode_is_one_shot() {
        let gate = test_gate(false).await;
        gate.set_mode(ReaderMode::Write).await;

        let first = gate.tap(Some("NEW1"), None).await.unwrap();
        assert_eq!(first.mode, ReaderMode::Write);
        assert_eq!(first.decision.reason, ReasonCode::NotRegistered);

        let second = gate.tap(Some("NEW1"), None).await.unwrap();
        assert_eq!(second.mode, ReaderMode::Read);
        assert_eq!(gate.mode().await, ReaderMode::Read);
    }

    #[tokio::test]
    async fn delete_unknown_card_succeeds_without_notification() {
        let gate = test_gate(true).await;
        let mut rx = gate.notifier().subscribe();
        assert!(!gate.delete_user("ghost").await.unwrap());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_unknown_card_is_not_found() {
        let gate = test_gate(true).await;
        let err = gate
            .update_user(
                "ghost",
                &UpdateForm {
                    name: Some("x".to_string()),
                    ..UpdateForm::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn buzzer_requires_card_and_defaults_duration() {
        let gate = test_gate(true).await;
        let mut rx = gate.notifier().subscribe();
        assert!(gate.trigger_buzzer(None, None).await.is_err());

        let outcome = gate.trigger_buzzer(Some("A1"), None).await.unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::Buzzer {
                event_id: outcome.event_id,
                card_id: "A1".to_string(),
                duration_ms: DEFAULT_BUZZER_MS,
            }
        );
    }

    #[tokio::test]
    async fn buzzer_trigger_is_recorded() {
        let gate = test_gate(true).await;
        gate.trigger_buzzer(Some("A1"), Some(500)).await.unwrap();

        let (card_id, duration_ms): (String, i64) =
            sqlx::query_as("SELECT card_id, duration_ms FROM buzzer_events")
                .fetch_one(gate.db().pool())
                .await
                .unwrap();
        assert_eq!(card_id, "A1");
        assert_eq!(duration_ms, 500);
    }

    #[tokio::test]
    async fn out_of_range_buzzer_duration_is_rejected() {
        let gate = test_gate(true).await;
        let err = gate.trigger_buzzer(Some("A1"), Some(u64::MAX)).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let gate = test_gate(true).await;
        seed(&gate, "A1", AccessLevel::Admin, None, None).await;
        let err = gate.update_user("A1", &UpdateForm::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn reader_mode_parses_case_insensitively() {
        assert_eq!("WRITE".parse::<ReaderMode>().unwrap(), ReaderMode::Write);
        assert!("erase".parse::<ReaderMode>().is_err());
    }
}
