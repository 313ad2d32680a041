use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::errors::{NotifyError, Result};
use crate::models::notification::{NewNotification, Notification, NotificationKind, Recipient};
use crate::store::{DedupKey, NotificationStore};

/// What counts as "the same notification" while an earlier one is unread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    /// One unread row per (recipient, application, kind). A second status
    /// change before the first is read is dropped.
    #[default]
    PerKind,
    /// Like `PerKind`, but a different status is a different notification.
    PerStatus,
    /// Every event creates a row.
    Disabled,
}

impl DedupPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupPolicy::PerKind => "per_kind",
            DedupPolicy::PerStatus => "per_status",
            DedupPolicy::Disabled => "disabled",
        }
    }
}

impl fmt::Display for DedupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DedupPolicy {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_kind" => Ok(DedupPolicy::PerKind),
            "per_status" => Ok(DedupPolicy::PerStatus),
            "disabled" | "off" | "none" => Ok(DedupPolicy::Disabled),
            other => Err(NotifyError::Validation(format!(
                "unknown dedup policy '{}', expected per_kind, per_status or disabled",
                other
            ))),
        }
    }
}

/// Suppresses a notification while an unread one for the same event exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupGuard {
    policy: DedupPolicy,
}

impl DedupGuard {
    pub fn new(policy: DedupPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// `None` when the policy disables deduplication.
    pub fn key_for(
        &self,
        recipient: Recipient,
        application_id: Uuid,
        kind: NotificationKind,
        status: Option<&str>,
    ) -> Option<DedupKey> {
        let key = DedupKey::new(recipient, application_id, kind);
        match (self.policy, status) {
            (DedupPolicy::Disabled, _) => None,
            (DedupPolicy::PerStatus, Some(status)) => Some(key.with_status(status)),
            _ => Some(key),
        }
    }

    /// False iff an unread match exists. Advisory only: `create` repeats the
    /// check atomically with the insert.
    pub async fn should_create(
        &self,
        store: &dyn NotificationStore,
        recipient: Recipient,
        application_id: Uuid,
        kind: NotificationKind,
        status: Option<&str>,
    ) -> Result<bool> {
        match self.key_for(recipient, application_id, kind, status) {
            Some(key) => Ok(store.find_unread(&key).await?.is_none()),
            None => Ok(true),
        }
    }

    /// Insert `new` unless it duplicates an unread notification.
    pub async fn create(
        &self,
        store: &dyn NotificationStore,
        new: NewNotification,
    ) -> Result<Option<Notification>> {
        let recipient = new.validate()?;
        match self.key_for(recipient, new.application_id, new.kind, new.status.as_deref()) {
            Some(key) => {
                let created = store.insert_unless_unread(new, &key).await?;
                if created.is_none() {
                    tracing::debug!(
                        scope = %recipient,
                        dedup_key = %key.lock_key(),
                        "unread notification already exists, skipping"
                    );
                }
                Ok(created)
            }
            None => store.insert(new).await.map(Some),
        }
    }
}
