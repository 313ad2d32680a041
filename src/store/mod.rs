//! Persistence for the notifications table.
//!
//! Every mutation of notification rows goes through [`NotificationStore`].
//! Two implementations ship with the crate: [`postgres::PgStore`] for
//! production and [`memory::MemoryStore`] for tests and embedding.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::notification::{
    ListOptions, NewNotification, Notification, NotificationKind, Recipient,
};

pub mod memory;
pub mod postgres;

/// Name of the table (and change-stream topic) holding notifications.
pub const NOTIFICATIONS_TABLE: &str = "notifications";

/// Identifies "the same logical event" for duplicate suppression.
///
/// `status` is only set when the dedup policy distinguishes statuses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub recipient: Recipient,
    pub application_id: Uuid,
    pub kind: NotificationKind,
    pub status: Option<String>,
}

impl DedupKey {
    pub fn new(recipient: Recipient, application_id: Uuid, kind: NotificationKind) -> Self {
        Self {
            recipient,
            application_id,
            kind,
            status: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn matches(&self, n: &Notification) -> bool {
        !n.is_read
            && n.application_id == self.application_id
            && n.notification_kind == self.kind
            && n.belongs_to(&self.recipient)
            && self
                .status
                .as_ref()
                .map_or(true, |s| n.status.as_deref() == Some(s.as_str()))
    }

    /// Stable text form, used as the advisory lock key in Postgres.
    pub fn lock_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.recipient,
            self.application_id,
            self.kind.as_str(),
            self.status.as_deref().unwrap_or("*")
        )
    }
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a notification, assigning `id` and `created_at` when absent.
    async fn insert(&self, new: NewNotification) -> Result<Notification>;

    /// Insert unless an unread row matching `key` exists. The check and the
    /// insert are atomic with respect to other writers of the same key.
    async fn insert_unless_unread(
        &self,
        new: NewNotification,
        key: &DedupKey,
    ) -> Result<Option<Notification>>;

    async fn find_unread(&self, key: &DedupKey) -> Result<Option<Notification>>;

    async fn get(&self, id: Uuid) -> Result<Option<Notification>>;

    /// Unread rows plus read rows within the retention window, newest first.
    async fn list_for_scope(
        &self,
        recipient: &Recipient,
        opts: &ListOptions,
    ) -> Result<Vec<Notification>>;

    async fn count_unread(&self, recipient: &Recipient) -> Result<i64>;

    /// Idempotent. Fails with `NotFound` only when the id does not exist.
    async fn mark_read(&self, id: Uuid) -> Result<()>;

    /// Returns the number of rows that flipped to read.
    async fn mark_all_read(&self, recipient: &Recipient) -> Result<u64>;
}
