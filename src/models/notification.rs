use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{NotifyError, Result};

/// Which side of the pipeline a notification is addressed to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    User,
    Admin,
}

impl ScopeKind {
    /// Column holding the recipient id for this scope.
    pub fn column(&self) -> &'static str {
        match self {
            ScopeKind::User => "user_id",
            ScopeKind::Admin => "admin_id",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::User => "user",
            ScopeKind::Admin => "admin",
        }
    }
}

/// A concrete recipient scope, rendered as `user:<id>` or `admin:<id>`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Recipient {
    pub kind: ScopeKind,
    pub id: Uuid,
}

impl Recipient {
    pub fn user(id: Uuid) -> Self {
        Self {
            kind: ScopeKind::User,
            id,
        }
    }

    pub fn admin(id: Uuid) -> Self {
        Self {
            kind: ScopeKind::Admin,
            id,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for Recipient {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| NotifyError::Validation(format!("invalid recipient scope '{}'", s)))?;
        let id = Uuid::parse_str(id.trim())
            .map_err(|_| NotifyError::Validation(format!("invalid recipient id in '{}'", s)))?;
        match kind.trim() {
            "user" => Ok(Recipient::user(id)),
            "admin" => Ok(Recipient::admin(id)),
            other => Err(NotifyError::Validation(format!(
                "unknown scope '{}', expected 'user' or 'admin'",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationKind {
    NewApplication,
    StatusChange,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewApplication => "new_application",
            NotificationKind::StatusChange => "status_change",
        }
    }
}

/// Application statuses with a fixed message phrase.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum ApplicationStatus {
    Pending,
    UnderReview,
    Accepted,
    Rejected,
    Archived,
}

impl ApplicationStatus {
    /// Accepts the canonical French values and their English aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "en attente" | "pending" => Some(Self::Pending),
            "en cours d'examination" | "reviewing" => Some(Self::UnderReview),
            "accepter" | "accepted" => Some(Self::Accepted),
            "refuser" | "rejected" => Some(Self::Rejected),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "en attente",
            Self::UnderReview => "en cours d'examination",
            Self::Accepted => "accepter",
            Self::Rejected => "refuser",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub admin_id: Option<Uuid>,
    pub application_id: Uuid,
    pub notification_kind: NotificationKind,
    pub status: Option<String>,
    pub message: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn recipient(&self) -> Result<Recipient> {
        recipient_of(self.user_id, self.admin_id)
    }

    pub fn belongs_to(&self, recipient: &Recipient) -> bool {
        match recipient.kind {
            ScopeKind::User => self.user_id == Some(recipient.id),
            ScopeKind::Admin => self.admin_id == Some(recipient.id),
        }
    }

    /// Canonical feed order: newest first, id breaks ties.
    pub fn feed_order(a: &Notification, b: &Notification) -> std::cmp::Ordering {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    }
}

fn recipient_of(user_id: Option<Uuid>, admin_id: Option<Uuid>) -> Result<Recipient> {
    match (user_id, admin_id) {
        (Some(id), None) => Ok(Recipient::user(id)),
        (None, Some(id)) => Ok(Recipient::admin(id)),
        (Some(_), Some(_)) => Err(NotifyError::Validation(
            "notification cannot target both a user and an admin".into(),
        )),
        (None, None) => Err(NotifyError::Validation(
            "notification must target a user or an admin".into(),
        )),
    }
}

/// Insert payload. `id` and `created_at` are assigned by the store when absent.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub admin_id: Option<Uuid>,
    pub application_id: Uuid,
    pub kind: NotificationKind,
    pub status: Option<String>,
    pub message: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewNotification {
    pub fn new(
        recipient: Recipient,
        application_id: Uuid,
        kind: NotificationKind,
        message: impl Into<String>,
    ) -> Self {
        let (user_id, admin_id) = match recipient.kind {
            ScopeKind::User => (Some(recipient.id), None),
            ScopeKind::Admin => (None, Some(recipient.id)),
        };
        Self {
            id: None,
            user_id,
            admin_id,
            application_id,
            kind,
            status: None,
            message: message.into(),
            created_at: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Checks the row invariants and returns the recipient scope.
    pub fn validate(&self) -> Result<Recipient> {
        let recipient = recipient_of(self.user_id, self.admin_id)?;
        if self.message.trim().is_empty() {
            return Err(NotifyError::Validation("message must not be empty".into()));
        }
        if self.status.is_some() && self.kind != NotificationKind::StatusChange {
            return Err(NotifyError::Validation(format!(
                "status is only recorded for {} notifications",
                NotificationKind::StatusChange.as_str()
            )));
        }
        Ok(recipient)
    }

    pub(crate) fn into_row(self, id: Uuid, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id,
            user_id: self.user_id,
            admin_id: self.admin_id,
            application_id: self.application_id,
            notification_kind: self.kind,
            status: self.status,
            message: self.message,
            is_read: false,
            read_at: None,
            created_at,
        }
    }
}

/// Options for `NotificationStore::list_for_scope`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListOptions {
    pub unread_only: bool,
    /// Notifications read longer ago than this are left out of the feed.
    pub since: Duration,
    /// Upper bound on read notifications; unread ones are never capped.
    pub limit: i64,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            unread_only: false,
            since: Duration::days(30),
            limit: 50,
        }
    }
}

impl ListOptions {
    pub fn unread_only() -> Self {
        Self {
            unread_only: true,
            ..Self::default()
        }
    }

    pub fn read_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.since
    }
}

/// Snapshot returned to subscribers for their initial state.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Feed {
    pub items: Vec<Notification>,
    pub unread: usize,
}

impl Feed {
    pub fn from_items(items: Vec<Notification>) -> Self {
        let unread = items.iter().filter(|n| !n.is_read).count();
        Self { items, unread }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_display_roundtrip() {
        let id = Uuid::new_v4();
        let scope = Recipient::admin(id);
        assert_eq!(scope.to_string(), format!("admin:{}", id));
        assert_eq!(scope.to_string().parse::<Recipient>().unwrap(), scope);
    }

    #[test]
    fn test_recipient_parse_rejects_unknown_scope() {
        let raw = format!("team:{}", Uuid::new_v4());
        assert!(matches!(
            raw.parse::<Recipient>(),
            Err(NotifyError::Validation(_))
        ));
        assert!("user".parse::<Recipient>().is_err());
        assert!("user:not-a-uuid".parse::<Recipient>().is_err());
    }

    #[test]
    fn test_validate_rejects_dual_and_missing_recipient() {
        let mut n = NewNotification::new(
            Recipient::user(Uuid::new_v4()),
            Uuid::new_v4(),
            NotificationKind::StatusChange,
            "hello",
        );
        assert!(n.validate().is_ok());

        n.admin_id = Some(Uuid::new_v4());
        assert!(matches!(n.validate(), Err(NotifyError::Validation(_))));

        n.user_id = None;
        n.admin_id = None;
        assert!(matches!(n.validate(), Err(NotifyError::Validation(_))));
    }

    #[test]
    fn test_status_only_allowed_on_status_change() {
        let n = NewNotification::new(
            Recipient::admin(Uuid::new_v4()),
            Uuid::new_v4(),
            NotificationKind::NewApplication,
            "Jane Doe applied",
        )
        .with_status("en attente");
        assert!(n.validate().is_err());
    }

    #[test]
    fn test_status_aliases_map_to_canonical() {
        assert_eq!(ApplicationStatus::parse("accepted"), Some(ApplicationStatus::Accepted));
        assert_eq!(ApplicationStatus::parse("accepter"), Some(ApplicationStatus::Accepted));
        assert_eq!(ApplicationStatus::parse(" refuser "), Some(ApplicationStatus::Rejected));
        assert_eq!(ApplicationStatus::parse("reviewing").unwrap().as_str(), "en cours d'examination");
        assert_eq!(ApplicationStatus::parse("on hold"), None);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&NotificationKind::NewApplication).unwrap();
        assert_eq!(json, "\"new_application\"");
    }

    #[test]
    fn test_feed_counts_unread() {
        let base = NewNotification::new(
            Recipient::user(Uuid::new_v4()),
            Uuid::new_v4(),
            NotificationKind::StatusChange,
            "m",
        );
        let mut read = base.clone().into_row(Uuid::now_v7(), Utc::now());
        read.is_read = true;
        read.read_at = Some(Utc::now());
        let unread = base.into_row(Uuid::now_v7(), Utc::now());
        let feed = Feed::from_items(vec![unread, read]);
        assert_eq!(feed.unread, 1);
    }
}
