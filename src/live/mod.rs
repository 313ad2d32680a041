//! Live delivery of notification changes to connected subscribers.
//!
//! The change-event stream itself is an external collaborator behind
//! [`ChangeFeed`]. On top of it this module provides:
//!
//! - [`channel::LiveChannel`]: one upstream subscription per recipient scope,
//!   with reconnect and backoff, normalizing raw rows into [`LiveEvent`]s.
//! - [`manager::ConnectionManager`]: a scope-keyed registry that shares one
//!   channel between all subscribers of a scope, with reference counting.
//! - [`cache::FeedCache`] and [`cache::LiveFeed`]: the subscriber-side view
//!   that reconciles a `list_feed` snapshot with the live stream.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::models::notification::{Notification, Recipient};

pub mod backoff;
pub mod cache;
pub mod channel;
pub mod manager;
pub mod postgres;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
}

/// A raw row change as emitted by the change-event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub record: serde_json::Value,
}

/// Equality predicate on one column of the changed row (`column=eq.value`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFilter {
    pub column: String,
    pub value: String,
}

impl ColumnFilter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    pub fn for_recipient(recipient: &Recipient) -> Self {
        Self::eq(recipient.kind.column(), recipient.id)
    }

    pub fn matches(&self, record: &serde_json::Value) -> bool {
        match record.get(&self.column) {
            Some(serde_json::Value::String(s)) => s == &self.value,
            Some(serde_json::Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl fmt::Display for ColumnFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

pub type ChangeStream = BoxStream<'static, Result<ChangeEvent>>;

/// Source of row changes, keyed by table and filtered by a column predicate.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, table: &str, filter: ColumnFilter) -> Result<ChangeStream>;
}

/// Typed event delivered to subscribers of one recipient scope.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Inserted(Notification),
    Updated(Notification),
    /// Events may have been missed (reconnect or lag); re-run `list_feed`.
    Resync,
}

/// Lifecycle of a scope's upstream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Subscribing,
    Active,
    Error,
}

impl ChangeEvent {
    /// Normalize a raw change into a typed event.
    pub fn into_live(self) -> Result<LiveEvent> {
        let row: Notification = serde_json::from_value(self.record)?;
        Ok(match self.change_type {
            ChangeType::Insert => LiveEvent::Inserted(row),
            ChangeType::Update => LiveEvent::Updated(row),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_filter_matches_only_its_column() {
        let admin = Uuid::new_v4();
        let filter = ColumnFilter::for_recipient(&Recipient::admin(admin));
        assert_eq!(filter.to_string(), format!("admin_id=eq.{}", admin));

        assert!(filter.matches(&json!({ "admin_id": admin.to_string(), "user_id": null })));
        assert!(!filter.matches(&json!({ "admin_id": null, "user_id": admin.to_string() })));
        assert!(!filter.matches(&json!({ "admin_id": Uuid::new_v4().to_string() })));
    }

    #[test]
    fn test_change_event_parses_trigger_payload() {
        let id = Uuid::now_v7();
        let user = Uuid::new_v4();
        let raw = json!({
            "table": "notifications",
            "type": "UPDATE",
            "record": {
                "id": id,
                "user_id": user,
                "admin_id": null,
                "application_id": Uuid::new_v4(),
                "notification_kind": "status_change",
                "status": "accepter",
                "message": "Félicitations !",
                "is_read": true,
                "read_at": "2026-03-01T10:00:00.123456+00:00",
                "created_at": "2026-03-01T09:00:00+00:00"
            }
        });

        let event: ChangeEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.change_type, ChangeType::Update);
        match event.into_live().unwrap() {
            LiveEvent::Updated(n) => {
                assert_eq!(n.id, id);
                assert_eq!(n.user_id, Some(user));
                assert!(n.is_read);
                assert!(n.read_at.is_some());
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_record_is_a_decode_error() {
        let event = ChangeEvent {
            table: "notifications".into(),
            change_type: ChangeType::Insert,
            record: json!({ "id": "nope" }),
        };
        assert!(matches!(
            event.into_live(),
            Err(crate::errors::NotifyError::Decode(_))
        ));
    }
}
