//! In-process store backed by a vector, with a broadcast change feed.
//!
//! Follows the same contract as the Postgres store: ordering, retention
//! window, idempotent mark-read and atomic conditional insert. Every insert
//! and read-flip is published as a [`ChangeEvent`], so the store can also
//! stand in for the change-event stream.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::{DedupKey, NotificationStore, NOTIFICATIONS_TABLE};
use crate::errors::{NotifyError, Result};
use crate::live::{ChangeEvent, ChangeFeed, ChangeStream, ChangeType, ColumnFilter};
use crate::models::notification::{ListOptions, NewNotification, Notification, Recipient};

pub struct MemoryStore {
    rows: RwLock<Vec<Notification>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// `capacity` bounds how far a change-feed subscriber may fall behind.
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            rows: RwLock::new(Vec::new()),
            changes,
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// All rows in insertion order.
    pub async fn all(&self) -> Vec<Notification> {
        self.rows.read().await.clone()
    }

    // Called with the write lock held so per-row event order matches
    // mutation order.
    fn publish(&self, change_type: ChangeType, row: &Notification) {
        let record = match serde_json::to_value(row) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(id = %row.id, "failed to encode change event: {}", e);
                return;
            }
        };
        // No receivers is fine: nobody is listening.
        let _ = self.changes.send(ChangeEvent {
            table: NOTIFICATIONS_TABLE.to_string(),
            change_type,
            record,
        });
    }

    fn push_row(&self, rows: &mut Vec<Notification>, new: NewNotification) -> Result<Notification> {
        new.validate()?;
        let id = new.id.unwrap_or_else(Uuid::now_v7);
        if rows.iter().any(|n| n.id == id) {
            return Err(NotifyError::Validation(format!(
                "notification {} already exists",
                id
            )));
        }
        let created_at = new.created_at.unwrap_or_else(Utc::now);
        let row = new.into_row(id, created_at);
        rows.push(row.clone());
        self.publish(ChangeType::Insert, &row);
        Ok(row)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert(&self, new: NewNotification) -> Result<Notification> {
        let mut rows = self.rows.write().await;
        self.push_row(&mut rows, new)
    }

    async fn insert_unless_unread(
        &self,
        new: NewNotification,
        key: &DedupKey,
    ) -> Result<Option<Notification>> {
        let mut rows = self.rows.write().await;
        if rows.iter().any(|n| key.matches(n)) {
            return Ok(None);
        }
        self.push_row(&mut rows, new).map(Some)
    }

    async fn find_unread(&self, key: &DedupKey) -> Result<Option<Notification>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|n| key.matches(n))
            .min_by(|a, b| Notification::feed_order(a, b))
            .cloned())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.rows.read().await.iter().find(|n| n.id == id).cloned())
    }

    async fn list_for_scope(
        &self,
        recipient: &Recipient,
        opts: &ListOptions,
    ) -> Result<Vec<Notification>> {
        let cutoff = opts.read_cutoff(Utc::now());
        let rows = self.rows.read().await;

        let mut unread: Vec<Notification> = Vec::new();
        let mut read: Vec<Notification> = Vec::new();
        for n in rows.iter().filter(|n| n.belongs_to(recipient)) {
            if !n.is_read {
                unread.push(n.clone());
            } else if !opts.unread_only && n.read_at.map_or(false, |at| at >= cutoff) {
                read.push(n.clone());
            }
        }
        drop(rows);

        read.sort_by(Notification::feed_order);
        read.truncate(opts.limit.max(0) as usize);

        unread.extend(read);
        unread.sort_by(Notification::feed_order);
        Ok(unread)
    }

    async fn count_unread(&self, recipient: &Recipient) -> Result<i64> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|n| !n.is_read && n.belongs_to(recipient))
            .count() as i64)
    }

    async fn mark_read(&self, id: Uuid) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| NotifyError::not_found("notification", id))?;
        if !row.is_read {
            row.is_read = true;
            row.read_at = Some(Utc::now());
            let row = row.clone();
            self.publish(ChangeType::Update, &row);
        }
        Ok(())
    }

    async fn mark_all_read(&self, recipient: &Recipient) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let now = Utc::now();
        let mut flipped = Vec::new();
        for row in rows
            .iter_mut()
            .filter(|n| !n.is_read && n.belongs_to(recipient))
        {
            row.is_read = true;
            row.read_at = Some(now);
            flipped.push(row.clone());
        }
        for row in &flipped {
            self.publish(ChangeType::Update, row);
        }
        Ok(flipped.len() as u64)
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(&self, table: &str, filter: ColumnFilter) -> Result<ChangeStream> {
        let table = table.to_string();
        let stream = BroadcastStream::new(self.changes.subscribe()).filter_map(move |item| {
            let out = match item {
                Ok(event) if event.table == table && filter.matches(&event.record) => {
                    Some(Ok(event))
                }
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(NotifyError::Stream(
                    format!("change feed lagged by {} events", n),
                ))),
            };
            futures::future::ready(out)
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::NotificationKind;
    use chrono::Duration;

    fn status_note(user: Uuid, app: Uuid) -> NewNotification {
        NewNotification::new(
            Recipient::user(user),
            app,
            NotificationKind::StatusChange,
            "Votre candidature est en cours d'examen",
        )
        .with_status("en cours d'examination")
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent_and_keeps_read_at() {
        let store = MemoryStore::new();
        let row = store.insert(status_note(Uuid::new_v4(), Uuid::new_v4())).await.unwrap();

        store.mark_read(row.id).await.unwrap();
        let first = store.get(row.id).await.unwrap().unwrap();
        assert!(first.is_read);

        store.mark_read(row.id).await.unwrap();
        let second = store.get(row.id).await.unwrap().unwrap();
        assert!(second.is_read);
        assert_eq!(first.read_at, second.read_at);
    }

    #[tokio::test]
    async fn test_mark_read_unknown_id_is_not_found() {
        let store = MemoryStore::new();
        let err = store.mark_read(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, NotifyError::NotFound { entity: "notification", .. }));
    }

    #[tokio::test]
    async fn test_insert_unless_unread_suppresses_duplicates() {
        let store = MemoryStore::new();
        let (user, app) = (Uuid::new_v4(), Uuid::new_v4());
        let key = DedupKey::new(Recipient::user(user), app, NotificationKind::StatusChange);

        let first = store.insert_unless_unread(status_note(user, app), &key).await.unwrap();
        assert!(first.is_some());
        let second = store.insert_unless_unread(status_note(user, app), &key).await.unwrap();
        assert!(second.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_read_tier_respects_window_and_limit() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let scope = Recipient::user(user);

        let long_read = store
            .insert(status_note(user, Uuid::new_v4()).with_created_at(Utc::now() - Duration::days(45)))
            .await
            .unwrap();
        store.mark_read(long_read.id).await.unwrap();
        for row in store.rows.write().await.iter_mut().filter(|n| n.id == long_read.id) {
            row.read_at = Some(Utc::now() - Duration::days(40));
        }
        let just_read = store
            .insert(status_note(user, Uuid::new_v4()).with_created_at(Utc::now() - Duration::days(45)))
            .await
            .unwrap();
        store.mark_read(just_read.id).await.unwrap();
        let stale_unread = store
            .insert(status_note(user, Uuid::new_v4()).with_created_at(Utc::now() - Duration::days(90)))
            .await
            .unwrap();
        for _ in 0..3 {
            let n = store.insert(status_note(user, Uuid::new_v4())).await.unwrap();
            store.mark_read(n.id).await.unwrap();
        }

        let feed = store.list_for_scope(&scope, &ListOptions::default()).await.unwrap();
        assert_eq!(feed.len(), 5);
        assert!(feed.iter().any(|n| n.id == stale_unread.id));
        assert!(feed.iter().any(|n| n.id == just_read.id));
        assert!(feed.iter().all(|n| n.id != long_read.id));

        let capped = ListOptions { limit: 1, ..ListOptions::default() };
        let feed = store.list_for_scope(&scope, &capped).await.unwrap();
        assert_eq!(feed.iter().filter(|n| n.is_read).count(), 1);
        assert_eq!(feed.iter().filter(|n| !n.is_read).count(), 1);

        let feed = store.list_for_scope(&scope, &ListOptions::unread_only()).await.unwrap();
        assert_eq!(feed.len(), 1);
    }

    #[tokio::test]
    async fn test_change_feed_filters_by_scope() {
        let store = MemoryStore::new();
        let (mine, theirs) = (Uuid::new_v4(), Uuid::new_v4());
        let mut stream = store
            .subscribe(NOTIFICATIONS_TABLE, ColumnFilter::for_recipient(&Recipient::user(mine)))
            .await
            .unwrap();

        store.insert(status_note(theirs, Uuid::new_v4())).await.unwrap();
        let row = store.insert(status_note(mine, Uuid::new_v4())).await.unwrap();
        store.mark_read(row.id).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.change_type, ChangeType::Insert);
        assert_eq!(first.record["id"], serde_json::json!(row.id));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.change_type, ChangeType::Update);
        assert_eq!(second.record["is_read"], serde_json::json!(true));
    }
}
