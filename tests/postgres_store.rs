//! Round trip against a real database.
//!
//! **Requirements:**
//! - PostgreSQL running at DATABASE_URL
//! - Run with `cargo test --test postgres_store -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use uuid::Uuid;

use hiring_notify::live::postgres::PgChangeFeed;
use hiring_notify::live::{ChangeFeed, ColumnFilter, LiveEvent};
use hiring_notify::models::notification::{ListOptions, NewNotification, NotificationKind, Recipient};
use hiring_notify::store::postgres::PgStore;
use hiring_notify::store::{DedupKey, NotificationStore, NOTIFICATIONS_TABLE};

async fn store() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgStore::connect(&url).await.unwrap();
    store.migrate().await.unwrap();
    store
}

#[tokio::test]
#[ignore]
async fn test_postgres_lifecycle_and_change_feed() {
    let store = store().await;
    let feed = PgChangeFeed::new(store.pool().clone());
    let scope = Recipient::user(Uuid::new_v4());
    let app = Uuid::new_v4();

    let mut changes = feed
        .subscribe(NOTIFICATIONS_TABLE, ColumnFilter::for_recipient(&scope))
        .await
        .unwrap();

    let key = DedupKey::new(scope, app, NotificationKind::StatusChange);
    let new = || {
        NewNotification::new(
            scope,
            app,
            NotificationKind::StatusChange,
            "Votre candidature est en attente d'examen pour le poste \"QA\"",
        )
        .with_status("en attente")
    };

    let row = store.insert_unless_unread(new(), &key).await.unwrap().unwrap();
    assert!(store.insert_unless_unread(new(), &key).await.unwrap().is_none());
    assert_eq!(store.count_unread(&scope).await.unwrap(), 1);

    store.mark_read(row.id).await.unwrap();
    let read = store.get(row.id).await.unwrap().unwrap();
    store.mark_read(row.id).await.unwrap();
    assert_eq!(store.get(row.id).await.unwrap().unwrap().read_at, read.read_at);

    let items = store
        .list_for_scope(&scope, &ListOptions::default())
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0].is_read);

    let arc_store: Arc<dyn NotificationStore> = Arc::new(store);
    assert!(arc_store.mark_read(Uuid::now_v7()).await.is_err());

    let insert = tokio::time::timeout(Duration::from_secs(5), changes.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match insert.into_live().unwrap() {
        LiveEvent::Inserted(n) => assert_eq!(n.id, row.id),
        other => panic!("expected insert, got {:?}", other),
    }
    let update = tokio::time::timeout(Duration::from_secs(5), changes.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match update.into_live().unwrap() {
        LiveEvent::Updated(n) => assert!(n.is_read),
        other => panic!("expected update, got {:?}", other),
    }
}
