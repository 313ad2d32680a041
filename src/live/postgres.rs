//! Change feed over Postgres `LISTEN/NOTIFY`.
//!
//! The trigger installed by the migrations publishes every insert and update
//! of the notifications table on [`CHANGES_CHANNEL`] as
//! `{"table": .., "type": "INSERT"|"UPDATE", "record": {..}}`. Each
//! subscription holds its own listener connection; the column predicate is
//! applied on this side.

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::{PgListener, PgNotification};
use sqlx::PgPool;

use super::{ChangeEvent, ChangeFeed, ChangeStream, ColumnFilter};
use crate::errors::{NotifyError, Result};

pub const CHANGES_CHANNEL: &str = "notifications_changes";

#[derive(Clone)]
pub struct PgChangeFeed {
    pool: PgPool,
}

impl PgChangeFeed {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `Ok(None)` when the payload is for another table or another scope.
fn decode(
    notification: &PgNotification,
    table: &str,
    filter: &ColumnFilter,
) -> Result<Option<ChangeEvent>> {
    let event: ChangeEvent = serde_json::from_str(notification.payload())?;
    if event.table != table || !filter.matches(&event.record) {
        return Ok(None);
    }
    Ok(Some(event))
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&self, table: &str, filter: ColumnFilter) -> Result<ChangeStream> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGES_CHANNEL).await?;
        tracing::debug!(channel = CHANGES_CHANNEL, %filter, "listening for changes");

        // try_recv reports a dropped connection instead of reconnecting
        // behind our back, so the channel can resync its subscribers.
        let notifications = futures::stream::unfold(Some(listener), |state| async move {
            let mut listener = state?;
            match listener.try_recv().await {
                Ok(Some(n)) => Some((Ok(n), Some(listener))),
                Ok(None) => Some((
                    Err(NotifyError::Stream("listener connection lost".into())),
                    None,
                )),
                Err(e) => Some((Err(NotifyError::Storage(e)), None)),
            }
        });

        let table = table.to_string();
        let stream = notifications.filter_map(move |item| {
            let out = match item {
                Ok(notification) => match decode(&notification, &table, &filter) {
                    Ok(Some(event)) => Some(Ok(event)),
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!("skipping undecodable change payload: {}", e);
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(out)
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::ChangeType;
    use crate::models::notification::Recipient;
    use uuid::Uuid;

    fn payload(user: Uuid) -> String {
        serde_json::json!({
            "table": "notifications",
            "type": "INSERT",
            "record": { "id": Uuid::now_v7(), "user_id": user, "admin_id": null }
        })
        .to_string()
    }

    #[test]
    fn test_trigger_payload_shape_parses() {
        let user = Uuid::new_v4();
        let event: ChangeEvent = serde_json::from_str(&payload(user)).unwrap();
        assert_eq!(event.change_type, ChangeType::Insert);
        assert!(ColumnFilter::for_recipient(&Recipient::user(user)).matches(&event.record));
        assert!(!ColumnFilter::for_recipient(&Recipient::admin(user)).matches(&event.record));
    }
}
