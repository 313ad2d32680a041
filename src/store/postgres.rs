use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::{DedupKey, NotificationStore};
use crate::errors::{NotifyError, Result};
use crate::models::notification::{ListOptions, NewNotification, Notification, Recipient, ScopeKind};

const COLUMNS: &str = "id, user_id, admin_id, application_id, notification_kind, status, \
                       message, is_read, read_at, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn find_unread_sql(kind: ScopeKind) -> String {
    format!(
        r#"SELECT {COLUMNS}
           FROM notifications
           WHERE {col} = $1
             AND application_id = $2
             AND notification_kind = $3
             AND is_read = false
             AND ($4::varchar IS NULL OR status = $4)
           ORDER BY created_at DESC, id DESC
           LIMIT 1"#,
        col = kind.column()
    )
}

fn list_sql(kind: ScopeKind) -> String {
    format!(
        r#"SELECT {COLUMNS} FROM (
               (SELECT {COLUMNS} FROM notifications
                WHERE {col} = $1 AND is_read = false)
               UNION ALL
               (SELECT {COLUMNS} FROM notifications
                WHERE {col} = $1 AND is_read = true AND NOT $2 AND read_at >= $3
                ORDER BY created_at DESC, id DESC
                LIMIT $4)
           ) feed
           ORDER BY created_at DESC, id DESC"#,
        col = kind.column()
    )
}

async fn insert_with<'c, E>(executor: E, new: NewNotification) -> Result<Notification>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    new.validate()?;
    let id = new.id.unwrap_or_else(Uuid::now_v7);
    let row = sqlx::query_as::<_, Notification>(&format!(
        r#"INSERT INTO notifications
               (id, user_id, admin_id, application_id, notification_kind, status, message, created_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, NOW()))
           RETURNING {COLUMNS}"#
    ))
    .bind(id)
    .bind(new.user_id)
    .bind(new.admin_id)
    .bind(new.application_id)
    .bind(new.kind)
    .bind(new.status)
    .bind(new.message)
    .bind(new.created_at)
    .fetch_one(executor)
    .await?;
    Ok(row)
}

async fn find_unread_with<'c, E>(executor: E, key: &DedupKey) -> Result<Option<Notification>>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let row = sqlx::query_as::<_, Notification>(&find_unread_sql(key.recipient.kind))
        .bind(key.recipient.id)
        .bind(key.application_id)
        .bind(key.kind)
        .bind(key.status.as_deref())
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert(&self, new: NewNotification) -> Result<Notification> {
        insert_with(&self.pool, new).await
    }

    async fn insert_unless_unread(
        &self,
        new: NewNotification,
        key: &DedupKey,
    ) -> Result<Option<Notification>> {
        new.validate()?;
        let mut tx = self.pool.begin().await?;

        // Serializes writers of the same key until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key.lock_key())
            .execute(&mut *tx)
            .await?;

        if let Some(existing) = find_unread_with(&mut *tx, key).await? {
            tx.rollback().await?;
            tracing::debug!(
                existing_id = %existing.id,
                recipient = %key.recipient,
                "unread notification already present, skipping insert"
            );
            return Ok(None);
        }

        let row = insert_with(&mut *tx, new).await?;
        tx.commit().await?;
        Ok(Some(row))
    }

    async fn find_unread(&self, key: &DedupKey) -> Result<Option<Notification>> {
        find_unread_with(&self.pool, key).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_for_scope(
        &self,
        recipient: &Recipient,
        opts: &ListOptions,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(&list_sql(recipient.kind))
            .bind(recipient.id)
            .bind(opts.unread_only)
            .bind(opts.read_cutoff(Utc::now()))
            .bind(opts.limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn count_unread(&self, recipient: &Recipient) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM notifications WHERE {} = $1 AND is_read = false",
            recipient.kind.column()
        ))
        .bind(recipient.id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_read(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE notifications SET is_read = true, read_at = NOW()
               WHERE id = $1 AND is_read = false"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM notifications WHERE id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            Ok(())
        } else {
            Err(NotifyError::not_found("notification", id))
        }
    }

    async fn mark_all_read(&self, recipient: &Recipient) -> Result<u64> {
        let result = sqlx::query(&format!(
            r#"UPDATE notifications SET is_read = true, read_at = NOW()
               WHERE {} = $1 AND is_read = false"#,
            recipient.kind.column()
        ))
        .bind(recipient.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_filter_on_scope_column() {
        assert!(list_sql(ScopeKind::Admin).contains("admin_id = $1"));
        assert!(!list_sql(ScopeKind::Admin).contains("user_id = $1"));
        assert!(find_unread_sql(ScopeKind::User).contains("user_id = $1"));
    }

    #[test]
    fn test_list_query_caps_only_the_read_tier() {
        let sql = list_sql(ScopeKind::User);
        let unread_tier = sql.split("UNION ALL").next().unwrap();
        assert!(!unread_tier.contains("LIMIT"));
        assert!(sql.contains("LIMIT $4"));
    }
}
