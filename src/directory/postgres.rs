use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::ApplicationDirectory;
use crate::errors::{NotifyError, Result};
use crate::models::directory::{ApplicationInfo, JobInfo};

/// Reads the `applications`, `jobs` and `profiles` tables owned by the
/// hiring application. Never writes to them.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApplicationDirectory for PgDirectory {
    async fn get_application(&self, id: Uuid) -> Result<ApplicationInfo> {
        sqlx::query_as::<_, ApplicationInfo>(
            "SELECT id, first_name, last_name, job_id FROM applications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| NotifyError::not_found("application", id))
    }

    async fn get_job(&self, id: Uuid) -> Result<JobInfo> {
        sqlx::query_as::<_, JobInfo>("SELECT id, title, created_by FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| NotifyError::not_found("job", id))
    }

    async fn fallback_admin(&self) -> Result<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM profiles WHERE is_admin = true ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}
