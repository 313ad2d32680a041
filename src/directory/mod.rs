//! Lookups the notification core needs from the rest of the hiring system:
//! who is acting, and the few application/job fields used in message text.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::directory::{Actor, ApplicationInfo, JobInfo, Role};

pub mod postgres;

/// Resolves the currently authenticated actor.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_actor(&self) -> Result<Actor>;
}

#[async_trait]
pub trait ApplicationDirectory: Send + Sync {
    /// Fails with `NotFound` when the application does not exist.
    async fn get_application(&self, id: Uuid) -> Result<ApplicationInfo>;

    /// Fails with `NotFound` when the job does not exist.
    async fn get_job(&self, id: Uuid) -> Result<JobInfo>;

    /// Admin notified when a job has no creator on record.
    async fn fallback_admin(&self) -> Result<Option<Uuid>>;
}

/// Fixed identity, for the CLI and for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticIdentity(pub Actor);

impl StaticIdentity {
    pub fn user(id: Uuid) -> Self {
        Self(Actor { id, role: Role::User })
    }

    pub fn admin(id: Uuid) -> Self {
        Self(Actor { id, role: Role::Admin })
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_actor(&self) -> Result<Actor> {
        Ok(self.0)
    }
}
