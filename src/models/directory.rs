//! Records returned by the identity and application/job collaborators.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::notification::Recipient;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// The currently authenticated actor. The role is taken as given.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn recipient(&self) -> Recipient {
        match self.role {
            Role::User => Recipient::user(self.id),
            Role::Admin => Recipient::admin(self.id),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ApplicationInfo {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub job_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct JobInfo {
    pub id: Uuid,
    pub title: Option<String>,
    /// Admin who created the job; the default recipient for new applications.
    pub created_by: Option<Uuid>,
}
