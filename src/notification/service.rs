use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::composer::{self, MessageInput};
use super::dedup::{DedupGuard, DedupPolicy};
use crate::directory::{ApplicationDirectory, IdentityProvider};
use crate::errors::{NotifyError, Result};
use crate::models::notification::{
    ApplicationStatus, Feed, ListOptions, NewNotification, Notification, NotificationKind,
    Recipient,
};
use crate::store::NotificationStore;

/// Pipeline events that produce notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    ApplicationSubmitted {
        application_id: Uuid,
        job_id: Uuid,
        first_name: String,
        last_name: String,
    },
    StatusChanged {
        application_id: Uuid,
        user_id: Uuid,
        status: String,
    },
}

/// Entry point for creating, listing and acknowledging notifications.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn ApplicationDirectory>,
    dedup: DedupGuard,
    feed_options: ListOptions,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, directory: Arc<dyn ApplicationDirectory>) -> Self {
        Self {
            store,
            directory,
            dedup: DedupGuard::default(),
            feed_options: ListOptions::default(),
        }
    }

    pub fn with_dedup_policy(mut self, policy: DedupPolicy) -> Self {
        self.dedup = DedupGuard::new(policy);
        self
    }

    pub fn with_feed_options(mut self, opts: ListOptions) -> Self {
        self.feed_options = opts;
        self
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        self.dedup.policy()
    }

    /// Notify the job's admin of a new application. Returns `None` when an
    /// unread notification for the same application already exists.
    pub async fn notify_application_submitted(
        &self,
        application_id: Uuid,
        job_id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> Result<Option<Notification>> {
        let job = self.directory.get_job(job_id).await?;
        let admin_id = match job.created_by {
            Some(id) => id,
            None => {
                let fallback = self
                    .directory
                    .fallback_admin()
                    .await?
                    .ok_or(NotifyError::NoRecipient { job_id })?;
                tracing::debug!(job_id = %job_id, admin_id = %fallback, "job has no creator, using fallback admin");
                fallback
            }
        };

        let input = MessageInput::NewApplication {
            first_name,
            last_name,
            job_title: job.title.as_deref(),
        };
        let new = NewNotification::new(
            Recipient::admin(admin_id),
            application_id,
            input.kind(),
            composer::compose(input),
        );

        let created = self.dedup.create(self.store.as_ref(), new).await?;
        if let Some(n) = &created {
            tracing::info!(
                notification_id = %n.id,
                application_id = %application_id,
                admin_id = %admin_id,
                "new application notification created"
            );
        }
        Ok(created)
    }

    /// Notify the applicant that their application changed status.
    pub async fn notify_status_changed(
        &self,
        application_id: Uuid,
        user_id: Uuid,
        status: &str,
    ) -> Result<Option<Notification>> {
        let status = stored_status(status)?;
        let application = self.directory.get_application(application_id).await?;
        let job = self.directory.get_job(application.job_id).await?;

        let input = MessageInput::StatusChange {
            status: &status,
            job_title: job.title.as_deref(),
        };
        let new = NewNotification::new(
            Recipient::user(user_id),
            application_id,
            NotificationKind::StatusChange,
            composer::compose(input),
        )
        .with_status(status.clone());

        let created = self.dedup.create(self.store.as_ref(), new).await?;
        if let Some(n) = &created {
            tracing::info!(
                notification_id = %n.id,
                application_id = %application_id,
                user_id = %user_id,
                status = %status,
                "status change notification created"
            );
        }
        Ok(created)
    }

    pub async fn mark_as_read(&self, id: Uuid) -> Result<()> {
        self.store.mark_read(id).await
    }

    pub async fn mark_all_as_read(&self, recipient: &Recipient) -> Result<u64> {
        let count = self.store.mark_all_read(recipient).await?;
        tracing::debug!(scope = %recipient, count, "marked all notifications read");
        Ok(count)
    }

    pub async fn list_feed(&self, recipient: &Recipient) -> Result<Feed> {
        let items = self
            .store
            .list_for_scope(recipient, &self.feed_options)
            .await?;
        Ok(Feed::from_items(items))
    }

    pub async fn count_unread(&self, recipient: &Recipient) -> Result<i64> {
        self.store.count_unread(recipient).await
    }

    /// Feed of whoever the identity provider says is acting.
    pub async fn feed_for_actor(&self, identity: &dyn IdentityProvider) -> Result<(Recipient, Feed)> {
        let recipient = identity.current_actor().await?.recipient();
        let feed = self.list_feed(&recipient).await?;
        Ok((recipient, feed))
    }

    /// Run a pipeline event to completion without failing the caller.
    /// The action that triggered the event has already succeeded; a lost
    /// notification is logged, never propagated.
    pub async fn handle(&self, event: PipelineEvent) -> Option<Notification> {
        let result = match &event {
            PipelineEvent::ApplicationSubmitted {
                application_id,
                job_id,
                first_name,
                last_name,
            } => {
                self.notify_application_submitted(*application_id, *job_id, first_name, last_name)
                    .await
            }
            PipelineEvent::StatusChanged {
                application_id,
                user_id,
                status,
            } => {
                self.notify_status_changed(*application_id, *user_id, status)
                    .await
            }
        };

        match result {
            Ok(created) => created,
            Err(e) => {
                match &e {
                    NotifyError::NoRecipient { .. }
                    | NotifyError::NotFound { .. }
                    | NotifyError::Validation(_) => {
                        tracing::warn!(code = e.code(), ?event, "notification skipped: {}", e);
                    }
                    _ => {
                        tracing::error!(
                            code = e.code(),
                            transient = e.is_transient(),
                            ?event,
                            "notification failed: {}",
                            e
                        );
                    }
                }
                None
            }
        }
    }
}

/// Canonical form for known statuses, the trimmed input otherwise.
fn stored_status(raw: &str) -> Result<String> {
    if let Some(known) = ApplicationStatus::parse(raw) {
        return Ok(known.as_str().to_string());
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NotifyError::Validation("status must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_status_canonicalizes_aliases() {
        assert_eq!(stored_status("accepted").unwrap(), "accepter");
        assert_eq!(stored_status("  refuser ").unwrap(), "refuser");
        assert_eq!(stored_status(" on hold ").unwrap(), "on hold");
        assert!(stored_status("   ").is_err());
    }

    #[test]
    fn test_pipeline_event_json_shape() {
        let event: PipelineEvent = serde_json::from_value(serde_json::json!({
            "event": "status_changed",
            "application_id": Uuid::nil(),
            "user_id": Uuid::nil(),
            "status": "accepter"
        }))
        .unwrap();
        assert!(matches!(event, PipelineEvent::StatusChanged { .. }));
    }
}
