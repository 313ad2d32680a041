//! Shared fixtures: an in-memory application/job directory and helpers to
//! wire a service over the in-memory store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use hiring_notify::directory::ApplicationDirectory;
use hiring_notify::errors::{NotifyError, Result};
use hiring_notify::live::backoff::ReconnectPolicy;
use hiring_notify::models::directory::{ApplicationInfo, JobInfo};
use hiring_notify::notification::NotificationService;
use hiring_notify::store::memory::MemoryStore;

pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
pub struct FakeDirectory {
    applications: Mutex<HashMap<Uuid, ApplicationInfo>>,
    jobs: Mutex<HashMap<Uuid, JobInfo>>,
    fallback: Mutex<Option<Uuid>>,
}

impl FakeDirectory {
    pub fn add_job(&self, title: Option<&str>, created_by: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs.lock().unwrap().insert(
            id,
            JobInfo {
                id,
                title: title.map(String::from),
                created_by,
            },
        );
        id
    }

    pub fn add_application(&self, first_name: &str, last_name: &str, job_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.applications.lock().unwrap().insert(
            id,
            ApplicationInfo {
                id,
                first_name: first_name.into(),
                last_name: last_name.into(),
                job_id,
            },
        );
        id
    }

    pub fn set_fallback_admin(&self, admin: Option<Uuid>) {
        *self.fallback.lock().unwrap() = admin;
    }
}

#[async_trait]
impl ApplicationDirectory for FakeDirectory {
    async fn get_application(&self, id: Uuid) -> Result<ApplicationInfo> {
        self.applications
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| NotifyError::not_found("application", id))
    }

    async fn get_job(&self, id: Uuid) -> Result<JobInfo> {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| NotifyError::not_found("job", id))
    }

    async fn fallback_admin(&self) -> Result<Option<Uuid>> {
        Ok(*self.fallback.lock().unwrap())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub directory: Arc<FakeDirectory>,
    pub service: NotificationService,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(FakeDirectory::default());
    let service = NotificationService::new(store.clone(), directory.clone());
    Harness {
        store,
        directory,
        service,
    }
}

/// Fast reconnects without jitter.
pub fn quick_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_backoff_ms: 10,
        max_backoff_ms: 50,
        jitter_ms: 0,
    }
}
