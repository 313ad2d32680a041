//! Creation and lifecycle of hiring-pipeline notifications.

pub mod composer;
pub mod dedup;
pub mod service;

pub use dedup::{DedupGuard, DedupPolicy};
pub use service::{NotificationService, PipelineEvent};
