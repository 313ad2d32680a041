use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("no admin available to receive notifications for job {job_id}")]
    NoRecipient { job_id: Uuid },

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("change stream error: {0}")]
    Stream(String),

    #[error("malformed change payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl NotifyError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        NotifyError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Connection-level failures can be retried as a whole: inserts are
    /// guarded by the dedup check and mark-read is idempotent. Constraint
    /// violations, bad configuration and decode errors cannot.
    pub fn is_transient(&self) -> bool {
        match self {
            NotifyError::Storage(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
            ),
            NotifyError::Stream(_) => true,
            _ => false,
        }
    }

    /// Stable machine-readable code, used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            NotifyError::Validation(_) => "validation_error",
            NotifyError::NotFound { .. } => "not_found",
            NotifyError::NoRecipient { .. } => "no_recipient",
            NotifyError::Storage(_) => "storage_error",
            NotifyError::Stream(_) => "stream_error",
            NotifyError::Decode(_) => "decode_error",
            NotifyError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = NotifyError::Storage(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
        assert_eq!(err.code(), "storage_error");
        assert!(NotifyError::Storage(sqlx::Error::Protocol("unexpected eof".into())).is_transient());
    }

    #[test]
    fn test_non_connection_storage_errors_are_not_transient() {
        assert!(!NotifyError::Storage(sqlx::Error::Configuration("bad url".into())).is_transient());
        assert!(!NotifyError::Storage(sqlx::Error::RowNotFound).is_transient());
        assert!(!NotifyError::Storage(sqlx::Error::ColumnNotFound("status".into())).is_transient());
    }

    #[test]
    fn test_business_errors_are_not_transient() {
        assert!(!NotifyError::Validation("both recipients set".into()).is_transient());
        assert!(!NotifyError::not_found("job", Uuid::nil()).is_transient());
        assert!(!NotifyError::NoRecipient { job_id: Uuid::nil() }.is_transient());
    }

    #[test]
    fn test_not_found_message_names_entity() {
        let err = NotifyError::not_found("application", "abc");
        assert_eq!(err.to_string(), "application not found: abc");
    }
}
