//! Message text for stored notifications. Text is composed once at creation
//! and never re-rendered.

use crate::models::notification::{ApplicationStatus, NotificationKind};

/// Rendered in place of a missing or blank job title.
pub const DEFAULT_JOB_TITLE: &str = "Poste non spécifié";

/// Used for statuses without a fixed phrase. Carries no job suffix.
pub const GENERIC_STATUS_MESSAGE: &str = "The status of your application has been updated";

/// Everything the composer needs to render one notification.
#[derive(Debug, Clone, Copy)]
pub enum MessageInput<'a> {
    NewApplication {
        first_name: &'a str,
        last_name: &'a str,
        job_title: Option<&'a str>,
    },
    StatusChange {
        status: &'a str,
        job_title: Option<&'a str>,
    },
}

impl MessageInput<'_> {
    pub fn kind(&self) -> NotificationKind {
        match self {
            MessageInput::NewApplication { .. } => NotificationKind::NewApplication,
            MessageInput::StatusChange { .. } => NotificationKind::StatusChange,
        }
    }
}

pub fn compose(input: MessageInput<'_>) -> String {
    match input {
        MessageInput::NewApplication {
            first_name,
            last_name,
            job_title,
        } => new_application_message(first_name, last_name, job_title),
        MessageInput::StatusChange { status, job_title } => {
            status_change_message(status, job_title)
        }
    }
}

pub fn new_application_message(first_name: &str, last_name: &str, job_title: Option<&str>) -> String {
    let name = format!("{} {}", first_name.trim(), last_name.trim());
    format!(
        "{} applied for position \"{}\"",
        name.trim(),
        job_title_or_default(job_title)
    )
}

pub fn status_change_message(status: &str, job_title: Option<&str>) -> String {
    match ApplicationStatus::parse(status) {
        Some(known) => format!(
            "{} pour le poste \"{}\"",
            status_phrase(known),
            job_title_or_default(job_title)
        ),
        None => GENERIC_STATUS_MESSAGE.to_string(),
    }
}

pub fn status_phrase(status: ApplicationStatus) -> &'static str {
    match status {
        ApplicationStatus::Pending => "Votre candidature est en attente d'examen",
        ApplicationStatus::UnderReview => "Votre candidature est en cours d'examen",
        ApplicationStatus::Accepted => "Félicitations ! Votre candidature a été acceptée",
        ApplicationStatus::Rejected => "Votre candidature n'a malheureusement pas été retenue",
        ApplicationStatus::Archived => "Votre candidature a été archivée",
    }
}

fn job_title_or_default(title: Option<&str>) -> &str {
    match title.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => DEFAULT_JOB_TITLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_application_message() {
        let msg = compose(MessageInput::NewApplication {
            first_name: "Jane",
            last_name: "Doe",
            job_title: Some("Backend Engineer"),
        });
        assert_eq!(msg, "Jane Doe applied for position \"Backend Engineer\"");
    }

    #[test]
    fn test_status_change_messages_for_canonical_statuses() {
        let title = Some("Backend Engineer");
        assert_eq!(
            status_change_message("accepter", title),
            "Félicitations ! Votre candidature a été acceptée pour le poste \"Backend Engineer\""
        );
        assert_eq!(
            status_change_message("refuser", title),
            "Votre candidature n'a malheureusement pas été retenue pour le poste \"Backend Engineer\""
        );
        assert_eq!(
            status_change_message("en attente", title),
            "Votre candidature est en attente d'examen pour le poste \"Backend Engineer\""
        );
        assert_eq!(
            status_change_message("en cours d'examination", title),
            "Votre candidature est en cours d'examen pour le poste \"Backend Engineer\""
        );
    }

    #[test]
    fn test_english_alias_uses_same_phrase() {
        assert_eq!(
            status_change_message("accepted", Some("QA")),
            status_change_message("accepter", Some("QA"))
        );
    }

    #[test]
    fn test_unknown_status_has_no_job_suffix() {
        assert_eq!(status_change_message("on hold", Some("QA")), GENERIC_STATUS_MESSAGE);
    }

    #[test]
    fn test_blank_title_uses_default() {
        assert_eq!(
            new_application_message("Jane", "Doe", Some("   ")),
            "Jane Doe applied for position \"Poste non spécifié\""
        );
        assert_eq!(
            status_change_message("archived", None),
            "Votre candidature a été archivée pour le poste \"Poste non spécifié\""
        );
    }

    #[test]
    fn test_input_kind() {
        let input = MessageInput::StatusChange {
            status: "refuser",
            job_title: None,
        };
        assert_eq!(input.kind(), NotificationKind::StatusChange);
    }
}
