use clap::{Parser, Subcommand};
use uuid::Uuid;

use hiring_notify::models::notification::Recipient;

/// hiring-notify — notification core for the hiring pipeline
#[derive(Parser)]
#[command(name = "hiring-notify", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Show the notification feed of a recipient
    Feed {
        /// Recipient scope, e.g. user:<uuid> or admin:<uuid>
        #[arg(long)]
        recipient: Recipient,
        /// Only show unread notifications
        #[arg(long)]
        unread_only: bool,
    },

    /// Print the unread count of a recipient
    Unread {
        #[arg(long)]
        recipient: Recipient,
    },

    /// Mark one notification as read
    MarkRead {
        #[arg(long)]
        id: Uuid,
    },

    /// Mark every notification of a recipient as read
    MarkAllRead {
        #[arg(long)]
        recipient: Recipient,
    },

    /// Record a submitted application (notifies the job's admin)
    Submitted {
        #[arg(long)]
        application: Uuid,
        #[arg(long)]
        job: Uuid,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
    },

    /// Record an application status change (notifies the applicant)
    StatusChanged {
        #[arg(long)]
        application: Uuid,
        #[arg(long)]
        user: Uuid,
        /// New status, e.g. "accepter" or "refuser"
        #[arg(long)]
        status: String,
    },

    /// Follow a recipient's feed live until interrupted
    Watch {
        #[arg(long)]
        recipient: Recipient,
    },
}
