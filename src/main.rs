use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hiring_notify::config::{self, Config};
use hiring_notify::directory::postgres::PgDirectory;
use hiring_notify::errors::NotifyError;
use hiring_notify::live::backoff::ReconnectPolicy;
use hiring_notify::live::cache::{LiveFeed, UnreadSignal};
use hiring_notify::live::manager::ConnectionManager;
use hiring_notify::live::postgres::PgChangeFeed;
use hiring_notify::live::LiveEvent;
use hiring_notify::models::notification::{ListOptions, Notification, Recipient};
use hiring_notify::notification::NotificationService;
use hiring_notify::store::postgres::PgStore;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = run(cfg, args.command).await;

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    opentelemetry::global::shutdown_tracer_provider();
    result
}

fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Export spans over OTLP only when a collector is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "hiring-notify"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json = std::env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json"));

    // Logs go to stderr so command output on stdout stays clean.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "hiring_notify=debug".into()),
        ))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run(cfg: Config, command: cli::Commands) -> anyhow::Result<()> {
    tracing::debug!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    if let cli::Commands::Migrate = command {
        tracing::info!("Running migrations...");
        db.migrate().await?;
        println!("Migrations applied.");
        return Ok(());
    }

    let pool = db.pool().clone();
    let service = NotificationService::new(Arc::new(db), Arc::new(PgDirectory::new(pool.clone())))
        .with_dedup_policy(cfg.dedup_policy)
        .with_feed_options(cfg.feed_options());

    match command {
        cli::Commands::Migrate => Ok(()),
        cli::Commands::Feed {
            recipient,
            unread_only,
        } => {
            let items = if unread_only {
                let opts = ListOptions {
                    unread_only: true,
                    ..cfg.feed_options()
                };
                service.store().list_for_scope(&recipient, &opts).await?
            } else {
                service.list_feed(&recipient).await?.items
            };
            print_feed(&items);
            Ok(())
        }
        cli::Commands::Unread { recipient } => {
            println!("{}", service.count_unread(&recipient).await?);
            Ok(())
        }
        cli::Commands::MarkRead { id } => match service.mark_as_read(id).await {
            Ok(()) => {
                println!("Notification {} marked read.", id);
                Ok(())
            }
            Err(NotifyError::NotFound { .. }) => {
                println!("Notification {} not found.", id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        cli::Commands::MarkAllRead { recipient } => {
            let count = service.mark_all_as_read(&recipient).await?;
            println!("{} notification(s) marked read for {}.", count, recipient);
            Ok(())
        }
        cli::Commands::Submitted {
            application,
            job,
            first_name,
            last_name,
        } => {
            let created = service
                .notify_application_submitted(application, job, &first_name, &last_name)
                .await?;
            print_created(created);
            Ok(())
        }
        cli::Commands::StatusChanged {
            application,
            user,
            status,
        } => {
            let created = service
                .notify_status_changed(application, user, &status)
                .await?;
            print_created(created);
            Ok(())
        }
        cli::Commands::Watch { recipient } => {
            let feed = Arc::new(PgChangeFeed::new(pool));
            watch(service, feed, cfg.reconnect, cfg.channel_capacity, recipient).await
        }
    }
}

async fn watch(
    service: NotificationService,
    feed: Arc<PgChangeFeed>,
    policy: ReconnectPolicy,
    capacity: usize,
    recipient: Recipient,
) -> anyhow::Result<()> {
    let manager = ConnectionManager::new(feed, policy, capacity);
    let mut live = LiveFeed::open(service, &manager, recipient).await?;

    print_feed(live.items());
    println!("-- watching {} ({} unread), Ctrl-C to stop --", recipient, live.unread());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = live.next() => {
                let Some(update) = update? else {
                    tracing::warn!("live channel closed");
                    break;
                };
                if let Some(n) = update.toast() {
                    println!("[new] {}  {}", n.created_at.format("%Y-%m-%d %H:%M"), n.message);
                }
                match (&update.event, update.signal) {
                    (LiveEvent::Resync, _) => println!("-- resynced --"),
                    (_, Some(UnreadSignal::Decrement)) => println!("-- marked read --"),
                    _ => {}
                }
                println!("unread: {}", update.unread);
            }
        }
    }

    live.close();
    manager.shutdown();
    Ok(())
}

fn print_feed(items: &[Notification]) {
    if items.is_empty() {
        println!("No notifications.");
        return;
    }
    println!("{:<38} {:<17} {:<6} {:<16} MESSAGE", "ID", "CREATED", "READ", "KIND");
    for n in items {
        println!(
            "{:<38} {:<17} {:<6} {:<16} {}",
            n.id,
            n.created_at.format("%Y-%m-%d %H:%M"),
            n.is_read,
            n.notification_kind.as_str(),
            n.message
        );
    }
}

fn print_created(created: Option<Notification>) {
    match created {
        Some(n) => {
            println!("Notification created:");
            println!("  ID:        {}", n.id);
            println!("  Recipient: {}", n.recipient().map(|r| r.to_string()).unwrap_or_default());
            println!("  Message:   {}", n.message);
        }
        None => println!("Skipped: an unread notification for this event already exists."),
    }
}
