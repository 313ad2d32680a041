use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use super::{ChangeFeed, ChannelState, ColumnFilter, LiveEvent};
use crate::models::notification::Recipient;
use crate::store::NOTIFICATIONS_TABLE;

/// The upstream subscription for one recipient scope.
///
/// Owns a background task that subscribes to the change feed, turns raw rows
/// into [`LiveEvent`]s and fans them out on a broadcast channel. Transport
/// failures move the channel to `Error` and it re-subscribes with backoff.
pub struct LiveChannel {
    recipient: Recipient,
    events: broadcast::Sender<LiveEvent>,
    state: watch::Sender<ChannelState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveChannel {
    pub fn new(recipient: Recipient, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            recipient,
            events,
            state,
            task: Mutex::new(None),
        }
    }

    pub fn recipient(&self) -> Recipient {
        self.recipient
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.events.subscribe()
    }

    /// True when no upstream task is running (never started, stopped, or died).
    pub fn is_idle(&self) -> bool {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        task.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Start the upstream task, tearing down any task already running for
    /// this scope first. Replacing a task makes subscribers resync.
    pub fn start(&self, feed: Arc<dyn ChangeFeed>, policy: ReconnectPolicy) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        let replacing = match task.take() {
            Some(previous) => {
                debug!(scope = %self.recipient, "tearing down previous live subscription");
                previous.abort();
                true
            }
            None => false,
        };

        self.state.send_replace(ChannelState::Subscribing);
        *task = Some(tokio::spawn(run(
            self.recipient,
            feed,
            policy,
            self.events.clone(),
            self.state.clone(),
            replacing,
        )));
    }

    pub fn stop(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
            info!(scope = %self.recipient, "live subscription closed");
        }
        self.state.send_replace(ChannelState::Disconnected);
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    recipient: Recipient,
    feed: Arc<dyn ChangeFeed>,
    policy: ReconnectPolicy,
    events: broadcast::Sender<LiveEvent>,
    state: watch::Sender<ChannelState>,
    replacing: bool,
) {
    let filter = ColumnFilter::for_recipient(&recipient);
    let mut failures: u32 = 0;
    let mut connected_before = replacing;

    loop {
        state.send_replace(ChannelState::Subscribing);

        match feed.subscribe(NOTIFICATIONS_TABLE, filter.clone()).await {
            Ok(mut stream) => {
                let recovering = connected_before || failures > 0;
                failures = 0;
                connected_before = true;
                state.send_replace(ChannelState::Active);
                info!(scope = %recipient, %filter, "live subscription active");

                if recovering {
                    // Anything emitted while we were away is lost.
                    let _ = events.send(LiveEvent::Resync);
                }

                while let Some(item) = stream.next().await {
                    let change = match item {
                        Ok(change) => change,
                        Err(e) => {
                            warn!(scope = %recipient, code = e.code(), "live stream failed: {}", e);
                            break;
                        }
                    };
                    match change.into_live() {
                        Ok(event) => {
                            if let LiveEvent::Inserted(n) | LiveEvent::Updated(n) = &event {
                                if !n.belongs_to(&recipient) {
                                    continue;
                                }
                            }
                            // No receivers just means nobody is listening right now.
                            let _ = events.send(event);
                        }
                        Err(e) => {
                            warn!(scope = %recipient, "skipping malformed change event: {}", e);
                        }
                    }
                }
                debug!(scope = %recipient, "live stream ended");
            }
            Err(e) => {
                warn!(scope = %recipient, code = e.code(), "live subscribe failed: {}", e);
            }
        }

        state.send_replace(ChannelState::Error);
        failures = failures.saturating_add(1);
        let delay = policy.delay(failures);
        debug!(scope = %recipient, attempt = failures, ?delay, "re-subscribing after backoff");
        tokio::time::sleep(delay).await;
    }
}
