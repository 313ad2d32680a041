//! Process-wide registry of live channels, keyed by recipient scope.
//!
//! Subscribers of the same scope share one upstream subscription. The
//! registry counts handles per scope; the upstream is torn down when the
//! last handle is closed or dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use super::backoff::ReconnectPolicy;
use super::channel::LiveChannel;
use super::{ChangeFeed, ChannelState, LiveEvent};
use crate::errors::{NotifyError, Result};
use crate::models::notification::Recipient;

struct ScopeEntry {
    channel: Arc<LiveChannel>,
    generation: u64,
    subscribers: usize,
}

struct Inner {
    feed: Arc<dyn ChangeFeed>,
    policy: ReconnectPolicy,
    capacity: usize,
    channels: DashMap<Recipient, ScopeEntry>,
    next_generation: AtomicU64,
}

impl Inner {
    // A handle that outlived `shutdown` must not touch a newer entry for
    // the same scope.
    fn release(&self, recipient: &Recipient, generation: u64) {
        if let MapEntry::Occupied(mut occupied) = self.channels.entry(*recipient) {
            if occupied.get().generation != generation {
                return;
            }
            let entry = occupied.get_mut();
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                let (_, entry) = occupied.remove_entry();
                entry.channel.stop();
                tracing::debug!(scope = %recipient, "last subscriber left, channel released");
            }
        }
    }
}

/// Shared, cheaply-cloneable handle to the registry.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// `capacity` is the per-scope event buffer; slower subscribers get a
    /// `LiveEvent::Resync` instead of the events they missed.
    pub fn new(feed: Arc<dyn ChangeFeed>, policy: ReconnectPolicy, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                feed,
                policy,
                capacity,
                channels: DashMap::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to live events for `recipient`, starting the upstream
    /// subscription if this is the first subscriber.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(&self, recipient: Recipient) -> Subscription {
        let inner = &self.inner;
        let mut entry = inner.channels.entry(recipient).or_insert_with(|| ScopeEntry {
            channel: Arc::new(LiveChannel::new(recipient, inner.capacity)),
            generation: inner.next_generation.fetch_add(1, Ordering::Relaxed),
            subscribers: 0,
        });

        // Receivers first, so nothing the task emits on startup is missed.
        let events = entry.channel.subscribe();
        let state = entry.channel.watch_state();
        let generation = entry.generation;
        if entry.channel.is_idle() {
            entry.channel.start(inner.feed.clone(), inner.policy);
        }
        entry.subscribers += 1;
        let subscribers = entry.subscribers;
        drop(entry);

        tracing::debug!(scope = %recipient, subscribers, "live subscription opened");

        Subscription {
            recipient,
            events,
            state,
            generation,
            manager: self.inner.clone(),
            released: false,
        }
    }

    /// Replace the upstream subscription of a scope with a fresh one.
    /// Existing handles stay attached. Returns false if the scope is not open.
    pub fn restart(&self, recipient: &Recipient) -> bool {
        match self.inner.channels.get(recipient) {
            Some(entry) => {
                entry
                    .channel
                    .start(self.inner.feed.clone(), self.inner.policy);
                true
            }
            None => false,
        }
    }

    pub fn state(&self, recipient: &Recipient) -> ChannelState {
        self.inner
            .channels
            .get(recipient)
            .map(|e| e.channel.state())
            .unwrap_or(ChannelState::Disconnected)
    }

    pub fn subscriber_count(&self, recipient: &Recipient) -> usize {
        self.inner
            .channels
            .get(recipient)
            .map(|e| e.subscribers)
            .unwrap_or(0)
    }

    /// Number of scopes with an upstream subscription.
    pub fn open_scopes(&self) -> usize {
        self.inner.channels.len()
    }

    /// Close every upstream subscription. Outstanding handles see the end
    /// of their stream.
    pub fn shutdown(&self) {
        let scopes: Vec<Recipient> = self.inner.channels.iter().map(|e| *e.key()).collect();
        for scope in scopes {
            if let Some((_, entry)) = self.inner.channels.remove(&scope) {
                entry.channel.stop();
            }
        }
        tracing::info!("connection manager shut down");
    }
}

/// A subscriber's handle on a scope's live events.
///
/// Closing (or dropping) the handle releases its share of the upstream
/// subscription.
pub struct Subscription {
    recipient: Recipient,
    events: broadcast::Receiver<LiveEvent>,
    state: watch::Receiver<ChannelState>,
    generation: u64,
    manager: Arc<Inner>,
    released: bool,
}

impl Subscription {
    pub fn recipient(&self) -> Recipient {
        self.recipient
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Wait until the upstream subscription is active.
    pub async fn wait_active(&mut self) -> Result<()> {
        self.state
            .wait_for(|s| *s == ChannelState::Active)
            .await
            .map(|_| ())
            .map_err(|_| NotifyError::Stream(format!("channel for {} closed", self.recipient)))
    }

    /// Next event for this scope, or `None` once the channel is gone.
    /// Falling behind the buffer yields `LiveEvent::Resync`.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        match self.events.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(scope = %self.recipient, missed, "subscriber lagged behind live channel");
                Some(LiveEvent::Resync)
            }
            Err(RecvError::Closed) => None,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = LiveEvent> {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release(&self.recipient, self.generation);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
