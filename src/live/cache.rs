use std::cmp::Ordering;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::manager::{ConnectionManager, Subscription};
use super::LiveEvent;
use crate::errors::Result;
use crate::models::notification::{Feed, Notification, Recipient};
use crate::notification::service::NotificationService;

/// How long `LiveFeed::open` waits for the upstream before serving the
/// snapshot alone.
const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Change to the unread badge caused by one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadSignal {
    Increment,
    Decrement,
    /// The previous local state was unknown; this is the recomputed count.
    Recount(usize),
}

/// Subscriber-side copy of a feed, patched by live events.
#[derive(Debug, Clone, Default)]
pub struct FeedCache {
    items: Vec<Notification>,
    unread: usize,
}

impl FeedCache {
    pub fn from_feed(feed: Feed) -> Self {
        let mut cache = Self::default();
        cache.reset(feed);
        cache
    }

    /// Replace the cache with a fresh snapshot.
    pub fn reset(&mut self, feed: Feed) {
        self.items = feed.items;
        self.recount();
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.items.iter().any(|n| n.id == id)
    }

    fn recount(&mut self) -> usize {
        self.unread = self.items.iter().filter(|n| !n.is_read).count();
        self.unread
    }

    pub fn apply(&mut self, event: &LiveEvent) -> Option<UnreadSignal> {
        match event {
            LiveEvent::Inserted(n) => {
                if self.contains(n.id) {
                    return None;
                }
                // Backdated rows land at their place in feed order.
                let at = self
                    .items
                    .partition_point(|c| Notification::feed_order(c, n) == Ordering::Less);
                self.items.insert(at, n.clone());
                if n.is_read {
                    None
                } else {
                    self.unread += 1;
                    Some(UnreadSignal::Increment)
                }
            }
            LiveEvent::Updated(n) => {
                let Some(slot) = self.items.iter_mut().find(|c| c.id == n.id) else {
                    return Some(UnreadSignal::Recount(self.recount()));
                };
                let was_read = slot.is_read;
                *slot = n.clone();
                match (was_read, n.is_read) {
                    (false, true) => {
                        self.unread = self.unread.saturating_sub(1);
                        Some(UnreadSignal::Decrement)
                    }
                    (true, false) => {
                        self.unread += 1;
                        Some(UnreadSignal::Increment)
                    }
                    _ => None,
                }
            }
            LiveEvent::Resync => None,
        }
    }

    /// Optimistically flag one entry as read.
    pub fn mark_read_local(&mut self, id: Uuid) -> Option<UnreadSignal> {
        let slot = self.items.iter_mut().find(|n| n.id == id && !n.is_read)?;
        slot.is_read = true;
        slot.read_at = Some(Utc::now());
        self.unread = self.unread.saturating_sub(1);
        Some(UnreadSignal::Decrement)
    }

    pub fn mark_all_read_local(&mut self) -> usize {
        let now = Utc::now();
        let mut flipped = 0;
        for n in self.items.iter_mut().filter(|n| !n.is_read) {
            n.is_read = true;
            n.read_at = Some(now);
            flipped += 1;
        }
        self.unread = 0;
        flipped
    }
}

/// What one step of a [`LiveFeed`] did to the local view.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedUpdate {
    pub event: LiveEvent,
    pub signal: Option<UnreadSignal>,
    pub unread: usize,
}

impl FeedUpdate {
    /// The newly arrived notification, if this update should surface as a toast.
    pub fn toast(&self) -> Option<&Notification> {
        match (&self.event, self.signal) {
            (LiveEvent::Inserted(n), Some(UnreadSignal::Increment)) => Some(n),
            _ => None,
        }
    }
}

/// A recipient's feed kept current from a snapshot plus the live stream.
pub struct LiveFeed {
    service: NotificationService,
    subscription: Subscription,
    cache: FeedCache,
}

impl LiveFeed {
    /// Subscribe first, then take the snapshot, so events racing the
    /// snapshot are queued and reconciled by id.
    pub async fn open(
        service: NotificationService,
        manager: &ConnectionManager,
        recipient: Recipient,
    ) -> Result<Self> {
        let mut subscription = manager.open(recipient);
        match tokio::time::timeout(ACTIVATION_TIMEOUT, subscription.wait_active()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!(scope = %recipient, "live channel not active yet, serving snapshot");
            }
        }

        let feed = service.list_feed(&recipient).await?;
        Ok(Self {
            service,
            subscription,
            cache: FeedCache::from_feed(feed),
        })
    }

    pub fn recipient(&self) -> Recipient {
        self.subscription.recipient()
    }

    pub fn items(&self) -> &[Notification] {
        self.cache.items()
    }

    pub fn unread(&self) -> usize {
        self.cache.unread()
    }

    /// Wait for the next live event and apply it. `Ok(None)` means the
    /// channel was shut down.
    pub async fn next(&mut self) -> Result<Option<FeedUpdate>> {
        let Some(event) = self.subscription.recv().await else {
            return Ok(None);
        };

        let signal = match &event {
            LiveEvent::Resync => Some(UnreadSignal::Recount(self.resync().await?)),
            LiveEvent::Inserted(_) | LiveEvent::Updated(_) => self.cache.apply(&event),
        };

        Ok(Some(FeedUpdate {
            event,
            signal,
            unread: self.cache.unread(),
        }))
    }

    /// Reload the snapshot and return the fresh unread count.
    pub async fn resync(&mut self) -> Result<usize> {
        let feed = self.service.list_feed(&self.recipient()).await?;
        self.cache.reset(feed);
        tracing::debug!(scope = %self.recipient(), unread = self.cache.unread(), "feed resynced");
        Ok(self.cache.unread())
    }

    pub async fn mark_as_read(&mut self, id: Uuid) -> Result<()> {
        self.cache.mark_read_local(id);
        if let Err(e) = self.service.mark_as_read(id).await {
            if let Err(resync_err) = self.resync().await {
                tracing::warn!("resync after failed mark-as-read also failed: {}", resync_err);
            }
            return Err(e);
        }
        Ok(())
    }

    pub async fn mark_all_as_read(&mut self) -> Result<u64> {
        self.cache.mark_all_read_local();
        match self.service.mark_all_as_read(&self.recipient()).await {
            Ok(count) => Ok(count),
            Err(e) => {
                if let Err(resync_err) = self.resync().await {
                    tracing::warn!("resync after failed mark-all-as-read also failed: {}", resync_err);
                }
                Err(e)
            }
        }
    }

    pub fn close(self) {
        self.subscription.close();
    }
}
