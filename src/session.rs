//! A mounted chat: store, backend, cache and the live feeds tied together.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::events::{Feed, LiveEvent};
use crate::api::models::{MessageStatus, PageArgs};
use crate::api::subscription::Subscription;
use crate::api::ChatBackend;
use crate::composer::Draft;
use crate::error::{Error, Result};
use crate::storage::MessageCache;
use crate::store::{MessageStore, StoreSnapshot};

/// How a dropped feed is re-subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnect {
    /// Attempts after a drop before the feed is given up.
    pub attempts: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            attempts: 5,
            first_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl Reconnect {
    /// Delay before attempt `n` (0-based), doubling up to `max_delay`.
    pub fn delay(&self, n: u32) -> Duration {
        self.first_delay
            .saturating_mul(2u32.saturating_pow(n))
            .min(self.max_delay)
    }
}

pub struct ChatSession<B> {
    backend: Arc<B>,
    page_size: u32,
    reconnect: Reconnect,
    store: Mutex<MessageStore>,
    updates: watch::Sender<StoreSnapshot>,
    cache: Option<Mutex<MessageCache>>,
}

impl<B: ChatBackend + 'static> ChatSession<B> {
    pub fn new(backend: Arc<B>, page_size: u32) -> Self {
        let (updates, _) = watch::channel(StoreSnapshot::default());
        Self {
            backend,
            page_size,
            reconnect: Reconnect::default(),
            store: Mutex::new(MessageStore::new()),
            updates,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: MessageCache) -> Self {
        self.cache = Some(Mutex::new(cache));
        self
    }

    pub fn with_reconnect(mut self, reconnect: Reconnect) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Receives a fresh snapshot after every change to the store.
    pub fn watch(&self) -> watch::Receiver<StoreSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.updates.borrow().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.updates.borrow().page.is_some()
    }

    /// Mutate the store under the lock, then publish the new snapshot.
    fn with_store<R>(&self, f: impl FnOnce(&mut MessageStore) -> R) -> R {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut store);
        let snapshot = store.snapshot();
        drop(store);
        self.updates.send_replace(snapshot);
        out
    }

    /// Show the cached page if nothing has loaded yet. Returns whether it did.
    pub fn restore_cached(&self) -> Result<bool> {
        let Some(cache) = &self.cache else {
            return Ok(false);
        };
        let (cached, cached_at) = {
            let cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            (cache.load_page()?, cache.cached_at()?)
        };
        let Some(page) = cached else {
            return Ok(false);
        };
        let count = page.edges.len();
        let restored = self.with_store(|store| store.restore_page(page));
        if restored {
            match cached_at {
                Some(at) => debug!("restored {count} cached messages from {at}"),
                None => debug!("restored {count} cached messages"),
            }
        }
        Ok(restored)
    }

    pub fn persist(&self) -> Result<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        let page = self.store.lock().unwrap_or_else(PoisonError::into_inner).page().cloned();
        if let Some(page) = page {
            cache.lock().unwrap_or_else(PoisonError::into_inner).save_page(&page)?;
        }
        Ok(())
    }

    /// Fetch the newest page and make it current.
    pub async fn load_initial(&self) -> Result<()> {
        let page = self.backend.fetch_messages(PageArgs::latest(self.page_size)).await?;
        info!("loaded {} messages", page.edges.len());
        self.with_store(|store| store.replace_page(page));
        if let Err(e) = self.persist() {
            warn!("could not cache messages: {e}");
        }
        Ok(())
    }

    /// Fetch the page before the oldest loaded message.
    ///
    /// Returns `false` without a request when a load is already in flight
    /// or there is nothing older. Failures are logged and absorbed.
    pub async fn load_earlier(&self) -> bool {
        let Some(before) = self.with_store(|store| store.begin_load_earlier()) else {
            return false;
        };
        let mut slot = LoadEarlierSlot {
            session: self,
            settled: false,
        };
        let result = self.backend.fetch_messages(PageArgs::before(before, self.page_size)).await;
        slot.settled = true;
        self.with_store(|store| store.finish_load_earlier(result));
        true
    }

    /// Show the draft's placeholder and send its text.
    pub async fn send(&self, draft: Draft) -> Result<()> {
        let temp_id = draft.temp_id().to_string();
        let text = draft.text().to_string();
        self.with_store(|store| store.insert_optimistic(draft.placeholder));
        self.deliver(&temp_id, &text).await
    }

    /// Re-send a placeholder whose earlier send failed.
    pub async fn retry(&self, temp_id: &str) -> Result<()> {
        let text = self
            .with_store(|store| {
                let text = failed_placeholder_text(store, temp_id)?;
                store.mark_sending(temp_id);
                Some(text)
            })
            .ok_or_else(|| Error::NotRetryable(temp_id.to_string()))?;
        self.deliver(temp_id, &text).await
    }

    /// Drop a failed placeholder from the list.
    pub fn discard(&self, temp_id: &str) -> Result<()> {
        self.with_store(|store| {
            failed_placeholder_text(store, temp_id)?;
            store.remove_placeholder(temp_id);
            Some(())
        })
        .ok_or_else(|| Error::NotRetryable(temp_id.to_string()))
    }

    async fn deliver(&self, temp_id: &str, text: &str) -> Result<()> {
        match self.backend.send_message(text).await {
            Ok(confirmed) => {
                if confirmed.is_none() {
                    debug!("SendMessage returned no message for {temp_id}");
                }
                self.with_store(|store| store.apply_send_result(confirmed.as_ref()));
                Ok(())
            }
            Err(e) => {
                warn!("sending {temp_id} failed: {e}");
                self.with_store(|store| store.mark_failed(temp_id));
                Err(e)
            }
        }
    }

    pub fn apply_event(&self, event: &LiveEvent) {
        self.with_store(|store| store.apply_event(event));
    }

    /// Subscribe to both push feeds and merge them until the handle is dropped.
    ///
    /// A feed that ends on its own is re-subscribed with backoff. Feeds
    /// given up on are reported through [`Mounted::lost_feeds`].
    pub async fn mount(self: &Arc<Self>) -> Result<Mounted> {
        let added = self.backend.subscribe(Feed::MessageAdded).await?;
        let updated = self.backend.subscribe(Feed::MessageUpdated).await?;
        let (lost_tx, lost) = mpsc::unbounded_channel();
        let session = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::join!(
                session.follow(added, lost_tx.clone()),
                session.follow(updated, lost_tx),
            );
        });
        Ok(Mounted {
            task,
            lost: Some(lost),
        })
    }

    async fn follow(&self, mut subscription: Subscription, lost: mpsc::UnboundedSender<Feed>) {
        let feed = subscription.feed();
        loop {
            while let Some(event) = subscription.next().await {
                self.apply_event(&event);
            }
            drop(subscription);
            warn!("{} closed, re-subscribing", feed.operation_name());
            match self.resubscribe(feed).await {
                Some(next) => subscription = next,
                None => {
                    warn!("giving up on {}", feed.operation_name());
                    let _ = lost.send(feed);
                    return;
                }
            }
        }
    }

    async fn resubscribe(&self, feed: Feed) -> Option<Subscription> {
        for attempt in 0..self.reconnect.attempts {
            tokio::time::sleep(self.reconnect.delay(attempt)).await;
            match self.backend.subscribe(feed).await {
                Ok(subscription) => {
                    info!("{} re-subscribed", feed.operation_name());
                    return Some(subscription);
                }
                Err(e) => debug!("{} attempt {} failed: {e}", feed.operation_name(), attempt + 1),
            }
        }
        None
    }
}

fn failed_placeholder_text(store: &MessageStore, temp_id: &str) -> Option<String> {
    store
        .page()?
        .find(temp_id)
        .filter(|m| m.is_temporary() && m.status == MessageStatus::Failed)
        .map(|m| m.text.clone())
}

/// Clears the "load earlier" flag if the load future is dropped mid-flight.
struct LoadEarlierSlot<'a, B: ChatBackend + 'static> {
    session: &'a ChatSession<B>,
    settled: bool,
}

impl<B: ChatBackend + 'static> Drop for LoadEarlierSlot<'_, B> {
    fn drop(&mut self) {
        if !self.settled {
            self.session.with_store(|store| store.abandon_load_earlier());
        }
    }
}

/// Live feeds of a mounted session. Dropping it unsubscribes both.
pub struct Mounted {
    task: JoinHandle<()>,
    lost: Option<mpsc::UnboundedReceiver<Feed>>,
}

impl Mounted {
    pub fn unmount(self) {}

    /// Yields each feed whose re-subscribe attempts ran out. Can be taken once.
    pub fn lost_feeds(&mut self) -> Option<mpsc::UnboundedReceiver<Feed>> {
        self.lost.take()
    }
}

impl Drop for Mounted {
    fn drop(&mut self) {
        self.task.abort();
    }
}
