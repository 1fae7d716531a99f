use std::ops::Range;

use log::{debug, warn};

use crate::api::events::LiveEvent;
use crate::api::models::{Message, MessagePage};
use crate::error::Result;
use crate::merge;

/// The currently visible page plus the "load earlier" single-flight flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStore {
    page: Option<MessagePage>,
    loading_earlier: bool,
    /// Set once a page fetched from the server has been installed.
    fresh: bool,
    /// Pushes received before that, replayed over the fetched page.
    backlog: Vec<LiveEvent>,
}

/// What the view renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub page: Option<MessagePage>,
    pub loading_earlier: bool,
}

impl StoreSnapshot {
    pub fn has_older(&self) -> bool {
        self.page
            .as_ref()
            .is_some_and(|p| p.page_info.has_previous_page)
    }

    /// Older messages exist, none are loading, and the rows shown do not
    /// fill the viewport, so no scroll will ever reach the top edge.
    pub fn wants_older(&self, content_height: f64, viewport_height: f64) -> bool {
        !self.loading_earlier && self.has_older() && content_height <= viewport_height
    }
}

/// The one contiguous run of rows that differs between two renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListChange {
    pub position: usize,
    pub removed: usize,
    /// Indices into the new list.
    pub added: Range<usize>,
}

impl ListChange {
    /// Rows were only inserted above everything already shown.
    pub fn is_prepend(&self) -> bool {
        self.position == 0 && self.removed == 0
    }
}

/// Compare two renders by common prefix and suffix. `None` when nothing changed.
pub fn list_change(old: &[Message], new: &[Message]) -> Option<ListChange> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    if prefix == old.len() && prefix == new.len() {
        return None;
    }
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    Some(ListChange {
        position: prefix,
        removed: old.len() - prefix - suffix,
        added: prefix..new.len() - suffix,
    })
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self) -> Option<&MessagePage> {
        self.page.as_ref()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            page: self.page.clone(),
            loading_earlier: self.loading_earlier,
        }
    }

    /// Show a page read from the local cache. Ignored once anything is shown.
    pub fn restore_page(&mut self, page: MessagePage) -> bool {
        if self.page.is_some() {
            return false;
        }
        self.page = Some(page);
        true
    }

    /// Install a freshly fetched page. Placeholders still awaiting
    /// confirmation are carried over at the newest position, and pushes
    /// that arrived before the first fetched page are applied on top.
    pub fn replace_page(&mut self, page: MessagePage) {
        let pending: Vec<Message> = self
            .page
            .take()
            .map(|old| {
                old.edges
                    .into_iter()
                    .map(|e| e.node)
                    .filter(Message::is_temporary)
                    .collect()
            })
            .unwrap_or_default();
        self.page = Some(pending.into_iter().fold(page, merge::insert_optimistic));
        if !self.fresh {
            self.fresh = true;
            let backlog = std::mem::take(&mut self.backlog);
            if !backlog.is_empty() {
                debug!("replaying {} early pushes", backlog.len());
            }
            for event in &backlog {
                self.merge_event(event);
            }
        }
    }

    /// Run `f` over the page; pages that have not loaded yet are left alone.
    fn update(&mut self, f: impl FnOnce(MessagePage) -> MessagePage) {
        if let Some(page) = self.page.take() {
            self.page = Some(f(page));
        }
    }

    pub fn apply_event(&mut self, event: &LiveEvent) {
        if !self.fresh {
            self.backlog.push(event.clone());
        }
        self.merge_event(event);
    }

    fn merge_event(&mut self, event: &LiveEvent) {
        match event {
            LiveEvent::MessageAdded(message) => {
                self.update(|page| merge::apply_message_added(page, message.as_ref()))
            }
            LiveEvent::MessageUpdated(update) => {
                self.update(|page| merge::apply_message_updated(page, update.as_ref()))
            }
        }
    }

    pub fn apply_send_result(&mut self, confirmed: Option<&Message>) {
        self.update(|page| merge::apply_send_result(page, confirmed));
    }

    pub fn insert_optimistic(&mut self, placeholder: Message) {
        self.update(|page| merge::insert_optimistic(page, placeholder));
    }

    pub fn mark_failed(&mut self, temp_id: &str) {
        self.update(|page| merge::mark_failed(page, temp_id));
    }

    pub fn mark_sending(&mut self, temp_id: &str) {
        self.update(|page| merge::mark_sending(page, temp_id));
    }

    pub fn remove_placeholder(&mut self, temp_id: &str) {
        self.update(|page| merge::remove_placeholder(page, temp_id));
    }

    /// Claim the single in-flight "load earlier" slot.
    ///
    /// Returns the `before` cursor to fetch with, or `None` when a load is
    /// already outstanding or there is nothing older to load.
    pub fn begin_load_earlier(&mut self) -> Option<String> {
        if self.loading_earlier {
            debug!("load earlier already in flight");
            return None;
        }
        let info = &self.page.as_ref()?.page_info;
        if !info.has_previous_page {
            return None;
        }
        let before = info.start_cursor.clone()?;
        self.loading_earlier = true;
        Some(before)
    }

    /// Release the slot and merge the older page. Failures leave the page as it was.
    pub fn finish_load_earlier(&mut self, result: Result<MessagePage>) {
        self.loading_earlier = false;
        match result {
            Ok(older) => self.update(|page| merge::prepend_older_page(page, older)),
            Err(e) => warn!("loading earlier messages failed: {e}"),
        }
    }

    /// Release the slot without a result (the load was cancelled).
    pub fn abandon_load_earlier(&mut self) {
        self.loading_earlier = false;
    }
}
