//! Reconciliation of pushes and send results into a message page.
//!
//! Every function takes the previous page and returns the next one, so the
//! store can swap pages atomically inside a single event handler.

use std::collections::HashSet;

use crate::api::models::{Message, MessageEdge, MessagePage, MessageStatus, MessageUpdate};

/// Edges minus any placeholder carrying the same text as `confirmed`.
fn without_placeholders_for(edges: Vec<MessageEdge>, confirmed: &Message) -> Vec<MessageEdge> {
    edges
        .into_iter()
        .filter(|e| !(e.node.is_temporary() && e.node.text == confirmed.text))
        .collect()
}

/// `OnMessageAdded`.
pub fn apply_message_added(mut page: MessagePage, incoming: Option<&Message>) -> MessagePage {
    let Some(message) = incoming else {
        return page;
    };
    page.edges = without_placeholders_for(page.edges, message);
    if page.contains(&message.id) {
        return page;
    }
    page.edges.push(MessageEdge::for_message(message.clone()));
    page.page_info.end_cursor = Some(message.id.clone());
    page
}

/// `OnMessageUpdated`. Updates for messages not on the page are dropped.
pub fn apply_message_updated(mut page: MessagePage, update: Option<&MessageUpdate>) -> MessagePage {
    let Some(update) = update else {
        return page;
    };
    if let Some(edge) = page.edges.iter_mut().find(|e| e.node.id == update.id) {
        edge.node.status = update.status;
        edge.node.updated_at = update.updated_at.clone();
    }
    page
}

/// Result of the `SendMessage` mutation.
///
/// Same placeholder removal as [`apply_message_added`], but the end cursor
/// moves to the confirmed id even when a push already inserted it.
pub fn apply_send_result(mut page: MessagePage, confirmed: Option<&Message>) -> MessagePage {
    let Some(message) = confirmed else {
        return page;
    };
    page.edges = without_placeholders_for(page.edges, message);
    if !page.contains(&message.id) {
        page.edges.push(MessageEdge::for_message(message.clone()));
    }
    page.page_info.end_cursor = Some(message.id.clone());
    page
}

/// Show a placeholder at the newest position.
pub fn insert_optimistic(mut page: MessagePage, placeholder: Message) -> MessagePage {
    if page.contains(&placeholder.id) {
        return page;
    }
    page.page_info.end_cursor = Some(placeholder.id.clone());
    page.edges.push(MessageEdge::for_message(placeholder));
    page
}

/// Flag a placeholder whose send request errored.
pub fn mark_failed(page: MessagePage, temp_id: &str) -> MessagePage {
    set_placeholder_status(page, temp_id, MessageStatus::Failed)
}

pub fn mark_sending(page: MessagePage, temp_id: &str) -> MessagePage {
    set_placeholder_status(page, temp_id, MessageStatus::Sending)
}

fn set_placeholder_status(
    mut page: MessagePage,
    temp_id: &str,
    status: MessageStatus,
) -> MessagePage {
    if let Some(edge) = page
        .edges
        .iter_mut()
        .find(|e| e.node.is_temporary() && e.node.id == temp_id)
    {
        edge.node.status = status;
    }
    page
}

/// Remove a placeholder. Confirmed messages are never removed here.
pub fn remove_placeholder(mut page: MessagePage, temp_id: &str) -> MessagePage {
    page.edges.retain(|e| !(e.node.is_temporary() && e.node.id == temp_id));
    page
}

/// Merge an older page fetched with `before: start_cursor` in front of `page`.
pub fn prepend_older_page(mut page: MessagePage, older: MessagePage) -> MessagePage {
    let known: HashSet<&str> = page.edges.iter().map(|e| e.node.id.as_str()).collect();
    let mut seen = HashSet::new();
    let mut edges: Vec<MessageEdge> = older
        .edges
        .into_iter()
        .filter(|e| !known.contains(e.node.id.as_str()) && seen.insert(e.node.id.clone()))
        .collect();
    edges.append(&mut page.edges);
    page.edges = edges;

    page.page_info.has_previous_page = older.page_info.has_previous_page;
    if older.page_info.start_cursor.is_some() {
        page.page_info.start_cursor = older.page_info.start_cursor;
    }
    page
}
