//! Chat client for a GraphQL messages API.
//!
//! Renders a paginated message list, merges live `OnMessageAdded` /
//! `OnMessageUpdated` pushes into it, and shows sent messages immediately
//! as placeholders until the server confirms them.

pub mod api;
pub mod app;
pub mod composer;
pub mod error;
pub mod merge;
pub mod session;
pub mod storage;
pub mod store;
pub mod utils;

#[cfg(feature = "gtk")]
pub mod ui;

pub use api::events::{Feed, LiveEvent};
pub use api::models::{
    Message, MessageEdge, MessagePage, MessageSender, MessageStatus, MessageUpdate, PageInfo,
};
pub use api::ChatBackend;
pub use composer::{Composer, Draft};
pub use error::{Error, Result};
pub use session::{ChatSession, Mounted, Reconnect};
pub use store::{ListChange, MessageStore, StoreSnapshot};
