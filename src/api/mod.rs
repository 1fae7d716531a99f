pub mod client;
pub mod events;
pub mod models;
pub mod queries;
pub mod subscription;

use async_trait::async_trait;

use crate::error::Result;
use events::Feed;
use models::{Message, MessagePage, PageArgs};
use subscription::Subscription;

/// What the chat session needs from the server.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn fetch_messages(&self, args: PageArgs) -> Result<MessagePage>;

    /// `Ok(None)` when the mutation returned no message.
    async fn send_message(&self, text: &str) -> Result<Option<Message>>;

    async fn subscribe(&self, feed: Feed) -> Result<Subscription>;
}
