use serde_json::Value;

use crate::api::models::{
    GraphQlResponse, Message, MessageAddedData, MessageUpdate, MessageUpdatedData,
};
use crate::api::queries;
use crate::error::{Error, Result};

/// The two push feeds the chat listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    MessageAdded,
    MessageUpdated,
}

impl Feed {
    pub fn operation_name(self) -> &'static str {
        match self {
            Feed::MessageAdded => "OnMessageAdded",
            Feed::MessageUpdated => "OnMessageUpdated",
        }
    }

    pub fn document(self) -> &'static str {
        match self {
            Feed::MessageAdded => queries::MESSAGE_ADDED,
            Feed::MessageUpdated => queries::MESSAGE_UPDATED,
        }
    }

    /// Decode the `payload` of a `next` frame.
    ///
    /// A payload without data (or with `null` for the field) yields an event
    /// with no message, which the merger treats as a no-op.
    pub fn decode(self, payload: Value) -> Result<LiveEvent> {
        match self {
            Feed::MessageAdded => {
                let resp: GraphQlResponse<MessageAddedData> = serde_json::from_value(payload)?;
                check_errors(&resp)?;
                Ok(LiveEvent::MessageAdded(resp.data.and_then(|d| d.message_added)))
            }
            Feed::MessageUpdated => {
                let resp: GraphQlResponse<MessageUpdatedData> = serde_json::from_value(payload)?;
                check_errors(&resp)?;
                Ok(LiveEvent::MessageUpdated(resp.data.and_then(|d| d.message_updated)))
            }
        }
    }
}

fn check_errors<T>(resp: &GraphQlResponse<T>) -> Result<()> {
    if resp.data.is_none() && !resp.errors.is_empty() {
        return Err(Error::GraphQl(resp.errors.clone()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    MessageAdded(Option<Message>),
    MessageUpdated(Option<MessageUpdate>),
}
