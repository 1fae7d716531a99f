use serde::{Deserialize, Serialize};

/// Prefix of identifiers minted locally before the server confirms a message.
pub const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSender {
    Admin,
    Customer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Sending,
    Sent,
    Read,
    /// Local only: the send request for a placeholder errored.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub status: MessageStatus,
    pub updated_at: String,
    pub sender: MessageSender,
}

impl Message {
    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }
}

pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Partial message delivered by `OnMessageUpdated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdate {
    pub id: String,
    pub status: MessageStatus,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEdge {
    pub node: Message,
    pub cursor: String,
}

impl MessageEdge {
    /// Cursors are message ids.
    pub fn for_message(node: Message) -> Self {
        let cursor = node.id.clone();
        Self { node, cursor }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    #[serde(default)]
    pub start_cursor: Option<String>,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub edges: Vec<MessageEdge>,
    pub page_info: PageInfo,
}

impl MessagePage {
    pub fn contains(&self, id: &str) -> bool {
        self.edges.iter().any(|e| e.node.id == id)
    }

    pub fn find(&self, id: &str) -> Option<&Message> {
        self.edges.iter().map(|e| &e.node).find(|m| m.id == id)
    }

    /// Messages oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.edges.iter().map(|e| &e.node)
    }
}

/// Variables of `GetMessages`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

impl PageArgs {
    pub fn latest(first: u32) -> Self {
        Self {
            first: Some(first),
            ..Self::default()
        }
    }

    pub fn before(cursor: impl Into<String>, first: u32) -> Self {
        Self {
            first: Some(first),
            before: Some(cursor.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<serde_json::Value>,
}

/// `{data, errors}` envelope shared by HTTP responses and subscription payloads.
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesData {
    pub messages: MessagePage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageData {
    pub send_message: Option<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAddedData {
    pub message_added: Option<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdatedData {
    pub message_updated: Option<MessageUpdate>,
}
