//! GraphQL documents sent to the server.

pub const GET_MESSAGES: &str = r#"
query GetMessages($first: Int, $after: MessagesCursor, $before: MessagesCursor) {
  messages(first: $first, after: $after, before: $before) {
    edges {
      node {
        id
        text
        status
        updatedAt
        sender
      }
      cursor
    }
    pageInfo {
      hasNextPage
      hasPreviousPage
      startCursor
      endCursor
    }
  }
}
"#;

pub const SEND_MESSAGE: &str = r#"
mutation SendMessage($text: String!) {
  sendMessage(text: $text) {
    id
    text
    status
    updatedAt
    sender
  }
}
"#;

pub const MESSAGE_ADDED: &str = r#"
subscription OnMessageAdded {
  messageAdded {
    id
    text
    status
    updatedAt
    sender
  }
}
"#;

pub const MESSAGE_UPDATED: &str = r#"
subscription OnMessageUpdated {
  messageUpdated {
    id
    status
    updatedAt
  }
}
"#;
