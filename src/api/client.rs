use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use url::Url;

use crate::api::events::Feed;
use crate::api::models::{
    GraphQlResponse, Message, MessagePage, MessagesData, PageArgs, SendMessageData,
};
use crate::api::subscription::{Connection, Subscription};
use crate::api::{queries, ChatBackend};
use crate::error::{Error, Result};

/// GraphQL client: queries and mutations over HTTP, subscriptions over websocket.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub http: HttpClient,
    pub endpoint: Url,
    pub ws_url: Url,
    /// Socket shared by every subscription, opened on first use.
    socket: Arc<Mutex<Option<Connection>>>,
}

impl ApiClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let ws_url = websocket_url(&endpoint)?;
        Ok(Self {
            http: HttpClient::new(),
            endpoint,
            ws_url,
            socket: Arc::default(),
        })
    }

    /// The operation name is repeated as `?op=` so server logs can tell requests apart.
    fn operation_url(&self, operation_name: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("op", operation_name);
        url
    }

    pub async fn execute<T: DeserializeOwned>(
        &self,
        operation_name: &'static str,
        query: &str,
        variables: Value,
    ) -> Result<Option<T>> {
        let body = json!({
            "query": query,
            "operationName": operation_name,
            "variables": variables,
        });
        debug!("POST {operation_name}");
        let resp = self
            .http
            .post(self.operation_url(operation_name))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        let resp: GraphQlResponse<T> = resp.json().await?;
        if !resp.errors.is_empty() {
            return Err(Error::GraphQl(resp.errors));
        }
        Ok(resp.data)
    }

    pub async fn get_messages(&self, args: &PageArgs) -> Result<MessagePage> {
        let data: Option<MessagesData> = self
            .execute("GetMessages", queries::GET_MESSAGES, serde_json::to_value(args)?)
            .await?;
        data.map(|d| d.messages).ok_or(Error::MissingData("GetMessages"))
    }

    /// Start `feed` on the shared socket, reconnecting if it has closed.
    pub async fn subscribe(&self, feed: Feed) -> Result<Subscription> {
        let mut socket = self.socket.lock().await;
        if let Some(connection) = socket.as_ref().filter(|c| c.is_open()) {
            if let Ok(subscription) = connection.subscribe(feed) {
                return Ok(subscription);
            }
        }
        let connection = Connection::open(&self.ws_url).await?;
        let subscription = connection.subscribe(feed)?;
        *socket = Some(connection);
        Ok(subscription)
    }

    pub async fn send_message(&self, text: &str) -> Result<Option<Message>> {
        let data: Option<SendMessageData> = self
            .execute("SendMessage", queries::SEND_MESSAGE, json!({ "text": text }))
            .await?;
        Ok(data.and_then(|d| d.send_message))
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn fetch_messages(&self, args: PageArgs) -> Result<MessagePage> {
        self.get_messages(&args).await
    }

    async fn send_message(&self, text: &str) -> Result<Option<Message>> {
        ApiClient::send_message(self, text).await
    }

    async fn subscribe(&self, feed: Feed) -> Result<Subscription> {
        ApiClient::subscribe(self, feed).await
    }
}

/// `http(s)://host/graphql` -> `ws(s)://host/graphql`.
pub fn websocket_url(endpoint: &Url) -> Result<Url> {
    let scheme = match endpoint.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(Error::Config(format!("unsupported endpoint scheme {other}"))),
    };
    let mut ws = endpoint.clone();
    ws.set_query(None);
    ws.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("cannot derive websocket url from {endpoint}")))?;
    Ok(ws)
}
