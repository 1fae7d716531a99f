//! Push feeds over the `graphql-transport-ws` websocket sub-protocol.
//!
//! A [`Connection`] multiplexes every operation over one socket. Dropping a
//! [`Subscription`] sends `complete` for its operation; the socket closes
//! once no operation is left on it.

use std::collections::HashMap;

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::api::events::{Feed, LiveEvent};
use crate::error::{Error, Result};

pub const PROTOCOL: &str = "graphql-transport-ws";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub query: String,
    pub operation_name: String,
    #[serde(default)]
    pub variables: Value,
}

/// Protocol frames, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Subscribe {
        id: String,
        payload: SubscribePayload,
    },
    Next {
        id: String,
        payload: Value,
    },
    Error {
        id: String,
        payload: Value,
    },
    Complete {
        id: String,
    },
}

/// A live feed. Events arrive in delivery order; `next` returns `None`
/// once the server completes the operation or the socket drops.
pub struct Subscription {
    feed: Feed,
    events: mpsc::UnboundedReceiver<LiveEvent>,
    cancel: Option<oneshot::Sender<()>>,
}

impl Subscription {
    /// Wrap an event channel. `cancel` fires when the handle is dropped.
    pub fn new(
        feed: Feed,
        events: mpsc::UnboundedReceiver<LiveEvent>,
        cancel: oneshot::Sender<()>,
    ) -> Self {
        Self {
            feed,
            events,
            cancel: Some(cancel),
        }
    }

    pub fn feed(&self) -> Feed {
        self.feed
    }

    pub async fn next(&mut self) -> Option<LiveEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

#[derive(Debug)]
enum Command {
    Subscribe {
        id: String,
        feed: Feed,
        events: mpsc::UnboundedSender<LiveEvent>,
    },
    Complete {
        id: String,
    },
}

/// One acknowledged socket shared by any number of subscriptions.
#[derive(Debug, Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
}

impl Connection {
    /// Open a socket and perform the `connection_init` handshake.
    pub async fn open(ws_url: &Url) -> Result<Self> {
        let mut request = ws_url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(PROTOCOL));
        let (mut socket, _) = connect_async(request).await?;

        send_frame(&mut socket, &Frame::ConnectionInit { payload: None }).await?;
        wait_for_ack(&mut socket).await?;
        debug!("connected to {ws_url}");

        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(socket, rx));
        Ok(Self { commands })
    }

    /// False once the socket has closed; open a new connection then.
    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Start `feed` on this socket.
    pub fn subscribe(&self, feed: Feed) -> Result<Subscription> {
        let id = uuid::Uuid::new_v4().to_string();
        let (events, rx) = mpsc::unbounded_channel();
        let command = Command::Subscribe {
            id: id.clone(),
            feed,
            events,
        };
        self.commands
            .send(command)
            .map_err(|_| Error::Protocol("connection closed".into()))?;

        let (cancel, cancelled) = oneshot::channel();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let _ = cancelled.await;
            let _ = commands.send(Command::Complete { id });
        });
        Ok(Subscription::new(feed, rx, cancel))
    }
}

async fn send_frame(socket: &mut Socket, frame: &Frame) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    socket.send(WsFrame::Text(text)).await?;
    Ok(())
}

async fn wait_for_ack(socket: &mut Socket) -> Result<()> {
    while let Some(msg) = socket.next().await {
        let WsFrame::Text(text) = msg? else { continue };
        match serde_json::from_str::<Frame>(&text)? {
            Frame::ConnectionAck { .. } => return Ok(()),
            Frame::Ping { payload } => send_frame(socket, &Frame::Pong { payload }).await?,
            other => {
                return Err(Error::Protocol(format!("expected connection_ack, got {other:?}")));
            }
        }
    }
    Err(Error::Protocol("socket closed before connection_ack".into()))
}

struct Route {
    feed: Feed,
    events: mpsc::UnboundedSender<LiveEvent>,
}

impl Route {
    fn deliver(&self, payload: Value) {
        match self.feed.decode(payload) {
            Ok(event) => {
                if self.events.send(event).is_err() {
                    debug!("{} receiver gone", self.feed.operation_name());
                }
            }
            Err(e) => warn!("dropping {} payload: {e}", self.feed.operation_name()),
        }
    }
}

/// Owns the socket. Returning drops every route, which ends their subscriptions.
async fn pump(mut socket: Socket, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut routes: HashMap<String, Route> = HashMap::new();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Subscribe { id, feed, events }) => {
                    let payload = SubscribePayload {
                        query: feed.document().to_string(),
                        operation_name: feed.operation_name().to_string(),
                        variables: Value::Object(Default::default()),
                    };
                    let frame = Frame::Subscribe {
                        id: id.clone(),
                        payload,
                    };
                    if let Err(e) = send_frame(&mut socket, &frame).await {
                        warn!("subscribe {} failed: {e}", feed.operation_name());
                        return;
                    }
                    debug!("subscribed to {} ({id})", feed.operation_name());
                    routes.insert(id, Route { feed, events });
                }
                Some(Command::Complete { id }) => {
                    if let Some(route) = routes.remove(&id) {
                        let _ = send_frame(&mut socket, &Frame::Complete { id }).await;
                        debug!("unsubscribed from {}", route.feed.operation_name());
                    }
                    if routes.is_empty() {
                        let _ = socket.close(None).await;
                        return;
                    }
                }
                None => {
                    let _ = socket.close(None).await;
                    return;
                }
            },
            msg = socket.next() => match msg {
                Some(Ok(WsFrame::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                    Ok(Frame::Next { id, payload }) => {
                        if let Some(route) = routes.get(&id) {
                            route.deliver(payload);
                        }
                    }
                    Ok(Frame::Ping { payload }) => {
                        if let Err(e) = send_frame(&mut socket, &Frame::Pong { payload }).await {
                            warn!("pong failed: {e}");
                            return;
                        }
                    }
                    Ok(Frame::Error { id, payload }) => {
                        if let Some(route) = routes.remove(&id) {
                            let name = route.feed.operation_name();
                            warn!("{name} rejected by server: {payload}");
                        }
                    }
                    Ok(Frame::Complete { id }) => {
                        if let Some(route) = routes.remove(&id) {
                            debug!("server completed {}", route.feed.operation_name());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("ignoring malformed frame: {e}"),
                },
                Some(Ok(WsFrame::Close(_))) | None => {
                    debug!("socket closed with {} live operations", routes.len());
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("socket error: {e}");
                    return;
                }
            }
        }
    }
}
