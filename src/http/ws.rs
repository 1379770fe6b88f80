//! Live notification gateway.
//!
//! Anyone may open a socket; a valid token makes it authenticated. Each
//! `subscribe` frame goes through [`ChannelGate`], and a rejected request is
//! answered with an `error` frame while the socket stays open.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::channels::{ChannelAddress, ChannelGate, ChannelHub, Delivery, SessionId};
use crate::domain::error::SocialError;
use crate::http::auth::{authenticate, bearer_token};
use crate::http::AppError;
use crate::AppState;

const SESSION_BUFFER: usize = 64;

#[derive(Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Subscribed {
        channel: String,
    },
    Unsubscribed {
        channel: String,
    },
    Pong,
    Error {
        code: &'static str,
        message: String,
    },
    Notification {
        channel: String,
        notification: serde_json::Value,
    },
}

impl ServerFrame {
    fn rejected(err: SocialError) -> Self {
        let code = match &err {
            SocialError::Unauthorized(_) => "unauthorized",
            SocialError::PermissionDenied(_) => "forbidden",
            SocialError::InvalidRequest(_) => "invalid_request",
            _ => "internal",
        };
        Self::Error {
            code,
            message: err.to_string(),
        }
    }
}

pub async fn connect(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = match bearer_token(&headers)? {
        Some(token) => Some(token.to_string()),
        None => query.token,
    };
    let principal = match token {
        Some(token) => Some(authenticate(&state, &token)?),
        None => None,
    };

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| session(socket, hub, principal)))
}

/// Per-connection subscriptions; detached from the hub when the socket ends.
struct Subscriptions {
    principal: Option<Uuid>,
    hub: ChannelHub,
    sender: mpsc::Sender<Delivery>,
    attached: HashMap<ChannelAddress, SessionId>,
}

impl Subscriptions {
    fn new(principal: Option<Uuid>, hub: ChannelHub, sender: mpsc::Sender<Delivery>) -> Self {
        Self {
            principal,
            hub,
            sender,
            attached: HashMap::new(),
        }
    }

    fn handle(&mut self, text: &str) -> ServerFrame {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                return ServerFrame::Error {
                    code: "bad_frame",
                    message: err.to_string(),
                }
            }
        };

        match frame {
            ClientFrame::Subscribe { channel } => {
                match ChannelGate::authorize(self.principal, &channel) {
                    Ok(address) => {
                        if !self.attached.contains_key(&address) {
                            let session = self.hub.attach(address, self.sender.clone());
                            self.attached.insert(address, session);
                        }
                        ServerFrame::Subscribed {
                            channel: address.to_string(),
                        }
                    }
                    Err(err) => {
                        info!(principal = ?self.principal, channel = %channel, error = %err, "subscribe rejected");
                        ServerFrame::rejected(err)
                    }
                }
            }
            ClientFrame::Unsubscribe { channel } => match ChannelAddress::parse(&channel) {
                Ok(address) => {
                    if let Some(session) = self.attached.remove(&address) {
                        self.hub.detach(&address, session);
                    }
                    ServerFrame::Unsubscribed {
                        channel: address.to_string(),
                    }
                }
                Err(err) => ServerFrame::rejected(err),
            },
            ClientFrame::Ping => ServerFrame::Pong,
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for (address, session) in self.attached.drain() {
            self.hub.detach(&address, session);
        }
    }
}

fn delivery_frame(delivery: Delivery) -> ServerFrame {
    let notification = serde_json::from_str(&delivery.payload)
        .unwrap_or(serde_json::Value::String(delivery.payload));
    ServerFrame::Notification {
        channel: delivery.channel.to_string(),
        notification,
    }
}

async fn session(socket: WebSocket, hub: ChannelHub, principal: Option<Uuid>) {
    debug!(principal = ?principal, "socket opened");
    let (mut outgoing, mut incoming) = socket.split();
    let (sender, mut deliveries) = mpsc::channel(SESSION_BUFFER);
    let mut subscriptions = Subscriptions::new(principal, hub, sender);

    loop {
        let frame = tokio::select! {
            message = incoming.next() => match message {
                Some(Ok(Message::Text(text))) => subscriptions.handle(&text),
                Some(Ok(Message::Ping(data))) => {
                    if outgoing.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    debug!(error = %err, "socket read failed");
                    break;
                }
            },
            Some(delivery) = deliveries.recv() => delivery_frame(delivery),
        };

        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(err) => {
                debug!(error = %err, "failed to encode frame");
                continue;
            }
        };
        if outgoing.send(Message::Text(text)).await.is_err() {
            break;
        }
    }

    debug!(principal = ?principal, "socket closed");
}
