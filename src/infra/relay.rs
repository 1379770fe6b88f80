use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::channels::{ChannelAddress, ChannelHub, Pusher};

const CHANNEL_PATTERN: &str = "user:*";
const RESUBSCRIBE_BACKOFF_MS: u64 = 1000;

/// Carries pushes between nodes over Redis pub/sub. Every node publishes to
/// `user:<id>` and forwards whatever it receives into its local hub, so a
/// subscriber is reached no matter which node holds its connection.
#[derive(Clone)]
pub struct RedisRelay {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisRelay {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self { client, conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    /// Keeps a pattern subscription alive for the lifetime of the process,
    /// resubscribing after connection loss.
    pub fn spawn_subscriber(&self, hub: ChannelHub) -> JoinHandle<()> {
        let client = self.client.clone();
        tokio::spawn(async move {
            loop {
                if let Err(err) = forward(&client, &hub).await {
                    warn!(error = ?err, "relay subscription lost, resubscribing");
                }
                tokio::time::sleep(Duration::from_millis(RESUBSCRIBE_BACKOFF_MS)).await;
            }
        })
    }
}

async fn forward(client: &Client, hub: &ChannelHub) -> Result<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(CHANNEL_PATTERN).await?;
    info!(pattern = CHANNEL_PATTERN, "relay subscribed");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let channel = match ChannelAddress::parse(message.get_channel_name()) {
            Ok(channel) => channel,
            Err(_) => {
                debug!(channel = message.get_channel_name(), "ignoring relay message");
                continue;
            }
        };
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = ?err, %channel, "undecodable relay payload");
                continue;
            }
        };
        hub.deliver(&channel, &payload);
    }
    Ok(())
}

#[async_trait]
impl Pusher for RedisRelay {
    /// Returns the number of nodes that received the message.
    async fn push(&self, channel: &ChannelAddress, payload: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let receivers = redis::cmd("PUBLISH")
            .arg(channel.to_string())
            .arg(payload)
            .query_async::<_, usize>(&mut conn)
            .await?;
        Ok(receivers)
    }
}
