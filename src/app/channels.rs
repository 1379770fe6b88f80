//! Per-user delivery channels.
//!
//! Every user owns exactly one channel, `user:<id>`. Live connections attach
//! to the [`ChannelHub`] only after [`ChannelGate::authorize`] has accepted
//! the subscribe request.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::error::{SocialError, SocialResult};

const CHANNEL_PREFIX: &str = "user:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    owner_id: Uuid,
}

impl ChannelAddress {
    pub fn for_user(owner_id: Uuid) -> Self {
        Self { owner_id }
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn parse(raw: &str) -> SocialResult<Self> {
        raw.strip_prefix(CHANNEL_PREFIX)
            .and_then(|id| Uuid::parse_str(id).ok())
            .map(Self::for_user)
            .ok_or_else(|| SocialError::invalid(format!("invalid channel: {}", raw)))
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CHANNEL_PREFIX, self.owner_id)
    }
}

pub struct ChannelGate;

impl ChannelGate {
    /// Grants a subscription only to the channel owned by `principal`.
    pub fn authorize(principal: Option<Uuid>, requested: &str) -> SocialResult<ChannelAddress> {
        let principal =
            principal.ok_or_else(|| SocialError::unauthorized("authentication required"))?;
        let channel = ChannelAddress::parse(requested)?;
        if channel.owner_id() != principal {
            return Err(SocialError::denied("cannot subscribe to another user's channel"));
        }
        Ok(channel)
    }
}

/// Best-effort delivery of a serialized payload to a channel. Returns how
/// many receivers accepted it; zero is not an error.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push(&self, channel: &ChannelAddress, payload: &str) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: ChannelAddress,
    pub payload: String,
}

pub type SessionId = u64;

type Sessions = HashMap<Uuid, HashMap<SessionId, mpsc::Sender<Delivery>>>;

/// Live subscriptions held by this process.
#[derive(Clone, Default)]
pub struct ChannelHub {
    next_session: Arc<AtomicU64>,
    sessions: Arc<RwLock<Sessions>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, channel: ChannelAddress, sender: mpsc::Sender<Delivery>) -> SessionId {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.owner_id())
            .or_default()
            .insert(session, sender);
        debug!(%channel, session, "channel subscriber attached");
        session
    }

    pub fn detach(&self, channel: &ChannelAddress, session: SessionId) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(attached) = sessions.get_mut(&channel.owner_id()) {
            attached.remove(&session);
            if attached.is_empty() {
                sessions.remove(&channel.owner_id());
            }
        }
    }

    pub fn subscriber_count(&self, channel: &ChannelAddress) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel.owner_id())
            .map_or(0, HashMap::len)
    }

    /// Hands the payload to every local subscriber without waiting on any
    /// of them. Sessions whose receiver is gone are pruned.
    pub fn deliver(&self, channel: &ChannelAddress, payload: &str) -> usize {
        let targets: Vec<(SessionId, mpsc::Sender<Delivery>)> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel.owner_id())
            .map(|attached| {
                attached
                    .iter()
                    .map(|(session, sender)| (*session, sender.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut delivered = 0;
        for (session, sender) in targets {
            let delivery = Delivery {
                channel: *channel,
                payload: payload.to_string(),
            };
            match sender.try_send(delivery) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%channel, session, "subscriber lagging, dropping delivery")
                }
                Err(TrySendError::Closed(_)) => self.detach(channel, session),
            }
        }
        delivered
    }
}

#[async_trait]
impl Pusher for ChannelHub {
    async fn push(&self, channel: &ChannelAddress, payload: &str) -> anyhow::Result<usize> {
        Ok(self.deliver(channel, payload))
    }
}
