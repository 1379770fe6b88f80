use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::channels::{ChannelAddress, Pusher};
use crate::app::notifications::{comment_message, follow_message, like_message};
use crate::domain::event::{CommentCreated, DomainEvent, LikeToggled, NewFollower};
use crate::domain::notification::{NewNotification, Notification, NotificationPayload, NotificationType};
use crate::domain::user::User;
use crate::infra::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutOutcome {
    /// The row was stored; `pushed` counts receivers that took the live push.
    Delivered { notification_id: Uuid, pushed: usize },
    Skipped(&'static str),
}

/// Turns domain events into stored notifications and pushes them to the
/// receiver's channel. Failures never leave this type.
pub struct FanoutHandler {
    store: Arc<dyn Store>,
    pusher: Arc<dyn Pusher>,
    push_timeout: Duration,
}

impl FanoutHandler {
    pub fn new(store: Arc<dyn Store>, pusher: Arc<dyn Pusher>, push_timeout: Duration) -> Self {
        Self {
            store,
            pusher,
            push_timeout,
        }
    }

    pub async fn handle(&self, event: &DomainEvent) -> Option<FanoutOutcome> {
        let result = match event {
            DomainEvent::CommentCreated(event) => self.on_comment_created(event).await,
            DomainEvent::LikeToggled(event) => self.on_like_toggled(event).await,
            DomainEvent::NewFollower(event) => self.on_new_follower(event).await,
        };

        match result {
            Ok(outcome) => {
                match &outcome {
                    FanoutOutcome::Delivered {
                        notification_id,
                        pushed,
                    } => info!(
                        event = event.name(),
                        notification_id = %notification_id,
                        pushed,
                        "notification delivered"
                    ),
                    FanoutOutcome::Skipped(reason) => {
                        debug!(event = event.name(), reason, "notification skipped")
                    }
                }
                Some(outcome)
            }
            Err(err) => {
                error!(error = ?err, event = event.name(), "failed to process notification");
                None
            }
        }
    }

    async fn on_comment_created(&self, event: &CommentCreated) -> Result<FanoutOutcome> {
        if self.store.find_user(event.receiver_id).await?.is_none() {
            return Ok(FanoutOutcome::Skipped("receiver no longer exists"));
        }
        if self.store.find_user(event.sender_id).await?.is_none() {
            return Ok(FanoutOutcome::Skipped("sender no longer exists"));
        }

        self.persist_and_push(NewNotification {
            receiver_id: event.receiver_id,
            sender_id: event.sender_id,
            notification_type: NotificationType::Comment,
            message: comment_message(&event.post_title),
        })
        .await
    }

    async fn on_like_toggled(&self, event: &LikeToggled) -> Result<FanoutOutcome> {
        if !event.now_liked {
            return Ok(FanoutOutcome::Skipped("unlike"));
        }
        if event.actor_id == event.owner_id {
            return Ok(FanoutOutcome::Skipped("self-like"));
        }
        if self.store.find_user(event.owner_id).await?.is_none() {
            warn!(owner_id = %event.owner_id, "like owner not found");
            return Ok(FanoutOutcome::Skipped("receiver no longer exists"));
        }

        let actor = self.store.find_user(event.actor_id).await?;
        self.persist_and_push(NewNotification {
            receiver_id: event.owner_id,
            sender_id: event.actor_id,
            notification_type: NotificationType::Like,
            message: like_message(username(&actor), event.target.kind()),
        })
        .await
    }

    async fn on_new_follower(&self, event: &NewFollower) -> Result<FanoutOutcome> {
        if self.store.find_user(event.following_id).await?.is_none() {
            return Ok(FanoutOutcome::Skipped("receiver no longer exists"));
        }

        let follower = self.store.find_user(event.follower_id).await?;
        self.persist_and_push(NewNotification {
            receiver_id: event.following_id,
            sender_id: event.follower_id,
            notification_type: NotificationType::Follow,
            message: follow_message(username(&follower)),
        })
        .await
    }

    /// The row is written before any push is attempted; a failed or slow
    /// push leaves it in place for the inbox.
    async fn persist_and_push(&self, new: NewNotification) -> Result<FanoutOutcome> {
        let notification = self.store.insert_notification(new).await?;
        let pushed = self.push(&notification).await;
        Ok(FanoutOutcome::Delivered {
            notification_id: notification.id,
            pushed,
        })
    }

    async fn push(&self, notification: &Notification) -> usize {
        let channel = ChannelAddress::for_user(notification.receiver_id);
        let payload = match serde_json::to_string(&NotificationPayload::from(notification)) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = ?err, notification_id = %notification.id, "failed to encode push");
                return 0;
            }
        };

        match tokio::time::timeout(self.push_timeout, self.pusher.push(&channel, &payload)).await {
            Ok(Ok(pushed)) => pushed,
            Ok(Err(err)) => {
                warn!(error = ?err, %channel, "notification push failed");
                0
            }
            Err(_) => {
                warn!(%channel, timeout_ms = self.push_timeout.as_millis() as u64, "notification push timed out");
                0
            }
        }
    }
}

fn username(user: &Option<User>) -> Option<&str> {
    user.as_ref().map(|user| user.username.as_str())
}

/// One task per shard; each drains its queue until every sender is gone.
pub fn spawn_workers(
    receivers: Vec<mpsc::UnboundedReceiver<DomainEvent>>,
    handler: Arc<FanoutHandler>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(shard, receiver)| tokio::spawn(run(shard, receiver, handler.clone())))
        .collect()
}

pub async fn run(
    shard: usize,
    mut receiver: mpsc::UnboundedReceiver<DomainEvent>,
    handler: Arc<FanoutHandler>,
) {
    info!(shard, "notification worker started");
    while let Some(event) = receiver.recv().await {
        handler.handle(&event).await;
    }
    info!(shard, "notification worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::app::channels::ChannelHub;
    use crate::domain::engagement::LikeTarget;
    use crate::domain::user::{NewUser, Role};
    use crate::infra::store::MemoryStore;

    struct FailingPusher;

    #[async_trait]
    impl Pusher for FailingPusher {
        async fn push(&self, _channel: &ChannelAddress, _payload: &str) -> Result<usize> {
            Err(anyhow::anyhow!("socket closed"))
        }
    }

    struct StalledPusher;

    #[async_trait]
    impl Pusher for StalledPusher {
        async fn push(&self, _channel: &ChannelAddress, _payload: &str) -> Result<usize> {
            std::future::pending::<()>().await;
            Ok(0)
        }
    }

    async fn users(store: &MemoryStore) -> (User, User) {
        let mut out = Vec::new();
        for name in ["alice", "bob"] {
            out.push(
                store
                    .insert_user(NewUser {
                        username: name.into(),
                        role: Role::User,
                    })
                    .await
                    .unwrap(),
            );
        }
        let bob = out.pop().unwrap();
        (out.pop().unwrap(), bob)
    }

    fn like(actor: Uuid, owner: Uuid, now_liked: bool) -> DomainEvent {
        DomainEvent::LikeToggled(LikeToggled {
            actor_id: actor,
            owner_id: owner,
            target: LikeTarget::Post(Uuid::new_v4()),
            now_liked,
        })
    }

    #[tokio::test]
    async fn like_is_persisted_then_pushed_to_the_owner() {
        let store = Arc::new(MemoryStore::new());
        let hub = ChannelHub::new();
        let (alice, bob) = users(&store).await;
        let (tx, mut rx) = mpsc::channel(4);
        let channel = ChannelAddress::for_user(bob.id);
        hub.attach(channel, tx);
        let handler = FanoutHandler::new(store.clone(), Arc::new(hub), Duration::from_secs(1));

        let outcome = handler.handle(&like(alice.id, bob.id, true)).await.unwrap();
        assert!(matches!(outcome, FanoutOutcome::Delivered { pushed: 1, .. }));

        let stored = store.list_notifications(bob.id, None, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender_id, alice.id);
        assert_eq!(stored[0].notification_type, NotificationType::Like);
        assert_eq!(stored[0].message, "alice liked your post.");

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.channel, channel);
        let payload: NotificationPayload = serde_json::from_str(&delivery.payload).unwrap();
        assert_eq!(payload.id, stored[0].id);
        assert_eq!(payload.message, stored[0].message);
    }

    #[tokio::test]
    async fn unlike_and_self_like_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob) = users(&store).await;
        let handler = FanoutHandler::new(store.clone(), Arc::new(ChannelHub::new()), Duration::from_secs(1));

        assert_eq!(
            handler.handle(&like(alice.id, bob.id, false)).await,
            Some(FanoutOutcome::Skipped("unlike"))
        );
        assert_eq!(
            handler.handle(&like(bob.id, bob.id, true)).await,
            Some(FanoutOutcome::Skipped("self-like"))
        );
        assert!(store.list_notifications(bob.id, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn comment_from_deleted_sender_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob) = users(&store).await;
        store.delete_user(alice.id).await.unwrap();
        let handler = FanoutHandler::new(store.clone(), Arc::new(ChannelHub::new()), Duration::from_secs(1));

        let event = DomainEvent::CommentCreated(CommentCreated {
            receiver_id: bob.id,
            sender_id: alice.id,
            post_id: Uuid::new_v4(),
            comment_id: Uuid::new_v4(),
            post_title: "Hello".into(),
        });
        assert_eq!(
            handler.handle(&event).await,
            Some(FanoutOutcome::Skipped("sender no longer exists"))
        );
    }

    #[tokio::test]
    async fn push_failures_keep_the_row() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob) = users(&store).await;
        let event = DomainEvent::NewFollower(NewFollower {
            follower_id: alice.id,
            following_id: bob.id,
        });

        let failing = FanoutHandler::new(store.clone(), Arc::new(FailingPusher), Duration::from_secs(1));
        assert!(matches!(
            failing.handle(&event).await,
            Some(FanoutOutcome::Delivered { pushed: 0, .. })
        ));

        let stalled = FanoutHandler::new(store.clone(), Arc::new(StalledPusher), Duration::from_millis(20));
        assert!(matches!(
            stalled.handle(&event).await,
            Some(FanoutOutcome::Delivered { pushed: 0, .. })
        ));

        let stored = store.list_notifications(bob.id, None, 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|n| n.message == "alice started following you."));
    }

    #[tokio::test]
    async fn workers_drain_their_queue_until_closed() {
        let store = Arc::new(MemoryStore::new());
        let (alice, bob) = users(&store).await;
        let handler = Arc::new(FanoutHandler::new(
            store.clone(),
            Arc::new(ChannelHub::new()),
            Duration::from_secs(1),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let workers = spawn_workers(vec![rx], handler);

        tx.send(like(alice.id, bob.id, true)).unwrap();
        tx.send(like(bob.id, alice.id, true)).unwrap();
        drop(tx);
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(store.list_notifications(bob.id, None, 10).await.unwrap().len(), 1);
        assert_eq!(store.list_notifications(alice.id, None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bursts_through_the_bus_are_all_stored() {
        use crate::app::events::{EventBus, EventSink};

        let store = Arc::new(MemoryStore::new());
        let (alice, bob) = users(&store).await;
        let handler = Arc::new(FanoutHandler::new(
            store.clone(),
            Arc::new(ChannelHub::new()),
            Duration::from_secs(1),
        ));
        let (bus, receivers) = EventBus::new(1);

        // published before any worker runs, so the whole burst sits in the queue
        for _ in 0..200 {
            bus.publish(DomainEvent::NewFollower(NewFollower {
                follower_id: alice.id,
                following_id: bob.id,
            }));
        }
        let workers = spawn_workers(receivers, handler);
        drop(bus);
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(store.list_notifications(bob.id, None, 500).await.unwrap().len(), 200);
    }
}
