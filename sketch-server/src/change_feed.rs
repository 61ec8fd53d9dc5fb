use dashmap::DashMap;
use sketch_types::{BroadcastEvent, ChangeNotice, EntityKind, ParticipantId, SessionId};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Per-session channel depth. Slow receivers skip ahead rather than
/// holding writers back, and are told to resync.
pub const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Change(ChangeNotice),
    Ephemeral {
        /// `None` for host-originated events such as phase notices.
        sender: Option<ParticipantId>,
        event: BroadcastEvent,
    },
    /// The subscriber fell behind and lost `skipped` items; its view must
    /// be rebuilt from durable state.
    Resync { skipped: u64 },
}

/// Publish/subscribe hub: durable row changes plus the best-effort
/// ephemeral channel, one broadcast channel per session.
#[derive(Default)]
pub struct ChangeFeed {
    channels: DashMap<SessionId, broadcast::Sender<FeedItem>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, session_id: SessionId) -> broadcast::Sender<FeedItem> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone()
    }

    /// Subscribes `viewer` to the given entity kinds of one session.
    /// Ephemeral events are always delivered, except the viewer's own.
    pub fn subscribe(
        &self,
        session_id: SessionId,
        viewer: ParticipantId,
        kinds: &[EntityKind],
    ) -> FeedSubscription {
        FeedSubscription {
            session_id,
            viewer,
            kinds: kinds.to_vec(),
            receiver: self.sender(session_id).subscribe(),
        }
    }

    pub fn publish_change(&self, session_id: SessionId, notice: ChangeNotice) {
        self.publish(session_id, FeedItem::Change(notice));
    }

    pub fn publish_ephemeral(
        &self,
        session_id: SessionId,
        sender: Option<ParticipantId>,
        event: BroadcastEvent,
    ) {
        self.publish(session_id, FeedItem::Ephemeral { sender, event });
    }

    fn publish(&self, session_id: SessionId, item: FeedItem) {
        let Some(channel) = self.channels.get(&session_id) else {
            return;
        };
        // No receivers is fine: nobody is watching this session right now.
        if channel.send(item).is_err() {
            debug!("No subscribers for session {}", session_id);
        }
    }

    pub fn subscriber_count(&self, session_id: SessionId) -> usize {
        self.channels
            .get(&session_id)
            .map(|channel| channel.receiver_count())
            .unwrap_or(0)
    }

    /// Sessions that currently have at least one subscriber.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.channels
            .iter()
            .filter(|entry| entry.value().receiver_count() > 0)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Drops channels nobody listens to any more.
    pub fn prune_idle(&self) {
        self.channels.retain(|_, channel| channel.receiver_count() > 0);
    }
}

pub struct FeedSubscription {
    session_id: SessionId,
    viewer: ParticipantId,
    kinds: Vec<EntityKind>,
    receiver: broadcast::Receiver<FeedItem>,
}

impl FeedSubscription {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Next item for this subscriber, or `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<FeedItem> {
        loop {
            match self.receiver.recv().await {
                Ok(item) if self.wants(&item) => return Some(item),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Feed subscriber {} in session {} skipped {} items",
                        self.viewer, self.session_id, skipped
                    );
                    return Some(FeedItem::Resync { skipped });
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn wants(&self, item: &FeedItem) -> bool {
        match item {
            FeedItem::Change(notice) => self.kinds.contains(&notice.entity_kind()),
            FeedItem::Ephemeral { sender, .. } => *sender != Some(self.viewer),
            FeedItem::Resync { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sketch_types::{FeedRecord, Participant};
    use uuid::Uuid;

    fn roster_notice() -> ChangeNotice {
        ChangeNotice::insert(FeedRecord::Participant(Participant {
            user_id: Uuid::new_v4(),
            display_name: "Ann".into(),
            score: 0,
            joined_at: Utc::now(),
            is_connected: true,
        }))
    }

    #[tokio::test]
    async fn test_subscription_filters_by_kind() {
        let feed = ChangeFeed::new();
        let session_id = Uuid::new_v4();
        let mut strokes_only = feed.subscribe(session_id, Uuid::new_v4(), &[EntityKind::Stroke]);
        let mut everything = feed.subscribe(session_id, Uuid::new_v4(), &EntityKind::ALL);

        feed.publish_change(session_id, roster_notice());
        let removed = ChangeNotice::delete(FeedRecord::StrokesRemoved {
            session_id,
            stroke_id: None,
        });
        feed.publish_change(session_id, removed.clone());

        assert!(matches!(everything.recv().await, Some(FeedItem::Change(n)) if n.entity_kind() == EntityKind::Roster));
        assert_eq!(strokes_only.recv().await, Some(FeedItem::Change(removed)));
    }

    #[tokio::test]
    async fn test_ephemeral_not_echoed_to_sender() {
        let feed = ChangeFeed::new();
        let session_id = Uuid::new_v4();
        let drawer = Uuid::new_v4();
        let mut own = feed.subscribe(session_id, drawer, &EntityKind::ALL);
        let mut other = feed.subscribe(session_id, Uuid::new_v4(), &EntityKind::ALL);

        let event = BroadcastEvent::Clear { drawer_id: drawer };
        feed.publish_ephemeral(session_id, Some(drawer), event.clone());
        feed.publish_change(session_id, roster_notice());

        assert!(matches!(other.recv().await, Some(FeedItem::Ephemeral { .. })));
        // The drawer's next item is the roster change, not its own event.
        assert!(matches!(own.recv().await, Some(FeedItem::Change(_))));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told_to_resync() {
        let feed = ChangeFeed::new();
        let session_id = Uuid::new_v4();
        let mut slow = feed.subscribe(session_id, Uuid::new_v4(), &EntityKind::ALL);

        for _ in 0..FEED_CAPACITY + 10 {
            feed.publish_change(session_id, roster_notice());
        }

        assert_eq!(slow.recv().await, Some(FeedItem::Resync { skipped: 10 }));
        // After the resync the subscriber picks up the retained tail.
        assert!(matches!(slow.recv().await, Some(FeedItem::Change(_))));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated_and_pruned() {
        let feed = ChangeFeed::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let sub_a = feed.subscribe(a, Uuid::new_v4(), &EntityKind::ALL);
        let _sub_b = feed.subscribe(b, Uuid::new_v4(), &EntityKind::ALL);

        assert_eq!(feed.subscriber_count(a), 1);
        assert_eq!(feed.active_sessions().len(), 2);

        drop(sub_a);
        feed.prune_idle();
        assert_eq!(feed.active_sessions(), vec![b]);
        // Publishing to a pruned session is a no-op.
        feed.publish_change(a, roster_notice());
    }
}
