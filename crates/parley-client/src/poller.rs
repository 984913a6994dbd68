//! The polling reconciliation loop.
//!
//! Every tick runs one batch: all tracked peers are checked concurrently,
//! each against the server's conversation summary. Only a summary whose
//! `lastTimestamp` is strictly newer than the local last-known value costs
//! anything further -- the full history if that conversation is open
//! locally, a bare unread count otherwise. The next tick is scheduled only
//! after the whole batch has settled, so batches never overlap and a slow
//! server throttles the poller instead of piling up requests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use parley_shared::api::{ConversationDto, MessageDto, NotificationDto};
use parley_shared::{ConversationId, NotificationKind, UserId};

use crate::error::{ClientError, Result};
use crate::events::PollerEvent;
use crate::state::{ClientState, PeerPhase};

/// The reference cadence: one batch per second.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What the poller needs from the server. [`ApiClient`] implements this
/// over HTTP; tests drive the poller with an in-memory stub.
///
/// [`ApiClient`]: crate::http::ApiClient
#[async_trait]
pub trait ChatFeed: Send + Sync {
    async fn conversation_with(&self, peer: &UserId) -> Result<ConversationDto>;

    async fn messages_since(
        &self,
        conversation_id: &ConversationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageDto>>;

    async fn message_count_since(
        &self,
        conversation_id: &ConversationId,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64>;

    async fn notifications(&self) -> Result<Vec<NotificationDto>>;
}

pub struct Poller<F: ChatFeed> {
    feed: Arc<F>,
    state: Arc<Mutex<ClientState>>,
    events: mpsc::Sender<PollerEvent>,
    interval: Duration,
}

impl<F: ChatFeed> Poller<F> {
    pub fn new(
        feed: Arc<F>,
        state: Arc<Mutex<ClientState>>,
        events: mpsc::Sender<PollerEvent>,
        interval: Duration,
    ) -> Self {
        Self {
            feed,
            state,
            events,
            interval,
        }
    }

    /// Run one batch to completion: every tracked peer concurrently, then
    /// the notification sweep. Individual failures are logged and absorbed;
    /// the batch itself always settles.
    pub async fn poll_once(&self) {
        let peers = self.state.lock().unwrap().tracked_peers();

        let checks = peers.into_iter().map(|peer| async move {
            if let Err(e) = self.check_peer(&peer).await {
                warn!(peer = %peer, error = %e, "peer poll failed");
            }
        });
        join_all(checks).await;

        if let Err(e) = self.sweep_notifications().await {
            warn!(error = %e, "notification poll failed");
        }
    }

    /// Poll forever at the configured interval. Each delay starts only
    /// after the previous batch has fully settled.
    pub fn spawn(self) -> PollerHandle
    where
        F: 'static,
    {
        let interval = self.interval;
        let task = tokio::spawn(async move {
            loop {
                self.poll_once().await;
                tokio::time::sleep(interval).await;
            }
        });
        PollerHandle { task }
    }

    async fn check_peer(&self, peer: &UserId) -> Result<()> {
        self.state.lock().unwrap().set_phase(peer, PeerPhase::Polling);

        let result = self.reconcile_peer(peer).await;

        self.state.lock().unwrap().set_phase(peer, PeerPhase::Idle);
        result
    }

    async fn reconcile_peer(&self, peer: &UserId) -> Result<()> {
        let summary = match self.feed.conversation_with(peer).await {
            Ok(summary) => summary,
            // No conversation with this peer yet; nothing to reconcile.
            Err(ClientError::NotFound) => {
                debug!(peer = %peer, "no conversation yet");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Some(fetched) = summary.last_timestamp else {
            return Ok(());
        };

        let (last_known, is_open) = {
            let state = self.state.lock().unwrap();
            let last_known = state.peer(peer).and_then(|p| p.last_known);
            let is_open = state
                .open_conversation_id()
                .map(|id| id.as_str() == summary.id)
                .unwrap_or(false);
            (last_known, is_open)
        };

        // Only strictly newer activity is worth another request.
        if let Some(last_known) = last_known {
            if fetched <= last_known {
                return Ok(());
            }
        }

        self.state
            .lock()
            .unwrap()
            .set_phase(peer, PeerPhase::Reconciling);

        let conversation_id = ConversationId(summary.id.clone());
        if is_open {
            // The conversation is on screen: fetch the full history and
            // merge; the merge keeps only the strictly-newer tail.
            let history = self.feed.messages_since(&conversation_id, None).await?;

            let appended = {
                let mut state = self.state.lock().unwrap();
                let appended = state.merge_messages(history);
                state.note_seen(peer, fetched);
                appended
            };

            if !appended.is_empty() {
                let _ = self
                    .events
                    .send(PollerEvent::NewMessages {
                        peer: peer.to_string(),
                        conversation_id: summary.id,
                        messages: appended,
                    })
                    .await;
            }
        } else {
            // Not on screen: only the badge count travels. The last-known
            // mark is deliberately not advanced, so the count keeps
            // tracking everything unread since the baseline until the user
            // actually opens the conversation.
            let count = self
                .feed
                .message_count_since(&conversation_id, last_known)
                .await?;

            let changed = {
                let mut state = self.state.lock().unwrap();
                let previous = state.peer(peer).map(|p| p.unread).unwrap_or(0);
                state.set_unread(peer, count);
                previous != count
            };

            if changed {
                let _ = self
                    .events
                    .send(PollerEvent::UnreadCount {
                        peer: peer.to_string(),
                        conversation_id: summary.id,
                        count,
                    })
                    .await;
            }
        }

        Ok(())
    }

    async fn sweep_notifications(&self) -> Result<()> {
        let notifications = self.feed.notifications().await?;

        for notification in notifications {
            if notification.kind != NotificationKind::GroupChanged {
                continue;
            }
            let Some(group_id) = notification.group_id else {
                continue;
            };

            let fresh = self
                .state
                .lock()
                .unwrap()
                .note_group_change(&group_id, notification.since);

            if fresh {
                let _ = self
                    .events
                    .send(PollerEvent::GroupChanged {
                        group_id,
                        since: notification.since,
                    })
                    .await;
            }
        }

        Ok(())
    }
}

/// Handle to a running poll loop. Dropping it stops the loop, so a view
/// teardown cannot leak the timer.
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubFeed {
        conversations: Mutex<HashMap<UserId, ConversationDto>>,
        messages: Mutex<HashMap<String, Vec<MessageDto>>>,
        notifications: Mutex<Vec<NotificationDto>>,
        failing: Mutex<HashSet<UserId>>,
        history_fetches: AtomicUsize,
        count_fetches: AtomicUsize,
    }

    impl StubFeed {
        fn put_conversation(&self, peer: &str, last_timestamp: Option<DateTime<Utc>>) {
            let id = ConversationId::for_pair(&UserId::from("me"), &UserId::from(peer));
            self.conversations.lock().unwrap().insert(
                UserId::from(peer),
                ConversationDto {
                    id: id.0,
                    participants: vec!["me".into(), peer.into()],
                    last_timestamp,
                },
            );
        }

        fn put_message(&self, peer: &str, contents: &str, ts: DateTime<Utc>) {
            let id = ConversationId::for_pair(&UserId::from("me"), &UserId::from(peer));
            self.messages
                .lock()
                .unwrap()
                .entry(id.0.clone())
                .or_default()
                .push(MessageDto {
                    id: format!("m-{contents}"),
                    conversation_id: id.0,
                    sender_id: peer.to_string(),
                    contents: contents.to_string(),
                    timestamp: ts,
                });
            self.put_conversation(peer, Some(ts));
        }
    }

    #[async_trait]
    impl ChatFeed for StubFeed {
        async fn conversation_with(&self, peer: &UserId) -> Result<ConversationDto> {
            if self.failing.lock().unwrap().contains(peer) {
                return Err(ClientError::Status(500));
            }
            self.conversations
                .lock()
                .unwrap()
                .get(peer)
                .cloned()
                .ok_or(ClientError::NotFound)
        }

        async fn messages_since(
            &self,
            conversation_id: &ConversationId,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<MessageDto>> {
            self.history_fetches.fetch_add(1, Ordering::SeqCst);
            let messages = self.messages.lock().unwrap();
            let all = messages.get(conversation_id.as_str()).cloned().unwrap_or_default();
            Ok(all
                .into_iter()
                .filter(|m| since.map(|s| m.timestamp > s).unwrap_or(true))
                .collect())
        }

        async fn message_count_since(
            &self,
            conversation_id: &ConversationId,
            since: Option<DateTime<Utc>>,
        ) -> Result<i64> {
            self.count_fetches.fetch_add(1, Ordering::SeqCst);
            let messages = self.messages.lock().unwrap();
            let all = messages.get(conversation_id.as_str()).cloned().unwrap_or_default();
            Ok(all
                .iter()
                .filter(|m| since.map(|s| m.timestamp > s).unwrap_or(true))
                .count() as i64)
        }

        async fn notifications(&self) -> Result<Vec<NotificationDto>> {
            Ok(self.notifications.lock().unwrap().clone())
        }
    }

    struct Harness {
        feed: Arc<StubFeed>,
        state: Arc<Mutex<ClientState>>,
        poller: Poller<StubFeed>,
        events: mpsc::Receiver<PollerEvent>,
    }

    fn harness() -> Harness {
        let feed = Arc::new(StubFeed::default());
        let state = Arc::new(Mutex::new(ClientState::new()));
        let (tx, rx) = mpsc::channel(64);
        let poller = Poller::new(feed.clone(), state.clone(), tx, DEFAULT_POLL_INTERVAL);
        Harness {
            feed,
            state,
            poller,
            events: rx,
        }
    }

    #[tokio::test]
    async fn open_conversation_merges_new_messages() {
        let mut h = harness();
        let charlie = UserId::from("charlie");
        let conv = ConversationId::for_pair(&UserId::from("me"), &charlie);

        {
            let mut state = h.state.lock().unwrap();
            state.track_peer(charlie.clone());
            state.open_conversation(&charlie, conv.clone(), Vec::new());
        }
        h.feed.put_message("charlie", "hi", Utc::now());

        h.poller.poll_once().await;

        match h.events.try_recv().unwrap() {
            PollerEvent::NewMessages {
                peer,
                conversation_id,
                messages,
            } => {
                assert_eq!(peer, "charlie");
                assert_eq!(conversation_id, conv.as_str());
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].contents, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.state.lock().unwrap().open_history().unwrap().len(), 1);

        // Nothing changed on the server: the next batch is silent and does
        // not re-fetch history.
        let fetches = h.feed.history_fetches.load(Ordering::SeqCst);
        h.poller.poll_once().await;
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.feed.history_fetches.load(Ordering::SeqCst), fetches);
    }

    #[tokio::test]
    async fn closed_conversation_fetches_count_only() {
        let mut h = harness();
        let charlie = UserId::from("charlie");

        h.state.lock().unwrap().track_peer(charlie.clone());
        let base = Utc::now();
        h.feed.put_message("charlie", "one", base);
        h.feed.put_message("charlie", "two", base + chrono::Duration::seconds(1));

        h.poller.poll_once().await;

        match h.events.try_recv().unwrap() {
            PollerEvent::UnreadCount { peer, count, .. } => {
                assert_eq!(peer, "charlie");
                assert_eq!(count, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // The cheap path never touched the history endpoint.
        assert_eq!(h.feed.history_fetches.load(Ordering::SeqCst), 0);
        assert_eq!(h.state.lock().unwrap().peer(&charlie).unwrap().unread, 2);

        // An unchanged badge is not re-announced.
        h.poller.poll_once().await;
        assert!(h.events.try_recv().is_err());

        // Another message grows the badge and fires again.
        h.feed
            .put_message("charlie", "three", base + chrono::Duration::seconds(2));
        h.poller.poll_once().await;
        match h.events.try_recv().unwrap() {
            PollerEvent::UnreadCount { count, .. } => assert_eq!(count, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn per_peer_failure_does_not_abort_the_batch() {
        let mut h = harness();
        let flaky = UserId::from("flaky");
        let steady = UserId::from("steady");

        {
            let mut state = h.state.lock().unwrap();
            state.track_peer(flaky.clone());
            state.track_peer(steady.clone());
        }
        h.feed.failing.lock().unwrap().insert(flaky.clone());
        h.feed.put_message("steady", "hello", Utc::now());

        h.poller.poll_once().await;

        match h.events.try_recv().unwrap() {
            PollerEvent::UnreadCount { peer, .. } => assert_eq!(peer, "steady"),
            other => panic!("unexpected event: {other:?}"),
        }
        // Both peers are back to Idle, the failed one included.
        let state = h.state.lock().unwrap();
        assert_eq!(state.peer(&flaky).unwrap().phase, PeerPhase::Idle);
        assert_eq!(state.peer(&steady).unwrap().phase, PeerPhase::Idle);
    }

    #[tokio::test]
    async fn peer_without_conversation_is_quiet() {
        let mut h = harness();
        h.state.lock().unwrap().track_peer(UserId::from("charlie"));

        h.poller.poll_once().await;

        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn group_changes_fire_once_per_change() {
        let mut h = harness();
        let since = Utc::now();
        h.feed
            .notifications
            .lock()
            .unwrap()
            .push(NotificationDto {
                id: "n1".into(),
                kind: NotificationKind::GroupChanged,
                conversation_id: None,
                group_id: Some("g1".into()),
                since,
                other_id: None,
                message_count: None,
            });

        h.poller.poll_once().await;
        match h.events.try_recv().unwrap() {
            PollerEvent::GroupChanged { group_id, .. } => assert_eq!(group_id, "g1"),
            other => panic!("unexpected event: {other:?}"),
        }

        // The ledger entry lingers until the user reads the group list; the
        // poller must not re-announce it every tick.
        h.poller.poll_once().await;
        assert!(h.events.try_recv().is_err());

        // A newer change to the same group fires again.
        h.feed.notifications.lock().unwrap()[0].since = since + chrono::Duration::seconds(5);
        h.poller.poll_once().await;
        assert!(matches!(
            h.events.try_recv().unwrap(),
            PollerEvent::GroupChanged { .. }
        ));
    }

    #[tokio::test]
    async fn spawned_loop_reschedules_after_each_batch() {
        let mut h = harness();
        let charlie = UserId::from("charlie");
        h.state.lock().unwrap().track_peer(charlie.clone());
        let base = Utc::now();
        h.feed.put_message("charlie", "one", base);

        let feed = h.feed.clone();
        let poller = Poller::new(
            feed.clone(),
            h.state.clone(),
            h.poller.events.clone(),
            Duration::from_millis(10),
        );
        let handle = poller.spawn();

        let first = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
            .await
            .unwrap()
            .unwrap();
        match first {
            PollerEvent::UnreadCount { count, .. } => assert_eq!(count, 1),
            other => panic!("unexpected event: {other:?}"),
        }

        // A later tick picks up the next message without being prodded.
        feed.put_message("charlie", "two", base + chrono::Duration::seconds(1));
        let second = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
            .await
            .unwrap()
            .unwrap();
        match second {
            PollerEvent::UnreadCount { count, .. } => assert_eq!(count, 2),
            other => panic!("unexpected event: {other:?}"),
        }

        handle.stop();
    }
}
