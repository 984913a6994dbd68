//! Local reconciliation state.
//!
//! The poller compares this against server summaries to decide what is
//! worth fetching. Wrapped in `Arc<Mutex<>>` and shared between the poller
//! task and whatever drives the UI; locks are held only for short,
//! await-free sections.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use parley_shared::api::MessageDto;
use parley_shared::{ConversationId, UserId};

/// Poll state machine of a single tracked peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerPhase {
    /// Nothing in flight.
    #[default]
    Idle,
    /// The summary fetch is in flight.
    Polling,
    /// The summary was newer; history or count is being fetched.
    Reconciling,
}

#[derive(Debug, Default)]
pub struct PeerState {
    pub phase: PeerPhase,
    /// The newest conversation timestamp this client has accounted for.
    /// `None` until the first summary arrives (or a baseline is seeded from
    /// the user's last read).
    pub last_known: Option<DateTime<Utc>>,
    /// Unread badge for the peer's conversation while it is not open.
    pub unread: i64,
}

#[derive(Debug, Default)]
pub struct ClientState {
    peers: HashMap<UserId, PeerState>,
    /// The conversation currently displayed, if any, with its merged
    /// history.
    open: Option<(ConversationId, Vec<MessageDto>)>,
    /// Group-change markers already surfaced, so a lingering ledger entry
    /// is not re-announced every tick.
    group_markers: HashMap<String, DateTime<Utc>>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching a peer with no baseline: any existing conversation
    /// counts as news on the first poll.
    pub fn track_peer(&mut self, peer: UserId) {
        self.peers.entry(peer).or_default();
    }

    /// Start watching a peer from a known point, e.g. the user's last-read
    /// timestamp restored from elsewhere.
    pub fn track_peer_from(&mut self, peer: UserId, baseline: DateTime<Utc>) {
        let state = self.peers.entry(peer).or_default();
        state.last_known = Some(baseline);
    }

    pub fn untrack_peer(&mut self, peer: &UserId) {
        self.peers.remove(peer);
    }

    pub fn tracked_peers(&self) -> Vec<UserId> {
        self.peers.keys().cloned().collect()
    }

    pub fn peer(&self, peer: &UserId) -> Option<&PeerState> {
        self.peers.get(peer)
    }

    pub fn set_phase(&mut self, peer: &UserId, phase: PeerPhase) {
        if let Some(state) = self.peers.get_mut(peer) {
            state.phase = phase;
        }
    }

    pub fn note_seen(&mut self, peer: &UserId, timestamp: DateTime<Utc>) {
        if let Some(state) = self.peers.get_mut(peer) {
            state.last_known = Some(timestamp);
        }
    }

    pub fn set_unread(&mut self, peer: &UserId, count: i64) {
        if let Some(state) = self.peers.get_mut(peer) {
            state.unread = count;
        }
    }

    /// Display a conversation. Its badge is spent and subsequent news for
    /// it is merged into the history instead of counted.
    pub fn open_conversation(
        &mut self,
        peer: &UserId,
        conversation_id: ConversationId,
        history: Vec<MessageDto>,
    ) {
        if let Some(state) = self.peers.get_mut(peer) {
            state.unread = 0;
            if let Some(last) = history.last() {
                state.last_known = Some(last.timestamp);
            }
        }
        self.open = Some((conversation_id, history));
    }

    pub fn close_conversation(&mut self) {
        self.open = None;
    }

    pub fn open_conversation_id(&self) -> Option<&ConversationId> {
        self.open.as_ref().map(|(id, _)| id)
    }

    pub fn open_history(&self) -> Option<&[MessageDto]> {
        self.open.as_ref().map(|(_, history)| history.as_slice())
    }

    /// Timestamp of the newest message in the open history.
    pub fn open_latest(&self) -> Option<DateTime<Utc>> {
        self.open
            .as_ref()
            .and_then(|(_, history)| history.last())
            .map(|m| m.timestamp)
    }

    /// Merge fetched messages into the open history: strictly newer than
    /// the local tail, duplicates by timestamp excluded. Returns the
    /// appended suffix.
    pub fn merge_messages(&mut self, fetched: Vec<MessageDto>) -> Vec<MessageDto> {
        let Some((_, history)) = self.open.as_mut() else {
            return Vec::new();
        };

        let latest = history.last().map(|m| m.timestamp);
        let mut appended = Vec::new();

        for message in fetched {
            if let Some(latest) = latest {
                if message.timestamp <= latest {
                    continue;
                }
            }
            if appended
                .iter()
                .any(|m: &MessageDto| m.timestamp == message.timestamp)
            {
                continue;
            }
            appended.push(message);
        }

        history.extend(appended.iter().cloned());
        appended
    }

    /// Record a group-change marker. Returns `true` the first time this
    /// (`group_id`, `since`) pair is seen, `false` for replays.
    pub fn note_group_change(&mut self, group_id: &str, since: DateTime<Utc>) -> bool {
        match self.group_markers.get(group_id) {
            Some(known) if *known >= since => false,
            _ => {
                self.group_markers.insert(group_id.to_string(), since);
                true
            }
        }
    }
}
