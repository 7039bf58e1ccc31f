use chrono::Utc;
use uuid::Uuid;

use courier_types::models::{Message, MessageContent};

/// Lifecycle of one open chat view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    Idle,
    Loading,
    Ready,
    /// History fetch failed; `retry` goes back to `Loading`.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Local optimistic entry; the send request has not resolved yet.
    Pending,
    /// The server has this message.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub message: Message,
    pub delivery: DeliveryState,
}

/// Ticket for one optimistic send, resolved by `confirm_send` or `fail_send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    temp_id: Uuid,
    epoch: u64,
    peer_id: Uuid,
}

impl PendingSend {
    pub fn temp_id(&self) -> Uuid {
        self.temp_id
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }
}

/// Local state of the conversation between `me` and the open peer.
///
/// Every open/close bumps the epoch. Pushes and responses are tagged with
/// the epoch they were issued under, and anything carrying a stale epoch is
/// dropped, so a torn-down or reopened view never sees stray appends.
#[derive(Debug)]
pub struct ChatView {
    me: Uuid,
    peer: Option<Uuid>,
    state: ViewState,
    epoch: u64,
    entries: Vec<ChatEntry>,
    /// Pushes that arrived before history did.
    buffered: Vec<Message>,
}

impl ChatView {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            peer: None,
            state: ViewState::Idle,
            epoch: 0,
            entries: Vec::new(),
            buffered: Vec::new(),
        }
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn peer(&self) -> Option<Uuid> {
        self.peer
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    /// Start showing the conversation with `peer`. Returns the new epoch.
    pub fn open(&mut self, peer: Uuid) -> u64 {
        self.reset();
        self.peer = Some(peer);
        self.state = ViewState::Loading;
        self.epoch
    }

    pub fn close(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.peer = None;
        self.state = ViewState::Idle;
        self.entries.clear();
        self.buffered.clear();
    }

    /// Install fetched history and merge any pushes buffered meanwhile.
    /// Returns false if the result belongs to an older epoch.
    pub fn history_loaded(&mut self, epoch: u64, history: Vec<Message>) -> bool {
        if epoch != self.epoch || self.state != ViewState::Loading {
            return false;
        }

        self.entries = history
            .into_iter()
            .map(|message| ChatEntry {
                message,
                delivery: DeliveryState::Confirmed,
            })
            .collect();

        for message in std::mem::take(&mut self.buffered) {
            self.insert_confirmed(message);
        }

        self.state = ViewState::Ready;
        true
    }

    pub fn history_failed(&mut self, epoch: u64, reason: impl Into<String>) -> bool {
        if epoch != self.epoch || self.state != ViewState::Loading {
            return false;
        }
        self.state = ViewState::Failed(reason.into());
        true
    }

    /// Move a failed view back to `Loading`. Keeps the epoch, so pushes
    /// buffered before the failure are still merged.
    pub fn retry(&mut self) -> Option<(u64, Uuid)> {
        match (&self.state, self.peer) {
            (ViewState::Failed(_), Some(peer)) => {
                self.state = ViewState::Loading;
                Some((self.epoch, peer))
            }
            _ => None,
        }
    }

    /// Apply a pushed message. Only messages from the open peer to `me`
    /// count; anything else belongs to some other view. Returns true if the
    /// visible list changed.
    pub fn apply_push(&mut self, epoch: u64, message: Message) -> bool {
        if epoch != self.epoch {
            return false;
        }
        let Some(peer) = self.peer else {
            return false;
        };
        if message.sender_id != peer || message.receiver_id != self.me {
            return false;
        }

        match self.state {
            ViewState::Ready => self.insert_confirmed(message),
            ViewState::Loading | ViewState::Failed(_) => {
                if !self.buffered.iter().any(|m| m.id == message.id) {
                    self.buffered.push(message);
                }
                false
            }
            ViewState::Idle => false,
        }
    }

    /// Append an optimistic entry for `content` at the tail.
    /// Returns `None` unless the view is `Ready`.
    pub fn begin_send(&mut self, content: MessageContent) -> Option<PendingSend> {
        if self.state != ViewState::Ready {
            return None;
        }
        let peer_id = self.peer?;

        let temp_id = Uuid::new_v4();
        self.entries.push(ChatEntry {
            message: Message {
                id: temp_id,
                conversation_id: Uuid::nil(),
                sender_id: self.me,
                receiver_id: peer_id,
                text: content.text,
                image: content.image,
                created_at: Utc::now(),
            },
            delivery: DeliveryState::Pending,
        });

        Some(PendingSend {
            temp_id,
            epoch: self.epoch,
            peer_id,
        })
    }

    /// Replace the optimistic entry with the server's copy, in place.
    /// If the confirmed message is already listed, the optimistic entry is
    /// just dropped.
    pub fn confirm_send(&mut self, pending: &PendingSend, confirmed: Message) -> bool {
        if pending.epoch != self.epoch {
            return false;
        }

        let already_listed = self.entries.iter().any(|e| e.message.id == confirmed.id);
        let slot = self
            .entries
            .iter()
            .position(|e| e.message.id == pending.temp_id);

        match (slot, already_listed) {
            (Some(i), false) => {
                self.entries[i] = ChatEntry {
                    message: confirmed,
                    delivery: DeliveryState::Confirmed,
                };
            }
            (Some(i), true) => {
                self.entries.remove(i);
            }
            (None, false) => {
                self.entries.push(ChatEntry {
                    message: confirmed,
                    delivery: DeliveryState::Confirmed,
                });
            }
            (None, true) => {}
        }
        true
    }

    /// Roll back an optimistic entry after its send failed.
    pub fn fail_send(&mut self, pending: &PendingSend) -> bool {
        if pending.epoch != self.epoch {
            return false;
        }
        let before = self.entries.len();
        self.entries.retain(|e| e.message.id != pending.temp_id);
        self.entries.len() != before
    }

    /// Merge a fresh history fetch into a live view, e.g. after pushes were
    /// dropped. Known ids are skipped; everything else lands in order.
    pub fn resync(&mut self, epoch: u64, history: Vec<Message>) -> bool {
        if epoch != self.epoch {
            return false;
        }

        match self.state {
            ViewState::Ready => {
                let mut changed = false;
                for message in history {
                    changed |= self.insert_confirmed(message);
                }
                changed
            }
            ViewState::Loading | ViewState::Failed(_) => {
                for message in history {
                    if !self.buffered.iter().any(|m| m.id == message.id) {
                        self.buffered.push(message);
                    }
                }
                false
            }
            ViewState::Idle => false,
        }
    }

    /// A resync fetch failed: the list may be missing messages, so surface
    /// it as `Failed` and let `retry` reload.
    pub fn resync_failed(&mut self, epoch: u64, reason: impl Into<String>) -> bool {
        if epoch != self.epoch || self.state != ViewState::Ready {
            return false;
        }
        self.state = ViewState::Failed(reason.into());
        true
    }

    /// Insert after the last entry not newer than `message`. Equal
    /// timestamps keep arrival order, which matches the server's.
    fn insert_confirmed(&mut self, message: Message) -> bool {
        if self.entries.iter().any(|e| e.message.id == message.id) {
            return false;
        }
        let at = self
            .entries
            .iter()
            .rposition(|e| e.message.created_at <= message.created_at)
            .map_or(0, |i| i + 1);
        self.entries.insert(
            at,
            ChatEntry {
                message,
                delivery: DeliveryState::Confirmed,
            },
        );
        true
    }
}
