use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use courier_types::events::GatewayEvent;
use courier_types::models::{Message, MessageContent};

use crate::error::ClientError;
use crate::feed::PushFeed;
use crate::transport::ChatTransport;
use crate::view::{ChatEntry, ChatView, ViewState};

/// Forwards pushes into one view epoch. Dropping it stops forwarding.
struct Subscription {
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Drives a `ChatView`: history fetches, the push subscription and the
/// optimistic send cycle.
pub struct ChatSession<T> {
    transport: Arc<T>,
    events: broadcast::Sender<GatewayEvent>,
    view: Arc<Mutex<ChatView>>,
    changed: Arc<Notify>,
    subscription: Option<Subscription>,
}

impl<T: ChatTransport + 'static> ChatSession<T> {
    pub fn new(me: Uuid, transport: T, feed: &PushFeed) -> Self {
        Self {
            transport: Arc::new(transport),
            events: feed.sender(),
            view: Arc::new(Mutex::new(ChatView::new(me))),
            changed: Arc::new(Notify::new()),
            subscription: None,
        }
    }

    /// Open the conversation with `peer`, replacing whatever was open.
    ///
    /// The push subscription starts before history is requested, so nothing
    /// pushed in between is lost; the view dedupes the overlap. A failed
    /// fetch leaves the view in `Failed`, recoverable with `retry`.
    pub async fn open(&mut self, peer: Uuid) -> Result<(), ClientError> {
        self.subscription = None;
        let epoch = self.view().open(peer);
        self.subscription = Some(self.subscribe(epoch, peer));
        self.changed.notify_one();

        self.load(epoch, peer).await
    }

    pub async fn retry(&mut self) -> Result<(), ClientError> {
        let (epoch, peer) = self.view().retry().ok_or(ClientError::NotReady)?;
        self.load(epoch, peer).await
    }

    /// Tear down the view. No push reaches it afterwards.
    pub fn close(&mut self) {
        self.subscription = None;
        self.view().close();
        self.changed.notify_one();
    }

    /// Optimistically append `content`, send it, then reconcile.
    ///
    /// On success the local entry becomes the server's message. On failure
    /// it is removed again and the error is returned for display.
    pub async fn send(&self, content: MessageContent) -> Result<Message, ClientError> {
        let content = content.normalized();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let pending = self
            .view()
            .begin_send(content.clone())
            .ok_or(ClientError::NotReady)?;
        self.changed.notify_one();

        let result = self
            .transport
            .send_message(pending.peer_id(), &content)
            .await;

        {
            let mut view = self.view();
            match &result {
                Ok(confirmed) => {
                    view.confirm_send(&pending, confirmed.clone());
                }
                Err(e) => {
                    warn!("Send to {} failed, rolling back: {}", pending.peer_id(), e);
                    view.fail_send(&pending);
                }
            }
        }
        self.changed.notify_one();

        result
    }

    pub fn state(&self) -> ViewState {
        self.view().state().clone()
    }

    pub fn peer(&self) -> Option<Uuid> {
        self.view().peer()
    }

    pub fn entries(&self) -> Vec<ChatEntry> {
        self.view().entries().to_vec()
    }

    /// Visible messages, optimistic ones included.
    pub fn messages(&self) -> Vec<Message> {
        self.view()
            .entries()
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// Resolves after the next change to the view.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    async fn load(&self, epoch: u64, peer: Uuid) -> Result<(), ClientError> {
        let result = self.transport.fetch_history(peer).await;

        {
            let mut view = self.view();
            match &result {
                Ok(history) => {
                    view.history_loaded(epoch, history.clone());
                }
                Err(e) => {
                    warn!("History fetch for {} failed: {}", peer, e);
                    view.history_failed(epoch, e.to_string());
                }
            }
        }
        self.changed.notify_one();

        result.map(|_| ())
    }

    /// Forward pushes for `epoch`. If the channel overflows, the dropped
    /// pushes are recovered from a history refetch.
    fn subscribe(&self, epoch: u64, peer: Uuid) -> Subscription {
        let mut rx = self.events.subscribe();
        let view = self.view.clone();
        let changed = self.changed.clone();
        let transport = self.transport.clone();

        let task = tokio::spawn(async move {
            loop {
                let message = match rx.recv().await {
                    Ok(GatewayEvent::NewMessage(message)) => message,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Push subscription lagged by {} events, resyncing", n);
                        let fetched = transport.fetch_history(peer).await;
                        let applied = {
                            let mut guard = lock(&view);
                            match fetched {
                                Ok(history) => guard.resync(epoch, history),
                                Err(e) => {
                                    warn!("Resync for {} failed: {}", peer, e);
                                    guard.resync_failed(epoch, e.to_string())
                                }
                            }
                        };
                        if applied {
                            changed.notify_one();
                        }
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let applied = lock(&view).apply_push(epoch, message);
                if applied {
                    changed.notify_one();
                }
            }
            debug!("Push subscription for epoch {} ended", epoch);
        });

        Subscription { task }
    }

    fn view(&self) -> MutexGuard<'_, ChatView> {
        lock(&self.view)
    }
}

fn lock(view: &Mutex<ChatView>) -> MutexGuard<'_, ChatView> {
    // The view holds no invariants a panicking writer could break halfway.
    view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
