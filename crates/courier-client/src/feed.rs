use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Url;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use uuid::Uuid;

use courier_types::events::GatewayEvent;

use crate::error::ClientError;

/// Fan-out of server pushes to every open chat view.
pub struct PushFeed {
    inner: Arc<FeedInner>,
    reader: Option<JoinHandle<()>>,
}

struct FeedInner {
    events: broadcast::Sender<GatewayEvent>,
    online: watch::Sender<Vec<Uuid>>,
}

impl FeedInner {
    fn publish(&self, event: GatewayEvent) {
        if let GatewayEvent::OnlineUsers { user_ids } = &event {
            self.online.send_replace(user_ids.clone());
        }
        // No subscribers is fine: no view is open.
        let _ = self.events.send(event);
    }
}

impl PushFeed {
    /// A feed with nothing attached; events come from `publish`.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        let (online, _) = watch::channel(Vec::new());

        Self {
            inner: Arc::new(FeedInner { events, online }),
            reader: None,
        }
    }

    /// Connect to the gateway at `gateway_url` (e.g. `ws://host:3000/gateway`)
    /// and publish every event it pushes until the socket closes.
    pub async fn connect(gateway_url: &str, token: &str) -> Result<Self, ClientError> {
        let url = gateway_request_url(gateway_url, token)?;
        let (mut socket, _) = connect_async(url.as_str()).await?;

        let mut feed = Self::new();
        let inner = feed.inner.clone();

        feed.reader = Some(tokio::spawn(async move {
            while let Some(frame) = socket.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                            Ok(event) => inner.publish(event),
                            Err(e) => warn!("Undecodable gateway event: {}", e),
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Gateway connection error: {}", e);
                        break;
                    }
                }
            }
            debug!("Gateway feed closed");
        }));

        Ok(feed)
    }

    pub fn publish(&self, event: GatewayEvent) {
        self.inner.publish(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.events.subscribe()
    }

    /// Sender side, for views that subscribe later.
    pub(crate) fn sender(&self) -> broadcast::Sender<GatewayEvent> {
        self.inner.events.clone()
    }

    /// Latest online set pushed by the server.
    pub fn online_users(&self) -> Vec<Uuid> {
        self.inner.online.borrow().clone()
    }

    pub fn watch_online(&self) -> watch::Receiver<Vec<Uuid>> {
        self.inner.online.subscribe()
    }

    /// False once the gateway socket has closed. Always true for a manual feed.
    pub fn is_connected(&self) -> bool {
        self.reader.as_ref().is_none_or(|task| !task.is_finished())
    }
}

/// `gateway_url` with the token appended as an encoded `token` query pair.
fn gateway_request_url(gateway_url: &str, token: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(gateway_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

impl Default for PushFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PushFeed {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
