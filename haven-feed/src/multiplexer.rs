//! One independent WebSocket subscription per relay endpoint.
//!
//! Every connection task forwards text frames to a single channel drained by
//! the processing task. Each message carries the generation it was read under;
//! [`SubscriptionMultiplexer::reset`] bumps the generation before aborting the
//! tasks, so anything still in flight is recognisably stale and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::error::FeedError;
use crate::message::{subscription_id, subscription_request};

/// A text frame read from one endpoint.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub generation: u64,
    pub endpoint: Arc<str>,
    pub text: String,
}

/// What each connection asks for and how it retries.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    pub kinds: Vec<u32>,
    pub limit: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            kinds: vec![1, 1063],
            limit: 500,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub endpoint: String,
    pub subscription_id: String,
    pub connected: bool,
}

struct Subscription {
    endpoint: Url,
    subscription_id: String,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct SubscriptionMultiplexer {
    settings: Arc<SubscriptionSettings>,
    subscriptions: HashMap<String, Subscription>,
    generation: Arc<AtomicU64>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
}

impl SubscriptionMultiplexer {
    pub fn new(
        settings: SubscriptionSettings,
        generation: Arc<AtomicU64>,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            subscriptions: HashMap::new(),
            generation,
            inbound,
        }
    }

    /// Open a subscription for every endpoint not already subscribed.
    /// All endpoints are validated before any connection is opened.
    /// Returns how many new subscriptions were started.
    pub fn fetch<I, S>(&mut self, endpoints: I) -> Result<usize, FeedError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed = endpoints
            .into_iter()
            .map(|raw| parse_endpoint(raw.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut opened = 0;
        for endpoint in parsed {
            let key = endpoint.as_str().to_string();
            if self.subscriptions.contains_key(&key) {
                continue;
            }
            let subscription = self.open(endpoint);
            self.subscriptions.insert(key, subscription);
            opened += 1;
        }
        Ok(opened)
    }

    /// Tear down every connection. Messages already read under the old
    /// generation will be discarded by the consumer.
    pub fn reset(&mut self) {
        let previous = self.generation.fetch_add(1, Ordering::SeqCst);
        for (_, subscription) in self.subscriptions.drain() {
            subscription.task.abort();
            subscription.connected.store(false, Ordering::SeqCst);
        }
        tracing::info!(generation = previous + 1, "feed subscriptions reset");
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        let mut statuses: Vec<ConnectionStatus> = self
            .subscriptions
            .values()
            .map(|sub| ConnectionStatus {
                endpoint: sub.endpoint.to_string(),
                subscription_id: sub.subscription_id.clone(),
                connected: sub.connected.load(Ordering::SeqCst),
            })
            .collect();
        statuses.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        statuses
    }

    fn open(&self, endpoint: Url) -> Subscription {
        let subscription_id = subscription_id(&endpoint);
        let connected = Arc::new(AtomicBool::new(false));
        let connection = Connection {
            endpoint: endpoint.clone(),
            label: Arc::from(endpoint.as_str()),
            subscription_id: subscription_id.clone(),
            generation: self.generation.load(Ordering::SeqCst),
            current: self.generation.clone(),
            connected: connected.clone(),
            settings: self.settings.clone(),
            inbound: self.inbound.clone(),
        };
        Subscription {
            endpoint,
            subscription_id,
            connected,
            task: tokio::spawn(connection.run()),
        }
    }
}

impl Drop for SubscriptionMultiplexer {
    fn drop(&mut self) {
        for subscription in self.subscriptions.values() {
            subscription.task.abort();
        }
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, FeedError> {
    let url = Url::parse(raw.trim()).map_err(|source| FeedError::Endpoint {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(FeedError::Scheme(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

struct Connection {
    endpoint: Url,
    label: Arc<str>,
    subscription_id: String,
    generation: u64,
    current: Arc<AtomicU64>,
    connected: Arc<AtomicBool>,
    settings: Arc<SubscriptionSettings>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
}

enum SessionEnd {
    /// The socket closed or failed; try again.
    Dropped,
    /// Reset or consumer gone; stop for good.
    Finished,
}

impl Connection {
    async fn run(self) {
        let request =
            subscription_request(&self.subscription_id, &self.settings.kinds, self.settings.limit);
        let mut backoff = self.settings.backoff_initial;

        while self.is_current() {
            match connect_async(self.endpoint.as_str()).await {
                Ok((stream, _)) => {
                    backoff = self.settings.backoff_initial;
                    self.connected.store(true, Ordering::SeqCst);
                    tracing::info!(endpoint = %self.label, sub = %self.subscription_id, "relay connected");
                    let end = self.session(stream, &request).await;
                    self.connected.store(false, Ordering::SeqCst);
                    if let SessionEnd::Finished = end {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(endpoint = %self.label, error = %err, "relay connection failed");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.settings.backoff_max);
        }
    }

    async fn session<S>(&self, stream: S, request: &str) -> SessionEnd
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
            + Unpin,
    {
        let (mut write, mut read) = stream.split();
        if let Err(err) = write.send(Message::Text(request.to_string())).await {
            tracing::warn!(endpoint = %self.label, error = %err, "subscription request failed");
            return SessionEnd::Dropped;
        }

        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if !self.is_current() {
                        return SessionEnd::Finished;
                    }
                    let message = InboundMessage {
                        generation: self.generation,
                        endpoint: self.label.clone(),
                        text,
                    };
                    if self.inbound.send(message).is_err() {
                        return SessionEnd::Finished;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(endpoint = %self.label, error = %err, "relay receive failed");
                    break;
                }
            }
        }
        tracing::info!(endpoint = %self.label, "relay disconnected");
        SessionEnd::Dropped
    }

    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_must_be_websocket_urls() {
        assert!(parse_endpoint("wss://relay.example.com").is_ok());
        assert!(parse_endpoint(" ws://127.0.0.1:7000/inbox ").is_ok());
        assert!(matches!(
            parse_endpoint("https://relay.example.com"),
            Err(FeedError::Scheme(scheme)) if scheme == "https"
        ));
        assert!(matches!(
            parse_endpoint("not a url"),
            Err(FeedError::Endpoint { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_endpoint_opens_nothing() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mux =
            SubscriptionMultiplexer::new(SubscriptionSettings::default(), Arc::default(), tx);
        assert!(mux
            .fetch(["ws://127.0.0.1:9/a", "ftp://nope"])
            .is_err());
        assert!(mux.statuses().is_empty());
    }

    #[tokio::test]
    async fn fetch_skips_known_endpoints_and_reset_clears() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let settings = SubscriptionSettings {
            backoff_initial: Duration::from_secs(60),
            ..SubscriptionSettings::default()
        };
        let mut mux = SubscriptionMultiplexer::new(settings, Arc::default(), tx);

        // Port 9 (discard) is closed locally; connections just fail and back off.
        assert_eq!(mux.fetch(["ws://127.0.0.1:9/a"]).expect("fetch"), 1);
        assert_eq!(
            mux.fetch(["ws://127.0.0.1:9/a", "ws://127.0.0.1:9/b"]).expect("fetch"),
            1
        );
        let statuses = mux.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].subscription_id.starts_with("viewer-a-"));
        assert!(!statuses[0].connected);

        let before = mux.generation();
        mux.reset();
        assert_eq!(mux.generation(), before + 1);
        assert!(mux.statuses().is_empty());
    }
}
