//! Multiplexed push subscriptions.
//!
//! One connection task per topic, shared by every subscription on that topic.
//! The task connects, decodes frames, routes each payload to the subscriptions
//! registered for its event kind, and reconnects with exponential backoff.
//! Removing the last subscription of a topic shuts its task down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::connector::{PushConnector, PushStream};
use super::event::{
    ConnectionState, DEFAULT_EVENT_KIND, EventKind, PushEvent, SubscriptionEvent,
    SubscriptionFailure, Topic,
};
use super::sse::SseFrame;
use crate::config::ReconnectConfig;
use crate::error::LinkError;

/// Identifies one subscription for [`SubscriptionManager::unsubscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: String,
    kind: EventKind,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }
}

/// Receives events for one subscription. Dropping it unsubscribes.
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
    cancel: CancellationToken,
    manager: Weak<ManagerInner>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Next event, or `None` once unsubscribed or the manager is gone.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SubscriptionEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.manager.upgrade() {
            inner.remove(&self.handle);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Callback form of a subscription.
pub trait PushHandler: Send + 'static {
    fn on_event(&mut self, event: PushEvent);

    /// Called once when the topic connection gives up reconnecting.
    fn on_failure(&mut self, failure: &SubscriptionFailure) {
        let _ = failure;
    }
}

impl<F> PushHandler for F
where
    F: FnMut(PushEvent) + Send + 'static,
{
    fn on_event(&mut self, event: PushEvent) {
        self(event)
    }
}

#[derive(Clone)]
struct Subscriber {
    kind: EventKind,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
    cancel: CancellationToken,
}

type Subscribers = Arc<RwLock<HashMap<u64, Subscriber>>>;

struct TopicEntry {
    topic: Topic,
    subscribers: Subscribers,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TopicEntry {
    fn new(topic: Topic) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            topic,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    fn needs_start(&self) -> bool {
        self.task.is_none() || *self.state.borrow() == ConnectionState::Failed
    }

    fn start(&mut self, connector: Arc<dyn PushConnector>, config: ReconnectConfig) {
        self.shutdown = CancellationToken::new();
        self.state.send_replace(ConnectionState::Connecting);

        let worker = TopicWorker {
            topic: self.topic.clone(),
            connector,
            config,
            subscribers: Arc::clone(&self.subscribers),
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.clone(),
        };
        self.task = Some(tokio::spawn(worker.run()));
    }

    fn close(self) {
        if self.state.borrow().is_terminal() {
            self.state.send_replace(ConnectionState::Closed);
        } else {
            self.state.send_replace(ConnectionState::Closing);
        }
        self.shutdown.cancel();
        for subscriber in self.subscribers.read().values() {
            subscriber.cancel.cancel();
        }
        debug!(topic = %self.topic, "Topic closed");
    }
}

struct ManagerInner {
    connector: Arc<dyn PushConnector>,
    config: ReconnectConfig,
    topics: Mutex<HashMap<String, TopicEntry>>,
    next_id: AtomicU64,
}

impl ManagerInner {
    fn remove(&self, handle: &SubscriptionHandle) -> bool {
        let mut topics = self.topics.lock();
        let Some(entry) = topics.get(&handle.topic) else {
            return false;
        };

        let (removed, now_empty) = {
            let mut subscribers = entry.subscribers.write();
            let removed = subscribers.remove(&handle.id);
            (removed, subscribers.is_empty())
        };
        let Some(subscriber) = removed else {
            return false;
        };
        subscriber.cancel.cancel();
        debug!(topic = %handle.topic, kind = %handle.kind, id = handle.id, "Unsubscribed");

        if now_empty {
            if let Some(entry) = topics.remove(&handle.topic) {
                entry.close();
            }
        }
        true
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        for (_, entry) in self.topics.get_mut().drain() {
            entry.close();
        }
    }
}

/// Opens one push connection per topic and fans events out to subscriptions.
///
/// Subscribing spawns connection tasks, so it must happen inside a Tokio runtime.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    pub fn new(connector: Arc<dyn PushConnector>, config: ReconnectConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                connector,
                config,
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.inner.config
    }

    /// Register for `kind` events on `topic`.
    ///
    /// Opens the topic connection if this is its first subscription, or
    /// restarts it if the topic had failed.
    pub fn subscribe(&self, topic: &Topic, kind: impl Into<EventKind>) -> Subscription {
        let kind = kind.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut topics = self.inner.topics.lock();
        let entry = topics
            .entry(topic.name().to_string())
            .or_insert_with(|| TopicEntry::new(topic.clone()));
        if entry.topic.path() != topic.path() {
            warn!(
                topic = %topic,
                existing = entry.topic.path(),
                requested = topic.path(),
                "Topic already open on a different path; reusing it"
            );
        }

        // Registration and the restart check share the write lock with the
        // worker's failure fan-out: a subscriber either receives that failure
        // or restarts the topic, never both.
        let registry = Arc::clone(&entry.subscribers);
        let mut subscribers = registry.write();
        subscribers.insert(
            id,
            Subscriber {
                kind: kind.clone(),
                tx,
                cancel: cancel.clone(),
            },
        );
        if entry.needs_start() {
            info!(topic = %entry.topic, "Opening push connection");
            entry.start(Arc::clone(&self.inner.connector), self.inner.config);
        }
        drop(subscribers);
        debug!(topic = %topic, %kind, id, "Subscribed");

        Subscription {
            handle: SubscriptionHandle {
                id,
                topic: topic.name().to_string(),
                kind,
            },
            rx,
            cancel,
            manager: Arc::downgrade(&self.inner),
        }
    }

    /// Register a callback for `kind` events on `topic`.
    ///
    /// An internal task drains the subscription and calls `handler`; after
    /// [`unsubscribe`](Self::unsubscribe) returns the handler is not called again.
    pub fn subscribe_with<H: PushHandler>(
        &self,
        topic: &Topic,
        kind: impl Into<EventKind>,
        mut handler: H,
    ) -> SubscriptionHandle {
        let mut subscription = self.subscribe(topic, kind);
        let handle = subscription.handle();
        let cancel = subscription.cancel.clone();

        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if cancel.is_cancelled() {
                    break;
                }
                match event {
                    SubscriptionEvent::Event(event) => handler.on_event(event),
                    SubscriptionEvent::Failed(failure) => handler.on_failure(&failure),
                }
            }
        });

        handle
    }

    /// Remove a subscription. Closes the topic connection when it was the last one.
    ///
    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.inner.remove(handle)
    }

    /// Current state of a topic connection, `None` when no subscription holds it open.
    pub fn state(&self, topic: &str) -> Option<ConnectionState> {
        let topics = self.inner.topics.lock();
        topics.get(topic).map(|entry| *entry.state.borrow())
    }

    /// Follow the state of a topic connection.
    pub fn watch_state(&self, topic: &str) -> Option<watch::Receiver<ConnectionState>> {
        let topics = self.inner.topics.lock();
        topics.get(topic).map(|entry| entry.state.subscribe())
    }

    pub fn subscription_count(&self, topic: &str) -> usize {
        let topics = self.inner.topics.lock();
        topics
            .get(topic)
            .map_or(0, |entry| entry.subscribers.read().len())
    }

    /// Names of topics with at least one subscription.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.topics.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every subscription and close every connection.
    pub fn close_all(&self) {
        let entries: Vec<TopicEntry> = {
            let mut topics = self.inner.topics.lock();
            topics.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.close();
        }
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("config", &self.inner.config)
            .field("topics", &self.topics())
            .finish()
    }
}

enum PumpExit {
    Shutdown,
    Disconnected(String),
}

/// Connection task for one topic.
struct TopicWorker {
    topic: Topic,
    connector: Arc<dyn PushConnector>,
    config: ReconnectConfig,
    subscribers: Subscribers,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
}

impl TopicWorker {
    #[instrument(skip_all, fields(topic = %self.topic))]
    async fn run(self) {
        let mut attempt: u32 = 0;
        let mut delay = self.config.initial_delay();

        loop {
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                result = self.connector.connect(&self.topic) => result,
            };

            let last_error = match connected {
                Ok(stream) => {
                    info!("Push connection open");
                    attempt = 0;
                    delay = self.config.initial_delay();
                    self.set_state(ConnectionState::Open);

                    match self.pump(stream).await {
                        PumpExit::Shutdown => break,
                        PumpExit::Disconnected(reason) => reason,
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Push connection failed");
                    e.to_string()
                }
            };
            self.set_state(ConnectionState::Disconnected);

            if attempt >= self.config.max_attempts {
                error!(attempts = attempt, "Max reconnect attempts reached");
                self.fail(attempt, last_error);
                return;
            }
            attempt += 1;

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.config.next_delay(delay);
        }

        self.state.send_replace(ConnectionState::Closed);
        debug!("Push connection closed");
    }

    async fn pump(&self, mut stream: PushStream) -> PumpExit {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return PumpExit::Shutdown,
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => self.dispatch(frame),
                    Some(Err(e)) => {
                        warn!(error = %e, "Push stream error");
                        return PumpExit::Disconnected(e.to_string());
                    }
                    None => {
                        warn!("Push stream closed by server");
                        return PumpExit::Disconnected("stream ended".to_string());
                    }
                }
            }
        }
    }

    /// Route one frame to the subscriptions registered for its kind.
    ///
    /// The read lock is held while sending so that a concurrent unsubscribe
    /// either happens before this dispatch or sees it completed.
    fn dispatch(&self, frame: SseFrame) {
        let kind = frame.event.as_deref().unwrap_or(DEFAULT_EVENT_KIND);
        let subscribers = self.subscribers.read();
        let targets: Vec<&Subscriber> = subscribers
            .values()
            .filter(|s| s.kind.as_str() == kind)
            .collect();

        if targets.is_empty() {
            trace!(%kind, "No subscription for event kind");
            return;
        }

        let data = match serde_json::from_str::<serde_json::Value>(&frame.data) {
            Ok(data) => data,
            Err(e) => {
                let err = LinkError::MalformedPayload(e.to_string());
                warn!(%kind, error = %err, "Dropping push message");
                return;
            }
        };

        let event = PushEvent {
            topic: self.topic.name().to_string(),
            kind: EventKind::new(kind),
            data,
            id: frame.id,
        };
        for subscriber in targets {
            if subscriber.cancel.is_cancelled() {
                continue;
            }
            // A closed receiver is cleaned up by its own drop.
            let _ = subscriber.tx.send(SubscriptionEvent::Event(event.clone()));
        }
    }

    fn fail(&self, attempts: u32, reason: String) {
        let failure = SubscriptionFailure {
            topic: self.topic.name().to_string(),
            attempts,
            reason,
        };
        let subscribers = self.subscribers.write();
        self.set_state(ConnectionState::Failed);
        for subscriber in subscribers.values() {
            let _ = subscriber.tx.send(SubscriptionEvent::Failed(failure.clone()));
        }
    }

    /// Once shutdown is requested only the closing states may be written.
    fn set_state(&self, state: ConnectionState) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.state.send_replace(state);
    }
}
