use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::{mpsc::{self, error::TrySendError}, oneshot},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{metrics, state::HubSettings};

use super::{
    topics::TopicIndex,
    types::{Frame, HubError, S2CMessage, SessionId},
};

/// Operations accepted by the dispatcher loop, processed strictly in arrival order.
#[derive(Debug)]
enum Command {
    Register {
        session: SessionId,
        queue: mpsc::Sender<Frame>,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister(SessionId),
    Subscribe(SessionId, String),
    Unsubscribe(SessionId, String),
    Pong(SessionId),
    BroadcastToTopic(String, S2CMessage),
    BroadcastToAll(S2CMessage),
    ConnectedCount(oneshot::Sender<usize>),
    SubscriberCount(String, oneshot::Sender<usize>),
    SessionTopics(SessionId, oneshot::Sender<Option<Vec<String>>>),
}

/// Cloneable handle to the dispatcher. Holding one never gives access to
/// dispatcher state, only the ability to submit operations.
#[derive(Debug, Clone)]
pub struct Hub {
    tx: mpsc::Sender<Command>,
    settings: Arc<HubSettings>,
}

impl Hub {
    /// Starts the dispatcher loop. It runs until every `Hub` handle is dropped.
    pub fn spawn(settings: HubSettings) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.inbox_capacity);
        let settings = Arc::new(settings);
        let dispatcher = Dispatcher {
            rx,
            settings: Arc::clone(&settings),
            registry: HashMap::new(),
            index: TopicIndex::new(),
        };
        let handle = tokio::spawn(dispatcher.run());
        (Self { tx, settings }, handle)
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    async fn submit(&self, command: Command) -> Result<(), HubError> {
        self.tx.send(command).await.map_err(|_| HubError::Closed)
    }

    async fn ask<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(command(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Adds a session to the registry. The hub becomes the only producer of
    /// `queue`; dropping its sender is what closes the session's queue.
    pub async fn register(&self, session: SessionId, queue: mpsc::Sender<Frame>) -> Result<(), HubError> {
        self.ask(|reply| Command::Register { session, queue, reply }).await?
    }

    pub async fn unregister(&self, session: SessionId) -> Result<(), HubError> {
        self.submit(Command::Unregister(session)).await
    }

    pub async fn subscribe(&self, session: SessionId, topic: impl Into<String>) -> Result<(), HubError> {
        self.submit(Command::Subscribe(session, topic.into())).await
    }

    pub async fn unsubscribe(&self, session: SessionId, topic: impl Into<String>) -> Result<(), HubError> {
        self.submit(Command::Unsubscribe(session, topic.into())).await
    }

    /// Answers a client-level ping with a `pong` on the session's own queue.
    pub async fn pong(&self, session: SessionId) -> Result<(), HubError> {
        self.submit(Command::Pong(session)).await
    }

    /// Fans `message` out to the current subscribers of `topic`. The message is
    /// stamped with the topic as its `formId`.
    pub async fn broadcast_to_topic(&self, topic: impl Into<String>, message: S2CMessage) -> Result<(), HubError> {
        self.submit(Command::BroadcastToTopic(topic.into(), message)).await
    }

    pub async fn broadcast_to_all(&self, message: S2CMessage) -> Result<(), HubError> {
        self.submit(Command::BroadcastToAll(message)).await
    }

    pub async fn connected_count(&self) -> Result<usize, HubError> {
        self.ask(Command::ConnectedCount).await
    }

    pub async fn subscriber_count(&self, topic: impl Into<String>) -> Result<usize, HubError> {
        let topic = topic.into();
        self.ask(|reply| Command::SubscriberCount(topic, reply)).await
    }

    /// Topics held by a session, `None` when the session is not registered.
    pub async fn session_topics(&self, session: SessionId) -> Result<Option<Vec<String>>, HubError> {
        self.ask(|reply| Command::SessionTopics(session, reply)).await
    }
}

/// Sole owner of the registry and the topic index.
struct Dispatcher {
    rx: mpsc::Receiver<Command>,
    settings: Arc<HubSettings>,
    registry: HashMap<SessionId, mpsc::Sender<Frame>>,
    index: TopicIndex,
}

impl Dispatcher {
    async fn run(mut self) {
        let period = self.settings.heartbeat;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(heartbeat = ?period, "Hub dispatcher started");
        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                },
                _ = heartbeat.tick() => {
                    self.broadcast_to_all(S2CMessage::heartbeat());
                },
            }
        }

        // Dropping the registry closes every outbound queue
        info!(sessions = self.registry.len(), "Hub dispatcher stopped");
    }

    fn handle(&mut self, command: Command) {
        trace!(command = ?command);
        match command {
            Command::Register { session, queue, reply } => {
                let _ = reply.send(self.register(session, queue));
            },
            Command::Unregister(session) => self.unregister(session),
            Command::Subscribe(session, topic) => self.subscribe(session, topic),
            Command::Unsubscribe(session, topic) => self.unsubscribe(session, topic),
            Command::Pong(session) => {
                if let Some(frame) = encode(&S2CMessage::pong()) {
                    self.deliver([session], frame);
                }
            },
            Command::BroadcastToTopic(topic, message) => self.broadcast_to_topic(topic, message),
            Command::BroadcastToAll(message) => self.broadcast_to_all(message),
            Command::ConnectedCount(reply) => {
                let _ = reply.send(self.registry.len());
            },
            Command::SubscriberCount(topic, reply) => {
                let _ = reply.send(self.index.subscriber_count(&topic));
            },
            Command::SessionTopics(session, reply) => {
                let topics = self.registry.contains_key(&session).then(|| self.index.topics_of(session));
                let _ = reply.send(topics);
            },
        }
    }

    fn register(&mut self, session: SessionId, queue: mpsc::Sender<Frame>) -> Result<(), HubError> {
        if let Some(limit) = self.settings.max_sessions {
            if self.registry.len() >= limit {
                warn!(%session, limit, "Session limit reached, refusing registration");
                return Err(HubError::SessionLimit(limit));
            }
        }
        self.registry.insert(session, queue);
        info!(%session, total = self.registry.len(), "Session registered");
        Ok(())
    }

    /// The single teardown path: registry entry, topic memberships and the
    /// outbound queue all go together.
    fn unregister(&mut self, session: SessionId) {
        if self.registry.remove(&session).is_none() {
            return;
        }
        let released = self.index.remove_session(session);
        info!(
            %session,
            released = released.len(),
            total = self.registry.len(),
            topics = self.index.topic_count(),
            "Session unregistered"
        );
    }

    fn subscribe(&mut self, session: SessionId, topic: String) {
        if !self.registry.contains_key(&session) {
            debug!(%session, form_id = %topic, "Subscribe from unregistered session ignored");
            return;
        }
        if let Some(limit) = self.settings.max_topics_per_session {
            if !self.index.is_subscribed(session, &topic) && self.index.topic_count_of(session) >= limit {
                warn!(%session, form_id = %topic, limit, "Topic limit reached, subscribe dropped");
                return;
            }
        }
        self.index.subscribe(session, &topic);
        debug!(%session, form_id = %topic, subscribers = self.index.subscriber_count(&topic), "Subscribed");
        if let Some(frame) = encode(&S2CMessage::subscribed(&topic)) {
            self.deliver([session], frame);
        }
    }

    fn unsubscribe(&mut self, session: SessionId, topic: String) {
        if !self.registry.contains_key(&session) {
            return;
        }
        self.index.unsubscribe(session, &topic);
        debug!(%session, form_id = %topic, subscribers = self.index.subscriber_count(&topic), "Unsubscribed");
        if let Some(frame) = encode(&S2CMessage::unsubscribed(&topic)) {
            self.deliver([session], frame);
        }
    }

    #[instrument(skip_all, fields(form_id = %topic, kind = message.kind.name()))]
    fn broadcast_to_topic(&mut self, topic: String, message: S2CMessage) {
        metrics::BROADCASTS.with_label_values(&[message.kind.name()]).inc();
        let subscribers = self.index.subscribers(&topic);
        if subscribers.is_empty() {
            trace!("No subscribers, nothing to do");
            return;
        }
        let Some(frame) = encode(&message.with_form(&topic)) else { return };
        debug!(recipients = subscribers.len(), "Broadcasting to topic");
        self.deliver(subscribers, frame);
    }

    fn broadcast_to_all(&mut self, message: S2CMessage) {
        metrics::BROADCASTS.with_label_values(&[message.kind.name()]).inc();
        let Some(frame) = encode(&message) else { return };
        let sessions: Vec<SessionId> = self.registry.keys().copied().collect();
        trace!(kind = message.kind.name(), recipients = sessions.len(), "Broadcasting to all");
        self.deliver(sessions, frame);
    }

    /// Non-blocking fan-out. A session whose queue can't take the frame is
    /// evicted instead of being waited on.
    fn deliver(&mut self, sessions: impl IntoIterator<Item = SessionId>, frame: Frame) {
        let mut evicted = Vec::new();
        for session in sessions {
            let Some(queue) = self.registry.get(&session) else { continue };
            match queue.try_send(frame.clone()) {
                Ok(()) => (),
                Err(TrySendError::Full(_)) => {
                    warn!(%session, "Outbound queue is full, evicting slow session");
                    metrics::EVICTIONS.inc();
                    evicted.push(session);
                },
                Err(TrySendError::Closed(_)) => {
                    debug!(%session, "Outbound queue already closed");
                    evicted.push(session);
                },
            }
        }
        for session in evicted {
            self.unregister(session);
        }
    }
}

fn encode(message: &S2CMessage) -> Option<Frame> {
    message
        .to_frame()
        .inspect_err(|kind| error!(error = %kind, kind = message.kind.name(), "Can't serialize message"))
        .ok()
}
