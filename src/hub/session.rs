use std::{fmt::Display, future::Future, time::Duration};

use axum::{
    body::Bytes,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    sync::mpsc,
    time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use crate::{metrics, state::{AppState, HubSettings}};

use super::{
    types::{C2SMessage, Frame, HubError, SessionError, SessionId},
    Hub,
};

pub async fn initial(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let limit = state.hub.settings().max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let (sink, stream) = socket.split();
    run_session(stream, sink, hub).await
}

/// Drives one client connection from handshake to teardown.
///
/// The inbound loop runs on the calling task, the outbound loop on its own
/// task. Teardown happens once, here, after the inbound loop ends or the
/// outbound worker exits, whichever comes first.
pub(crate) async fn run_session<R, E, W>(stream: R, mut sink: W, hub: Hub)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
{
    let session = Uuid::new_v4();
    let settings = hub.settings().clone();
    let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity);

    if let Err(kind) = hub.register(session, queue_tx).await {
        info!(%session, error = %kind, "Can't register session");
        let frame = CloseFrame { code: close_code::AGAIN, reason: "server busy".into() };
        let _ = bounded(settings.write_wait, sink.send(Message::Close(Some(frame)))).await;
        let _ = bounded(settings.write_wait, sink.close()).await;
        return;
    }
    debug!(%session, "Connection is transferred to the session loops");

    let mut writer = tokio::spawn(outbound_worker(session, sink, queue_rx, settings.clone()));

    // A writer that stops (write error, write timeout, closed queue) ends the reader too
    let (outcome, joined) = tokio::select! {
        outcome = inbound_loop(session, stream, &hub, &settings) => (outcome, None),
        joined = &mut writer => (Err(SessionError::WriterStopped), Some(joined)),
    };
    match outcome {
        Ok(()) => info!(%session, "Connection successfully closed!"),
        Err(kind) => info!(%session, error = %kind, "Connection terminated"),
    }

    if let Ok(Some(topics)) = hub.session_topics(session).await {
        debug!(%session, ?topics, "Releasing subscriptions");
    }
    if let Err(kind) = hub.unregister(session).await {
        debug!(%session, error = %kind, "Hub is gone, nothing to unregister");
    }
    let joined = match joined {
        Some(joined) => joined,
        None => writer.await,
    };
    if let Err(kind) = joined {
        warn!(%session, error = %kind, "Outbound worker failed");
    }
}

#[instrument(skip_all, fields(session = %session))]
async fn inbound_loop<R, E>(
    session: SessionId,
    mut stream: R,
    hub: &Hub,
    settings: &HubSettings,
) -> Result<(), SessionError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + settings.pong_wait;
    loop {
        let msg = match timeout_at(deadline, stream.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(kind))) => return Err(SessionError::Transport(kind.to_string())),
            Ok(None) => return Err(SessionError::StreamClosed),
            Err(_) => return Err(SessionError::ReadTimeout(settings.pong_wait)),
        };
        trace!(raw = ?msg);

        match msg {
            Message::Text(text) => {
                check_size(text.len(), settings.max_message_size)?;
                control(session, text.as_str(), hub).await?;
            },
            Message::Pong(_) => {
                deadline = Instant::now() + settings.pong_wait;
            },
            Message::Close(frame) => {
                debug!(frame = ?frame, "Close frame received");
                return Ok(());
            },
            Message::Binary(data) => {
                check_size(data.len(), settings.max_message_size)?;
                debug!(size = data.len(), "Binary frame ignored");
            },
            // Answered by the transport
            Message::Ping(_) => (),
        }
    }
}

fn check_size(size: usize, limit: usize) -> Result<(), SessionError> {
    if size > limit {
        return Err(SessionError::FrameTooLarge(size, limit));
    }
    Ok(())
}

/// Applies one control message. Malformed input is dropped here and never
/// reaches the client as an error.
async fn control(session: SessionId, text: &str, hub: &Hub) -> Result<(), HubError> {
    let message = match C2SMessage::try_from(text) {
        Ok(message) => message,
        Err(kind) => {
            warn!(error = %kind, "Dropping malformed control message");
            metrics::MALFORMED_FRAMES.inc();
            return Ok(());
        },
    };
    debug!(message = message.name());
    match message {
        C2SMessage::Subscribe(topic) => hub.subscribe(session, topic).await,
        C2SMessage::Unsubscribe(topic) => hub.unsubscribe(session, topic).await,
        C2SMessage::Ping => hub.pong(session).await,
    }
}

async fn outbound_worker<W>(session: SessionId, mut sink: W, queue: mpsc::Receiver<Frame>, settings: HubSettings)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match outbound_loop(&mut sink, queue, &settings).await {
        Ok(()) => debug!(%session, "Outbound queue closed"),
        Err(kind) => debug!(%session, error = %kind, "Outbound loop exited"),
    }
    // Closing connection
    if let Err(kind) = bounded(settings.write_wait, sink.close()).await {
        trace!(%session, error = %kind, "Closing fault");
    }
}

async fn outbound_loop<W>(sink: &mut W, mut queue: mpsc::Receiver<Frame>, settings: &HubSettings) -> Result<(), SessionError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let period = settings.ping_period();
    let mut probe = interval_at(Instant::now() + period, period);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = queue.recv() => {
                // None once the hub dropped the queue and it is drained
                let Some(frame) = frame else { return Ok(()) };
                // Everything already queued goes out in the same flush
                let batch = async {
                    sink.feed(Message::Text(frame)).await?;
                    while let Ok(frame) = queue.try_recv() {
                        sink.feed(Message::Text(frame)).await?;
                    }
                    sink.flush().await?;
                    Ok::<_, W::Error>(())
                };
                bounded(settings.write_wait, batch).await?;
            },
            _ = probe.tick() => {
                bounded(settings.write_wait, sink.send(Message::Ping(Bytes::new()))).await?;
            },
        }
    }
}

async fn bounded<F, T, E>(wait: Duration, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match timeout(wait, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(kind)) => Err(SessionError::Transport(kind.to_string())),
        Err(_) => Err(SessionError::WriteTimeout(wait)),
    }
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
    use serde_json::json;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::hub::types::{MessageKind, S2CMessage};

    struct TestClient {
        tx: UnboundedSender<Result<Message, axum::Error>>,
        rx: UnboundedReceiver<Message>,
        task: JoinHandle<()>,
    }

    fn connect(hub: &Hub) -> TestClient {
        let (tx, stream) = unbounded();
        let (sink, rx) = unbounded();
        let task = tokio::spawn(run_session(stream, sink, hub.clone()));
        TestClient { tx, rx, task }
    }

    impl TestClient {
        fn send(&self, text: &str) {
            self.tx.unbounded_send(Ok(Message::Text(text.to_string().into()))).unwrap();
        }

        fn send_raw(&self, msg: Message) {
            self.tx.unbounded_send(Ok(msg)).unwrap();
        }

        /// Next text frame, skipping transport pings.
        async fn recv(&mut self) -> S2CMessage {
            loop {
                match self.rx.next().await.expect("connection closed") {
                    Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                    Message::Ping(_) => continue,
                    other => panic!("unexpected frame {other:?}"),
                }
            }
        }

        async fn subscribe(&mut self, form_id: &str) {
            self.send(&format!(r#"{{"type":"subscribe","formId":"{form_id}"}}"#));
            let msg = self.recv().await;
            assert_eq!(msg.kind, MessageKind::Subscribed);
            assert_eq!(msg.form_id.as_deref(), Some(form_id));
        }

        /// Waits until the session is torn down and the connection closed.
        async fn closed(mut self) {
            self.task.await.unwrap();
            while let Some(msg) = self.rx.next().await {
                assert!(matches!(msg, Message::Ping(_) | Message::Text(_) | Message::Close(_)));
            }
        }
    }

    #[tokio::test]
    async fn event_reaches_only_the_subscribed_client() {
        let (hub, _) = Hub::spawn(HubSettings::default());
        let mut a = connect(&hub);
        let mut b = connect(&hub);
        a.subscribe("F1").await;
        b.subscribe("F2").await;

        hub.broadcast_to_topic("F1", S2CMessage::new_response(json!({"responseId": "r1"}))).await.unwrap();
        hub.broadcast_to_topic("F2", S2CMessage::new_response(json!({"responseId": "r2"}))).await.unwrap();

        let msg = a.recv().await;
        assert_eq!(msg.kind, MessageKind::NewResponse);
        assert_eq!(msg.form_id.as_deref(), Some("F1"));
        assert_eq!(msg.data["responseId"], "r1");

        // B's next frame is its own form's event, nothing from F1 came first
        let msg = b.recv().await;
        assert_eq!(msg.form_id.as_deref(), Some("F2"));
        assert_eq!(msg.data["responseId"], "r2");
    }

    #[tokio::test]
    async fn no_events_after_unsubscribe() {
        let (hub, _) = Hub::spawn(HubSettings::default());
        let mut a = connect(&hub);
        a.subscribe("F1").await;

        a.send(r#"{"type":"unsubscribe","formId":"F1"}"#);
        let msg = a.recv().await;
        assert_eq!(msg.kind, MessageKind::Unsubscribed);
        assert_eq!(msg.form_id.as_deref(), Some("F1"));

        hub.broadcast_to_topic("F1", S2CMessage::new_response(json!({}))).await.unwrap();
        a.send(r#"{"type":"ping"}"#);
        assert_eq!(a.recv().await.kind, MessageKind::Pong);
    }

    #[tokio::test]
    async fn malformed_frames_keep_the_session_alive() {
        let (hub, _) = Hub::spawn(HubSettings::default());
        let mut a = connect(&hub);

        a.send("definitely not json");
        a.send(r#"{"type":"dance"}"#);
        a.send(r#"{"type":"subscribe"}"#);
        a.send_raw(Message::Binary(Bytes::from_static(b"\x00\x01")));
        a.send(r#"{"type":"ping"}"#);

        let msg = a.recv().await;
        assert_eq!(msg.kind, MessageKind::Pong);
        assert_eq!(msg.form_id, None);
        assert_eq!(hub.connected_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn oversized_frame_terminates_the_session() {
        let (hub, _) = Hub::spawn(HubSettings::default());
        let mut a = connect(&hub);
        a.subscribe("F1").await;

        a.send(&format!(r#"{{"type":"ping","pad":"{}"}}"#, "x".repeat(600)));
        a.closed().await;

        assert_eq!(hub.connected_count().await.unwrap(), 0);
        assert_eq!(hub.subscriber_count("F1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn client_close_tears_down_memberships() {
        let (hub, _) = Hub::spawn(HubSettings::default());
        let mut a = connect(&hub);
        let mut b = connect(&hub);
        a.subscribe("F1").await;
        a.subscribe("F2").await;
        b.subscribe("F2").await;

        a.send_raw(Message::Close(None));
        a.closed().await;

        assert_eq!(hub.connected_count().await.unwrap(), 1);
        assert_eq!(hub.subscriber_count("F1").await.unwrap(), 0);
        assert_eq!(hub.subscriber_count("F2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transport_error_tears_down() {
        let (hub, _) = Hub::spawn(HubSettings::default());
        let mut a = connect(&hub);
        a.subscribe("F1").await;

        a.tx.unbounded_send(Err(axum::Error::new("connection reset"))).unwrap();
        a.closed().await;
        assert_eq!(hub.subscriber_count("F1").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_is_dropped_after_read_deadline() {
        let (hub, _) = Hub::spawn(HubSettings::default());
        let mut a = connect(&hub);
        a.subscribe("F1").await;
        a.subscribe("F2").await;

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(hub.subscriber_count("F1").await.unwrap(), 1);

        // The client half stays open: no close, no error, just silence
        tokio::time::sleep(Duration::from_secs(2)).await;
        a.closed().await;

        assert_eq!(hub.connected_count().await.unwrap(), 0);
        assert_eq!(hub.subscriber_count("F1").await.unwrap(), 0);
        assert_eq!(hub.subscriber_count("F2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_failure_tears_down_at_once() {
        let (hub, _) = Hub::spawn(HubSettings::default());
        let mut a = connect(&hub);
        a.subscribe("F1").await;

        // The client half stays open for reading, but nothing can be written to it
        let TestClient { tx: _tx, rx, task } = a;
        drop(rx);
        hub.broadcast_to_topic("F1", S2CMessage::new_response(json!({}))).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session outlived its writer")
            .unwrap();
        assert_eq!(hub.connected_count().await.unwrap(), 0);
        assert_eq!(hub.subscriber_count("F1").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_extends_the_read_deadline() {
        // Keep the hub heartbeat out of the way of the transport ping
        let settings = HubSettings { heartbeat: Duration::from_secs(3600), ..Default::default() };
        let (hub, _) = Hub::spawn(settings);
        let mut a = connect(&hub);
        a.subscribe("F1").await;

        // The probe goes out at 9/10 of the deadline
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(a.rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(a.rx.next().await, Some(Message::Ping(_))));

        a.send_raw(Message::Pong(Bytes::new()));
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(hub.subscriber_count("F1").await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(hub.subscriber_count("F1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refused_registration_closes_with_try_again() {
        let settings = HubSettings { max_sessions: Some(1), ..Default::default() };
        let (hub, _) = Hub::spawn(settings);
        let mut a = connect(&hub);
        a.subscribe("F1").await;

        let mut b = connect(&hub);
        match b.rx.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::AGAIN),
            other => panic!("expected close frame, got {other:?}"),
        }
        b.task.await.unwrap();
        assert_eq!(hub.connected_count().await.unwrap(), 1);
    }
}
