//! Live tail transport.
//!
//! A session is a supervised task that connects to the push channel, forwards
//! every decoded event in receipt order and reconnects whenever the channel
//! closes on its own. Only [`TailTransport::close`] stops it. Each session has
//! its own id so the consumer can tell a live session's messages from those of
//! a session it already closed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::event::{LogEvent, decode_event};

const STREAM_PATH: &str = "/ajax/tail-log/stream";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("stream error: {0}")]
    Protocol(String),
    #[error("undecodable event: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether the connection this error came from is finished.
    fn ends_connection(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

pub type FeedStream = BoxStream<'static, Result<LogEvent, TransportError>>;

/// Opens one connection of the push channel.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<FeedStream, TransportError>> + Send;
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    /// Derives the stream endpoint from the server URL, `http` → `ws` and `https` → `wss`.
    pub fn from_server(server: &Url) -> Result<Self, url::ParseError> {
        let mut url = server.join(STREAM_PATH)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        if url.set_scheme(scheme).is_err() {
            return Err(url::ParseError::InvalidDomainCharacter);
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    async fn connect(&self) -> Result<FeedStream, TransportError> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let stream = socket.filter_map(|message| {
            futures_util::future::ready(match message {
                Ok(Message::Text(text)) => Some(
                    decode_event(text.as_str()).map_err(|err| TransportError::Decode(err.to_string())),
                ),
                Ok(_) => None,
                Err(err) => Some(Err(TransportError::Protocol(err.to_string()))),
            })
        });
        Ok(stream.boxed())
    }
}

/// How long to wait before reconnecting after a session's connection drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Reconnect straight away, forever. Under a persistently failing server
    /// this hammers it; `Backoff` exists for that case.
    #[default]
    Immediate,
    Backoff { initial: Duration, max: Duration },
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (0-based, reset after a successful open).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Backoff { initial, max } => {
                let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    State(SessionState),
    Event(LogEvent),
    Error(TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub session: SessionId,
    pub event: TransportEvent,
}

struct ActiveSession {
    id: SessionId,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

/// Owns at most one live session at a time.
pub struct TailTransport<C> {
    connector: Arc<C>,
    policy: ReconnectPolicy,
    tx: UnboundedSender<TransportMessage>,
    active: Option<ActiveSession>,
    next_id: u64,
}

impl<C: Connector> TailTransport<C> {
    pub fn new(connector: C, policy: ReconnectPolicy, tx: UnboundedSender<TransportMessage>) -> Self {
        Self {
            connector: Arc::new(connector),
            policy,
            tx,
            active: None,
            next_id: 1,
        }
    }

    /// Starts a session. Does nothing if one is already running.
    pub fn open(&mut self) -> Option<SessionId> {
        if self.active.is_some() {
            return None;
        }
        let id = SessionId(self.next_id);
        self.next_id += 1;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            Arc::clone(&self.connector),
            self.policy,
            id,
            self.tx.clone(),
            cancel.clone(),
        ));
        info!(session = id.0, "tail session started");
        self.active = Some(ActiveSession {
            id,
            cancel,
            _task: task,
        });
        Some(id)
    }
}

impl<C> TailTransport<C> {
    /// Stops the current session without letting it reconnect.
    pub fn close(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.cancel.cancel();
        info!(session = active.id.0, "tail session closed");
        true
    }

    pub fn session(&self) -> Option<SessionId> {
        self.active.as_ref().map(|active| active.id)
    }
}

impl<C> Drop for TailTransport<C> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn supervise<C: Connector>(
    connector: Arc<C>,
    policy: ReconnectPolicy,
    session: SessionId,
    tx: UnboundedSender<TransportMessage>,
    cancel: CancellationToken,
) {
    let emit = |event: TransportEvent| tx.send(TransportMessage { session, event }).is_ok();
    let mut attempt: u32 = 0;

    loop {
        if !emit(TransportEvent::State(SessionState::Connecting)) {
            return;
        }
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = connector.connect() => result,
        };

        match connected {
            Ok(mut stream) => {
                attempt = 0;
                if !emit(TransportEvent::State(SessionState::Open)) {
                    return;
                }
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        item = stream.next() => item,
                    };
                    match next {
                        Some(Ok(event)) => {
                            if !emit(TransportEvent::Event(event)) {
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(session = session.0, error = %err, "tail stream error");
                            let fatal = err.ends_connection();
                            if !emit(TransportEvent::Error(err)) {
                                return;
                            }
                            if fatal {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                warn!(session = session.0, "tail stream closed, reopening");
            }
            Err(err) => {
                warn!(session = session.0, error = %err, "tail connect failed");
                if !emit(TransportEvent::Error(err)) {
                    return;
                }
            }
        }

        if !emit(TransportEvent::State(SessionState::Closed)) {
            return;
        }
        let delay = policy.delay(attempt);
        attempt = attempt.saturating_add(1);
        debug!(session = session.0, attempt, ?delay, "reconnecting");
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return;
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::sync::mpsc;

    use super::testing::{ScriptedConnector, event};
    use super::*;

    async fn next_events(
        rx: &mut mpsc::UnboundedReceiver<TransportMessage>,
        count: usize,
    ) -> Vec<TransportEvent> {
        let mut seen = Vec::new();
        let mut events = 0;
        while events < count {
            let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("transport delivered in time")
                .expect("channel open");
            if matches!(message.event, TransportEvent::Event(_)) {
                events += 1;
            }
            seen.push(message.event);
        }
        seen
    }

    fn only_events(seen: &[TransportEvent]) -> Vec<String> {
        seen.iter()
            .filter_map(|event| match event {
                TransportEvent::Event(event) => Some(event.time.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(10), Duration::from_secs(1));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(1));
        assert_eq!(ReconnectPolicy::Immediate.delay(7), Duration::ZERO);
    }

    #[test]
    fn stream_url_follows_server_scheme() {
        let plain = Url::parse("http://proxy.lan:8080/").expect("static url");
        assert_eq!(
            WsConnector::from_server(&plain).expect("joins").url().as_str(),
            "ws://proxy.lan:8080/ajax/tail-log/stream"
        );
        let secure = Url::parse("https://proxy.lan/").expect("static url");
        assert_eq!(
            WsConnector::from_server(&secure).expect("joins").url().scheme(),
            "wss"
        );
    }

    #[tokio::test]
    async fn delivers_events_in_receipt_order() {
        let connector = ScriptedConnector::default().connection(vec![
            Ok(event("10:00", "GET", "a.com")),
            Ok(event("10:01", "CONNECT", "b.com")),
            Ok(event("10:02", "GET", "c.com")),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = TailTransport::new(connector, ReconnectPolicy::Immediate, tx);
        transport.open();
        let seen = next_events(&mut rx, 3).await;
        assert_eq!(only_events(&seen), vec!["10:00", "10:01", "10:02"]);
        assert_eq!(seen[0], TransportEvent::State(SessionState::Connecting));
        assert_eq!(seen[1], TransportEvent::State(SessionState::Open));
    }

    #[tokio::test]
    async fn unexpected_close_reconnects() {
        let connector = ScriptedConnector::default()
            .connection(vec![Ok(event("10:00", "GET", "a.com"))])
            .refusal(TransportError::Connect("refused".to_string()))
            .connection(vec![Ok(event("10:05", "GET", "a.com"))]);
        let connects = connector.counter();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = TailTransport::new(connector, ReconnectPolicy::Immediate, tx);
        transport.open();
        let seen = next_events(&mut rx, 2).await;
        assert_eq!(only_events(&seen), vec!["10:00", "10:05"]);
        assert!(seen.contains(&TransportEvent::Error(TransportError::Connect(
            "refused".to_string()
        ))));
        assert!(connects.load(Ordering::SeqCst) >= 3);
        assert_eq!(transport.session(), Some(SessionId(1)));
    }

    #[tokio::test]
    async fn decode_errors_do_not_end_the_connection() {
        let connector = ScriptedConnector::default().connection(vec![
            Err(TransportError::Decode("bad json".to_string())),
            Ok(event("10:00", "GET", "a.com")),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = TailTransport::new(connector, ReconnectPolicy::Immediate, tx);
        transport.open();
        let seen = next_events(&mut rx, 1).await;
        assert_eq!(
            seen,
            vec![
                TransportEvent::State(SessionState::Connecting),
                TransportEvent::State(SessionState::Open),
                TransportEvent::Error(TransportError::Decode("bad json".to_string())),
                TransportEvent::Event(event("10:00", "GET", "a.com")),
            ]
        );
    }

    #[tokio::test]
    async fn close_suppresses_reconnect() {
        let connector = ScriptedConnector::default();
        let connects = connector.counter();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = TailTransport::new(connector, ReconnectPolicy::Immediate, tx);
        transport.open();
        while let Some(message) = rx.recv().await {
            if message.event == TransportEvent::State(SessionState::Open) {
                break;
            }
        }
        assert!(transport.close());
        assert!(!transport.close());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(transport.session(), None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn open_twice_keeps_one_session() {
        let connector = ScriptedConnector::default();
        let connects = connector.counter();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = TailTransport::new(connector, ReconnectPolicy::Immediate, tx);
        let first = transport.open();
        assert!(first.is_some());
        assert_eq!(transport.open(), None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        transport.close();
        let second = transport.open();
        assert!(second.is_some());
        assert_ne!(first, second);
    }
}
