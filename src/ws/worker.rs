//! Background connection actor.
//!
//! One worker task owns the physical WebSocket for a session. It
//! connects, pings, reconnects with capped backoff, filters inbound
//! events through the version gate, and replays unacknowledged sends
//! after every reopen. Callers talk to it exclusively through the
//! command mailbox; it reports back on the signal channel. Network
//! stalls therefore never block the caller's thread.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::SyncConfig;
use crate::ws::lag::LagMeter;
use crate::ws::messages::{ClientMessage, CreateSession, SessionState, SocketEnvelope};
use crate::ws::version::{VersionCheck, VersionGate};

/// Handshake ceiling for one connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands accepted by the worker mailbox.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    /// Supersede any existing connection with a new session.
    Create(Box<CreateSession>),
    /// Enqueue an outbound application message.
    Send {
        /// The message to deliver.
        message: ClientMessage,
        /// Buffer and replay until the server acknowledges.
        ackable: bool,
    },
    /// Move the resume cursor without touching the connection.
    SetVersion(u64),
    /// Answer the current average round-trip latency.
    AverageLag(oneshot::Sender<Option<Duration>>),
    /// Resume automatic reconnection after an explicit disconnect.
    Connect,
    /// Close the socket and pause reconnection.
    Disconnect,
    /// Close the socket and forget the session.
    Destroy,
    /// Stop the worker task entirely (process shutdown).
    Terminate,
}

/// Signals the worker emits toward the session front-end.
#[derive(Debug)]
pub(crate) enum TransportSignal {
    /// Physical connection established.
    Connected,
    /// Physical connection lost or refused.
    Disconnected,
    /// Application-level open notification (fires on every open).
    Opened,
    /// The physical layer reported an error; carries no detail by
    /// design of the transport.
    SocketError,
    /// The version gate detected a missed-event window.
    Resync,
    /// An application message addressed to a registered event name.
    Handle(SocketEnvelope),
}

/// Sleeps until the deadline, or forever when there is none.
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => futures_util::future::pending().await,
    }
}

/// Per-session state the worker keeps between reconnects.
#[derive(Debug)]
struct SessionContext {
    create: CreateSession,
    gate: VersionGate,
    lag: LagMeter,
    /// Unacknowledged ackable messages, replayed on every reopen.
    ack_buffer: Vec<(u64, ClientMessage)>,
    next_ack_id: u64,
    backoff: Duration,
}

impl SessionContext {
    fn new(create: CreateSession, base_backoff: Duration) -> Self {
        let gate = VersionGate::new(create.version);
        Self {
            create,
            gate,
            lag: LagMeter::default(),
            ack_buffer: Vec::new(),
            next_ack_id: 1,
            backoff: base_backoff,
        }
    }
}

/// The connection actor. Constructed by the session layer, consumed by
/// [`SocketWorker::run`] on a spawned task.
#[derive(Debug)]
pub(crate) struct SocketWorker {
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    signals: mpsc::UnboundedSender<TransportSignal>,
    cfg: SyncConfig,
}

impl SocketWorker {
    pub(crate) fn new(
        commands: mpsc::UnboundedReceiver<WorkerCommand>,
        signals: mpsc::UnboundedSender<TransportSignal>,
        cfg: SyncConfig,
    ) -> Self {
        Self {
            commands,
            signals,
            cfg,
        }
    }

    /// Runs the actor until terminated or the command channel closes.
    pub(crate) async fn run(mut self) {
        let mut state = SessionState::Idle;
        let mut ctx: Option<SessionContext> = None;
        let mut conn: Option<WsStream> = None;
        let mut retry_at: Option<Instant> = None;
        let mut next_ping_at: Option<Instant> = None;
        let mut ping_sent_at: Option<Instant> = None;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        WorkerCommand::Create(create) => {
                            close_quietly(&mut conn).await;
                            tracing::debug!(name = %create.options.name, "session created");
                            ctx = Some(SessionContext::new(*create, self.cfg.reconnect_base));
                            state = transition(state, SessionState::Connecting);
                            retry_at = Some(Instant::now());
                            next_ping_at = None;
                            ping_sent_at = None;
                        }
                        WorkerCommand::Send { mut message, ackable } => {
                            if let Some(ctx) = ctx.as_mut() {
                                if ackable {
                                    let id = ctx.next_ack_id;
                                    ctx.next_ack_id = ctx.next_ack_id.saturating_add(1);
                                    message.tag_ack(id);
                                    ctx.ack_buffer.push((id, message.clone()));
                                }
                                match conn.as_mut() {
                                    Some(ws) => send_message(ws, &message).await,
                                    None if ackable => {
                                        tracing::debug!(t = %message.t, "buffered until reconnect");
                                    }
                                    None => {
                                        tracing::debug!(t = %message.t, "dropped while closed");
                                    }
                                }
                            }
                        }
                        WorkerCommand::SetVersion(v) => {
                            if let Some(ctx) = ctx.as_mut() {
                                ctx.gate.set(v);
                            }
                        }
                        WorkerCommand::AverageLag(reply) => {
                            let lag = ctx.as_ref().and_then(|c| c.lag.average());
                            let _ = reply.send(lag);
                        }
                        WorkerCommand::Connect => {
                            if ctx.is_some() && conn.is_none() && retry_at.is_none() {
                                state = transition(state, SessionState::Connecting);
                                retry_at = Some(Instant::now());
                            }
                        }
                        WorkerCommand::Disconnect => {
                            close_quietly(&mut conn).await;
                            state = transition(state, SessionState::Closed);
                            retry_at = None;
                            next_ping_at = None;
                            ping_sent_at = None;
                            let _ = self.signals.send(TransportSignal::Disconnected);
                        }
                        WorkerCommand::Destroy => {
                            close_quietly(&mut conn).await;
                            state = transition(state, SessionState::Closed);
                            ctx = None;
                            retry_at = None;
                            next_ping_at = None;
                            ping_sent_at = None;
                        }
                        WorkerCommand::Terminate => break,
                    }
                }

                _ = sleep_until_opt(retry_at), if retry_at.is_some() && conn.is_none() => {
                    retry_at = None;
                    let Some(ctx) = ctx.as_mut() else { continue };
                    let url = ctx.create.connect_url(ctx.gate.current());
                    match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
                        Ok(Ok((ws, _response))) => {
                            tracing::debug!(name = %ctx.create.options.name, "socket open");
                            conn = Some(ws);
                            state = transition(state, SessionState::Open);
                            ctx.backoff = self.cfg.reconnect_base;
                            let _ = self.signals.send(TransportSignal::Connected);
                            let _ = self.signals.send(TransportSignal::Opened);
                            if let Some(ws) = conn.as_mut() {
                                if let Some(name) = ctx.create.options.send_on_open.clone() {
                                    send_message(ws, &ClientMessage::new(name)).await;
                                }
                                for (_, message) in ctx.ack_buffer.clone() {
                                    send_message(ws, &message).await;
                                }
                            }
                            next_ping_at = Some(Instant::now() + ctx.create.options.ping_delay);
                            ping_sent_at = None;
                        }
                        Ok(Err(err)) => {
                            tracing::debug!(error = %err, "connect failed");
                            state = transition(state, SessionState::Degraded);
                            let _ = self.signals.send(TransportSignal::SocketError);
                            let _ = self.signals.send(TransportSignal::Disconnected);
                            retry_at = Some(Instant::now() + ctx.backoff);
                            ctx.backoff = (ctx.backoff * 2).min(self.cfg.reconnect_max);
                        }
                        Err(_elapsed) => {
                            tracing::debug!("connect timed out");
                            state = transition(state, SessionState::Degraded);
                            let _ = self.signals.send(TransportSignal::SocketError);
                            let _ = self.signals.send(TransportSignal::Disconnected);
                            retry_at = Some(Instant::now() + ctx.backoff);
                            ctx.backoff = (ctx.backoff * 2).min(self.cfg.reconnect_max);
                        }
                    }
                }

                msg = next_frame(&mut conn), if conn.is_some() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(ctx) = ctx.as_mut() {
                                self.handle_text(ctx, text.as_str(), &mut ping_sent_at);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            conn = None;
                            state = transition(state, SessionState::Degraded);
                            next_ping_at = None;
                            ping_sent_at = None;
                            let _ = self.signals.send(TransportSignal::Disconnected);
                            if let Some(ctx) = ctx.as_mut() {
                                retry_at = Some(Instant::now() + ctx.backoff);
                                ctx.backoff = (ctx.backoff * 2).min(self.cfg.reconnect_max);
                            }
                        }
                        Some(Err(err)) => {
                            tracing::debug!(error = %err, "socket error");
                            conn = None;
                            state = transition(state, SessionState::Degraded);
                            next_ping_at = None;
                            ping_sent_at = None;
                            let _ = self.signals.send(TransportSignal::SocketError);
                            let _ = self.signals.send(TransportSignal::Disconnected);
                            if let Some(ctx) = ctx.as_mut() {
                                retry_at = Some(Instant::now() + ctx.backoff);
                                ctx.backoff = (ctx.backoff * 2).min(self.cfg.reconnect_max);
                            }
                        }
                        Some(Ok(_)) => {}
                    }
                }

                _ = sleep_until_opt(next_ping_at), if next_ping_at.is_some() && conn.is_some() => {
                    let Some(ctx_ref) = ctx.as_ref() else { continue };
                    let ping_delay = ctx_ref.create.options.ping_delay;
                    let now = Instant::now();
                    let stale = ping_sent_at
                        .is_some_and(|sent| now.duration_since(sent) >= ping_delay * 2);
                    if stale {
                        // The server stopped answering pings: treat the
                        // connection as dead and re-enter the reconnect loop.
                        tracing::debug!("pong overdue, recycling connection");
                        close_quietly(&mut conn).await;
                        state = transition(state, SessionState::Degraded);
                        next_ping_at = None;
                        ping_sent_at = None;
                        let _ = self.signals.send(TransportSignal::Disconnected);
                        if let Some(ctx) = ctx.as_mut() {
                            retry_at = Some(now + ctx.backoff);
                            ctx.backoff = (ctx.backoff * 2).min(self.cfg.reconnect_max);
                        }
                    } else {
                        if ping_sent_at.is_none() {
                            if let Some(ws) = conn.as_mut() {
                                send_message(ws, &ClientMessage::new("p")).await;
                                ping_sent_at = Some(now);
                            }
                        }
                        next_ping_at = Some(now + ping_delay);
                    }
                }
            }
        }

        close_quietly(&mut conn).await;
    }

    /// Decodes one inbound text frame and routes it.
    fn handle_text(
        &self,
        ctx: &mut SessionContext,
        raw: &str,
        ping_sent_at: &mut Option<Instant>,
    ) {
        let envelope: SocketEnvelope = match serde_json::from_str(raw) {
            Ok(env) => env,
            Err(err) => {
                tracing::debug!(error = %err, "unparseable frame");
                return;
            }
        };
        if ctx.create.options.debug {
            tracing::debug!(t = %envelope.t, v = ?envelope.v, "frame");
        }

        // Liveness pong, consumed here.
        if envelope.t == "n" {
            if let Some(sent) = ping_sent_at.take() {
                ctx.lag.record(Instant::now().duration_since(sent));
            }
            return;
        }

        // Server acknowledgement discharges the resend buffer.
        if envelope.t == "ack" {
            if let Some(id) = envelope.d.as_ref().and_then(serde_json::Value::as_u64) {
                ctx.ack_buffer.retain(|(buffered, _)| *buffered != id);
            }
        }

        match ctx.gate.admit(envelope.v) {
            VersionCheck::Duplicate => {
                tracing::debug!(t = %envelope.t, v = ?envelope.v, "duplicate event dropped");
            }
            VersionCheck::Gap { expected, got } => {
                tracing::warn!(expected, got, "event gap, requesting resync");
                let _ = self.signals.send(TransportSignal::Resync);
            }
            VersionCheck::Unversioned | VersionCheck::Accept => {
                let registered = ctx
                    .create
                    .options
                    .registered_events
                    .iter()
                    .any(|name| name == &envelope.t);
                if registered {
                    let _ = self.signals.send(TransportSignal::Handle(envelope));
                } else if !ctx.create.options.ignore_unknown_messages {
                    tracing::debug!(t = %envelope.t, "unregistered event dropped");
                }
            }
        }
    }
}

/// Sends one message, logging rather than failing on transport errors;
/// the read side will notice the broken connection and reconnect.
async fn send_message(ws: &mut WsStream, message: &ClientMessage) {
    match serde_json::to_string(message) {
        Ok(json) => {
            if let Err(err) = ws.send(Message::text(json)).await {
                tracing::debug!(error = %err, t = %message.t, "send failed");
            }
        }
        Err(err) => tracing::warn!(error = %err, t = %message.t, "unserializable message"),
    }
}

/// Records a lifecycle transition.
fn transition(from: SessionState, to: SessionState) -> SessionState {
    if from != to {
        tracing::debug!(?from, ?to, "session state");
    }
    to
}

/// Closes and drops the connection without surfacing errors.
async fn close_quietly(conn: &mut Option<WsStream>) {
    if let Some(mut ws) = conn.take() {
        let _ = ws.close(None).await;
    }
}

/// Next frame of the active connection; pends forever when closed.
async fn next_frame(
    conn: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match conn.as_mut() {
        Some(ws) => ws.next().await,
        None => futures_util::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use tokio::net::TcpListener;
    use tokio_test::assert_ok;
    use tokio_tungstenite::accept_async;

    use super::*;
    use crate::ws::messages::SessionOptions;

    fn test_create(endpoint: String, registered: &[&str]) -> CreateSession {
        CreateSession {
            client_id: "test-sri".to_string(),
            endpoint,
            url: "/play/abcd1234/v2".to_string(),
            version: 0,
            params: HashMap::new(),
            options: SessionOptions {
                name: "game".to_string(),
                registered_events: registered.iter().map(ToString::to_string).collect(),
                ..SessionOptions::default()
            },
        }
    }

    async fn recv_signal(
        rx: &mut mpsc::UnboundedReceiver<TransportSignal>,
    ) -> Option<TransportSignal> {
        timeout(Duration::from_secs(5), rx.recv()).await.ok()?
    }

    #[tokio::test]
    async fn connects_dispatches_and_detects_gaps() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("round_sync=debug")
            .try_init();
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("local addr");
        };

        // Scripted server: three versioned events, then pong service.
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = accept_async(stream).await else {
                return;
            };
            let frames = [
                r#"{"t":"crowd","d":{"white":true,"black":true,"watchers":3},"v":1}"#,
                r#"{"t":"crowd","d":{"white":true,"black":true,"watchers":3},"v":1}"#,
                r#"{"t":"crowd","d":{"white":true,"black":false,"watchers":4},"v":4}"#,
            ];
            for frame in frames {
                if ws.send(Message::text(frame.to_string())).await.is_err() {
                    return;
                }
            }
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    if text.as_str().contains("\"t\":\"p\"")
                        && ws.send(Message::text(r#"{"t":"n"}"#.to_string())).await.is_err()
                    {
                        return;
                    }
                }
            }
        });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sig_tx, mut sig_rx) = mpsc::unbounded_channel();
        tokio::spawn(SocketWorker::new(cmd_rx, sig_tx, SyncConfig::default()).run());

        let create = test_create(format!("ws://{addr}"), &["crowd"]);
        tokio_test::assert_ok!(cmd_tx.send(WorkerCommand::Create(Box::new(create))));

        let Some(TransportSignal::Connected) = recv_signal(&mut sig_rx).await else {
            panic!("expected connected signal");
        };
        let Some(TransportSignal::Opened) = recv_signal(&mut sig_rx).await else {
            panic!("expected opened signal");
        };
        // v=1 accepted, the duplicate dropped, v=4 is a gap.
        let Some(TransportSignal::Handle(env)) = recv_signal(&mut sig_rx).await else {
            panic!("expected dispatched event");
        };
        assert_eq!(env.t, "crowd");
        assert_eq!(env.v, Some(1));
        let Some(TransportSignal::Resync) = recv_signal(&mut sig_rx).await else {
            panic!("expected resync after gap");
        };

        // Lag query before any pong answers None or a value; it must
        // answer either way without blocking.
        let (lag_tx, lag_rx) = oneshot::channel();
        tokio_test::assert_ok!(cmd_tx.send(WorkerCommand::AverageLag(lag_tx)));
        let Ok(answer) = timeout(Duration::from_secs(5), lag_rx).await else {
            panic!("lag query must answer");
        };
        assert!(answer.is_ok());

        tokio_test::assert_ok!(cmd_tx.send(WorkerCommand::Terminate));
    }

    #[tokio::test]
    async fn connect_failure_emits_error_and_disconnect() {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sig_tx, mut sig_rx) = mpsc::unbounded_channel();
        tokio::spawn(SocketWorker::new(cmd_rx, sig_tx, SyncConfig::default()).run());

        // Nothing listens on this port.
        let create = test_create("ws://127.0.0.1:9".to_string(), &["crowd"]);
        let sent = cmd_tx.send(WorkerCommand::Create(Box::new(create)));
        assert!(sent.is_ok());

        let Some(TransportSignal::SocketError) = recv_signal(&mut sig_rx).await else {
            panic!("expected socket error");
        };
        let Some(TransportSignal::Disconnected) = recv_signal(&mut sig_rx).await else {
            panic!("expected disconnected");
        };

        let sent = cmd_tx.send(WorkerCommand::Terminate);
        assert!(sent.is_ok());
    }
}
