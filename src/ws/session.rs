//! Session front-end: the command surface callers hold and the signal
//! dispatch between the connection worker and the consumer.
//!
//! One [`Session`] is alive per logical context (game, lobby,
//! tournament, challenge, default presence channel). Creating a new
//! context through the same front-end supersedes the previous physical
//! connection. The per-session error flags live here as instance state,
//! one copy per session, never process-wide.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::domain::events::ServerEvent;
use crate::domain::game_id::GameId;
use crate::error::SyncError;
use crate::ports::{KvStore, Reachability, RestApi};
use crate::ws::messages::{ClientMessage, CreateSession, SendOpts, SessionOptions, SocketEnvelope};
use crate::ws::monitor::{ConnectionMonitor, MonitorEvent};
use crate::ws::worker::{SocketWorker, TransportSignal, WorkerCommand, sleep_until_opt};

/// Ping cadence for low-traffic contexts (lobby, tournament, challenge).
const PING_DELAY_SLOW: Duration = Duration::from_secs(2);

/// Event names every context forwards regardless of its own handlers.
const DEFAULT_EVENTS: &[&str] = &[
    "following_onlines",
    "following_enters",
    "following_leaves",
    "challenges",
    "resync",
];

/// Signals delivered to the session consumer, in server order.
#[derive(Debug)]
pub enum SessionSignal {
    /// Physical connection established.
    Connected,
    /// Physical connection lost.
    Disconnected,
    /// Application-level open (fires on every open; challenge contexts
    /// refresh their data here).
    Opened,
    /// Debounced connection status for cosmetic display.
    StatusChanged(bool),
    /// Persisting disconnect with the network reachable: a proxy or
    /// firewall likely blocks WebSocket traffic. At most once per
    /// installation.
    ProxyFailWarning,
    /// The diagnostic probe confirmed the session is unauthorized.
    AuthError,
    /// Events were missed; the consumer must reload from a snapshot.
    Resync,
    /// A decoded application event.
    Event(ServerEvent),
}

/// Online-followed-users roster maintained from presence events.
///
/// The protocol-level default handlers every context shares: the full
/// list replaces the roster, enter/leave edit it incrementally.
#[derive(Debug, Clone, Default)]
pub struct PresenceRoster {
    online: BTreeSet<String>,
}

impl PresenceRoster {
    /// Replaces the roster with a full presence list. Returns `true`
    /// when the set actually changed.
    pub fn set(&mut self, names: Vec<String>) -> bool {
        let fresh: BTreeSet<String> = names.into_iter().collect();
        let changed = fresh != self.online;
        self.online = fresh;
        changed
    }

    /// A followed user came online.
    pub fn add(&mut self, name: String) {
        self.online.insert(name);
    }

    /// A followed user went offline.
    pub fn remove(&mut self, name: &str) {
        self.online.remove(name);
    }

    /// Current online users, sorted.
    #[must_use]
    pub fn online(&self) -> impl Iterator<Item = &str> {
        self.online.iter().map(String::as_str)
    }

    /// Number of online followed users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.online.len()
    }

    /// `true` when nobody followed is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}

/// Thin command surface over the connection worker.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
}

impl SessionHandle {
    fn command(&self, cmd: WorkerCommand) -> Result<(), SyncError> {
        self.commands.send(cmd).map_err(|_| SyncError::SessionClosed)
    }

    /// Enqueues an outbound application message.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionClosed`] when the worker is gone.
    pub fn send(
        &self,
        t: impl Into<String>,
        d: Option<Value>,
        opts: SendOpts,
    ) -> Result<(), SyncError> {
        let message = match d {
            Some(d) => ClientMessage::with_data(t, d),
            None => ClientMessage::new(t),
        };
        self.command(WorkerCommand::Send {
            message,
            ackable: opts.ackable,
        })
    }

    /// Moves the resume cursor used on the next reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionClosed`] when the worker is gone.
    pub fn set_version(&self, version: u64) -> Result<(), SyncError> {
        self.command(WorkerCommand::SetVersion(version))
    }

    /// Current average round-trip latency. Answers `None` before the
    /// first pong or when the worker is gone; never blocks beyond the
    /// worker's next mailbox turn.
    pub async fn average_lag(&self) -> Option<Duration> {
        let (tx, rx) = oneshot::channel();
        self.command(WorkerCommand::AverageLag(tx)).ok()?;
        rx.await.ok().flatten()
    }

    /// Resumes automatic reconnection after [`SessionHandle::disconnect`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionClosed`] when the worker is gone.
    pub fn connect(&self) -> Result<(), SyncError> {
        self.command(WorkerCommand::Connect)
    }

    /// Closes the socket and pauses reconnection.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionClosed`] when the worker is gone.
    pub fn disconnect(&self) -> Result<(), SyncError> {
        self.command(WorkerCommand::Disconnect)
    }

    /// Closes the socket and releases per-session handler state. The
    /// worker task stays alive for the next context.
    pub fn destroy(&self) {
        let _ = self.command(WorkerCommand::Destroy);
    }

    /// Stops the worker task itself. Only on full shutdown: the
    /// background context is expensive to recreate.
    pub fn terminate(&self) {
        let _ = self.command(WorkerCommand::Terminate);
    }
}

/// Control notes for the dispatch task, sent on every context creation.
#[derive(Debug)]
struct DispatchReset {
    probe_game: Option<GameId>,
}

/// Session front-end owning the worker and dispatch tasks.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    ctl: mpsc::UnboundedSender<DispatchReset>,
    client_id: String,
    endpoint: String,
    cfg: SyncConfig,
    net: Arc<dyn Reachability>,
}

impl Session {
    /// Spawns the connection worker and signal dispatch for one session
    /// slot. Returns the front-end and the consumer's signal stream.
    #[must_use]
    pub fn spawn(
        cfg: SyncConfig,
        endpoint: impl Into<String>,
        rest: Arc<dyn RestApi>,
        net: Arc<dyn Reachability>,
        kv: Arc<dyn KvStore>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionSignal>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();

        tokio::spawn(SocketWorker::new(cmd_rx, sig_tx, cfg.clone()).run());
        let monitor = ConnectionMonitor::new(&cfg, Arc::clone(&net), kv);
        tokio::spawn(dispatch(sig_rx, ctl_rx, out_tx, monitor, rest));

        let session = Self {
            handle: SessionHandle { commands: cmd_tx },
            ctl: ctl_tx,
            client_id: Uuid::new_v4().to_string(),
            endpoint: endpoint.into(),
            cfg,
            net,
        };
        (session, out_rx)
    }

    /// The command surface, cloneable into the consumer.
    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Opens the socket for a game context, registering the full event
    /// catalog; the probe id is fetched after socket errors to
    /// disambiguate an auth rejection from a network blip.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionClosed`] when the worker is gone.
    pub fn create_game(
        &self,
        socket_url: &str,
        version: u64,
        probe: GameId,
        user_tv: Option<String>,
    ) -> Result<(), SyncError> {
        let mut params = HashMap::new();
        if let Some(user) = user_tv {
            params.insert("userTv".to_string(), user);
        }
        let options = SessionOptions {
            name: "game".to_string(),
            debug: false,
            ping_delay: self.cfg.ping_delay,
            send_on_open: Some("following_onlines".to_string()),
            registered_events: ServerEvent::catalog()
                .iter()
                .map(ToString::to_string)
                .collect(),
            ignore_unknown_messages: false,
        };
        self.create(socket_url.to_string(), version, params, options, Some(probe))
    }

    /// Opens the socket for a tournament context.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionClosed`] when the worker is gone.
    pub fn create_tournament(
        &self,
        tournament_id: &str,
        version: u64,
        extra_events: &[&str],
    ) -> Result<(), SyncError> {
        let options = SessionOptions {
            name: "tournament".to_string(),
            ping_delay: PING_DELAY_SLOW,
            send_on_open: Some("following_onlines".to_string()),
            registered_events: merge_events(extra_events),
            ..SessionOptions::default()
        };
        let url = format!("/tournament/{tournament_id}/socket/v1");
        self.create(url, version, HashMap::new(), options, None)
    }

    /// Opens the socket for a challenge context. Unknown event names
    /// are expected here and silently ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionClosed`] when the worker is gone.
    pub fn create_challenge(
        &self,
        challenge_id: &str,
        version: u64,
        extra_events: &[&str],
    ) -> Result<(), SyncError> {
        let options = SessionOptions {
            name: "challenge".to_string(),
            ping_delay: PING_DELAY_SLOW,
            send_on_open: Some("following_onlines".to_string()),
            registered_events: merge_events(extra_events),
            ignore_unknown_messages: true,
            ..SessionOptions::default()
        };
        let url = format!("/challenge/{challenge_id}/socket/v{version}");
        self.create(url, version, HashMap::new(), options, None)
    }

    /// Opens the socket for the lobby context.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionClosed`] when the worker is gone.
    pub fn create_lobby(&self, version: u64, extra_events: &[&str]) -> Result<(), SyncError> {
        let options = SessionOptions {
            name: "lobby".to_string(),
            ping_delay: PING_DELAY_SLOW,
            send_on_open: Some("following_onlines".to_string()),
            registered_events: merge_events(extra_events),
            ..SessionOptions::default()
        };
        self.create("/lobby/socket/v1".to_string(), version, HashMap::new(), options, None)
    }

    /// Opens the default presence channel. A no-op while offline: the
    /// channel is useless without a network and would only spin the
    /// reconnect loop.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::SessionClosed`] when the worker is gone.
    pub fn create_default(&self) -> Result<(), SyncError> {
        if !self.net.has_network() {
            tracing::debug!("skipping default socket while offline");
            return Ok(());
        }
        let options = SessionOptions {
            name: "default".to_string(),
            ping_delay: PING_DELAY_SLOW,
            send_on_open: Some("following_onlines".to_string()),
            registered_events: merge_events(&[]),
            ..SessionOptions::default()
        };
        self.create("/socket".to_string(), 0, HashMap::new(), options, None)
    }

    fn create(
        &self,
        url: String,
        version: u64,
        params: HashMap<String, String>,
        options: SessionOptions,
        probe: Option<GameId>,
    ) -> Result<(), SyncError> {
        // Reset the per-session error flag before the new connection.
        let _ = self.ctl.send(DispatchReset { probe_game: probe });
        self.handle.command(WorkerCommand::Create(Box::new(CreateSession {
            client_id: self.client_id.clone(),
            endpoint: self.endpoint.clone(),
            url,
            version,
            params,
            options,
        })))
    }

    /// Closes the socket and releases per-session handler state.
    pub fn destroy(&self) {
        self.handle.destroy();
    }

    /// Stops the worker task; only on full process shutdown.
    pub fn terminate(&self) {
        self.handle.terminate();
    }
}

fn merge_events(extra: &[&str]) -> Vec<String> {
    let mut events: Vec<String> = DEFAULT_EVENTS.iter().map(ToString::to_string).collect();
    for name in extra {
        if !events.iter().any(|e| e == name) {
            events.push((*name).to_string());
        }
    }
    events
}

/// Decodes an envelope into a catalog event.
pub(crate) fn decode_event(envelope: &SocketEnvelope) -> Result<ServerEvent, SyncError> {
    let mut object = serde_json::Map::new();
    object.insert("t".to_string(), Value::String(envelope.t.clone()));
    if let Some(d) = &envelope.d {
        object.insert("d".to_string(), d.clone());
    }
    serde_json::from_value(Value::Object(object))
        .map_err(|err| SyncError::MalformedEvent(err.to_string()))
}

/// Signal dispatch loop: translates transport signals into consumer
/// signals, runs the connection monitor, and owns the one-shot
/// diagnostic probe after socket errors.
async fn dispatch(
    mut transport: mpsc::UnboundedReceiver<TransportSignal>,
    mut ctl: mpsc::UnboundedReceiver<DispatchReset>,
    out: mpsc::UnboundedSender<SessionSignal>,
    mut monitor: ConnectionMonitor,
    rest: Arc<dyn RestApi>,
) {
    let mut probe_game: Option<GameId> = None;
    let mut error_detected = false;
    let mut ctl_open = true;

    loop {
        tokio::select! {
            reset = ctl.recv(), if ctl_open => {
                match reset {
                    Some(reset) => {
                        probe_game = reset.probe_game;
                        error_detected = false;
                    }
                    None => ctl_open = false,
                }
            }

            sig = transport.recv() => {
                let Some(sig) = sig else { break };
                match sig {
                    TransportSignal::Connected => {
                        if let Some(event) = monitor.on_connected() {
                            forward_monitor(&out, event);
                        }
                        let _ = out.send(SessionSignal::Connected);
                    }
                    TransportSignal::Disconnected => {
                        monitor.on_disconnected(Instant::now());
                        let _ = out.send(SessionSignal::Disconnected);
                    }
                    TransportSignal::Opened => {
                        let _ = out.send(SessionSignal::Opened);
                    }
                    TransportSignal::SocketError => {
                        // The error channel carries no detail; probe the
                        // REST side once per session to tell an auth
                        // rejection from a network blip.
                        if !error_detected {
                            error_detected = true;
                            if let Some(id) = probe_game.clone() {
                                spawn_probe(Arc::clone(&rest), id, out.clone());
                            }
                        }
                    }
                    TransportSignal::Resync => {
                        let _ = out.send(SessionSignal::Resync);
                    }
                    TransportSignal::Handle(envelope) => match decode_event(&envelope) {
                        Ok(event) => {
                            let _ = out.send(SessionSignal::Event(event));
                        }
                        Err(err) => {
                            tracing::debug!(t = %envelope.t, error = %err, "undecodable event");
                        }
                    },
                }
            }

            _ = sleep_until_opt(monitor.next_deadline()), if monitor.next_deadline().is_some() => {
                for event in monitor.fire_due(Instant::now()) {
                    forward_monitor(&out, event);
                }
            }
        }
    }
}

fn forward_monitor(out: &mpsc::UnboundedSender<SessionSignal>, event: MonitorEvent) {
    let signal = match event {
        MonitorEvent::StatusChanged(up) => SessionSignal::StatusChanged(up),
        MonitorEvent::ProxyFailWarning => SessionSignal::ProxyFailWarning,
    };
    let _ = out.send(signal);
}

fn spawn_probe(rest: Arc<dyn RestApi>, id: GameId, out: mpsc::UnboundedSender<SessionSignal>) {
    tokio::spawn(async move {
        match rest.game_snapshot(&id).await {
            Err(SyncError::Unauthorized) => {
                let _ = out.send(SessionSignal::AuthError);
            }
            Ok(_) => {
                // Reachable and authorized: an ordinary blip, the
                // reconnect loop will recover.
            }
            Err(err) => {
                tracing::debug!(error = %err, "diagnostic probe failed");
            }
        }
    });
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::domain::game::GameSnapshot;
    use crate::ports::MiniProfile;

    #[derive(Debug)]
    struct DenyingRest;

    #[async_trait]
    impl RestApi for DenyingRest {
        async fn game_snapshot(&self, _id: &GameId) -> Result<GameSnapshot, SyncError> {
            Err(SyncError::Unauthorized)
        }

        async fn mini_profile(&self, _user_id: &str) -> Result<MiniProfile, SyncError> {
            Err(SyncError::Api("not under test".to_string()))
        }

        async fn toggle_bookmark(&self, _id: &GameId) -> Result<(), SyncError> {
            Err(SyncError::Api("not under test".to_string()))
        }

        async fn refresh_session(&self) -> Result<(), SyncError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct AlwaysOnline;

    impl Reachability for AlwaysOnline {
        fn has_network(&self) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct NullKv;

    impl KvStore for NullKv {
        fn get(&self, _key: &str) -> Option<Value> {
            None
        }

        fn set(&self, _key: &str, _value: Value) {}
    }

    fn spawn_session() -> (Session, mpsc::UnboundedReceiver<SessionSignal>) {
        Session::spawn(
            SyncConfig::default(),
            // Nothing listens here; every connect attempt fails fast.
            "ws://127.0.0.1:9",
            Arc::new(DenyingRest),
            Arc::new(AlwaysOnline),
            Arc::new(NullKv),
        )
    }

    #[test]
    fn decode_presence_event() {
        let envelope = SocketEnvelope {
            t: "following_enters".to_string(),
            d: Some(Value::String("ana".to_string())),
            v: None,
        };
        let Ok(ServerEvent::FollowingEnters(name)) = decode_event(&envelope) else {
            panic!("presence event should decode");
        };
        assert_eq!(name, "ana");
    }

    #[test]
    fn decode_rejects_unknown_name() {
        let envelope = SocketEnvelope {
            t: "mystery".to_string(),
            d: None,
            v: None,
        };
        assert!(decode_event(&envelope).is_err());
    }

    #[test]
    fn roster_tracks_presence() {
        let mut roster = PresenceRoster::default();
        let changed = roster.set(vec!["ana".to_string(), "bo".to_string()]);
        assert!(changed);
        assert!(!roster.set(vec!["bo".to_string(), "ana".to_string()]));
        roster.add("cy".to_string());
        roster.remove("ana");
        let online: Vec<&str> = roster.online().collect();
        assert_eq!(online, vec!["bo", "cy"]);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn merge_events_deduplicates() {
        let events = merge_events(&["move", "challenges"]);
        assert_eq!(
            events.iter().filter(|e| e.as_str() == "challenges").count(),
            1
        );
        assert!(events.iter().any(|e| e == "move"));
    }

    #[tokio::test]
    async fn socket_error_probes_and_reports_auth_failure() {
        let (session, mut signals) = spawn_session();
        let Ok(probe) = GameId::parse("abcd1234") else {
            panic!("valid id");
        };
        let created = session.create_game("/play/abcd1234/v2", 0, probe, None);
        assert!(created.is_ok());

        // The connect failure raises a socket error, the probe comes
        // back 401, and the auth signal surfaces among the reconnect
        // noise.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Ok(signal) = tokio::time::timeout(remaining, signals.recv()).await else {
                panic!("auth error never surfaced");
            };
            match signal {
                Some(SessionSignal::AuthError) => break,
                Some(_) => {}
                None => panic!("signal stream ended early"),
            }
        }
        session.terminate();
    }

    #[tokio::test]
    async fn handle_reports_closed_after_terminate() {
        let (session, _signals) = spawn_session();
        session.terminate();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let result = session.handle().set_version(3);
        assert!(matches!(result, Err(SyncError::SessionClosed)));
    }
}
