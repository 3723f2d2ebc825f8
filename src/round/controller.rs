//! The round controller: one game's reconciliation state machine.
//!
//! Owns the timeline, the view cursor, the clock, and the pending-move
//! buffer, and reconciles inbound server events with local optimistic
//! actions. Runs as an actor: the `run` loop selects over session
//! signals, user actions, the clock cadence, and an internal deferred
//! queue, and every branch mutates state fully before yielding, so
//! server events can never interleave half-applied with a user move.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SyncConfig;
use crate::domain::events::{ChallengeNotice, MoveEvent, ServerEvent};
use crate::domain::game::{
    Color, GameData, GameSnapshot, Role, parse_possible_moves,
};
use crate::domain::square::Square;
use crate::domain::step::{Step, Timeline};
use crate::error::SyncError;
use crate::ports::{
    BackStack, BoardUpdate, BoardView, Feedback, KvStore, MiniProfile, MovableState, MoveMeta,
    PieceEdit, Reachability, RestApi, Translator,
};
use crate::round::atomic;
use crate::round::clock::GameClock;
use crate::ws::messages::SendOpts;
use crate::ws::session::{PresenceRoster, Session, SessionSignal};
use crate::ws::worker::sleep_until_opt;

/// Which participant a profile request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The local participant (or the observed side when spectating).
    Player,
    /// The other side.
    Opponent,
}

/// User intents delivered to the controller's mailbox.
#[derive(Debug, Clone)]
pub enum UserAction {
    /// A move was dragged or tapped on the board.
    Move {
        /// Origin square.
        from: Square,
        /// Destination square.
        to: Square,
        /// Promotion role, when the move promotes.
        promotion: Option<Role>,
    },
    /// Jump the view cursor to a ply.
    Jump(u32),
    /// One ply forward.
    JumpNext,
    /// One ply back.
    JumpPrev,
    /// To the first recorded ply.
    JumpFirst,
    /// To the live ply.
    JumpLast,
    /// Toggle board orientation.
    Flip,
    /// Confirm (`true`) or discard (`false`) the pending move.
    SubmitMove(bool),
    /// Discard the pending move and snap back to the committed
    /// position (back gesture).
    CancelMove,
    /// Toggle the bookmark flag, then resynchronize.
    ToggleBookmark,
    /// Toggle a participant's mini profile.
    ToggleProfile(Side),
    /// Tear the controller down.
    Destroy,
}

/// Why the `run` loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Ordinary teardown (user action or channel closed).
    Destroyed,
    /// The diagnostic probe confirmed an authorization failure; the
    /// shell must leave the game context.
    Unauthorized,
}

/// Outbound move command payload.
#[derive(Debug, Clone, Serialize)]
pub struct MoveCommand {
    /// Origin square.
    pub from: Square,
    /// Destination square.
    pub to: Square,
    /// Promotion role, when promoting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion: Option<Role>,
    /// Measured client latency in milliseconds, for server-side lag
    /// compensation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lag: Option<u64>,
}

/// Collaborator bundle the controller works against.
#[derive(Debug, Clone)]
pub struct RoundDeps {
    /// One-shot REST calls.
    pub rest: std::sync::Arc<dyn RestApi>,
    /// Network reachability query.
    pub net: std::sync::Arc<dyn Reachability>,
    /// Persistent key-value store.
    pub kv: std::sync::Arc<dyn KvStore>,
    /// Localized text lookup.
    pub translator: std::sync::Arc<dyn Translator>,
    /// Sounds, vibration, toasts.
    pub feedback: std::sync::Arc<dyn Feedback>,
    /// The board widget.
    pub board: std::sync::Arc<dyn BoardView>,
    /// Back-gesture registration.
    pub back_stack: std::sync::Arc<dyn BackStack>,
}

/// Actions deferred onto the controller's own deadline queue, fired on
/// the controller thread so they serialize with event handling.
#[derive(Debug, Clone)]
enum Deferred {
    /// Record the pending move after the board animation settles.
    RecordPendingMove(MoveCommand),
    /// Execute the registered premove after captures resolve.
    PlayPremove,
}

/// View-model: what the screen shows, as opposed to what is true.
#[derive(Debug, Clone, Default)]
struct ViewModel {
    ply: u32,
    flip: bool,
    move_to_submit: Option<MoveCommand>,
    profile_player: Option<MiniProfile>,
    profile_opponent: Option<MiniProfile>,
}

/// Offline snapshot persisted for correspondence games.
#[derive(Serialize)]
struct OfflineSnapshot<'a> {
    data: &'a GameData,
    timeline: &'a Timeline,
    saved_at: chrono::DateTime<chrono::Utc>,
}

/// One game's reconciliation state machine. See the module docs.
#[derive(Debug)]
pub struct RoundController {
    cfg: SyncConfig,
    data: GameData,
    timeline: Timeline,
    vm: ViewModel,
    clock: Option<GameClock>,
    session: Session,
    deps: RoundDeps,
    roster: PresenceRoster,
    challenges: Vec<ChallengeNotice>,
    watchers: u32,
    deferred: Vec<(Instant, Deferred)>,
    last_outoftime_claim: Option<Instant>,
    back_token: Option<u64>,
    title: String,
    user_tv: Option<String>,
    connected: bool,
    destroyed: bool,
}

impl RoundController {
    /// Builds the controller from an initial snapshot and opens the
    /// game session on the snapshot's socket URL and version.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`SyncError`] when the snapshot is malformed, or
    /// [`SyncError::SessionClosed`] when the session worker is gone.
    pub fn new(
        cfg: SyncConfig,
        snapshot: GameSnapshot,
        session: Session,
        deps: RoundDeps,
        user_tv: Option<String>,
    ) -> Result<Self, SyncError> {
        let data = GameData::from_snapshot(&snapshot)?;
        let timeline = Timeline::new(snapshot.steps)?;
        let clock = GameClock::from_snapshot(
            data.game.speed,
            data.clock.as_ref(),
            data.correspondence.as_ref(),
        );
        let mut controller = Self {
            cfg,
            vm: ViewModel {
                ply: timeline.last_ply(),
                ..ViewModel::default()
            },
            data,
            timeline,
            clock,
            session,
            deps,
            roster: PresenceRoster::default(),
            challenges: Vec::new(),
            watchers: 0,
            deferred: Vec::new(),
            last_outoftime_claim: None,
            back_token: None,
            title: String::new(),
            user_tv,
            connected: false,
            destroyed: false,
        };
        controller.set_title();
        controller.connect_socket()?;
        Ok(controller)
    }

    /// Runs the actor until destroyed or fatally rejected. Always tears
    /// the controller down before returning.
    pub async fn run(
        mut self,
        mut signals: mpsc::UnboundedReceiver<SessionSignal>,
        mut actions: mpsc::UnboundedReceiver<UserAction>,
        mut seek_canceled: broadcast::Receiver<()>,
    ) -> ExitReason {
        let cadence = self
            .clock
            .as_ref()
            .map_or(Duration::from_secs(1), |c| c.cadence(&self.cfg));
        let mut tick = tokio::time::interval(cadence);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut seek_open = true;

        let reason = loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        if let Some(exit) = self.handle_signal(signal).await {
                            break exit;
                        }
                    }
                    None => break ExitReason::Destroyed,
                },

                action = actions.recv() => match action {
                    Some(UserAction::Destroy) | None => break ExitReason::Destroyed,
                    Some(action) => self.handle_action(action).await,
                },

                _ = tick.tick() => self.clock_tick(),

                _ = sleep_until_opt(self.next_deadline()), if self.next_deadline().is_some() => {
                    self.fire_due_actions(Instant::now());
                }

                result = seek_canceled.recv(), if seek_open => match result {
                    // A canceled seek drops the shared socket; reopen ours.
                    Ok(()) => self.reconnect_socket(),
                    Err(broadcast::error::RecvError::Lagged(_)) => self.reconnect_socket(),
                    Err(broadcast::error::RecvError::Closed) => seek_open = false,
                },
            }
        };

        self.destroy();
        reason
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Ply of the first recorded step.
    #[must_use]
    pub fn first_ply(&self) -> u32 {
        self.timeline.first_ply()
    }

    /// Ply of the last recorded step.
    #[must_use]
    pub fn last_ply(&self) -> u32 {
        self.timeline.last_ply()
    }

    /// The ply currently displayed.
    #[must_use]
    pub const fn ply(&self) -> u32 {
        self.vm.ply
    }

    /// `true` while a historical ply is displayed.
    #[must_use]
    pub fn replaying(&self) -> bool {
        self.vm.ply != self.last_ply()
    }

    /// The recorded timeline.
    #[must_use]
    pub const fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Current per-game state.
    #[must_use]
    pub const fn data(&self) -> &GameData {
        &self.data
    }

    /// The pending move awaiting confirmation, if any.
    #[must_use]
    pub const fn pending_move(&self) -> Option<&MoveCommand> {
        self.vm.move_to_submit.as_ref()
    }

    /// Derived screen title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Online followed users.
    #[must_use]
    pub const fn roster(&self) -> &PresenceRoster {
        &self.roster
    }

    /// Current spectator count.
    #[must_use]
    pub const fn watchers(&self) -> u32 {
        self.watchers
    }

    /// Pending challenges delivered on this session.
    #[must_use]
    pub fn challenges(&self) -> &[ChallengeNotice] {
        &self.challenges
    }

    /// Undebounced transport connectivity, as last signaled.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Board orientation for the current flip state.
    #[must_use]
    pub const fn orientation(&self) -> Color {
        if self.vm.flip {
            self.data.player.color.opposite()
        } else {
            self.data.player.color
        }
    }

    // ── Signal and action dispatch ──────────────────────────────────

    async fn handle_signal(&mut self, signal: SessionSignal) -> Option<ExitReason> {
        match signal {
            SessionSignal::Connected => self.connected = true,
            SessionSignal::Disconnected => self.connected = false,
            SessionSignal::Opened => {}
            SessionSignal::StatusChanged(up) => {
                tracing::debug!(connected = up, "connection status settled");
            }
            SessionSignal::ProxyFailWarning => {
                let message = self.deps.translator.translate("proxyFailWarning", &[]);
                self.deps.feedback.toast(&message);
            }
            SessionSignal::AuthError => {
                let message = self.deps.translator.translate("unauthorizedError", &[]);
                self.deps.feedback.toast(&message);
                return Some(ExitReason::Unauthorized);
            }
            SessionSignal::Resync => self.reload_from_server().await,
            SessionSignal::Event(event) => self.handle_event(event).await,
        }
        None
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::FollowingOnlines(names) => {
                self.roster.set(names);
            }
            ServerEvent::FollowingEnters(name) => self.roster.add(name),
            ServerEvent::FollowingLeaves(name) => self.roster.remove(&name),
            ServerEvent::Challenges(list) => self.challenges = list,
            ServerEvent::Move(event) => {
                if let Err(err) = self.api_move(&event).await {
                    // A missing step cannot be recovered in place.
                    tracing::warn!(error = %err, "move application failed, reloading");
                    if err.is_fatal() {
                        self.reload_from_server().await;
                    }
                }
            }
            ServerEvent::End(winner) => {
                tracing::info!(winner = ?winner, "game ended");
                self.reload_from_server().await;
            }
            ServerEvent::Crowd(crowd) => {
                self.data.set_on_game(Color::White, crowd.white);
                self.data.set_on_game(Color::Black, crowd.black);
                self.watchers = crowd.watchers;
            }
            ServerEvent::Clock(clock) => {
                if let Some(attached) = &mut self.clock {
                    attached.update(clock.white, clock.black);
                }
            }
            ServerEvent::Ack(id) => tracing::debug!(id, "server ack"),
            ServerEvent::Resync => self.reload_from_server().await,
        }
    }

    async fn handle_action(&mut self, action: UserAction) {
        match action {
            UserAction::Move {
                from,
                to,
                promotion,
            } => self.send_move(from, to, promotion).await,
            UserAction::Jump(ply) => {
                self.jump(ply);
            }
            UserAction::JumpNext => {
                self.jump(self.vm.ply.saturating_add(1));
            }
            UserAction::JumpPrev => {
                self.jump(self.vm.ply.saturating_sub(1));
            }
            UserAction::JumpFirst => {
                self.jump(self.first_ply());
            }
            UserAction::JumpLast => {
                self.jump(self.last_ply());
            }
            UserAction::Flip => self.flip(),
            UserAction::SubmitMove(confirmed) => self.submit_move(confirmed),
            UserAction::CancelMove => self.cancel_move(),
            UserAction::ToggleBookmark => self.toggle_bookmark().await,
            UserAction::ToggleProfile(side) => self.toggle_profile(side).await,
            UserAction::Destroy => self.destroy(),
        }
    }

    // ── Move submission ─────────────────────────────────────────────

    /// Builds and routes a locally-initiated move: immediately sent, or
    /// parked for confirmation when the submit-move preference is on.
    async fn send_move(&mut self, from: Square, to: Square, promotion: Option<Role>) {
        let lag = self.session.handle().average_lag().await;
        let command = MoveCommand {
            from,
            to,
            promotion,
            lag: self
                .clock
                .as_ref()
                .and_then(|_| lag.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))),
        };

        if self.data.pref.submit_move {
            // Parked only after the board animation settles, so the
            // confirmation dialog does not preempt the piece slide.
            let at = Instant::now() + Duration::from_millis(self.data.pref.animation_duration);
            self.deferred.push((at, Deferred::RecordPendingMove(command)));
        } else {
            self.dispatch_move(command);
        }
    }

    /// Sends a move command with acknowledgement semantics.
    fn dispatch_move(&mut self, command: MoveCommand) {
        match serde_json::to_value(&command) {
            Ok(payload) => {
                if let Err(err) = self
                    .session
                    .handle()
                    .send("move", Some(payload), SendOpts::ackable())
                {
                    tracing::warn!(error = %err, "move send failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "unserializable move"),
        }
        // Offline correspondence play assumes eventual delivery; the
        // user is told, the move stays queued.
        if self.data.game.speed.is_correspondence() && !self.deps.net.has_network() {
            let message = self.deps.translator.translate("moveQueuedOffline", &[]);
            self.deps.feedback.toast(&message);
        }
    }

    /// Confirms or discards the pending move. Exactly one of
    /// send-or-cancel happens; the pending slot is empty afterwards
    /// either way.
    fn submit_move(&mut self, confirmed: bool) {
        if confirmed {
            if let Some(command) = self.vm.move_to_submit.take() {
                self.pop_back_entry();
                self.dispatch_move(command);
            }
        } else {
            self.cancel_move();
        }
    }

    /// Discards the pending move (and any not-yet-recorded one) and
    /// snaps the board back to the committed position.
    fn cancel_move(&mut self) {
        self.pop_back_entry();
        self.vm.move_to_submit = None;
        self.deferred
            .retain(|(_, action)| !matches!(action, Deferred::RecordPendingMove(_)));
        self.jump(self.vm.ply);
    }

    fn pop_back_entry(&mut self) {
        if let Some(token) = self.back_token.take() {
            self.deps.back_stack.pop(token);
        }
    }

    // ── Inbound move reconciliation ─────────────────────────────────

    /// Applies one server move event: game state, board side effects
    /// (suppressed while replaying), clock, and the unconditional
    /// timeline append.
    async fn api_move(&mut self, event: &MoveEvent) -> Result<(), SyncError> {
        self.data.game.turns = event.ply;
        self.data.game.player = Color::to_move_at(event.ply);
        let played_color = Color::played_at(event.ply);
        if let Some(status) = event.status {
            self.data.game.status = status;
        }

        // A newly raised draw offer notifies exactly once, on the
        // false→true edge; a re-sent true is silent.
        let prev_w = self.data.side(Color::White).offering_draw;
        let prev_b = self.data.side(Color::Black).offering_draw;
        if !prev_w && event.w_draw {
            self.deps.feedback.draw_offered();
        }
        if !prev_b && event.b_draw {
            self.deps.feedback.draw_offered();
        }
        self.data.side_mut(Color::White).offering_draw = event.w_draw;
        self.data.side_mut(Color::Black).offering_draw = event.b_draw;

        // Only the local player ever sees destinations.
        self.data.possible_moves = if self.data.player.color == self.data.game.player {
            event
                .dests
                .as_ref()
                .map(|raw| parse_possible_moves(raw))
                .transpose()?
        } else {
            None
        };
        self.set_title();

        if !self.replaying() {
            self.vm.ply = self.vm.ply.saturating_add(1);
            self.apply_board_effects(event, played_color);
        }

        if let Some(clock) = &event.clock {
            if let Some(attached) = &mut self.clock {
                attached.update(clock.white, clock.black);
            }
        }

        self.data.game.threefold = event.threefold;

        // The timeline records the truth regardless of what the screen
        // shows.
        self.timeline.append(Step {
            ply: event.ply,
            fen: event.fen.clone(),
            san: Some(event.san.clone()),
            uci: Some(event.uci),
            check: event.check,
        })?;

        self.data.set_on_game(played_color, true);

        if self.data.game.speed.is_correspondence() {
            if let Err(err) = self.deps.rest.refresh_session().await {
                tracing::debug!(error = %err, "session refresh failed");
            }
            self.persist_offline_snapshot();
        }
        Ok(())
    }

    /// Board-level side effects of a live (non-replay) move.
    fn apply_board_effects(&mut self, event: &MoveEvent, played_color: Color) {
        let mut edits: Vec<PieceEdit> = Vec::new();

        if let Some(enpassant) = &event.enpassant {
            if self.data.game.variant.is_atomic() {
                for square in atomic::explosion_squares(enpassant.key) {
                    edits.push(PieceEdit {
                        square,
                        piece: None,
                    });
                }
                self.deps.feedback.explosion();
            } else {
                edits.push(PieceEdit {
                    square: enpassant.key,
                    piece: None,
                });
                self.deps.feedback.capture();
            }
        }

        if let Some(castle) = &event.castle {
            if !self.deps.board.auto_castles() {
                edits.push(PieceEdit {
                    square: castle.king[0],
                    piece: None,
                });
                edits.push(PieceEdit {
                    square: castle.rook[0],
                    piece: None,
                });
                edits.push(PieceEdit {
                    square: castle.king[1],
                    piece: Some((castle.color, Role::King)),
                });
                edits.push(PieceEdit {
                    square: castle.rook[1],
                    piece: Some((castle.color, Role::Rook)),
                });
            }
        }

        let dests = if self.data.is_player_playing() {
            self.data.possible_moves.clone().unwrap_or_default()
        } else {
            HashMap::new()
        };
        self.deps.board.apply_move(
            event.uci.from,
            event.uci.to,
            &edits,
            MoveMeta {
                turn_color: self.data.game.player,
                dests,
                check: event.check,
            },
        );

        if let Some(promotion) = &event.promotion {
            self.deps.board.promote(promotion.key, promotion.piece_class);
        }

        // Deferred captures (explosions) and an immediate premove would
        // race on the widget; the premove waits for the dust to settle.
        if played_color != self.data.player.color && self.deps.board.has_premove() {
            let delay = self
                .cfg
                .premove_delay_for(self.data.game.variant.is_atomic());
            self.deferred
                .push((Instant::now() + delay, Deferred::PlayPremove));
        }
    }

    // ── Replay navigation ───────────────────────────────────────────

    /// Moves the view cursor, re-rendering the board. Fails (returns
    /// `false`) outside the recorded range; never mutates the timeline.
    pub fn jump(&mut self, ply: u32) -> bool {
        if ply < self.first_ply() || ply > self.last_ply() {
            return false;
        }
        let is_forward = ply > self.vm.ply;
        self.vm.ply = ply;
        self.render_current(None);
        if self.replaying() {
            self.deps.board.stop();
        }
        if is_forward {
            if let Some(san) = self
                .timeline
                .step_at(ply)
                .and_then(|step| step.san.as_deref())
            {
                if san.contains('x') {
                    self.deps.feedback.capture();
                } else {
                    self.deps.feedback.move_played();
                }
            }
        }
        true
    }

    /// Pushes the step at the view cursor to the board.
    fn render_current(&self, orientation: Option<Color>) {
        let Some(step) = self.timeline.step_at(self.vm.ply) else {
            return;
        };
        let movable = if self.vm.ply == self.timeline.last_ply() {
            Some(MovableState {
                color: self
                    .data
                    .is_player_playing()
                    .then_some(self.data.player.color),
                dests: self.data.possible_moves.clone().unwrap_or_default(),
            })
        } else {
            None
        };
        self.deps.board.set(BoardUpdate {
            fen: step.fen.clone(),
            last_move: step.uci.map(|uci| (uci.from, uci.to)),
            check: step.check,
            turn_color: Color::to_move_at(self.vm.ply),
            movable,
            orientation,
        });
    }

    fn flip(&mut self) {
        self.vm.flip = !self.vm.flip;
        self.render_current(Some(self.orientation()));
    }

    // ── Clock ───────────────────────────────────────────────────────

    fn is_clock_running(&self) -> bool {
        let Some(clock) = &self.clock else {
            return false;
        };
        if !self.data.game.status.is_playable() {
            return false;
        }
        match clock {
            GameClock::Live(live) => {
                self.data.game.turns.saturating_sub(self.data.game.started_at_turn) > 1
                    || live.is_running()
            }
            GameClock::Correspondence(_) => true,
        }
    }

    /// One cadence tick: decrement the side to move, claim the flag
    /// when the local player's opponent-visible time hits zero.
    fn clock_tick(&mut self) {
        if !self.is_clock_running() {
            return;
        }
        let turn = self.data.game.player;
        let dt = self
            .clock
            .as_ref()
            .map_or(Duration::ZERO, |c| c.cadence(&self.cfg));
        if let Some(clock) = &mut self.clock {
            clock.tick(turn, dt);
        }
        let flagged = self.clock.as_ref().is_some_and(|c| c.flagged(turn));
        if flagged && !self.data.player.spectator && self.should_claim_outoftime(Instant::now()) {
            if let Err(err) = self.session.handle().send("outoftime", None, SendOpts::default()) {
                tracing::debug!(error = %err, "outoftime send failed");
            }
        }
    }

    /// Rate-limits out-of-time claims.
    fn should_claim_outoftime(&mut self, now: Instant) -> bool {
        let due = self
            .last_outoftime_claim
            .is_none_or(|at| now.duration_since(at) >= self.cfg.outoftime_throttle);
        if due {
            self.last_outoftime_claim = Some(now);
        }
        due
    }

    // ── Reload / resynchronization ──────────────────────────────────

    /// Rebuilds state wholesale from a fresh snapshot. The resync path
    /// after reconnects, backgrounding, and any suspected
    /// missed-message window.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`SyncError`] when the fresh snapshot itself is
    /// malformed.
    pub fn reload(&mut self, mut fresh: GameSnapshot) -> Result<(), SyncError> {
        // A diverged history invalidates the stale cursor.
        let fresh_hash: String = fresh
            .steps
            .iter()
            .filter_map(|step| step.san.as_deref())
            .collect();
        if fresh_hash != self.timeline.moves_hash() {
            if let Some(last) = fresh.steps.last() {
                self.vm.ply = last.ply;
            }
        }

        // The snapshot omits context metadata; carry it forward.
        if fresh.tv.is_none() {
            fresh.tv = self.data.tv.clone();
        }
        if fresh.tournament.is_none() {
            fresh.tournament = self.data.tournament.clone();
        }

        let data = GameData::from_snapshot(&fresh)?;
        self.timeline.replace(fresh.steps)?;
        self.data = data;
        self.vm.ply = self
            .vm
            .ply
            .clamp(self.timeline.first_ply(), self.timeline.last_ply());
        self.clock = GameClock::from_snapshot(
            self.data.game.speed,
            self.data.clock.as_ref(),
            self.data.correspondence.as_ref(),
        );
        if let Err(err) = self.session.handle().set_version(self.data.player.version) {
            tracing::debug!(error = %err, "version update failed");
        }
        self.set_title();
        if !self.replaying() {
            self.render_current(Some(self.orientation()));
        }
        Ok(())
    }

    /// Fetches a fresh snapshot and funnels it into [`Self::reload`].
    pub async fn reload_from_server(&mut self) {
        match self.deps.rest.game_snapshot(&self.data.game.id).await {
            Ok(snapshot) => {
                if let Err(err) = self.reload(snapshot) {
                    tracing::warn!(error = %err, "reload failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "snapshot fetch failed"),
        }
    }

    // ── Auxiliary actions ───────────────────────────────────────────

    async fn toggle_bookmark(&mut self) {
        let id = self.data.game.id.clone();
        match self.deps.rest.toggle_bookmark(&id).await {
            Ok(()) => self.reload_from_server().await,
            Err(err) => tracing::debug!(error = %err, "bookmark toggle failed"),
        }
    }

    async fn toggle_profile(&mut self, side: Side) {
        let (user_id, cached) = match side {
            Side::Player => (
                self.data.player.user_id.clone(),
                self.vm.profile_player.is_some(),
            ),
            Side::Opponent => (
                self.data.opponent.user_id.clone(),
                self.vm.profile_opponent.is_some(),
            ),
        };
        if cached {
            match side {
                Side::Player => self.vm.profile_player = None,
                Side::Opponent => self.vm.profile_opponent = None,
            }
            return;
        }
        let Some(user_id) = user_id else { return };
        match self.deps.rest.mini_profile(&user_id).await {
            Ok(profile) => match side {
                Side::Player => self.vm.profile_player = Some(profile),
                Side::Opponent => self.vm.profile_opponent = Some(profile),
            },
            Err(err) => tracing::debug!(error = %err, "profile fetch failed"),
        }
    }

    fn set_title(&mut self) {
        self.title = if self.data.tv.is_some() {
            self.deps.translator.translate("tv", &[])
        } else if self.data.game.status.is_started() {
            self.deps.translator.translate("playingRightNow", &[])
        } else if self.data.game.status.is_finished() {
            self.deps.translator.translate("gameOver", &[])
        } else if self.data.game.status.is_aborted() {
            self.deps.translator.translate("gameAborted", &[])
        } else {
            self.deps.translator.translate("waitingForOpponent", &[])
        };
    }

    fn persist_offline_snapshot(&self) {
        let snapshot = OfflineSnapshot {
            data: &self.data,
            timeline: &self.timeline,
            saved_at: chrono::Utc::now(),
        };
        match serde_json::to_value(&snapshot) {
            Ok(value) => self.deps.kv.set(&self.data.game.id.snapshot_key(), value),
            Err(err) => tracing::warn!(error = %err, "offline snapshot failed"),
        }
    }

    // ── Session wiring ──────────────────────────────────────────────

    fn connect_socket(&mut self) -> Result<(), SyncError> {
        if !self.deps.net.has_network() {
            tracing::debug!("offline, deferring socket creation");
            return Ok(());
        }
        self.session.create_game(
            &self.data.url.socket,
            self.data.player.version,
            self.data.game.id.clone(),
            self.user_tv.clone(),
        )
    }

    fn reconnect_socket(&mut self) {
        if let Err(err) = self.connect_socket() {
            tracing::warn!(error = %err, "socket recreation failed");
        }
    }

    // ── Deferred actions ────────────────────────────────────────────

    fn next_deadline(&self) -> Option<Instant> {
        self.deferred.iter().map(|(at, _)| *at).min()
    }

    /// Fires every deferred action due at `now`, on the controller
    /// thread, serialized with event handling.
    fn fire_due_actions(&mut self, now: Instant) {
        let pending = std::mem::take(&mut self.deferred);
        let (due, later): (Vec<_>, Vec<_>) = pending.into_iter().partition(|(at, _)| *at <= now);
        self.deferred = later;
        for (_, action) in due {
            match action {
                Deferred::RecordPendingMove(command) => {
                    // At most one pending move: replace, never stack.
                    self.pop_back_entry();
                    self.back_token = Some(self.deps.back_stack.push("cancel-move"));
                    self.vm.move_to_submit = Some(command);
                }
                Deferred::PlayPremove => self.deps.board.play_premove(),
            }
        }
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Tears the controller down: session, back entries, timers. Safe
    /// to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.session.destroy();
        self.pop_back_entry();
        self.deferred.clear();
        // The clock cadence and the seek subscription die with the run
        // loop that owns them.
        tracing::debug!(game = %self.data.game.id, "controller destroyed");
    }
}
