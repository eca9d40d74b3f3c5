//! Match orchestration: the operations the transport layer drives

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use super::registry::{RoomOptions, RoomRegistry, SharedRegistry};
use crate::config::GameConfig;
use crate::game::scheduler::{SchedulerSettings, SimulationScheduler};
use crate::game::state::RoomKind;
use crate::game::validator::{InputRejection, InputValidator};
use crate::session::{Broadcaster, HeartbeatMonitor, Outbound, PlayerSession, RoomId, SessionId};
use crate::store::ResultQueue;
use crate::util::time::unix_millis;
use crate::ws::protocol::{PlayerInput, PlayerRef, RoomSummary, SeatedState, ServerMsg};

/// Where `find_match` put a player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPlacement {
    pub room_id: RoomId,
    pub is_room_full: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub rooms: usize,
    pub active_rooms: usize,
    pub sessions: usize,
    pub running_loops: usize,
}

/// Facade over the registry, scheduler, validator and heartbeat monitor
pub struct MatchOrchestrator {
    registry: SharedRegistry,
    scheduler: Arc<SimulationScheduler>,
    validator: InputValidator,
    heartbeat: Arc<HeartbeatMonitor>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl MatchOrchestrator {
    pub fn new(
        registry: RoomRegistry,
        config: &GameConfig,
        broadcaster: Arc<dyn Broadcaster>,
        results: ResultQueue,
    ) -> Self {
        let registry = registry.shared();
        let scheduler = Arc::new(SimulationScheduler::new(
            registry.clone(),
            broadcaster.clone(),
            results,
            SchedulerSettings {
                tick_interval: config.tick_interval(),
                disconnect_grace: config.disconnect_grace,
                room_cleanup_delay: config.room_cleanup_delay,
            },
        ));

        Self {
            registry,
            scheduler,
            validator: InputValidator::new(config.input_rate_limit, config.max_input_skew_ms),
            heartbeat: Arc::new(HeartbeatMonitor::new(config.heartbeat_timeout)),
            broadcaster,
        }
    }

    /// Run the heartbeat sweep, evicting silent sessions
    pub fn spawn_heartbeat_sweep(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let orchestrator: Weak<Self> = Arc::downgrade(self);
        let monitor = self.heartbeat.clone();
        tokio::spawn(monitor.run(every, move |session| {
            if let Some(orchestrator) = orchestrator.upgrade() {
                orchestrator.evict(session);
            }
        }))
    }

    // ===== Sessions =====

    /// Register a new connection, or rebind it to an offline seat it owns
    pub fn connect(&self, nickname: String, outbound: Outbound) -> SessionId {
        if let Some(session) = self.handle_player_reconnection(&nickname, outbound.clone()) {
            return session;
        }

        let mut registry = self.registry.lock();
        let session = registry.register_session(PlayerSession::new(nickname.clone(), outbound));
        self.heartbeat.touch(session);
        registry.send_to(
            session,
            self.broadcaster.as_ref(),
            &ServerMsg::Connected {
                player_id: session,
                nickname,
                message: "Connected to game server".to_string(),
            },
        );
        tracing::info!(session_id = %session, "Player connected");
        session
    }

    /// Rebind an offline seated player and push them a full snapshot
    pub fn handle_player_reconnection(&self, nickname: &str, outbound: Outbound) -> Option<SessionId> {
        let mut registry = self.registry.lock();
        let (room_id, session) = registry.reconnect_anywhere(nickname, outbound)?;
        self.heartbeat.touch(session);

        registry.send_to(
            session,
            self.broadcaster.as_ref(),
            &ServerMsg::Connected {
                player_id: session,
                nickname: nickname.to_string(),
                message: "Reconnected to game server".to_string(),
            },
        );
        self.sync_locked(&registry, room_id, session);
        tracing::info!(session_id = %session, room_id = %room_id, %nickname, "Player reconnected");
        Some(session)
    }

    pub fn set_nickname(&self, session: SessionId, nickname: String) {
        let mut registry = self.registry.lock();
        let Some(player) = registry.session_mut(session) else {
            return;
        };
        player.nickname = nickname.clone();
        registry.send_to(
            session,
            self.broadcaster.as_ref(),
            &ServerMsg::NicknameSet {
                player_id: session,
                nickname,
            },
        );
    }

    pub fn record_heartbeat(&self, session: SessionId) {
        self.heartbeat.touch(session);
        self.registry.lock().record_heartbeat(session);
    }

    pub fn is_connected(&self, session: SessionId) -> bool {
        self.registry.lock().session(session).is_some()
    }

    pub fn send_to(&self, session: SessionId, msg: &ServerMsg) {
        self.registry
            .lock()
            .send_to(session, self.broadcaster.as_ref(), msg);
    }

    // ===== Rooms =====

    #[cfg(test)]
    pub fn create_room(&self, kind: RoomKind, opts: RoomOptions) -> RoomId {
        self.registry.lock().create_room(kind, opts)
    }

    /// Seat a player in a specific room and tell the room
    pub fn add_player_to_room(&self, room_id: RoomId, session: SessionId) -> bool {
        let mut registry = self.registry.lock();
        self.add_locked(&mut registry, room_id, session)
    }

    fn add_locked(&self, registry: &mut RoomRegistry, room_id: RoomId, session: SessionId) -> bool {
        if !registry.add_player(room_id, session) {
            return false;
        }

        let (Some(player), Some(room)) = (registry.session(session), registry.room(room_id)) else {
            return false;
        };
        let joined = ServerMsg::PlayerJoined {
            player: PlayerRef {
                id: session,
                nickname: player.nickname.clone(),
            },
            total_players: room.players.len(),
            max_players: room.max_players(),
        };
        registry.broadcast(room_id, self.broadcaster.as_ref(), &joined);
        true
    }

    /// Create a room and seat its creator, leaving any waiting room first.
    /// Refused while the player is in a running game.
    pub fn create_room_for(&self, session: SessionId, kind: RoomKind, opts: RoomOptions) -> Option<RoomId> {
        let mut registry = self.registry.lock();
        let current = registry.session(session)?.current_room;
        if let Some(current) = current {
            if registry.room(current).is_some_and(|room| room.is_active) {
                return None;
            }
            self.remove_locked(&mut registry, current, session);
        }

        let room_id = registry.create_room(kind, opts);
        if self.add_locked(&mut registry, room_id, session) {
            Some(room_id)
        } else {
            registry.delete_room(room_id);
            None
        }
    }

    /// Place a player via matchmaking; a room that fills up starts at once
    pub fn find_match(&self, session: SessionId, kind: RoomKind, opts: RoomOptions) -> Option<MatchPlacement> {
        let mut registry = self.registry.lock();
        let previous = registry.session(session)?.current_room;
        let room_id = registry.find_or_create_match(session, kind, opts)?;

        if let Some(previous) = previous.filter(|p| *p != room_id) {
            if let Some(room) = registry.room(previous) {
                let left = ServerMsg::PlayerLeft {
                    player_id: session,
                    total_players: room.players.len(),
                };
                registry.broadcast(previous, self.broadcaster.as_ref(), &left);
            }
        }

        let room = registry.room(room_id)?;
        let is_room_full = room.is_full();
        let is_active = room.is_active;
        let current_players = room.players.len();
        let max_players = room.max_players();

        if is_room_full && !is_active {
            tracing::info!(room_id = %room_id, "Match found");
            registry.broadcast(room_id, self.broadcaster.as_ref(), &ServerMsg::MatchFound { room_id });
            self.start_locked(&mut registry, room_id);
        } else if !is_active {
            registry.send_to(
                session,
                self.broadcaster.as_ref(),
                &ServerMsg::WaitingForPlayers {
                    room_id,
                    current_players,
                    max_players,
                },
            );
        }

        Some(MatchPlacement {
            room_id,
            is_room_full,
        })
    }

    #[cfg(test)]
    /// Start a game in a full, idle room
    pub fn start_game(&self, room_id: RoomId) -> bool {
        let mut registry = self.registry.lock();
        self.start_locked(&mut registry, room_id)
    }

    fn start_locked(&self, registry: &mut RoomRegistry, room_id: RoomId) -> bool {
        let Some(room) = registry.room_mut(room_id) else {
            return false;
        };
        if room.players.len() != room.max_players() || room.is_active {
            return false;
        }

        room.reset_state();
        room.is_active = true;
        room.finished = false;
        let players = room.players.clone();

        registry.assign_seats(room_id);
        for session in &players {
            if let Some(player) = registry.session_mut(*session) {
                player.ready = false;
            }
        }

        let Some(room) = registry.room(room_id) else {
            return false;
        };
        for session in players {
            let Some(seat) = room.seat_of(session) else {
                continue;
            };
            let started = ServerMsg::GameStarted {
                game_state: SeatedState {
                    state: room.state.clone(),
                    my_side: seat.side,
                    my_paddle_index: seat.slot,
                },
            };
            registry.send_to(session, self.broadcaster.as_ref(), &started);
        }

        tracing::info!(room_id = %room_id, kind = ?room.kind, "Game started");
        self.scheduler.start(room_id);
        true
    }

    /// Apply a paddle command. Anything invalid is dropped without a reply.
    pub fn handle_player_input(&self, room_id: RoomId, session: SessionId, input: &PlayerInput) {
        let mut registry = self.registry.lock();
        let Some(room) = registry.room_mut(room_id) else {
            return;
        };
        if !room.is_active || !room.contains(session) {
            return;
        }

        if input.is_countdown_finished() {
            room.state.release_serve();
            return;
        }

        let Some(seat) = room.seat_of(session) else {
            return;
        };
        match self.validator.validate(session, input, unix_millis()) {
            Ok(direction) => {
                if let Some(paddle) = room.state.paddle_mut(seat) {
                    paddle.steer(direction);
                }
            }
            Err(InputRejection::RateLimited) => {
                tracing::debug!(session_id = %session, "Input rate exceeded");
            }
            Err(rejection) => {
                tracing::warn!(session_id = %session, %rejection, "Suspicious input dropped");
            }
        }
    }

    /// Toggle readiness; a full room where everyone is ready starts
    pub fn set_ready(&self, session: SessionId, room_id: RoomId, ready: bool) {
        let mut registry = self.registry.lock();
        if !registry.room(room_id).is_some_and(|room| room.contains(session)) {
            return;
        }
        if let Some(player) = registry.session_mut(session) {
            player.ready = ready;
        }

        registry.broadcast_except(
            room_id,
            Some(session),
            self.broadcaster.as_ref(),
            &ServerMsg::PlayerReadyChanged {
                player_id: session,
                ready,
            },
        );

        let Some(room) = registry.room(room_id) else {
            return;
        };
        let all_ready = room
            .players
            .iter()
            .all(|id| registry.session(*id).is_some_and(|s| s.ready));
        if all_ready && room.is_full() && !room.is_active {
            self.start_locked(&mut registry, room_id);
        }
    }

    /// Push a full snapshot to one seated player
    pub fn sync_client_state(&self, room_id: RoomId, session: SessionId) {
        let registry = self.registry.lock();
        self.sync_locked(&registry, room_id, session);
    }

    fn sync_locked(&self, registry: &RoomRegistry, room_id: RoomId, session: SessionId) {
        let Some(room) = registry.room(room_id).filter(|room| room.contains(session)) else {
            return;
        };
        let Some(room_info) = registry.room_summary(room_id) else {
            return;
        };
        let sync = ServerMsg::FullStateSync {
            game_state: room.state.clone(),
            room_info,
            timestamp: unix_millis(),
        };
        registry.send_to(session, self.broadcaster.as_ref(), &sync);
    }

    pub fn room_info(&self, room_id: RoomId) -> Option<RoomSummary> {
        self.registry.lock().room_summary(room_id)
    }

    pub fn rooms_overview(&self) -> Vec<RoomSummary> {
        self.registry.lock().summaries()
    }

    // ===== Departures =====

    /// Leave one room; a running game is forfeited first
    pub fn leave_room(&self, session: SessionId, room_id: RoomId) -> bool {
        let mut registry = self.registry.lock();
        let Some(room) = registry.room(room_id).filter(|room| room.contains(session)) else {
            return false;
        };

        if room.is_active {
            self.scheduler.end_by_forfeit(&mut registry, room_id, &[session]);
        }
        self.remove_locked(&mut registry, room_id, session);
        true
    }

    fn remove_locked(&self, registry: &mut RoomRegistry, room_id: RoomId, session: SessionId) {
        registry.remove_player(room_id, session);
        if let Some(room) = registry.room(room_id) {
            let left = ServerMsg::PlayerLeft {
                player_id: session,
                total_players: room.players.len(),
            };
            registry.broadcast(room_id, self.broadcaster.as_ref(), &left);
        }
    }

    /// The socket closed. A player in a running game keeps the seat and may
    /// reconnect; anyone else is disconnected outright.
    pub fn handle_connection_lost(&self, session: SessionId) {
        {
            let mut registry = self.registry.lock();
            let active_room = registry
                .session(session)
                .and_then(|s| s.current_room)
                .filter(|room_id| registry.room(*room_id).is_some_and(|room| room.is_active));

            if let Some(room_id) = active_room {
                registry.mark_offline(room_id, session);
                tracing::info!(session_id = %session, room_id = %room_id, "Player went offline mid-game");
                return;
            }
        }
        self.handle_player_disconnection(session);
    }

    /// Remove a player everywhere. Active games are forfeited while the player
    /// is still seated, then the seat is released and the session dropped.
    pub fn handle_player_disconnection(&self, session: SessionId) {
        let mut registry = self.registry.lock();
        for room_id in registry.rooms_of(session) {
            if registry.room(room_id).is_some_and(|room| room.is_active) {
                self.scheduler.end_by_forfeit(&mut registry, room_id, &[session]);
            }
            self.remove_locked(&mut registry, room_id, session);
        }

        if registry.unregister_session(session).is_some() {
            tracing::info!(session_id = %session, "Player disconnected");
        }
        drop(registry);

        self.validator.clear(session);
        self.heartbeat.remove(session);
    }

    /// Heartbeat timeout
    pub fn evict(&self, session: SessionId) {
        self.handle_player_disconnection(session);
    }

    pub fn shutdown(&self) {
        self.scheduler.stop_all();
    }

    pub fn stats(&self) -> OrchestratorStats {
        let registry = self.registry.lock();
        OrchestratorStats {
            rooms: registry.room_count(),
            active_rooms: registry.active_room_count(),
            sessions: registry.session_count(),
            running_loops: self.scheduler.running_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::outcome::{EndReason, MatchResult};
    use crate::game::state::Side;
    use crate::session::testing::{detached_outbound, RecordingBroadcaster};
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time;

    struct Harness {
        orchestrator: Arc<MatchOrchestrator>,
        broadcaster: Arc<RecordingBroadcaster>,
        results: mpsc::Receiver<MatchResult>,
    }

    fn harness() -> Harness {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let (queue, results) = ResultQueue::new(16);
        let orchestrator = Arc::new(MatchOrchestrator::new(
            RoomRegistry::with_seed(5, 9),
            &GameConfig::default(),
            broadcaster.clone(),
            queue,
        ));
        Harness {
            orchestrator,
            broadcaster,
            results,
        }
    }

    fn connect(h: &Harness, nickname: &str) -> SessionId {
        h.orchestrator.connect(nickname.to_string(), detached_outbound())
    }

    /// Two players matched into a running game
    fn running_game(h: &Harness) -> (RoomId, SessionId, SessionId) {
        let a = connect(h, "ada");
        let b = connect(h, "bob");
        let first = h.orchestrator.find_match(a, RoomKind::Two, RoomOptions::default()).unwrap();
        h.orchestrator.find_match(b, RoomKind::Two, RoomOptions::default()).unwrap();
        (first.room_id, a, b)
    }

    fn input(direction: i64) -> PlayerInput {
        PlayerInput {
            kind: None,
            direction: Some(json!(direction)),
            timestamp: Some(unix_millis() as f64),
        }
    }

    fn paddle_dy(h: &Harness, room_id: RoomId, side: Side) -> f32 {
        let registry = h.orchestrator.registry.lock();
        registry.room(room_id).unwrap().state.paddles(side)[0].dy
    }

    #[tokio::test(start_paused = true)]
    async fn find_match_waits_then_starts_when_full() {
        let h = harness();
        let a = connect(&h, "ada");
        let b = connect(&h, "bob");

        let first = h.orchestrator.find_match(a, RoomKind::Two, RoomOptions::default()).unwrap();
        assert!(!first.is_room_full);
        assert!(h.broadcaster.to(a).iter().any(|m| matches!(
            m,
            ServerMsg::WaitingForPlayers { current_players: 1, max_players: 2, .. }
        )));

        let second = h.orchestrator.find_match(b, RoomKind::Two, RoomOptions::default()).unwrap();
        assert_eq!(second.room_id, first.room_id);
        assert!(second.is_room_full);

        for (session, side) in [(a, Side::Left), (b, Side::Right)] {
            let msgs = h.broadcaster.to(session);
            assert!(msgs.iter().any(|m| matches!(m, ServerMsg::MatchFound { .. })));
            let seat = msgs.iter().find_map(|m| match m {
                ServerMsg::GameStarted { game_state } => {
                    Some((game_state.my_side, game_state.my_paddle_index))
                }
                _ => None,
            });
            assert_eq!(seat, Some((side, 0)));
        }
        assert_eq!(h.orchestrator.stats().running_loops, 1);
        assert_eq!(h.orchestrator.stats().active_rooms, 1);

        h.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn start_game_requires_a_full_room() {
        let h = harness();
        let a = connect(&h, "ada");
        let placement = h.orchestrator.find_match(a, RoomKind::Two, RoomOptions::default()).unwrap();

        assert!(!h.orchestrator.start_game(placement.room_id));
        assert_eq!(h.orchestrator.stats().running_loops, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn valid_input_steers_and_invalid_is_dropped() {
        let h = harness();
        let (room_id, a, b) = running_game(&h);

        h.orchestrator.handle_player_input(room_id, a, &input(-1));
        assert_eq!(paddle_dy(&h, room_id, Side::Left), -6.0);

        h.orchestrator.handle_player_input(room_id, b, &input(3));
        assert_eq!(paddle_dy(&h, room_id, Side::Right), 0.0);

        let outsider = connect(&h, "eve");
        h.orchestrator.handle_player_input(room_id, outsider, &input(1));
        assert_eq!(paddle_dy(&h, room_id, Side::Right), 0.0);

        // Rejections never produce a reply
        assert_eq!(h.broadcaster.count(|m| matches!(m, ServerMsg::Error { .. })), 0);
        h.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_finished_releases_the_serve() {
        let h = harness();
        let (room_id, a, _) = running_game(&h);
        h.orchestrator.shutdown();

        let countdown = PlayerInput {
            kind: Some("countdownFinished".into()),
            ..PlayerInput::default()
        };
        h.orchestrator.handle_player_input(room_id, a, &countdown);

        let registry = h.orchestrator.registry.lock();
        assert!(!registry.room(room_id).unwrap().state.waiting_for_start);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_mid_game_forfeits_with_real_scores() {
        let mut h = harness();
        let (room_id, a, b) = running_game(&h);
        {
            let mut registry = h.orchestrator.registry.lock();
            let state = &mut registry.room_mut(room_id).unwrap().state;
            state.score_left = 1;
            state.score_right = 3;
        }

        h.orchestrator.handle_player_disconnection(b);

        let ended = h.broadcaster.to(a).into_iter().find_map(|m| match m {
            ServerMsg::GameEnded { winner, reason, final_score, .. } => {
                Some((winner, reason, final_score.left, final_score.right))
            }
            _ => None,
        });
        assert_eq!(
            ended,
            Some((Side::Left, EndReason::PlayerDisconnection, 5, 3))
        );

        let result = h.results.try_recv().unwrap();
        assert_eq!(result.final_scores, [1, 3]);
        assert_eq!(result.winner_nicknames, vec!["ada"]);
        assert!(h.results.try_recv().is_err());

        assert!(!h.orchestrator.is_connected(b));
        assert_eq!(h.orchestrator.stats().running_loops, 0);
        assert!(h.broadcaster.to(a).iter().any(|m| matches!(m, ServerMsg::PlayerLeft { .. })));

        time::sleep(Duration::from_millis(500)).await;
        assert!(h.orchestrator.room_info(room_id).is_none());
        assert_eq!(h.orchestrator.registry.lock().session(a).unwrap().current_room, None);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_against_an_offline_opponent_credits_them() {
        let mut h = harness();
        let (room_id, a, b) = running_game(&h);

        h.orchestrator.handle_connection_lost(b);
        h.orchestrator.handle_player_disconnection(a);

        let result = h.results.try_recv().unwrap();
        assert_eq!(result.winner_side, Side::Right);
        assert_eq!(result.winner_nicknames, vec!["bob"]);
        assert_eq!(result.loser_nicknames, vec!["ada"]);
        assert_eq!(result.reason, EndReason::PlayerDisconnection);
        assert!(h.orchestrator.room_info(room_id).is_some(), "kept until cleanup");

        time::sleep(Duration::from_millis(500)).await;
        assert!(h.orchestrator.room_info(room_id).is_none());
        assert_eq!(h.orchestrator.registry.lock().session(b).unwrap().current_room, None);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_teammate_shares_a_forfeit_win() {
        let mut h = harness();
        let players: Vec<SessionId> = ["a", "b", "c", "d"].iter().map(|n| connect(&h, n)).collect();
        for session in &players {
            h.orchestrator.find_match(*session, RoomKind::Four, RoomOptions::default()).unwrap();
        }

        h.orchestrator.handle_connection_lost(players[1]);
        h.orchestrator.handle_player_disconnection(players[2]);

        let result = h.results.try_recv().unwrap();
        assert_eq!(result.winner_side, Side::Left);
        assert_eq!(result.winner_nicknames, vec!["a", "b"]);
        assert_eq!(result.loser_nicknames, vec!["c", "d"]);
        h.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_keeps_seat_and_reconnects() {
        let h = harness();
        let (room_id, _a, b) = running_game(&h);

        h.orchestrator.handle_connection_lost(b);
        {
            let registry = h.orchestrator.registry.lock();
            let session = registry.session(b).unwrap();
            assert!(!session.online);
            assert_eq!(session.current_room, Some(room_id));
        }

        h.broadcaster.clear();
        let (tx, _rx) = mpsc::channel(8);
        let again = h.orchestrator.connect("bob".to_string(), tx);

        assert_eq!(again, b, "same player id after reconnect");
        assert!(h.orchestrator.registry.lock().session(b).unwrap().online);
        let msgs = h.broadcaster.to(b);
        assert!(matches!(msgs.first(), Some(ServerMsg::Connected { .. })));
        assert!(msgs.iter().any(|m| matches!(m, ServerMsg::FullStateSync { .. })));

        h.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_with_unknown_nickname_is_a_new_session() {
        let h = harness();
        let (_, _, b) = running_game(&h);
        h.orchestrator.handle_connection_lost(b);

        let other = connect(&h, "carol");
        assert_ne!(other, b);
        assert!(h.orchestrator.handle_player_reconnection("carol", detached_outbound()).is_none());
        h.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_a_waiting_room_has_no_outcome() {
        let mut h = harness();
        let a = connect(&h, "ada");
        let placement = h.orchestrator.find_match(a, RoomKind::Four, RoomOptions::default()).unwrap();

        assert!(h.orchestrator.leave_room(a, placement.room_id));

        assert!(h.orchestrator.room_info(placement.room_id).is_none());
        assert_eq!(h.broadcaster.count(|m| matches!(m, ServerMsg::GameEnded { .. })), 0);
        assert!(h.results.try_recv().is_err());
        assert!(!h.orchestrator.leave_room(a, placement.room_id));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_handshake_starts_a_created_room() {
        let h = harness();
        let a = connect(&h, "ada");
        let b = connect(&h, "bob");

        let room_id = h
            .orchestrator
            .create_room_for(a, RoomKind::Two, RoomOptions::default())
            .unwrap();
        assert!(h.orchestrator.add_player_to_room(room_id, b));
        assert!(h.broadcaster.to(a).iter().any(|m| matches!(
            m,
            ServerMsg::PlayerJoined { total_players: 2, .. }
        )));

        h.orchestrator.set_ready(a, room_id, true);
        assert!(h.broadcaster.to(b).iter().any(|m| matches!(
            m,
            ServerMsg::PlayerReadyChanged { ready: true, .. }
        )));
        assert!(!h.orchestrator.room_info(room_id).unwrap().is_active);

        h.orchestrator.set_ready(b, room_id, true);
        let info = h.orchestrator.room_info(room_id).unwrap();
        assert!(info.is_active);
        assert!(info.players.iter().all(|p| !p.ready), "ready flags reset on start");

        h.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn joining_unknown_or_full_rooms_fails() {
        let h = harness();
        let (room_id, _, _) = running_game(&h);
        let c = connect(&h, "cy");

        assert!(!h.orchestrator.add_player_to_room(room_id, c));
        assert!(!h.orchestrator.add_player_to_room(RoomId::new_v4(), c));
        h.orchestrator.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_sweep_evicts_silent_players() {
        let h = harness();
        let a = connect(&h, "ada");
        let b = connect(&h, "bob");
        let sweep = h.orchestrator.spawn_heartbeat_sweep(Duration::from_secs(10));

        time::sleep(Duration::from_secs(45)).await;
        h.orchestrator.record_heartbeat(b);
        time::sleep(Duration::from_secs(30)).await;

        assert!(!h.orchestrator.is_connected(a));
        assert!(h.orchestrator.is_connected(b));
        sweep.abort();
    }
}
