//! Room ownership, player placement and seating

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;
use uuid::Uuid;

use crate::game::outcome::Participant;
use crate::game::state::{RoomKind, Seat, SimulationState};
use crate::session::{Broadcaster, Outbound, PlayerSession, RoomId, SessionId};
use crate::ws::protocol::{PlayerSummary, RoomSummary, ServerMsg};

/// The registry behind its lock. Every room mutation happens under this lock.
pub type SharedRegistry = Arc<Mutex<RoomRegistry>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomOptions {
    pub power_ups_enabled: bool,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            power_ups_enabled: true,
        }
    }
}

/// One isolated match instance
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    /// Seated sessions in join order
    pub players: Vec<SessionId>,
    pub seats: HashMap<SessionId, Seat>,
    /// True only while a tick loop runs for this room
    pub is_active: bool,
    /// Set once a game in this room has ended
    pub finished: bool,
    pub power_ups_enabled: bool,
    pub state: SimulationState,
    pub rng: ChaCha8Rng,
    pub frame_id: u64,
}

impl Room {
    fn new(kind: RoomKind, opts: RoomOptions, max_score: u32, mut rng: ChaCha8Rng) -> Self {
        let state = SimulationState::new(kind, max_score, opts.power_ups_enabled, &mut rng);
        Self {
            id: Uuid::new_v4(),
            kind,
            players: Vec::with_capacity(kind.max_players()),
            seats: HashMap::new(),
            is_active: false,
            finished: false,
            power_ups_enabled: opts.power_ups_enabled,
            state,
            rng,
            frame_id: 0,
        }
    }

    pub fn max_players(&self) -> usize {
        self.kind.max_players()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players()
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.players.contains(&session)
    }

    pub fn seat_of(&self, session: SessionId) -> Option<Seat> {
        self.seats.get(&session).copied().or_else(|| {
            let index = self.players.iter().position(|id| *id == session)?;
            Seat::for_join_index(self.kind, index)
        })
    }

    /// Discard any previous game and start from a fresh state
    pub fn reset_state(&mut self) {
        let max_score = self.state.max_score;
        self.state =
            SimulationState::new(self.kind, max_score, self.power_ups_enabled, &mut self.rng);
        self.frame_id = 0;
    }

    fn accepts(&self, kind: RoomKind, opts: RoomOptions) -> bool {
        self.kind == kind
            && self.power_ups_enabled == opts.power_ups_enabled
            && !self.is_full()
            && !self.is_active
            && !self.finished
    }
}

/// Owns all rooms and the sessions seated in them
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    /// Room ids in creation order; matchmaking scans in this order
    order: Vec<RoomId>,
    sessions: HashMap<SessionId, PlayerSession>,
    max_score: u32,
    seed_rng: ChaCha8Rng,
}

impl RoomRegistry {
    pub fn new(max_score: u32) -> Self {
        Self::from_rng(max_score, ChaCha8Rng::from_entropy())
    }

    #[cfg(test)]
    /// Registry whose rooms draw from a deterministic seed
    pub fn with_seed(max_score: u32, seed: u64) -> Self {
        Self::from_rng(max_score, ChaCha8Rng::seed_from_u64(seed))
    }

    fn from_rng(max_score: u32, seed_rng: ChaCha8Rng) -> Self {
        Self {
            rooms: HashMap::new(),
            order: Vec::new(),
            sessions: HashMap::new(),
            max_score,
            seed_rng,
        }
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    // ===== Sessions =====

    pub fn register_session(&mut self, session: PlayerSession) -> SessionId {
        let id = session.id;
        self.sessions.insert(id, session);
        id
    }

    pub fn unregister_session(&mut self, session: SessionId) -> Option<PlayerSession> {
        self.sessions.remove(&session)
    }

    pub fn session(&self, session: SessionId) -> Option<&PlayerSession> {
        self.sessions.get(&session)
    }

    pub fn session_mut(&mut self, session: SessionId) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(&session)
    }

    pub fn record_heartbeat(&mut self, session: SessionId) {
        if let Some(s) = self.sessions.get_mut(&session) {
            s.last_heartbeat = Instant::now();
        }
    }

    // ===== Rooms =====

    pub fn create_room(&mut self, kind: RoomKind, opts: RoomOptions) -> RoomId {
        let rng = ChaCha8Rng::seed_from_u64(self.seed_rng.gen());
        let room = Room::new(kind, opts, self.max_score, rng);
        let id = room.id;
        self.rooms.insert(id, room);
        self.order.push(id);
        tracing::debug!(room_id = %id, ?kind, "Room created");
        id
    }

    pub fn room(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.get(&room_id)
    }

    pub fn room_mut(&mut self, room_id: RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(&room_id)
    }

    /// Rooms in creation order
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.order.iter().filter_map(|id| self.rooms.get(id))
    }

    /// Rooms the session is seated in
    pub fn rooms_of(&self, session: SessionId) -> Vec<RoomId> {
        self.rooms()
            .filter(|room| room.contains(session))
            .map(|room| room.id)
            .collect()
    }

    /// Seat `session` in `room_id`. Fails without side effects when the room
    /// is unknown or full, or the session is unknown or already seated.
    pub fn add_player(&mut self, room_id: RoomId, session: SessionId) -> bool {
        let Some(player) = self.sessions.get_mut(&session) else {
            return false;
        };
        if player.current_room.is_some() {
            return false;
        }
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        if room.is_full() || room.contains(session) {
            return false;
        }

        room.players.push(session);
        player.current_room = Some(room_id);
        true
    }

    /// Unseat `session`. An emptied room is deleted; any other room it leaves
    /// stops being active.
    pub fn remove_player(&mut self, room_id: RoomId, session: SessionId) -> bool {
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        let Some(index) = room.players.iter().position(|id| *id == session) else {
            return false;
        };

        room.players.remove(index);
        room.seats.remove(&session);
        let now_empty = room.players.is_empty();
        room.is_active = false;

        if let Some(player) = self.sessions.get_mut(&session) {
            if player.current_room == Some(room_id) {
                player.current_room = None;
            }
            player.ready = false;
        }

        if now_empty {
            self.delete_room(room_id);
        }
        true
    }

    pub fn delete_room(&mut self, room_id: RoomId) -> Option<Room> {
        let room = self.rooms.remove(&room_id)?;
        self.order.retain(|id| *id != room_id);
        for session in &room.players {
            if let Some(player) = self.sessions.get_mut(session) {
                if player.current_room == Some(room_id) {
                    player.current_room = None;
                }
            }
        }
        tracing::debug!(room_id = %room_id, "Room deleted");
        Some(room)
    }

    /// Place `session` in the first open room that fits, or a new one.
    ///
    /// First fit in creation order; no fill-ratio or latency balancing. A
    /// session already in a game or in a matching waiting room stays there.
    pub fn find_or_create_match(
        &mut self,
        session: SessionId,
        kind: RoomKind,
        opts: RoomOptions,
    ) -> Option<RoomId> {
        let current = self.sessions.get(&session)?.current_room;

        if let Some(current) = current {
            let stay = self.rooms.get(&current).map(|room| {
                room.is_active
                    || (!room.finished
                        && room.kind == kind
                        && room.power_ups_enabled == opts.power_ups_enabled)
            });
            match stay {
                Some(true) => return Some(current),
                Some(false) => {
                    self.remove_player(current, session);
                }
                None => {
                    if let Some(player) = self.sessions.get_mut(&session) {
                        player.current_room = None;
                    }
                }
            }
        }

        let open = self
            .rooms()
            .find(|room| room.accepts(kind, opts))
            .map(|room| room.id);
        let room_id = match open {
            Some(id) => id,
            None => self.create_room(kind, opts),
        };

        self.add_player(room_id, session).then_some(room_id)
    }

    /// Map join order to seats and label the paddles
    pub fn assign_seats(&mut self, room_id: RoomId) {
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        room.seats.clear();
        for (index, session) in room.players.iter().enumerate() {
            let Some(seat) = Seat::for_join_index(room.kind, index) else {
                continue;
            };
            room.seats.insert(*session, seat);
            let nickname = self
                .sessions
                .get(session)
                .map(|s| s.nickname.as_str())
                .unwrap_or_default();
            room.state.label_paddle(seat, nickname);
        }
    }

    pub fn mark_online(&mut self, room_id: RoomId, session: SessionId) -> bool {
        self.set_online(room_id, session, true)
    }

    /// Flag a seated player as offline; the seat is kept for reconnection
    pub fn mark_offline(&mut self, room_id: RoomId, session: SessionId) -> bool {
        self.set_online(room_id, session, false)
    }

    fn set_online(&mut self, room_id: RoomId, session: SessionId, online: bool) -> bool {
        let seated = self
            .rooms
            .get(&room_id)
            .is_some_and(|room| room.contains(session));
        match self.sessions.get_mut(&session) {
            Some(player) if seated => {
                player.online = online;
                true
            }
            _ => false,
        }
    }

    /// Rebind an offline player of an active room to a new connection.
    ///
    /// Succeeds only for an active room holding an offline session with this
    /// nickname.
    pub fn reconnect(
        &mut self,
        room_id: RoomId,
        nickname: &str,
        outbound: Outbound,
    ) -> Option<SessionId> {
        let room = self.rooms.get(&room_id).filter(|room| room.is_active)?;
        let session = room.players.iter().copied().find(|id| {
            self.sessions
                .get(id)
                .is_some_and(|s| !s.online && !nickname.is_empty() && s.nickname == nickname)
        })?;

        self.sessions.get_mut(&session)?.rebind(outbound);
        self.mark_online(room_id, session);
        Some(session)
    }

    /// Try [`Self::reconnect`] against every room
    pub fn reconnect_anywhere(
        &mut self,
        nickname: &str,
        outbound: Outbound,
    ) -> Option<(RoomId, SessionId)> {
        let candidates: Vec<RoomId> = self.rooms().filter(|r| r.is_active).map(|r| r.id).collect();
        candidates.into_iter().find_map(|room_id| {
            self.reconnect(room_id, nickname, outbound.clone())
                .map(|session| (room_id, session))
        })
    }

    /// Seated players with their seats, in join order
    pub fn roster(&self, room_id: RoomId) -> Vec<Participant> {
        let Some(room) = self.rooms.get(&room_id) else {
            return Vec::new();
        };
        room.players
            .iter()
            .filter_map(|id| {
                let session = self.sessions.get(id)?;
                Some(Participant {
                    session_id: *id,
                    nickname: session.nickname.clone(),
                    seat: room.seat_of(*id)?,
                    connected: session.online,
                })
            })
            .collect()
    }

    /// Offline players silent for longer than `grace`
    pub fn expired_offline(&self, room_id: RoomId, now: Instant, grace: Duration) -> Vec<SessionId> {
        let Some(room) = self.rooms.get(&room_id) else {
            return Vec::new();
        };
        room.players
            .iter()
            .copied()
            .filter(|id| {
                self.sessions
                    .get(id)
                    .is_some_and(|s| !s.online && s.silent_for(now) > grace)
            })
            .collect()
    }

    // ===== Delivery =====

    pub fn broadcast(&self, room_id: RoomId, broadcaster: &dyn Broadcaster, msg: &ServerMsg) {
        self.broadcast_except(room_id, None, broadcaster, msg);
    }

    pub fn broadcast_except(
        &self,
        room_id: RoomId,
        except: Option<SessionId>,
        broadcaster: &dyn Broadcaster,
        msg: &ServerMsg,
    ) {
        let Some(room) = self.rooms.get(&room_id) else {
            return;
        };
        for id in room.players.iter().filter(|id| Some(**id) != except) {
            if let Some(session) = self.sessions.get(id) {
                broadcaster.send(session, msg);
            }
        }
    }

    pub fn send_to(&self, session: SessionId, broadcaster: &dyn Broadcaster, msg: &ServerMsg) {
        if let Some(session) = self.sessions.get(&session) {
            broadcaster.send(session, msg);
        }
    }

    // ===== Views =====

    pub fn room_summary(&self, room_id: RoomId) -> Option<RoomSummary> {
        let room = self.rooms.get(&room_id)?;
        let players = room
            .players
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .map(|s| PlayerSummary {
                id: s.id,
                nickname: s.nickname.clone(),
                ready: s.ready,
                online: s.online,
            })
            .collect();
        Some(RoomSummary {
            id: room.id,
            players,
            is_active: room.is_active,
            max_players: room.max_players(),
            kind: room.kind,
            power_ups_enabled: room.power_ups_enabled,
        })
    }

    pub fn summaries(&self) -> Vec<RoomSummary> {
        self.order
            .iter()
            .filter_map(|id| self.room_summary(*id))
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn active_room_count(&self) -> usize {
        self.rooms.values().filter(|r| r.is_active).count()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
