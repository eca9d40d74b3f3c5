//! Per-room tick loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::{self, Instant};

use super::outcome::{conclude_forfeit, conclude_normal};
use super::physics::{PhysicsEngine, PhysicsEvent};
use crate::matchmaking::registry::{RoomRegistry, SharedRegistry};
use crate::session::{Broadcaster, RoomId, SessionId};
use crate::store::ResultQueue;
use crate::util::time::{as_millis_f32, unix_millis};
use crate::ws::protocol::{FrameState, ServerMsg};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    /// How long an offline player may stay silent before the game is forfeited
    pub disconnect_grace: Duration,
    /// Delay between a forfeit broadcast and the room's removal
    pub room_cleanup_delay: Duration,
}

/// Drives one tick loop per active room.
///
/// Each tick runs under the registry lock, so ticks of one room never overlap
/// and a stop issued under the lock is seen before the next tick.
pub struct SimulationScheduler {
    registry: SharedRegistry,
    broadcaster: Arc<dyn Broadcaster>,
    results: ResultQueue,
    settings: SchedulerSettings,
    loops: DashMap<RoomId, Arc<AtomicBool>>,
}

impl SimulationScheduler {
    pub fn new(
        registry: SharedRegistry,
        broadcaster: Arc<dyn Broadcaster>,
        results: ResultQueue,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            results,
            settings,
            loops: DashMap::new(),
        }
    }

    /// Start ticking `room_id`. Returns false if a loop is already running.
    pub fn start(self: &Arc<Self>, room_id: RoomId) -> bool {
        let stop = Arc::new(AtomicBool::new(false));
        match self.loops.entry(room_id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(stop.clone());
            }
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run_room(room_id, stop).await });
        tracing::info!(room_id = %room_id, "Game loop started");
        true
    }

    /// Stop ticking `room_id`. Stopping an unknown or stopped room is a no-op.
    pub fn stop(&self, room_id: RoomId) -> bool {
        match self.loops.remove(&room_id) {
            Some((_, stop)) => {
                stop.store(true, Ordering::SeqCst);
                tracing::info!(room_id = %room_id, "Game loop stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let rooms: Vec<RoomId> = self.loops.iter().map(|entry| *entry.key()).collect();
        for room_id in rooms {
            self.stop(room_id);
        }
    }

    #[cfg(test)]
    pub fn is_running(&self, room_id: RoomId) -> bool {
        self.loops.contains_key(&room_id)
    }

    pub fn running_count(&self) -> usize {
        self.loops.len()
    }

    async fn run_room(self: Arc<Self>, room_id: RoomId, stop: Arc<AtomicBool>) {
        let mut last_tick = Instant::now();

        loop {
            let started = Instant::now();
            let delta = started.saturating_duration_since(last_tick);
            last_tick = started;

            {
                let mut registry = self.registry.lock();
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if !self.tick(&mut registry, room_id, delta, started) {
                    break;
                }
            }

            // Self-correcting: subtract processing time, never sleep negative
            time::sleep(self.settings.tick_interval.saturating_sub(started.elapsed())).await;
        }

        self.loops
            .remove_if(&room_id, |_, flag| Arc::ptr_eq(flag, &stop));
        tracing::debug!(room_id = %room_id, "Game loop exited");
    }

    /// One simulation step plus broadcast. Returns false once the loop must end.
    fn tick(
        &self,
        registry: &mut RoomRegistry,
        room_id: RoomId,
        delta: Duration,
        now: Instant,
    ) -> bool {
        let Some(room) = registry.room_mut(room_id).filter(|room| room.is_active) else {
            self.stop(room_id);
            return false;
        };

        let events = PhysicsEngine::advance(&mut room.state, as_millis_f32(delta), &mut room.rng);
        for event in &events {
            match event {
                PhysicsEvent::Scored { side } => tracing::debug!(
                    room_id = %room_id,
                    ?side,
                    score_left = room.state.score_left,
                    score_right = room.state.score_right,
                    "Point scored"
                ),
                PhysicsEvent::PowerUpCollected { kind, side } => {
                    tracing::debug!(room_id = %room_id, ?kind, ?side, "Power-up collected")
                }
                PhysicsEvent::EffectExpired => {
                    tracing::debug!(room_id = %room_id, "Power-up effect expired")
                }
            }
        }

        room.frame_id += 1;
        let frame_id = room.frame_id;
        let timestamp = unix_millis();
        let finished = room.state.is_finished();
        let update = ServerMsg::GameUpdate {
            game_state: FrameState {
                state: room.state.clone(),
                frame_id,
                timestamp,
            },
            timestamp,
            frame_id,
        };
        registry.broadcast(room_id, self.broadcaster.as_ref(), &update);

        if finished {
            self.finish_normal(registry, room_id);
            return false;
        }

        let expired = registry.expired_offline(room_id, now, self.settings.disconnect_grace);
        if !expired.is_empty() {
            tracing::warn!(
                room_id = %room_id,
                players = ?expired,
                "Offline player exceeded the disconnect window, forfeiting"
            );
            self.end_by_forfeit(registry, room_id, &expired);
            return false;
        }

        true
    }

    fn finish_normal(&self, registry: &mut RoomRegistry, room_id: RoomId) {
        self.stop(room_id);

        let roster = registry.roster(room_id);
        let Some(room) = registry.room_mut(room_id) else {
            return;
        };
        room.is_active = false;
        room.finished = true;

        let conclusion = conclude_normal(room_id, &room.state, &roster);
        tracing::info!(
            room_id = %room_id,
            winner = ?conclusion.result.winner_side,
            scores = ?conclusion.result.final_scores,
            "Game finished"
        );
        registry.broadcast(room_id, self.broadcaster.as_ref(), &conclusion.message);
        self.results.submit(conclusion.result);
    }

    /// End an active game because `departed` are gone.
    ///
    /// Must run under the registry lock while the departed players are still
    /// seated, so their sides can be read.
    pub fn end_by_forfeit(&self, registry: &mut RoomRegistry, room_id: RoomId, departed: &[SessionId]) {
        self.stop(room_id);

        let roster = registry.roster(room_id);
        let Some(room) = registry.room_mut(room_id) else {
            return;
        };
        room.is_active = false;
        room.finished = true;

        match conclude_forfeit(room_id, &mut room.state, &roster, departed) {
            None => {
                tracing::info!(room_id = %room_id, "Nobody left after forfeit, deleting room");
                registry.delete_room(room_id);
            }
            Some(conclusion) => {
                tracing::info!(
                    room_id = %room_id,
                    winner = ?conclusion.result.winner_side,
                    scores = ?conclusion.result.final_scores,
                    "Game forfeited"
                );
                registry.broadcast(room_id, self.broadcaster.as_ref(), &conclusion.message);
                self.results.submit(conclusion.result);
                self.schedule_cleanup(room_id);
            }
        }
    }

    /// Delete the room once the end message had time to flush
    fn schedule_cleanup(&self, room_id: RoomId) {
        let registry = Arc::clone(&self.registry);
        let delay = self.settings.room_cleanup_delay;
        tokio::spawn(async move {
            time::sleep(delay).await;
            let mut registry = registry.lock();
            if registry.room(room_id).is_some_and(|room| !room.is_active) {
                registry.delete_room(room_id);
            }
        });
    }
}
