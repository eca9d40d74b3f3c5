//! Connection-level liveness tracking

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::SessionId;

/// Last-seen table for connected sessions.
///
/// Independent of the in-match forgiveness window: this one decides when a
/// silent connection is dropped entirely.
pub struct HeartbeatMonitor {
    last_seen: DashMap<SessionId, Instant>,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_seen: DashMap::new(),
            timeout,
        }
    }

    pub fn touch(&self, session: SessionId) {
        self.touch_at(session, Instant::now());
    }

    pub fn touch_at(&self, session: SessionId, at: Instant) {
        self.last_seen.insert(session, at);
    }

    pub fn remove(&self, session: SessionId) {
        self.last_seen.remove(&session);
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.last_seen.len()
    }

    /// Drop and return every session silent for longer than the timeout
    pub fn sweep(&self, now: Instant) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .last_seen
            .iter()
            .filter(|entry| now.saturating_duration_since(*entry.value()) > self.timeout)
            .map(|entry| *entry.key())
            .collect();

        // A touch may land between the scan and the removal
        expired
            .into_iter()
            .filter(|id| {
                self.last_seen
                    .remove_if(id, |_, seen| now.saturating_duration_since(*seen) > self.timeout)
                    .is_some()
            })
            .collect()
    }

    /// Sweep every `every`, handing each evicted session to `on_evict`
    pub async fn run<F>(self: Arc<Self>, every: Duration, on_evict: F)
    where
        F: Fn(SessionId) + Send + Sync + 'static,
    {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let evicted = self.sweep(Instant::now());
            for session in evicted {
                tracing::info!(session_id = %session, "Heartbeat timeout, evicting session");
                on_evict(session);
            }
        }
    }
}
