//! Result store contract and the background writer that feeds it

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::game::outcome::MatchResult;

pub type MatchId = i64;

/// Per-player outcome as stored by the stats service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutcomeCode {
    Loss = 0,
    Draw = 1,
    Win = 2,
    /// Written by the tournament flow, which does not go through this server
    #[allow(dead_code)]
    TournamentWin = 3,
}

impl OutcomeCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Result store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("No row returned from insert")]
    NoRowReturned,
}

/// Narrow persistence contract for finished games
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Open a pending match record for these players
    async fn create_pending_match(&self, players: &[String]) -> Result<MatchId, StoreError>;

    async fn finalize_match(
        &self,
        match_id: MatchId,
        final_scores: [u32; 2],
        winner_label: &str,
    ) -> Result<(), StoreError>;

    async fn record_participant_outcome(
        &self,
        nickname: &str,
        match_id: MatchId,
        outcome: OutcomeCode,
    ) -> Result<(), StoreError>;
}

/// Write one result: pending record, final score, then one outcome per player
pub async fn persist(store: &dyn ResultStore, result: &MatchResult) -> Result<MatchId, StoreError> {
    let match_id = store.create_pending_match(&result.all_nicknames()).await?;
    store
        .finalize_match(match_id, result.final_scores, &result.winner_nicknames.join(", "))
        .await?;

    for nickname in result.all_nicknames() {
        let outcome = if result.is_draw() {
            OutcomeCode::Draw
        } else if result.winner_nicknames.contains(&nickname) {
            OutcomeCode::Win
        } else {
            OutcomeCode::Loss
        };

        if let Err(e) = store
            .record_participant_outcome(&nickname, match_id, outcome)
            .await
        {
            tracing::warn!(match_id, %nickname, error = %e, "Failed to record player outcome");
        }
    }

    Ok(match_id)
}

/// Bounded hand-off from the simulation to the writer task
#[derive(Clone)]
pub struct ResultQueue {
    tx: mpsc::Sender<MatchResult>,
}

impl ResultQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MatchResult>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting; a full queue drops the result
    pub fn submit(&self, result: MatchResult) {
        match self.tx.try_send(result) {
            Ok(()) => {}
            Err(TrySendError::Full(result)) => {
                tracing::warn!(room_id = %result.room_id, "Result queue full, dropping match result");
            }
            Err(TrySendError::Closed(result)) => {
                tracing::error!(room_id = %result.room_id, "Result writer gone, dropping match result");
            }
        }
    }
}

/// Drain the queue into `store`. Failures are logged and dropped, never retried.
pub fn spawn_result_writer(
    store: Arc<dyn ResultStore>,
    mut rx: mpsc::Receiver<MatchResult>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = rx.recv().await {
            match persist(store.as_ref(), &result).await {
                Ok(match_id) => {
                    tracing::info!(
                        room_id = %result.room_id,
                        match_id,
                        winners = ?result.winner_nicknames,
                        losers = ?result.loser_nicknames,
                        "Match result saved"
                    );
                }
                Err(e) => {
                    tracing::error!(room_id = %result.room_id, error = %e, "Failed to save match result");
                }
            }
        }
        tracing::debug!("Result writer stopped");
    })
}

/// Store used when no database is configured: results only reach the log
#[derive(Default)]
pub struct LoggingResultStore {
    next_id: AtomicI64,
}

#[async_trait]
impl ResultStore for LoggingResultStore {
    async fn create_pending_match(&self, players: &[String]) -> Result<MatchId, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(match_id = id, ?players, "Match opened");
        Ok(id)
    }

    async fn finalize_match(
        &self,
        match_id: MatchId,
        final_scores: [u32; 2],
        winner_label: &str,
    ) -> Result<(), StoreError> {
        tracing::info!(match_id, ?final_scores, winner = winner_label, "Match finished");
        Ok(())
    }

    async fn record_participant_outcome(
        &self,
        nickname: &str,
        match_id: MatchId,
        outcome: OutcomeCode,
    ) -> Result<(), StoreError> {
        tracing::info!(match_id, nickname, outcome = outcome.code(), "Player outcome");
        Ok(())
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug, Clone, PartialEq)]
    pub enum StoreCall {
        Created { id: MatchId, players: Vec<String> },
        Finalized { id: MatchId, scores: [u32; 2], winner: String },
        Outcome { nickname: String, id: MatchId, outcome: OutcomeCode },
    }

    /// In-memory store that records calls and can be told to fail
    #[derive(Default)]
    pub struct MemoryResultStore {
        calls: Mutex<Vec<StoreCall>>,
        next_id: AtomicI64,
        pub fail: AtomicBool,
    }

    impl MemoryResultStore {
        pub fn calls(&self) -> Vec<StoreCall> {
            self.calls.lock().clone()
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(StoreError::Api {
                    status: 503,
                    body: "unavailable".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ResultStore for MemoryResultStore {
        async fn create_pending_match(&self, players: &[String]) -> Result<MatchId, StoreError> {
            self.check()?;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.calls.lock().push(StoreCall::Created {
                id,
                players: players.to_vec(),
            });
            Ok(id)
        }

        async fn finalize_match(
            &self,
            match_id: MatchId,
            final_scores: [u32; 2],
            winner_label: &str,
        ) -> Result<(), StoreError> {
            self.check()?;
            self.calls.lock().push(StoreCall::Finalized {
                id: match_id,
                scores: final_scores,
                winner: winner_label.to_string(),
            });
            Ok(())
        }

        async fn record_participant_outcome(
            &self,
            nickname: &str,
            match_id: MatchId,
            outcome: OutcomeCode,
        ) -> Result<(), StoreError> {
            self.check()?;
            self.calls.lock().push(StoreCall::Outcome {
                nickname: nickname.to_string(),
                id: match_id,
                outcome,
            });
            Ok(())
        }
    }
}
