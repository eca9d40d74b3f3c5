//! End-of-game resolution: winner selection and the final broadcast

use serde::Serialize;

use super::state::{Seat, Side, SimulationState};
use crate::session::{RoomId, SessionId};
use crate::util::time::unix_millis;
use crate::ws::protocol::{EndedPlayer, FinalScore, ServerMsg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    NormalEnd,
    PlayerDisconnection,
}

/// A seated player as seen at the moment the game ended
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub session_id: SessionId,
    pub nickname: String,
    pub seat: Seat,
    pub connected: bool,
}

/// Outcome of one finished room, handed to the result store and then dropped
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub room_id: RoomId,
    pub winner_side: Side,
    pub winner_nicknames: Vec<String>,
    pub loser_nicknames: Vec<String>,
    pub participants: Vec<Participant>,
    pub reason: EndReason,
    /// Real scores at the end, `[left, right]`
    pub final_scores: [u32; 2],
}

impl MatchResult {
    /// True for a normal end on level scores
    pub fn is_draw(&self) -> bool {
        self.reason == EndReason::NormalEnd && self.final_scores[0] == self.final_scores[1]
    }

    pub fn all_nicknames(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|p| p.nickname.clone())
            .filter(|n| !n.is_empty())
            .collect()
    }
}

/// A resolved game: what to persist and what to tell the room
#[derive(Debug, Clone)]
pub struct Conclusion {
    pub result: MatchResult,
    pub message: ServerMsg,
}

/// Resolve a game that ended because one side reached the winning score
pub fn conclude_normal(room_id: RoomId, state: &SimulationState, roster: &[Participant]) -> Conclusion {
    let winner = state.leader().unwrap_or(Side::Left);
    let winners: Vec<&Participant> = roster.iter().filter(|p| p.seat.side == winner).collect();
    let [left, right] = state.scores();

    let result = build_result(room_id, winner, &winners, roster, EndReason::NormalEnd, [left, right]);
    let message = ServerMsg::GameEnded {
        winner,
        reason: EndReason::NormalEnd,
        disconnected_player: None,
        final_score: FinalScore { left, right },
        players: ended_players(roster, |p| p.connected),
        timestamp: unix_millis(),
    };

    Conclusion { result, message }
}

/// Resolve a forfeit.
///
/// Everyone seated and not departed remains, online or not. The winning side
/// is the one holding more of the connected remainder; when nobody remaining
/// is connected the seated remainder decides. An exact tie goes to the left.
/// `state` has the winner's score forced to the maximum for display while the
/// result keeps the real scores. Returns `None` when nobody remains.
pub fn conclude_forfeit(
    room_id: RoomId,
    state: &mut SimulationState,
    roster: &[Participant],
    departed: &[SessionId],
) -> Option<Conclusion> {
    let remaining: Vec<&Participant> = roster
        .iter()
        .filter(|p| !departed.contains(&p.session_id))
        .collect();
    if remaining.is_empty() {
        return None;
    }

    let connected: Vec<&Participant> = remaining.iter().copied().filter(|p| p.connected).collect();
    let deciders = if connected.is_empty() { &remaining } else { &connected };
    let on_side = |side: Side| deciders.iter().filter(|p| p.seat.side == side).count();
    let winner = if on_side(Side::Right) > on_side(Side::Left) {
        Side::Right
    } else {
        Side::Left
    };
    let winners: Vec<&Participant> = remaining
        .iter()
        .copied()
        .filter(|p| p.seat.side == winner)
        .collect();

    let final_scores = state.scores();
    state.force_win(winner);

    let disconnected_player = roster
        .iter()
        .find(|p| departed.contains(&p.session_id))
        .map(|p| p.nickname.clone());

    let result = build_result(
        room_id,
        winner,
        &winners,
        roster,
        EndReason::PlayerDisconnection,
        final_scores,
    );
    let message = ServerMsg::GameEnded {
        winner,
        reason: EndReason::PlayerDisconnection,
        disconnected_player,
        final_score: FinalScore {
            left: state.score_left,
            right: state.score_right,
        },
        players: ended_players(roster, |p| {
            p.connected && !departed.contains(&p.session_id)
        }),
        timestamp: unix_millis(),
    };

    Some(Conclusion { result, message })
}

fn build_result(
    room_id: RoomId,
    winner_side: Side,
    winners: &[&Participant],
    roster: &[Participant],
    reason: EndReason,
    final_scores: [u32; 2],
) -> MatchResult {
    let is_winner = |p: &Participant| winners.iter().any(|w| w.session_id == p.session_id);
    MatchResult {
        room_id,
        winner_side,
        winner_nicknames: winners.iter().map(|p| p.nickname.clone()).collect(),
        loser_nicknames: roster
            .iter()
            .filter(|p| !is_winner(*p))
            .map(|p| p.nickname.clone())
            .collect(),
        participants: roster.to_vec(),
        reason,
        final_scores,
    }
}

fn ended_players(roster: &[Participant], connected: impl Fn(&Participant) -> bool) -> Vec<EndedPlayer> {
    roster
        .iter()
        .map(|p| EndedPlayer {
            nickname: p.nickname.clone(),
            side: p.seat.side,
            connected: connected(p),
        })
        .collect()
}
