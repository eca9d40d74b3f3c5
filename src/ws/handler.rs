//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{verify_jwt, AuthError};
use crate::matchmaking::{MatchOrchestrator, RoomOptions};
use crate::session::{SessionId, OUTBOUND_CAPACITY};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Identity token; required when the server has a JWT secret
    pub token: Option<String>,
    /// Display name used when tokens are not required
    pub nickname: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match resolve_identity(&query, state.config.jwt_secret.as_deref()) {
        Ok(nickname) => {
            info!(%nickname, "WebSocket upgrade");
            ws.on_upgrade(move |socket| handle_socket(socket, nickname, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            e.into_response()
        }
    }
}

/// The nickname this connection plays under
fn resolve_identity(query: &WsQuery, jwt_secret: Option<&str>) -> Result<String, AuthError> {
    if let Some(secret) = jwt_secret {
        let token = query.token.as_deref().ok_or(AuthError::MissingToken)?;
        return verify_jwt(token, secret).map(|claims| claims.nickname);
    }

    Ok(query
        .nickname
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Player_{}", &Uuid::new_v4().simple().to_string()[..8])))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, nickname: String, state: AppState) {
    let orchestrator = state.orchestrator.clone();
    let (ws_sink, mut ws_stream) = socket.split();

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let session = orchestrator.connect(nickname, outbound_tx);
    info!(session_id = %session, "New WebSocket connection");

    let writer_handle = tokio::spawn(write_outbound(session, ws_sink, outbound_rx));
    let rate_limiter = PlayerRateLimiter::new(state.config.game.message_rate_limit);

    // Reader loop: WebSocket -> orchestrator
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check() {
                    warn!(session_id = %session, "Rate limited message");
                    continue;
                }
                orchestrator.record_heartbeat(session);

                match ClientMsg::parse(&text) {
                    Ok(msg) => dispatch(&orchestrator, session, msg),
                    Err(e) => {
                        debug!(session_id = %session, error = %e, "Failed to parse client message");
                        orchestrator.send_to(session, &ServerMsg::error(e.to_string()));
                    }
                }

                // Evicted while we were reading
                if !orchestrator.is_connected(session) {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                orchestrator.record_heartbeat(session);
            }
            Ok(Message::Close(_)) => {
                info!(session_id = %session, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(session_id = %session, error = %e, "WebSocket error");
                break;
            }
        }
    }

    orchestrator.handle_connection_lost(session);
    writer_handle.abort();

    info!(session_id = %session, "WebSocket connection closed");
}

/// Writer task: outbound queue -> WebSocket
async fn write_outbound(
    session: SessionId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                warn!(session_id = %session, error = %e, "Failed to serialize message");
                continue;
            }
        };
        if let Err(e) = ws_sink.send(Message::Text(json)).await {
            debug!(session_id = %session, error = %e, "WebSocket send failed");
            return;
        }
    }

    // Session dropped by the server
    let _ = ws_sink.send(Message::Close(None)).await;
}

/// Route one parsed client message
fn dispatch(orchestrator: &MatchOrchestrator, session: SessionId, msg: ClientMsg) {
    match msg {
        ClientMsg::SetNickname { nickname } => orchestrator.set_nickname(session, nickname),

        ClientMsg::JoinRoom { room_id } => {
            let success = orchestrator.add_player_to_room(room_id, session);
            orchestrator.send_to(session, &ServerMsg::JoinResult { success, room_id });
        }

        ClientMsg::FindMatch { game_type, options } => {
            let opts = RoomOptions {
                power_ups_enabled: options.power_ups_enabled(),
            };
            match orchestrator.find_match(session, game_type, opts) {
                Some(placement) => debug!(
                    session_id = %session,
                    room_id = %placement.room_id,
                    full = placement.is_room_full,
                    "Placed by matchmaking"
                ),
                None => {
                    orchestrator.send_to(session, &ServerMsg::error("Could not join matchmaking"))
                }
            }
        }

        ClientMsg::CreateRoom { game_type, options } => {
            let opts = RoomOptions {
                power_ups_enabled: options.power_ups_enabled(),
            };
            let reply = match orchestrator.create_room_for(session, game_type, opts) {
                Some(room_id) => ServerMsg::RoomCreated { room_id },
                None => ServerMsg::error("Cannot create a room while in a game"),
            };
            orchestrator.send_to(session, &reply);
        }

        ClientMsg::PlayerInput { room_id, input } => {
            orchestrator.handle_player_input(room_id, session, &input)
        }

        ClientMsg::PlayerReady { room_id, ready } => orchestrator.set_ready(session, room_id, ready),

        ClientMsg::GetRoomInfo { room_id } => {
            let room = orchestrator.room_info(room_id);
            orchestrator.send_to(session, &ServerMsg::RoomInfo { room });
        }

        ClientMsg::LeaveRoom { room_id } => {
            if orchestrator.leave_room(session, room_id) {
                orchestrator.send_to(session, &ServerMsg::LeftRoom { room_id });
            } else {
                orchestrator.send_to(session, &ServerMsg::error("Not in that room"));
            }
        }

        ClientMsg::Ping { timestamp } => orchestrator.send_to(
            session,
            &ServerMsg::Pong {
                timestamp,
                server_time: unix_millis(),
            },
        ),

        ClientMsg::RequestSync { room_id } => orchestrator.sync_client_state(room_id, session),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::matchmaking::RoomRegistry;
    use crate::session::testing::{detached_outbound, RecordingBroadcaster};
    use crate::store::ResultQueue;
    use std::sync::Arc;

    fn orchestrator() -> (MatchOrchestrator, Arc<RecordingBroadcaster>) {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let (queue, _rx) = ResultQueue::new(4);
        let orchestrator = MatchOrchestrator::new(
            RoomRegistry::with_seed(5, 3),
            &GameConfig::default(),
            broadcaster.clone(),
            queue,
        );
        (orchestrator, broadcaster)
    }

    fn send(orchestrator: &MatchOrchestrator, session: SessionId, text: &str) {
        dispatch(orchestrator, session, ClientMsg::parse(text).unwrap());
    }

    #[test]
    fn identity_without_secret_uses_query_nickname() {
        let query = WsQuery {
            nickname: Some(" ada ".to_string()),
            ..WsQuery::default()
        };
        assert_eq!(resolve_identity(&query, None).unwrap(), "ada");

        let generated = resolve_identity(&WsQuery::default(), None).unwrap();
        assert!(generated.starts_with("Player_"));
        assert_eq!(generated.len(), "Player_".len() + 8);
    }

    #[test]
    fn identity_with_secret_requires_a_token() {
        let query = WsQuery {
            nickname: Some("ada".to_string()),
            ..WsQuery::default()
        };
        assert!(matches!(
            resolve_identity(&query, Some("secret")),
            Err(AuthError::MissingToken)
        ));

        let query = WsQuery {
            token: Some("not.a.jwt".to_string()),
            ..WsQuery::default()
        };
        assert!(matches!(
            resolve_identity(&query, Some("secret")),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn ping_echoes_the_client_timestamp() {
        let (orchestrator, broadcaster) = orchestrator();
        let session = orchestrator.connect("ada".to_string(), detached_outbound());

        send(&orchestrator, session, r#"{"type":"ping","timestamp":42}"#);

        let pong = broadcaster.to(session).into_iter().find_map(|m| match m {
            ServerMsg::Pong { timestamp, server_time } => Some((timestamp, server_time)),
            _ => None,
        });
        let (timestamp, server_time) = pong.unwrap();
        assert_eq!(timestamp, Some(42));
        assert!(server_time > 0);
    }

    #[test]
    fn join_room_reports_success_per_room() {
        let (orchestrator, broadcaster) = orchestrator();
        let session = orchestrator.connect("ada".to_string(), detached_outbound());
        let room_id = orchestrator.create_room(Default::default(), RoomOptions::default());

        send(
            &orchestrator,
            session,
            &format!(r#"{{"type":"joinRoom","roomId":"{}"}}"#, Uuid::new_v4()),
        );
        send(
            &orchestrator,
            session,
            &format!(r#"{{"type":"joinRoom","roomId":"{}"}}"#, room_id),
        );

        let results: Vec<bool> = broadcaster
            .to(session)
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::JoinResult { success, .. } => Some(success),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec![false, true]);
    }

    #[test]
    fn room_info_and_leave_round_trip() {
        let (orchestrator, broadcaster) = orchestrator();
        let session = orchestrator.connect("ada".to_string(), detached_outbound());

        send(&orchestrator, session, r#"{"type":"createRoom","gameType":"four"}"#);
        let room_id = broadcaster
            .to(session)
            .into_iter()
            .find_map(|m| match m {
                ServerMsg::RoomCreated { room_id } => Some(room_id),
                _ => None,
            })
            .unwrap();

        send(
            &orchestrator,
            session,
            &format!(r#"{{"type":"getRoomInfo","roomId":"{}"}}"#, room_id),
        );
        assert!(broadcaster.to(session).iter().any(|m| matches!(
            m,
            ServerMsg::RoomInfo { room: Some(room) } if room.max_players == 4
        )));

        send(
            &orchestrator,
            session,
            &format!(r#"{{"type":"leaveRoom","roomId":"{}"}}"#, room_id),
        );
        assert!(broadcaster
            .to(session)
            .iter()
            .any(|m| matches!(m, ServerMsg::LeftRoom { room_id: id } if *id == room_id)));
        assert!(orchestrator.room_info(room_id).is_none());
    }

    #[test]
    fn set_nickname_replies() {
        let (orchestrator, broadcaster) = orchestrator();
        let session = orchestrator.connect("ada".to_string(), detached_outbound());

        send(&orchestrator, session, r#"{"type":"setNickname","nickname":"lovelace"}"#);

        assert!(broadcaster.to(session).iter().any(|m| matches!(
            m,
            ServerMsg::NicknameSet { nickname, .. } if nickname == "lovelace"
        )));
    }
}
