//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::battle::runner::BattleMessage;
use crate::battle::types::{BattleId, CharacterId};
use crate::http::routes::AppError;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg, SnapshotEncoder};

/// Replies from the reader that the writer should send
const REPLY_CAPACITY: usize = 32;

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WsQuery {
    /// Send delta snapshots instead of full ones
    pub delta: bool,
    /// Character issuing commands on this socket, if any
    pub character_id: Option<CharacterId>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(battle_id): Path<BattleId>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let messages = state.battles.subscribe(battle_id)?;
    let latest = state.battles.get_state(battle_id)?;
    info!(battle_id = %battle_id, delta = query.delta, "WebSocket upgrade for battle stream");

    Ok(ws.on_upgrade(move |socket| async move {
        let welcome = ServerMsg::Welcome {
            battle_id,
            server_time: unix_millis(),
            state: (*latest).clone(),
        };
        let encoder = SnapshotEncoder::new(query.delta, Some((*latest).clone()));
        handle_socket(socket, battle_id, query.character_id, state, welcome, encoder, messages).await
    }))
}

/// Run the WebSocket session with read/write split
async fn handle_socket(
    socket: WebSocket,
    battle_id: BattleId,
    character_id: Option<CharacterId>,
    state: AppState,
    welcome: ServerMsg,
    mut encoder: SnapshotEncoder,
    mut messages: broadcast::Receiver<BattleMessage>,
) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(battle_id = %battle_id, error = %e, "Failed to send welcome");
        return;
    }

    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(REPLY_CAPACITY);

    // Spawn writer task: battle messages and replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = messages.recv() => match received {
                    Ok(message) => encoder.encode(message),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(battle_id = %battle_id, lagged_count = n, "Client lagged, skipping {} messages", n);
                        // Continue - don't disconnect for lag, next snapshot goes out in full
                        encoder.reset();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(battle_id = %battle_id, "Battle channel closed");
                        break;
                    }
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(battle_id = %battle_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> battle service
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let reply = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Command {
                        fleet_id,
                        command,
                        payload,
                    }) => match state
                        .battles
                        .queue_command(battle_id, fleet_id, command, payload, character_id)
                    {
                        Ok(command_id) => ServerMsg::CommandAccepted { command_id },
                        Err(e) => ServerMsg::error(e.code(), e.to_string()),
                    },
                    Ok(ClientMsg::Ping { t }) => ServerMsg::Pong {
                        t,
                        server_time: unix_millis(),
                    },
                    Err(e) => {
                        warn!(battle_id = %battle_id, error = %e, "Failed to parse client message");
                        ServerMsg::error("malformed_message", e.to_string())
                    }
                };

                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(battle_id = %battle_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(battle_id = %battle_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(battle_id = %battle_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Abort writer task
    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
