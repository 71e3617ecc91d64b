//! Full lifecycle of an authenticated client WebSocket connection.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthFailure, SessionClaims},
    dto::ws::{CLOSE_POLICY_VIOLATION, ClientMessage, ServerMessage},
    error::{ErrorCode, ServiceError},
    services::membership,
    state::{SharedState, registry::ConnectionId, room::RoomCommand},
};

/// Drive one upgraded socket from handshake to disconnect.
///
/// `auth` is the verification result computed during the handshake; a
/// rejected token closes the socket with a policy-violation code before
/// anything else is sent.
pub async fn handle_socket(
    state: SharedState,
    socket: WebSocket,
    auth: Result<SessionClaims, AuthFailure>,
) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match auth {
        Ok(claims) => claims,
        Err(failure) => {
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: failure.to_string().into(),
                })))
                .await;
            return;
        }
    };
    let user_id = claims.user_id;

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames; it also preserves per-client ordering.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let conn_id = Uuid::new_v4();
    if state
        .registry()
        .attach(conn_id, user_id, outbound_tx.clone())
        .is_err()
    {
        let _ = outbound_tx.send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: "connection limit".into(),
        })));
        finalize(writer_task, outbound_tx).await;
        return;
    }

    info!(user_id, %conn_id, "client connected");
    state
        .registry()
        .send(conn_id, &ServerMessage::Connected { user_id });

    // Mirrors the seat held by this socket so membership can be unwound
    // even when a broken write already pruned the registry entry.
    let mut seated_room: Option<String> = None;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if !state.registry().allow_frame(conn_id) {
                    state.registry().send(
                        conn_id,
                        &ServerMessage::error(ErrorCode::RateLimited, "rate limit exceeded"),
                    );
                    continue;
                }

                match ClientMessage::from_json_str(&text) {
                    Ok(message) => {
                        dispatch(&state, conn_id, user_id, message, &mut seated_room).await
                    }
                    Err(err) => {
                        state
                            .registry()
                            .send(conn_id, &ServerMessage::error(err.error_code(), err.to_string()));
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(user_id, %conn_id, error = %err, "websocket receive error");
                break;
            }
        }
    }

    // A dropped connection forfeits its seat; the executor (or the store,
    // when no quiz is live) unwinds the durable membership.
    let detached_room = state
        .registry()
        .detach(conn_id)
        .await
        .and_then(|detached| detached.room_id);
    if let Some(room_id) = detached_room.or(seated_room) {
        if let Err(err) = membership::leave(&state, user_id, &room_id).await {
            warn!(user_id, room_id, error = %err, "failed to unwind membership");
        }
    }

    info!(user_id, %conn_id, "client disconnected");
    finalize(writer_task, outbound_tx).await;
}

async fn dispatch(
    state: &SharedState,
    conn_id: ConnectionId,
    user_id: i64,
    message: ClientMessage,
    seated_room: &mut Option<String>,
) {
    match message {
        ClientMessage::Join { room_id } => {
            if handle_join(state, conn_id, user_id, room_id.clone()).await {
                *seated_room = Some(room_id);
            }
        }
        ClientMessage::StartQuiz { room_id } => {
            route_to_room(
                state,
                conn_id,
                &room_id,
                RoomCommand::StartQuiz { user_id, conn_id },
            );
        }
        ClientMessage::SubmitAnswer {
            room_id,
            question_index,
            choice_idx,
        } => {
            route_to_room(
                state,
                conn_id,
                &room_id,
                RoomCommand::SubmitAnswer {
                    user_id,
                    conn_id,
                    question_index,
                    choice_idx,
                },
            );
        }
        ClientMessage::LeaveRoom { room_id } => {
            state.registry().unseat(conn_id, &room_id).await;
            if seated_room.as_deref() == Some(room_id.as_str()) {
                *seated_room = None;
            }
            if let Err(err) = membership::leave(state, user_id, &room_id).await {
                report(state, conn_id, &err);
            }
        }
    }
}

/// Returns true when the join succeeded and the socket is now seated.
async fn handle_join(
    state: &SharedState,
    conn_id: ConnectionId,
    user_id: i64,
    room_id: String,
) -> bool {
    match membership::join(state, user_id, &room_id).await {
        Ok(info) => {
            state.registry().seat(conn_id, &room_id).await;
            state.registry().send(
                conn_id,
                &ServerMessage::JoinedRoom {
                    room_id: room_id.clone(),
                    participants: info.participants,
                },
            );

            let handle = state
                .rooms()
                .handle_for_join(&info.room, state.registry(), state.store());
            handle.send(RoomCommand::Seat {
                user_id,
                user_name: info.user_name,
                announce: info.newly_joined,
            });
            true
        }
        Err(err) => {
            report(state, conn_id, &err);
            false
        }
    }
}

/// Queue a command on the room's serial executor, if one is live.
fn route_to_room(
    state: &SharedState,
    conn_id: ConnectionId,
    room_id: &str,
    command: RoomCommand,
) {
    let delivered = state
        .rooms()
        .get_live(room_id)
        .map(|handle| handle.send(command))
        .unwrap_or(false);

    if !delivered {
        report(
            state,
            conn_id,
            &ServiceError::RoomNotFound(room_id.to_string()),
        );
    }
}

fn report(state: &SharedState, conn_id: ConnectionId, err: &ServiceError) {
    state
        .registry()
        .send(conn_id, &ServerMessage::error(err.error_code(), err.to_string()));
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
