use crate::auth::verify_token;
use crate::relay::{chat, code, cursor, lifecycle, signaling};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use codejam_protocol::{ClientMessage, ParticipantData, ServerMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_direct(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            return false;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

async fn reject(mut sender: SplitSink<WebSocket, Message>, message: &str) {
    send_direct(
        &mut sender,
        &ServerMessage::Error {
            message: message.to_string(),
        },
    )
    .await;
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    if !state.registry.is_accepting() {
        reject(sender, "Server is shutting down").await;
        return;
    }

    // First message should be authentication
    let auth_msg = match receiver.next().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            tracing::warn!("WebSocket closed before authentication");
            return;
        }
    };

    let claims = match serde_json::from_str::<ClientMessage>(&auth_msg) {
        Ok(ClientMessage::Authenticate { token }) => {
            match verify_token(&token, &state.config.jwt_secret) {
                Ok(claims) => claims,
                Err(_) => {
                    reject(sender, "Invalid token").await;
                    return;
                }
            }
        }
        Ok(_) => {
            reject(sender, "First message must be authentication").await;
            return;
        }
        Err(e) => {
            tracing::warn!("Invalid auth message: {}", e);
            reject(sender, "Invalid message format").await;
            return;
        }
    };

    let participant = ParticipantData {
        connection_id: Uuid::new_v4(),
        user_id: claims.sub,
        display_name: claims.name,
    };
    let connection_id = participant.connection_id;

    if !send_direct(
        &mut sender,
        &ServerMessage::Authenticated {
            connection_id,
            ice_servers: state.config.ice_servers(),
        },
    )
    .await
    {
        return;
    }

    // Create channel for outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let Some(guard) = lifecycle::connect(&state, participant.clone(), tx).await else {
        reject(sender, "Server is shutting down").await;
        return;
    };

    tracing::info!(
        "User {} authenticated on WebSocket as connection {}",
        participant.user_id,
        connection_id
    );

    // Spawn task to forward messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        let _guard = guard;
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Handle incoming messages, one at a time and in arrival order
    loop {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            // Outbound queue closed by registry shutdown, or the socket died
            _ = &mut send_task => break,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("Invalid message from {}: {}", connection_id, e);
                        reply_error(&state, connection_id, format!("Invalid message: {}", e))
                            .await;
                        continue;
                    }
                };

                if let Err(e) = client_msg.validate(&state.config.limits) {
                    tracing::warn!("Rejected message from {}: {}", connection_id, e);
                    reply_error(&state, connection_id, e.to_string()).await;
                    continue;
                }

                handle_client_message(&state, &participant, client_msg).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::error!("WebSocket error for connection {}: {}", connection_id, e);
                break;
            }
            // Ping/pong frames are answered by the websocket layer
            Some(Ok(_)) => {}
        }
    }

    // Cleanup on disconnect
    let left = lifecycle::disconnect(&state, connection_id).await;
    send_task.abort();

    tracing::info!(
        "Connection {} disconnected (left {} sessions)",
        connection_id,
        left.len()
    );
}

async fn reply_error(state: &AppState, connection_id: Uuid, message: String) {
    state
        .registry
        .send_to(connection_id, &ServerMessage::Error { message })
        .await;
}

async fn handle_client_message(
    state: &AppState,
    participant: &ParticipantData,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Authenticate { .. } => {
            // Already authenticated
        }
        ClientMessage::Join { session_id } => {
            lifecycle::join(state, participant, session_id).await;
        }
        ClientMessage::Leave { session_id } => {
            lifecycle::leave(state, participant, session_id).await;
        }
        ClientMessage::CodeChange {
            session_id,
            change,
            revision,
        } => {
            code::on_code_change(state, participant, session_id, change, revision).await;
        }
        ClientMessage::CursorMove {
            session_id,
            line,
            column,
        } => {
            cursor::on_cursor_move(state, participant, session_id, line, column).await;
        }
        ClientMessage::ChatMessage { session_id, text } => {
            chat::on_chat_message(state, participant, session_id, text).await;
        }
        // WebRTC signaling
        ClientMessage::WebrtcOffer {
            session_id,
            sdp,
            target_id,
        } => {
            signaling::relay_offer(state, participant, session_id, target_id, sdp).await;
        }
        ClientMessage::WebrtcAnswer { sdp, target_id } => {
            signaling::relay_answer(state, participant, target_id, sdp).await;
        }
        ClientMessage::WebrtcIceCandidate {
            candidate,
            target_id,
        } => {
            signaling::relay_ice_candidate(state, participant, target_id, candidate).await;
        }
        ClientMessage::SaveSnapshot { session_id, code } => {
            lifecycle::save_snapshot(state, participant, session_id, code).await;
        }
        ClientMessage::Ping => {
            state
                .registry
                .send_to(participant.connection_id, &ServerMessage::Pong)
                .await;
        }
    }
}
