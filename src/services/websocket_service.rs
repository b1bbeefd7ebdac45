use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::SessionInboundMessage,
    error::ServiceError,
    services::{
        identity::ConnectRole,
        session_actor::{SessionCommand, SessionHandle},
    },
    state::{SharedState, registry::ConnectionId},
};

/// Handle the full lifecycle of one session WebSocket.
///
/// The role was decided before the upgrade and stays fixed for the lifetime of
/// the socket. Protocol handling happens in the session actor; this task only
/// pumps frames in and out.
pub async fn handle_socket(state: SharedState, key: String, role: ConnectRole, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let connection_id = ConnectionId::new();
    let Some(handle) = attach(&state, &key, connection_id, role, &outbound_tx) else {
        warn!(session = %key, connection = %connection_id, "session actor unavailable; closing socket");
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    };

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match SessionInboundMessage::from_json_str(&text) {
                Ok(SessionInboundMessage::Unknown) => {
                    debug!(session = %key, connection = %connection_id, payload = %text, "ignoring unknown message type");
                }
                Ok(message) => {
                    if handle
                        .send(SessionCommand::Inbound {
                            connection_id,
                            message,
                        })
                        .is_err()
                    {
                        info!(session = %key, connection = %connection_id, "session actor stopped; closing socket");
                        break;
                    }
                }
                Err(err) => {
                    debug!(session = %key, connection = %connection_id, error = %err, "dropping malformed session message");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                debug!(session = %key, connection = %connection_id, "client closed socket");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(session = %key, connection = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    let _ = handle.send(SessionCommand::Closed { connection_id });
    finalize(writer_task, outbound_tx).await;
}

/// Register the socket with the session actor, respawning it once if it was
/// evicted between lookup and registration.
fn attach(
    state: &SharedState,
    key: &str,
    connection_id: ConnectionId,
    role: ConnectRole,
    tx: &mpsc::UnboundedSender<Message>,
) -> Option<SessionHandle> {
    let mut last_error: Option<ServiceError> = None;

    for _ in 0..2 {
        let handle = state.sessions().resolve(key);
        match handle.send(SessionCommand::Connect {
            connection_id,
            role: role.clone(),
            tx: tx.clone(),
        }) {
            Ok(()) => return Some(handle),
            Err(err) => last_error = Some(err),
        }
    }

    if let Some(err) = last_error {
        warn!(session = %key, error = %err, "failed to register socket with session actor");
    }
    None
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
