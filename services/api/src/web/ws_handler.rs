//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Each connection hosts one editing session: the client streams editor
//! changes, the session debounces them into document saves, and closing (or
//! simply disconnecting) flushes the buffer and records the session's stats.

use crate::web::{
    protocol::{ClientMessage, SaveState, ServerMessage},
    rest::today,
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use chrono::NaiveDate;
use quill_core::{EditingSession, PortError, SessionSummary};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How many times a session end is attempted before giving up. Content still
/// buffered after that is saved by the session's drop.
const FINISH_ATTEMPTS: u32 = 3;

/// Pause before the first retry of a session end; doubles on each retry.
const FINISH_RETRY_DELAY: Duration = Duration::from_millis(500);

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// What the main loop should do after a text message.
enum Flow {
    Continue,
    Close,
}

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn send_message(ws_sender: &WsSender, msg: &ServerMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {:?}", e);
            return false;
        }
    };
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_ok()
}

fn client_error(e: &PortError) -> String {
    match e {
        PortError::NotFound(_) => "Document not found.".to_string(),
        PortError::NotAuthorized => "Unauthorized: document belongs to another user.".to_string(),
        PortError::InvalidInput(message) => message.clone(),
        _ => "Failed to save your changes. They are kept and will be retried.".to_string(),
    }
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New WebSocket connection established for user: {}", user_id);

    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Initialization Phase ---
    let document_id = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => {
            match serde_json::from_str::<ClientMessage>(init_json.as_str()) {
                Ok(ClientMessage::Open { document_id }) => document_id,
                _ => {
                    error!("First message was not a valid Open message.");
                    let err_msg = ServerMessage::Error {
                        message: "The first message must open a document.".to_string(),
                    };
                    send_message(&ws_sender, &err_msg).await;
                    return;
                }
            }
        }
        _ => {
            error!("Client disconnected before sending Open message.");
            return;
        }
    };

    if let Err(e) = app_state.db.get_or_create_profile(user_id).await {
        error!("Failed to ensure profile for user {}: {:?}", user_id, e);
    }

    let session = EditingSession::new(
        app_state.db.clone(),
        user_id,
        document_id,
        app_state.session_config(),
    );
    let document = match session.load().await {
        Ok(document) => document,
        Err(e) => {
            warn!("Failed to open document {} for user {}: {:?}", document_id, user_id, e);
            let err_msg = ServerMessage::Error {
                message: client_error(&e),
            };
            send_message(&ws_sender, &err_msg).await;
            return;
        }
    };

    let opened = ServerMessage::SessionOpened {
        document_id,
        title: document.title,
        content: document.content,
        word_count: document.word_count,
    };
    if !send_message(&ws_sender, &opened).await {
        error!("Failed to send session opened message.");
        return;
    }

    // Forward save indicator changes for as long as the connection lives.
    let status_task = {
        let ws_sender = ws_sender.clone();
        let mut phases = session.subscribe();
        tokio::spawn(async move {
            while phases.changed().await.is_ok() {
                let state = SaveState::from(*phases.borrow_and_update());
                if !send_message(&ws_sender, &ServerMessage::SaveStatus { state }).await {
                    break;
                }
            }
        })
    };

    // --- 2. Main Message Loop ---
    let mut close_requested = false;
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Flow::Close = handle_text_message(text.as_str(), &session, &ws_sender).await {
                    info!("Client closed editing session for document {}.", document_id);
                    close_requested = true;
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close message.");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket receive error: {:?}", e);
                break;
            }
            None => {
                info!("Client disconnected.");
                break;
            }
        }
    }

    // --- 3. Cleanup ---
    // The session ends the same way whether the client asked or just went away.
    let summary = finish_session(&session, today(), FINISH_RETRY_DELAY).await;

    status_task.abort();
    if close_requested {
        let msg = match summary {
            Some(summary) => ServerMessage::from(summary),
            None => ServerMessage::Error {
                message: "Failed to record this session.".to_string(),
            },
        };
        if !send_message(&ws_sender, &msg).await {
            warn!("Client went away before the session summary was sent.");
        }
    }
    info!("WebSocket connection closed.");
}

/// Ends the session, retrying with a growing pause. Returns `None` when
/// every attempt failed.
async fn finish_session(
    session: &EditingSession,
    today: NaiveDate,
    retry_delay: Duration,
) -> Option<SessionSummary> {
    let mut delay = retry_delay;
    for attempt in 1..=FINISH_ATTEMPTS {
        match session.finish(today).await {
            Ok(summary) => return Some(summary),
            Err(e) => warn!(
                "Ending session for document {} failed (attempt {}/{}): {:?}",
                session.document_id(),
                attempt,
                FINISH_ATTEMPTS,
                e
            ),
        }
        if attempt < FINISH_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    let snapshot = session.snapshot();
    error!(
        "Abandoned session for document {} of user {}: {} words, {} XP not awarded",
        session.document_id(),
        session.user_id(),
        snapshot.session_words,
        snapshot.pending_xp
    );
    None
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(text: &str, session: &EditingSession, ws_sender: &WsSender) -> Flow {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(client_msg) => client_msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return Flow::Continue;
        }
    };

    match client_msg {
        ClientMessage::Change { content, word_count } => {
            let snapshot = session.on_change(content, word_count);
            send_message(ws_sender, &ServerMessage::from(snapshot)).await;
        }
        ClientMessage::Rename { title } => match session.rename(&title).await {
            Ok(true) => {
                send_message(ws_sender, &ServerMessage::TitleSaved { title }).await;
            }
            Ok(false) => {}
            Err(e) => {
                error!("Failed to rename document {}: {:?}", session.document_id(), e);
                let err_msg = ServerMessage::Error {
                    message: client_error(&e),
                };
                send_message(ws_sender, &err_msg).await;
            }
        },
        ClientMessage::Close => return Flow::Close,
        ClientMessage::Open { .. } => {
            warn!("Received subsequent Open message, which is ignored.");
        }
    }
    Flow::Continue
}
