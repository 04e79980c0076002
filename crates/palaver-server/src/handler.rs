//! Per-connection request handling.
//!
//! Each accepted socket gets one reader task (this module) and one writer
//! task fed by an mpsc channel; replies and broadcast events share the
//! channel so a connection's outbound frames keep their order. A failing
//! request is answered with `{success: false, error}` and never takes the
//! connection or the server down.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use palaver_net::{read_frame, write_frame, FrameError};
use palaver_shared::constants::DEFAULT_MESSAGE_LIMIT;
use palaver_shared::protocol::{ClientRequest, ServerMessage};
use palaver_shared::types::{MessageType, UserData};
use palaver_store::{Database, StoreError};

use crate::registry::{ConnId, SessionRegistry};

const NOT_AUTHENTICATED: &str = "not authenticated";

/// State shared by every connection task.
pub struct SharedState {
    pub db: Mutex<Database>,
    pub registry: SessionRegistry,
    pub read_timeout: Option<Duration>,
}

/// Serve one client connection until it disconnects or violates the
/// framing protocol.
pub async fn run_connection(state: Arc<SharedState>, stream: TcpStream) {
    let conn_id = ConnId::next();
    let peer = stream.peer_addr().ok();
    info!(%conn_id, ?peer, "client connected");

    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    state.registry.register(conn_id, tx.clone()).await;

    // Writer task: owns the write half, serializes outbound messages.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match msg.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if let Err(e) = write_frame(&mut write_half, &json).await {
                debug!(error = %e, "write failed, closing writer");
                break;
            }
        }
    });

    loop {
        let frame = match state.read_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, read_frame(&mut read_half)).await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(%conn_id, "read timeout, closing connection");
                    break;
                }
            },
            None => read_frame(&mut read_half).await,
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            // Peer closed the stream cleanly.
            Ok(None) => break,
            Err(FrameError::Io(e)) => {
                debug!(%conn_id, error = %e, "read failed");
                break;
            }
            Err(e) => {
                warn!(%conn_id, error = %e, "framing violation, closing connection");
                break;
            }
        };

        let request = match ClientRequest::from_json(&payload) {
            Ok(request) => request,
            Err(e) => {
                // Protocol error: drop the frame, keep the connection.
                warn!(%conn_id, error = %e, "unparseable request, dropping frame");
                continue;
            }
        };

        if matches!(request, ClientRequest::Disconnect) {
            break;
        }

        dispatch(&state, conn_id, &tx, request).await;
    }

    let user = state.registry.remove(conn_id).await;
    match user {
        Some(user) => info!(%conn_id, display_name = %user.display_name, "user disconnected"),
        None => info!(%conn_id, "client disconnected"),
    }

    drop(tx);
    let _ = writer.await;
}

async fn dispatch(
    state: &Arc<SharedState>,
    conn_id: ConnId,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    request: ClientRequest,
) {
    match request {
        ClientRequest::Register {
            username,
            display_name,
            password,
        } => {
            let result = state
                .db
                .lock()
                .await
                .register_user(&username, &display_name, &password);
            let response = match result {
                Ok(secret_phrase) => {
                    info!(%username, "user registered");
                    ServerMessage::RegisterResponse {
                        success: true,
                        secret_phrase: Some(secret_phrase),
                        error: None,
                    }
                }
                Err(e) => ServerMessage::RegisterResponse {
                    success: false,
                    secret_phrase: None,
                    error: Some(store_error_message(&e)),
                },
            };
            reply(tx, response);
        }

        ClientRequest::Auth { username, password } => {
            let result = state.db.lock().await.authenticate_user(&username, &password);
            let response = match result {
                Ok(user) => {
                    info!(%conn_id, %username, "authenticated");
                    state.registry.authenticate(conn_id, user.clone()).await;
                    ServerMessage::AuthResponse {
                        success: true,
                        user_data: Some(user),
                        error: None,
                    }
                }
                Err(e) => ServerMessage::AuthResponse {
                    success: false,
                    user_data: None,
                    error: Some(store_error_message(&e)),
                },
            };
            reply(tx, response);
        }

        ClientRequest::FindUser { display_name } => {
            let user_data = state
                .db
                .lock()
                .await
                .find_user_by_display_name(&display_name)
                .unwrap_or_else(|e| {
                    error!(error = %e, "find_user failed");
                    None
                });
            reply(
                tx,
                ServerMessage::FindUserResponse {
                    success: user_data.is_some(),
                    user_data,
                },
            );
        }

        ClientRequest::CreateChat { user_id: peer_id } => {
            let Some(me) = require_auth(state, conn_id).await else {
                reply(
                    tx,
                    ServerMessage::CreateChatResponse {
                        success: false,
                        chat_id: None,
                        error: Some(NOT_AUTHENTICATED.into()),
                    },
                );
                return;
            };
            let result = state
                .db
                .lock()
                .await
                .get_or_create_private_chat(me.user_id, peer_id);
            let response = match result {
                Ok(chat_id) => ServerMessage::CreateChatResponse {
                    success: true,
                    chat_id: Some(chat_id),
                    error: None,
                },
                Err(e) => ServerMessage::CreateChatResponse {
                    success: false,
                    chat_id: None,
                    error: Some(store_error_message(&e)),
                },
            };
            reply(tx, response);
        }

        ClientRequest::GetChats => {
            let Some(me) = require_auth(state, conn_id).await else {
                reply(
                    tx,
                    ServerMessage::GetChatsResponse {
                        chats: Vec::new(),
                        error: Some(NOT_AUTHENTICATED.into()),
                    },
                );
                return;
            };
            let chats = state
                .db
                .lock()
                .await
                .get_user_chats(me.user_id)
                .unwrap_or_else(|e| {
                    error!(error = %e, "get_chats failed");
                    Vec::new()
                });
            reply(tx, ServerMessage::GetChatsResponse { chats, error: None });
        }

        ClientRequest::GetMessages { chat_id, limit } => {
            let limit = limit.unwrap_or(DEFAULT_MESSAGE_LIMIT);
            let messages = state
                .db
                .lock()
                .await
                .get_chat_messages(chat_id, limit)
                .unwrap_or_else(|e| {
                    error!(error = %e, chat_id, "get_messages failed");
                    Vec::new()
                });
            reply(tx, ServerMessage::GetMessagesResponse { chat_id, messages });
        }

        ClientRequest::SendMessage {
            chat_id,
            content,
            encrypted_content,
            message_type,
        } => {
            handle_send_message(state, conn_id, chat_id, content, encrypted_content, message_type)
                .await;
        }

        ClientRequest::CreateSecureChat {
            chat_key,
            encryption_key,
        } => {
            let result = state
                .db
                .lock()
                .await
                .create_secure_chat_session(&chat_key, encryption_key.as_deref());
            let response = match result {
                Ok(session) => {
                    info!(chat_key = %session.chat_key, "secure chat created");
                    ServerMessage::CreateSecureChatResponse {
                        success: true,
                        chat_id: Some(session.chat_id),
                        chat_key: Some(session.chat_key),
                        session_id: Some(session.session_id),
                        encryption_key: Some(session.encryption_key),
                        error: None,
                    }
                }
                Err(e) => ServerMessage::CreateSecureChatResponse {
                    success: false,
                    chat_id: None,
                    chat_key: None,
                    session_id: None,
                    encryption_key: None,
                    error: Some(store_error_message(&e)),
                },
            };
            reply(tx, response);
        }

        ClientRequest::JoinSecureChat {
            chat_key,
            encryption_key,
        } => {
            let response = handle_join_secure_chat(state, &chat_key, encryption_key).await;
            reply(tx, response);
        }

        ClientRequest::CloseSecureChat { chat_key } => {
            if require_auth(state, conn_id).await.is_none() {
                reply(
                    tx,
                    ServerMessage::CloseSecureChatResponse {
                        success: false,
                        error: Some(NOT_AUTHENTICATED.into()),
                    },
                );
                return;
            }
            let success = state
                .db
                .lock()
                .await
                .close_secure_chat(&chat_key)
                .unwrap_or_else(|e| {
                    error!(error = %e, "close_secure_chat failed");
                    false
                });
            reply(
                tx,
                ServerMessage::CloseSecureChatResponse {
                    success,
                    error: None,
                },
            );
        }

        ClientRequest::AutoCloseSecureChat { chat_key } => {
            // Best-effort cleanup, allowed without authentication.
            let success = state
                .db
                .lock()
                .await
                .close_secure_chat(&chat_key)
                .unwrap_or_else(|e| {
                    error!(error = %e, "auto_close_secure_chat failed");
                    false
                });
            reply(tx, ServerMessage::AutoCloseSecureChatResponse { success });
        }

        ClientRequest::ClearChatHistory => {
            let Some(me) = require_auth(state, conn_id).await else {
                reply(
                    tx,
                    ServerMessage::ClearChatHistoryResponse {
                        success: false,
                        error: Some(NOT_AUTHENTICATED.into()),
                    },
                );
                return;
            };
            let response = match state.db.lock().await.clear_user_chat_history(me.user_id) {
                Ok(()) => ServerMessage::ClearChatHistoryResponse {
                    success: true,
                    error: None,
                },
                Err(e) => ServerMessage::ClearChatHistoryResponse {
                    success: false,
                    error: Some(store_error_message(&e)),
                },
            };
            reply(tx, response);
        }

        ClientRequest::GetChatInfo { chat_id } => {
            let Some(me) = require_auth(state, conn_id).await else {
                reply(
                    tx,
                    ServerMessage::GetChatInfoResponse {
                        success: false,
                        chat_info: None,
                        error: Some(NOT_AUTHENTICATED.into()),
                    },
                );
                return;
            };
            let chat_info = state
                .db
                .lock()
                .await
                .get_chat_info(me.user_id, chat_id)
                .unwrap_or_else(|e| {
                    error!(error = %e, chat_id, "get_chat_info failed");
                    None
                });
            reply(
                tx,
                ServerMessage::GetChatInfoResponse {
                    success: chat_info.is_some(),
                    chat_info,
                    error: None,
                },
            );
        }

        ClientRequest::ChangeDisplayName { new_display_name } => {
            let Some(me) = require_auth(state, conn_id).await else {
                reply(
                    tx,
                    ServerMessage::ChangeDisplayNameResponse {
                        success: false,
                        error: Some(NOT_AUTHENTICATED.into()),
                    },
                );
                return;
            };
            let result = state
                .db
                .lock()
                .await
                .change_display_name(me.user_id, &new_display_name);
            let response = match result {
                Ok(()) => {
                    state
                        .registry
                        .set_display_name(conn_id, &new_display_name)
                        .await;
                    ServerMessage::ChangeDisplayNameResponse {
                        success: true,
                        error: None,
                    }
                }
                Err(e) => ServerMessage::ChangeDisplayNameResponse {
                    success: false,
                    error: Some(store_error_message(&e)),
                },
            };
            reply(tx, response);
        }

        // Handled by the connection loop before dispatch.
        ClientRequest::Disconnect => {}
    }
}

/// Persist a message and fan it out.
///
/// `send_message` is the one fire-and-forget request: it has no response
/// type, so failures (including unauthenticated senders) are logged only.
/// Normal messages go to the chat's participants; secure messages go to
/// every other connection because secure chats track no membership and
/// clients filter by chat id.
async fn handle_send_message(
    state: &Arc<SharedState>,
    conn_id: ConnId,
    chat_id: i64,
    content: String,
    encrypted_content: Option<String>,
    message_type: MessageType,
) {
    let Some(me) = require_auth(state, conn_id).await else {
        warn!(%conn_id, "unauthenticated send_message ignored");
        return;
    };

    // Secure chats have no participant rows; their chat ids come from the
    // session lookup instead.
    if message_type == MessageType::Normal {
        let is_member = state
            .db
            .lock()
            .await
            .is_chat_participant(me.user_id, chat_id)
            .unwrap_or(false);
        if !is_member {
            warn!(%conn_id, chat_id, "send_message to a foreign chat ignored");
            return;
        }
    }

    let saved = state.db.lock().await.save_message(
        chat_id,
        me.user_id,
        &content,
        encrypted_content.as_deref(),
        message_type,
    );
    if let Err(e) = saved {
        error!(error = %e, chat_id, "failed to persist message");
        return;
    }

    let event = ServerMessage::NewMessage {
        chat_id,
        sender_id: me.user_id,
        sender_name: me.display_name.clone(),
        content,
        encrypted_content,
        message_type,
        timestamp: Utc::now(),
    };

    match message_type {
        MessageType::Normal => {
            let participants = state
                .db
                .lock()
                .await
                .chat_participants(chat_id)
                .unwrap_or_else(|e| {
                    error!(error = %e, chat_id, "failed to load participants");
                    Vec::new()
                });
            state
                .registry
                .send_to_users(&participants, conn_id, &event)
                .await;
        }
        MessageType::Secure => {
            state.registry.send_to_all(conn_id, &event).await;
        }
    }
}

async fn handle_join_secure_chat(
    state: &Arc<SharedState>,
    chat_key: &str,
    encryption_key: Option<String>,
) -> ServerMessage {
    let session = match state.db.lock().await.get_secure_chat_session(chat_key) {
        Ok(Some(session)) => session,
        Ok(None) => {
            return join_failure("Secure chat not found");
        }
        Err(e) => {
            error!(error = %e, "join_secure_chat lookup failed");
            return join_failure("Secure chat not found");
        }
    };

    // Joining without a key is allowed; a non-empty key must match exactly.
    let key_ok = match encryption_key.as_deref() {
        None | Some("") => true,
        Some(supplied) => supplied == session.encryption_key,
    };
    if !key_ok {
        return join_failure("Wrong encryption key");
    }

    let messages = state
        .db
        .lock()
        .await
        .get_secure_messages(chat_key)
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to load secure messages");
            Vec::new()
        });

    ServerMessage::JoinSecureChatResponse {
        success: true,
        chat_id: Some(session.chat_id),
        chat_key: Some(chat_key.to_string()),
        session_id: Some(session.session_id),
        participants_count: Some(1),
        messages: Some(messages),
        error: None,
    }
}

fn join_failure(message: &str) -> ServerMessage {
    ServerMessage::JoinSecureChatResponse {
        success: false,
        chat_id: None,
        chat_key: None,
        session_id: None,
        participants_count: None,
        messages: None,
        error: Some(message.to_string()),
    }
}

async fn require_auth(state: &Arc<SharedState>, conn_id: ConnId) -> Option<UserData> {
    state.registry.user(conn_id).await
}

/// Surface store failures as response error strings. Domain errors carry
/// their own message; infrastructure errors are logged and generalized.
fn store_error_message(err: &StoreError) -> String {
    match err {
        StoreError::UsernameTaken
        | StoreError::WrongPassword
        | StoreError::DisplayNameTaken
        | StoreError::ChatKeyTaken
        | StoreError::NotFound => err.to_string(),
        other => {
            error!(error = %other, "store operation failed");
            "internal error".to_string()
        }
    }
}

fn reply(tx: &mpsc::UnboundedSender<ServerMessage>, msg: ServerMessage) {
    if tx.send(msg).is_err() {
        debug!("reply dropped: connection already closed");
    }
}
