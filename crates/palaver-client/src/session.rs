//! The client session: connection handling and typed request senders.

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use palaver_net::{read_frame, write_frame};
use palaver_shared::protocol::{ClientRequest, ServerMessage};
use palaver_shared::types::MessageType;

use crate::error::ClientError;

/// Events surfaced by the background receive task.
#[derive(Debug)]
pub enum ClientEvent {
    /// A decoded inbound frame: a response to an earlier request or a
    /// `new_message` broadcast.
    Message(ServerMessage),
    /// The connection ended. Fires exactly once; the driver does not
    /// reconnect.
    Disconnected { reason: String },
}

/// One persistent connection to a Palaver server.
///
/// Sends go through the write half behind a mutex and never block the
/// receive loop, which runs in its own task.
pub struct ClientSession {
    writer: Mutex<OwnedWriteHalf>,
}

impl ClientSession {
    /// Connect and spawn the receive task.
    ///
    /// Returns the session plus the event channel receiver.
    pub async fn connect(
        addr: impl ToSocketAddrs,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (mut read_half, write_half) = stream.into_split();

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let reason = loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(payload)) => match ServerMessage::from_json(&payload) {
                        Ok(msg) => {
                            if events_tx.send(ClientEvent::Message(msg)).is_err() {
                                debug!("event receiver dropped, stopping receive loop");
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "undecodable server frame, skipping");
                        }
                    },
                    Ok(None) => break "connection closed by server".to_string(),
                    Err(e) => break e.to_string(),
                }
            };
            let _ = events_tx.send(ClientEvent::Disconnected { reason });
        });

        Ok((
            Self {
                writer: Mutex::new(write_half),
            },
            events_rx,
        ))
    }

    /// Send one request frame.
    pub async fn send(&self, request: &ClientRequest) -> Result<(), ClientError> {
        let json = request.to_json()?;
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &json).await?;
        Ok(())
    }

    pub async fn register(
        &self,
        username: &str,
        display_name: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        self.send(&ClientRequest::Register {
            username: username.to_string(),
            display_name: display_name.to_string(),
            password: password.to_string(),
        })
        .await
    }

    pub async fn auth(&self, username: &str, password: &str) -> Result<(), ClientError> {
        self.send(&ClientRequest::Auth {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await
    }

    pub async fn find_user(&self, display_name: &str) -> Result<(), ClientError> {
        self.send(&ClientRequest::FindUser {
            display_name: display_name.to_string(),
        })
        .await
    }

    /// Find-or-create the private chat with `peer_user_id`.
    pub async fn create_chat(&self, peer_user_id: i64) -> Result<(), ClientError> {
        self.send(&ClientRequest::CreateChat {
            user_id: peer_user_id,
        })
        .await
    }

    pub async fn get_chats(&self) -> Result<(), ClientError> {
        self.send(&ClientRequest::GetChats).await
    }

    pub async fn get_messages(&self, chat_id: i64, limit: Option<u32>) -> Result<(), ClientError> {
        self.send(&ClientRequest::GetMessages { chat_id, limit }).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        content: &str,
        encrypted_content: Option<String>,
        message_type: MessageType,
    ) -> Result<(), ClientError> {
        self.send(&ClientRequest::SendMessage {
            chat_id,
            content: content.to_string(),
            encrypted_content,
            message_type,
        })
        .await
    }

    pub async fn create_secure_chat(
        &self,
        chat_key: &str,
        encryption_key: Option<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientRequest::CreateSecureChat {
            chat_key: chat_key.to_string(),
            encryption_key,
        })
        .await
    }

    pub async fn join_secure_chat(
        &self,
        chat_key: &str,
        encryption_key: Option<String>,
    ) -> Result<(), ClientError> {
        self.send(&ClientRequest::JoinSecureChat {
            chat_key: chat_key.to_string(),
            encryption_key,
        })
        .await
    }

    pub async fn close_secure_chat(&self, chat_key: &str) -> Result<(), ClientError> {
        self.send(&ClientRequest::CloseSecureChat {
            chat_key: chat_key.to_string(),
        })
        .await
    }

    pub async fn auto_close_secure_chat(&self, chat_key: &str) -> Result<(), ClientError> {
        self.send(&ClientRequest::AutoCloseSecureChat {
            chat_key: chat_key.to_string(),
        })
        .await
    }

    pub async fn clear_chat_history(&self) -> Result<(), ClientError> {
        self.send(&ClientRequest::ClearChatHistory).await
    }

    pub async fn get_chat_info(&self, chat_id: i64) -> Result<(), ClientError> {
        self.send(&ClientRequest::GetChatInfo { chat_id }).await
    }

    pub async fn change_display_name(&self, new_display_name: &str) -> Result<(), ClientError> {
        self.send(&ClientRequest::ChangeDisplayName {
            new_display_name: new_display_name.to_string(),
        })
        .await
    }

    /// Announce the disconnect and drop the connection.
    pub async fn disconnect(self) -> Result<(), ClientError> {
        self.send(&ClientRequest::Disconnect).await
    }
}
