//! End-to-end tests: real server, real client sessions over TCP.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use palaver_client::{ClientEvent, ClientSession};
use palaver_server::{Server, ServerConfig};
use palaver_shared::protocol::ServerMessage;
use palaver_shared::types::{MessageType, UserData};

async fn start_server() -> (SocketAddr, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        db_path: Some(dir.path().join("test.db")),
        max_connections: 64,
        read_timeout: None,
    };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, dir)
}

async fn next_message(rx: &mut UnboundedReceiver<ClientEvent>) -> ServerMessage {
    let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for server message")
        .expect("event channel closed");
    match event {
        ClientEvent::Message(msg) => msg,
        ClientEvent::Disconnected { reason } => panic!("unexpected disconnect: {reason}"),
    }
}

async fn assert_no_message(rx: &mut UnboundedReceiver<ClientEvent>) {
    let got = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(got.is_err(), "expected silence, got {:?}", got.unwrap());
}

/// Register and authenticate a fresh user over the wire.
async fn signup(
    addr: SocketAddr,
    username: &str,
) -> (ClientSession, UnboundedReceiver<ClientEvent>, UserData) {
    let (session, mut rx) = ClientSession::connect(addr).await.unwrap();

    session.register(username, username, "password").await.unwrap();
    match next_message(&mut rx).await {
        ServerMessage::RegisterResponse { success: true, .. } => {}
        other => panic!("registration failed: {other:?}"),
    }

    session.auth(username, "password").await.unwrap();
    let user = match next_message(&mut rx).await {
        ServerMessage::AuthResponse {
            success: true,
            user_data: Some(user),
            ..
        } => user,
        other => panic!("auth failed: {other:?}"),
    };

    (session, rx, user)
}

#[tokio::test]
async fn register_auth_and_duplicate_username() {
    let (addr, _dir) = start_server().await;
    let (_alice, _rx, user) = signup(addr, "alice").await;
    assert_eq!(user.username, "alice");

    let (session, mut rx) = ClientSession::connect(addr).await.unwrap();
    session.register("alice", "someone else", "pw").await.unwrap();
    match next_message(&mut rx).await {
        ServerMessage::RegisterResponse {
            success: false,
            error: Some(error),
            ..
        } => assert!(error.to_lowercase().contains("taken"), "error: {error}"),
        other => panic!("expected duplicate-username failure, got {other:?}"),
    }

    session.auth("alice", "wrong-password").await.unwrap();
    match next_message(&mut rx).await {
        ServerMessage::AuthResponse { success: false, error: Some(_), .. } => {}
        other => panic!("expected auth failure, got {other:?}"),
    }
}

#[tokio::test]
async fn broadcast_reaches_peer_but_not_sender_or_bystander() {
    let (addr, _dir) = start_server().await;
    let (alice, mut alice_rx, _alice_user) = signup(addr, "alice").await;
    let (_bob, mut bob_rx, bob_user) = signup(addr, "bob").await;
    let (_carol, mut carol_rx, _carol_user) = signup(addr, "carol").await;

    alice.create_chat(bob_user.user_id).await.unwrap();
    let chat_id = match next_message(&mut alice_rx).await {
        ServerMessage::CreateChatResponse {
            success: true,
            chat_id: Some(chat_id),
            ..
        } => chat_id,
        other => panic!("create_chat failed: {other:?}"),
    };

    alice
        .send_message(chat_id, "hello bob", None, MessageType::Normal)
        .await
        .unwrap();

    match next_message(&mut bob_rx).await {
        ServerMessage::NewMessage {
            chat_id: got_chat,
            sender_name,
            content,
            ..
        } => {
            assert_eq!(got_chat, chat_id);
            assert_eq!(sender_name, "alice");
            assert_eq!(content, "hello bob");
        }
        other => panic!("expected new_message, got {other:?}"),
    }

    assert_no_message(&mut alice_rx).await;
    assert_no_message(&mut bob_rx).await;
    // Carol shares no chat with alice and must not see the message.
    assert_no_message(&mut carol_rx).await;
}

#[tokio::test]
async fn chat_names_exclude_the_caller() {
    let (addr, _dir) = start_server().await;
    let (alice, mut alice_rx, _) = signup(addr, "alice").await;
    let (bob, mut bob_rx, bob_user) = signup(addr, "bob").await;

    alice.create_chat(bob_user.user_id).await.unwrap();
    next_message(&mut alice_rx).await;

    alice.get_chats().await.unwrap();
    match next_message(&mut alice_rx).await {
        ServerMessage::GetChatsResponse { chats, .. } => {
            assert_eq!(chats.len(), 1);
            assert_eq!(chats[0].chat_name, "bob");
        }
        other => panic!("expected chats, got {other:?}"),
    }

    bob.get_chats().await.unwrap();
    match next_message(&mut bob_rx).await {
        ServerMessage::GetChatsResponse { chats, .. } => {
            assert_eq!(chats[0].chat_name, "alice");
        }
        other => panic!("expected chats, got {other:?}"),
    }
}

#[tokio::test]
async fn message_history_roundtrip() {
    let (addr, _dir) = start_server().await;
    let (alice, mut alice_rx, _) = signup(addr, "alice").await;
    let (_bob, _bob_rx, bob_user) = signup(addr, "bob").await;

    alice.create_chat(bob_user.user_id).await.unwrap();
    let chat_id = match next_message(&mut alice_rx).await {
        ServerMessage::CreateChatResponse { chat_id: Some(id), .. } => id,
        other => panic!("create_chat failed: {other:?}"),
    };

    for i in 0..3 {
        alice
            .send_message(chat_id, &format!("msg {i}"), None, MessageType::Normal)
            .await
            .unwrap();
    }

    // get_messages needs no authentication per the protocol contract.
    let (visitor, mut visitor_rx) = ClientSession::connect(addr).await.unwrap();
    visitor.get_messages(chat_id, Some(2)).await.unwrap();
    match next_message(&mut visitor_rx).await {
        ServerMessage::GetMessagesResponse { messages, .. } => {
            assert_eq!(messages.len(), 2);
            // Newest first.
            assert_eq!(messages[0].content, "msg 2");
            assert_eq!(messages[1].content, "msg 1");
        }
        other => panic!("expected messages, got {other:?}"),
    }
}

#[tokio::test]
async fn secure_chat_lifecycle() {
    let (addr, _dir) = start_server().await;
    let (alice, mut alice_rx, _) = signup(addr, "alice").await;
    let (bob, mut bob_rx, _) = signup(addr, "bob").await;

    alice.create_secure_chat("war-room", None).await.unwrap();
    let (chat_key, encryption_key) = match next_message(&mut alice_rx).await {
        ServerMessage::CreateSecureChatResponse {
            success: true,
            chat_key: Some(key),
            session_id: Some(_),
            encryption_key: Some(enc),
            ..
        } => (key, enc),
        other => panic!("create_secure_chat failed: {other:?}"),
    };
    assert_eq!(chat_key, "war-room");

    // Creating the same key again fails.
    bob.create_secure_chat("war-room", None).await.unwrap();
    match next_message(&mut bob_rx).await {
        ServerMessage::CreateSecureChatResponse {
            success: false,
            error: Some(error),
            ..
        } => assert!(error.to_lowercase().contains("exists"), "error: {error}"),
        other => panic!("expected duplicate-key failure, got {other:?}"),
    }

    // Wrong non-empty encryption key is rejected.
    bob.join_secure_chat("war-room", Some("bogus-key".into()))
        .await
        .unwrap();
    match next_message(&mut bob_rx).await {
        ServerMessage::JoinSecureChatResponse { success: false, error: Some(_), .. } => {}
        other => panic!("expected join failure, got {other:?}"),
    }

    // Joining without a key succeeds.
    bob.join_secure_chat("war-room", None).await.unwrap();
    match next_message(&mut bob_rx).await {
        ServerMessage::JoinSecureChatResponse {
            success: true,
            messages: Some(messages),
            ..
        } => assert!(messages.is_empty()),
        other => panic!("expected join success, got {other:?}"),
    }

    // Joining with the exact key also succeeds.
    bob.join_secure_chat("war-room", Some(encryption_key)).await.unwrap();
    match next_message(&mut bob_rx).await {
        ServerMessage::JoinSecureChatResponse { success: true, .. } => {}
        other => panic!("expected join success, got {other:?}"),
    }

    // Close, then the key is gone.
    alice.close_secure_chat("war-room").await.unwrap();
    match next_message(&mut alice_rx).await {
        ServerMessage::CloseSecureChatResponse { success: true, .. } => {}
        other => panic!("close failed: {other:?}"),
    }

    bob.join_secure_chat("war-room", None).await.unwrap();
    match next_message(&mut bob_rx).await {
        ServerMessage::JoinSecureChatResponse {
            success: false,
            error: Some(error),
            ..
        } => assert!(error.to_lowercase().contains("not found"), "error: {error}"),
        other => panic!("expected not-found, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_secure_chat_creation_has_one_winner() {
    let (addr, _dir) = start_server().await;
    const N: usize = 6;

    let mut clients = Vec::new();
    for _ in 0..N {
        clients.push(ClientSession::connect(addr).await.unwrap());
    }

    let mut tasks = Vec::new();
    for (session, mut rx) in clients {
        tasks.push(tokio::spawn(async move {
            session.create_secure_chat("contested", None).await.unwrap();
            match next_message(&mut rx).await {
                ServerMessage::CreateSecureChatResponse { success, error, .. } => {
                    if !success {
                        let error = error.unwrap_or_default();
                        assert!(error.to_lowercase().contains("exists"), "error: {error}");
                    }
                    success
                }
                other => panic!("unexpected response: {other:?}"),
            }
        }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one creation must win");
}

#[tokio::test]
async fn unauthenticated_scoped_requests_get_explicit_errors() {
    let (addr, _dir) = start_server().await;
    let (session, mut rx) = ClientSession::connect(addr).await.unwrap();

    session.get_chats().await.unwrap();
    match next_message(&mut rx).await {
        ServerMessage::GetChatsResponse { chats, error: Some(error) } => {
            assert!(chats.is_empty());
            assert_eq!(error, "not authenticated");
        }
        other => panic!("expected explicit denial, got {other:?}"),
    }

    session.change_display_name("ghost").await.unwrap();
    match next_message(&mut rx).await {
        ServerMessage::ChangeDisplayNameResponse { success: false, error: Some(error) } => {
            assert_eq!(error, "not authenticated");
        }
        other => panic!("expected explicit denial, got {other:?}"),
    }
}

#[tokio::test]
async fn display_name_change_updates_broadcast_sender_name() {
    let (addr, _dir) = start_server().await;
    let (alice, mut alice_rx, _) = signup(addr, "alice").await;
    let (_bob, mut bob_rx, bob_user) = signup(addr, "bob").await;

    alice.create_chat(bob_user.user_id).await.unwrap();
    let chat_id = match next_message(&mut alice_rx).await {
        ServerMessage::CreateChatResponse { chat_id: Some(id), .. } => id,
        other => panic!("create_chat failed: {other:?}"),
    };

    alice.change_display_name("Alicia").await.unwrap();
    match next_message(&mut alice_rx).await {
        ServerMessage::ChangeDisplayNameResponse { success: true, .. } => {}
        other => panic!("rename failed: {other:?}"),
    }

    alice
        .send_message(chat_id, "new name, who dis", None, MessageType::Normal)
        .await
        .unwrap();
    match next_message(&mut bob_rx).await {
        ServerMessage::NewMessage { sender_name, .. } => assert_eq!(sender_name, "Alicia"),
        other => panic!("expected new_message, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_json_frame_is_dropped_but_connection_survives() {
    let (addr, _dir) = start_server().await;

    // Raw socket so the garbage and the follow-up request share one
    // connection.
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    palaver_net::write_frame(&mut stream, "{not json at all")
        .await
        .unwrap();
    palaver_net::write_frame(&mut stream, r#"{"type":"find_user","display_name":"nobody"}"#)
        .await
        .unwrap();

    let payload = tokio::time::timeout(
        Duration::from_secs(3),
        palaver_net::read_frame(&mut stream),
    )
    .await
    .expect("timed out")
    .unwrap()
    .expect("connection closed unexpectedly");

    match ServerMessage::from_json(&payload).unwrap() {
        ServerMessage::FindUserResponse {
            success: false,
            user_data: None,
        } => {}
        other => panic!("expected find_user miss, got {other:?}"),
    }
}

#[tokio::test]
async fn secure_messages_fan_out_to_all_other_connections() {
    let (addr, _dir) = start_server().await;
    let (alice, mut alice_rx, _) = signup(addr, "alice").await;
    let (_bob, mut bob_rx, _) = signup(addr, "bob").await;

    alice.create_secure_chat("side-channel", None).await.unwrap();
    let (chat_id, encryption_key) = match next_message(&mut alice_rx).await {
        ServerMessage::CreateSecureChatResponse {
            chat_id: Some(chat_id),
            encryption_key: Some(key),
            ..
        } => (chat_id, key),
        other => panic!("create_secure_chat failed: {other:?}"),
    };

    let token = palaver_shared::crypto::encrypt_message("covert", &encryption_key).unwrap();
    alice
        .send_message(chat_id, "covert", Some(token.clone()), MessageType::Secure)
        .await
        .unwrap();

    // Secure chats track no membership, so every other connection gets the
    // event and filters client-side.
    match next_message(&mut bob_rx).await {
        ServerMessage::NewMessage {
            sender_name,
            encrypted_content,
            message_type,
            ..
        } => {
            assert_eq!(sender_name, "alice");
            assert_eq!(encrypted_content.as_deref(), Some(token.as_str()));
            assert_eq!(message_type, MessageType::Secure);
        }
        other => panic!("expected secure new_message, got {other:?}"),
    }
    assert_no_message(&mut alice_rx).await;
}

#[tokio::test]
async fn clear_history_only_touches_own_chats() {
    let (addr, _dir) = start_server().await;
    let (alice, mut alice_rx, _) = signup(addr, "alice").await;
    let (_bob, _bob_rx, bob_user) = signup(addr, "bob").await;
    let (carol, mut carol_rx, _) = signup(addr, "carol").await;
    let (_dave, _dave_rx, dave_user) = signup(addr, "dave").await;

    alice.create_chat(bob_user.user_id).await.unwrap();
    let ab = match next_message(&mut alice_rx).await {
        ServerMessage::CreateChatResponse { chat_id: Some(id), .. } => id,
        other => panic!("create_chat failed: {other:?}"),
    };
    carol.create_chat(dave_user.user_id).await.unwrap();
    let cd = match next_message(&mut carol_rx).await {
        ServerMessage::CreateChatResponse { chat_id: Some(id), .. } => id,
        other => panic!("create_chat failed: {other:?}"),
    };

    alice
        .send_message(ab, "to bob", None, MessageType::Normal)
        .await
        .unwrap();
    carol
        .send_message(cd, "to dave", None, MessageType::Normal)
        .await
        .unwrap();

    alice.clear_chat_history().await.unwrap();
    match next_message(&mut alice_rx).await {
        ServerMessage::ClearChatHistoryResponse { success: true, .. } => {}
        other => panic!("clear failed: {other:?}"),
    }

    alice.get_messages(ab, None).await.unwrap();
    match next_message(&mut alice_rx).await {
        ServerMessage::GetMessagesResponse { messages, .. } => assert!(messages.is_empty()),
        other => panic!("expected messages, got {other:?}"),
    }

    carol.get_messages(cd, None).await.unwrap();
    match next_message(&mut carol_rx).await {
        ServerMessage::GetMessagesResponse { messages, .. } => assert_eq!(messages.len(), 1),
        other => panic!("expected messages, got {other:?}"),
    }
}
