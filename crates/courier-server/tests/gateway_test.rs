//! End-to-end tests: a real listener, the gateway over WebSocket and the
//! HTTP routes over reqwest.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use courier_client::{ChatSession, HttpTransport, PushFeed, ViewState};
use courier_db::Database;
use courier_server::{app_state, build_router};
use courier_types::api::Claims;
use courier_types::events::GatewayEvent;
use courier_types::models::{Message, MessageContent};

const SECRET: &str = "gateway-test-secret";

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    alice: Uuid,
    bob: Uuid,
}

impl TestServer {
    fn http(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn gateway(&self) -> String {
        format!("ws://{}/gateway", self.addr)
    }
}

async fn start_test_server() -> TestServer {
    let db = Arc::new(Database::open_in_memory().expect("Failed to open DB"));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    db.insert_user(alice, "alice").unwrap();
    db.insert_user(bob, "bob").unwrap();

    let app = build_router(app_state(db, SECRET.into()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, alice, bob }
}

fn token_for(user_id: Uuid, username: &str) -> String {
    let claims = Claims {
        sub: user_id,
        username: username.into(),
        exp: 4_102_444_800,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn connect(server: &TestServer, user_id: Uuid) -> Socket {
    let url = format!("{}?token={}", server.gateway(), token_for(user_id, "tester"));
    let (socket, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("Failed to connect to gateway");
    socket
}

/// Next gateway event, skipping control frames. Panics after two seconds.
async fn next_event(socket: &mut Socket) -> GatewayEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str::<GatewayEvent>(text.as_str()).unwrap();
                }
                Some(Ok(WsMessage::Close(_))) | None => panic!("gateway closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("gateway error: {}", e),
            }
        }
    })
    .await
    .expect("Timed out waiting for gateway event")
}

/// Read events until an `OnlineUsers` arrives.
async fn next_online(socket: &mut Socket) -> Vec<Uuid> {
    loop {
        if let GatewayEvent::OnlineUsers { user_ids } = next_event(socket).await {
            return user_ids;
        }
    }
}

async fn post_message(server: &TestServer, from: Uuid, to: Uuid, body: serde_json::Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/messages/send/{}", server.http(), to))
        .bearer_auth(token_for(from, "tester"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn connect_sends_ready_then_online_set() {
    let server = start_test_server().await;
    let mut alice = connect(&server, server.alice).await;

    assert_eq!(
        next_event(&mut alice).await,
        GatewayEvent::Ready { user_id: server.alice }
    );
    assert_eq!(next_online(&mut alice).await, vec![server.alice]);

    let mut bob = connect(&server, server.bob).await;
    assert_eq!(
        next_event(&mut bob).await,
        GatewayEvent::Ready { user_id: server.bob }
    );

    let seen_by_alice = next_online(&mut alice).await;
    assert!(seen_by_alice.contains(&server.alice));
    assert!(seen_by_alice.contains(&server.bob));
}

#[tokio::test]
async fn invalid_token_is_refused_at_handshake() {
    let server = start_test_server().await;

    let url = format!("{}?token=not-a-jwt", server.gateway());
    assert!(tokio_tungstenite::connect_async(url).await.is_err());

    assert!(tokio_tungstenite::connect_async(server.gateway()).await.is_err());
}

#[tokio::test]
async fn disconnect_removes_user_from_online_set() {
    let server = start_test_server().await;
    let mut alice = connect(&server, server.alice).await;
    next_online(&mut alice).await;

    let mut bob = connect(&server, server.bob).await;
    next_online(&mut alice).await;
    next_online(&mut bob).await;

    bob.close(None).await.unwrap();
    assert_eq!(next_online(&mut alice).await, vec![server.alice]);
}

#[tokio::test]
async fn reconnect_counts_user_once() {
    let server = start_test_server().await;
    let mut first = connect(&server, server.alice).await;
    next_online(&mut first).await;

    let mut second = connect(&server, server.alice).await;
    assert_eq!(next_online(&mut second).await, vec![server.alice]);

    // The replaced connection is closed by the server.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match first.next().await {
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "replaced connection stayed open");

    let online: serde_json::Value = reqwest::Client::new()
        .get(format!("{}/users/online", server.http()))
        .bearer_auth(token_for(server.bob, "bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(online["user_ids"], json!([server.alice]));
}

#[tokio::test]
async fn sent_message_is_pushed_to_receiver_and_stored() {
    let server = start_test_server().await;
    let mut bob = connect(&server, server.bob).await;
    next_online(&mut bob).await;

    let response = post_message(&server, server.alice, server.bob, json!({ "text": "hello bob" })).await;
    assert_eq!(response.status(), 201);
    let sent: Message = response.json().await.unwrap();
    assert_eq!(sent.text.as_deref(), Some("hello bob"));

    assert_eq!(next_event(&mut bob).await, GatewayEvent::NewMessage(sent.clone()));

    let history: Vec<Message> = reqwest::Client::new()
        .get(format!("{}/messages/{}", server.http(), server.alice))
        .bearer_auth(token_for(server.bob, "bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history, vec![sent]);
}

#[tokio::test]
async fn offline_receiver_still_gets_message_in_history() {
    let server = start_test_server().await;

    let response = post_message(&server, server.alice, server.bob, json!({ "image": "https://img.example/cat.png" })).await;
    assert_eq!(response.status(), 201);

    let history: Vec<Message> = reqwest::Client::new()
        .get(format!("{}/messages/{}", server.http(), server.alice))
        .bearer_auth(token_for(server.bob, "bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].image.as_deref(), Some("https://img.example/cat.png"));
}

#[tokio::test]
async fn rejected_sends_map_to_status_codes() {
    let server = start_test_server().await;

    let empty = post_message(&server, server.alice, server.bob, json!({ "text": "  " })).await;
    assert_eq!(empty.status(), 400);

    let to_self = post_message(&server, server.alice, server.alice, json!({ "text": "me" })).await;
    assert_eq!(to_self.status(), 400);

    let unknown = post_message(&server, server.alice, Uuid::new_v4(), json!({ "text": "hi" })).await;
    assert_eq!(unknown.status(), 400);

    let anonymous = reqwest::Client::new()
        .post(format!("{}/messages/send/{}", server.http(), server.bob))
        .json(&json!({ "text": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), 401);
}

#[tokio::test]
async fn chat_session_round_trip() {
    let server = start_test_server().await;

    let bob_feed = PushFeed::connect(&server.gateway(), &token_for(server.bob, "bob"))
        .await
        .unwrap();
    let mut online = bob_feed.watch_online();
    tokio::time::timeout(Duration::from_secs(2), online.wait_for(|ids| ids.contains(&server.bob)))
        .await
        .expect("bob never showed up online")
        .unwrap();

    let mut bob = ChatSession::new(
        server.bob,
        HttpTransport::new(server.http(), token_for(server.bob, "bob")),
        &bob_feed,
    );
    bob.open(server.alice).await.unwrap();
    assert_eq!(bob.state(), ViewState::Ready);

    let alice_feed = PushFeed::new();
    let mut alice = ChatSession::new(
        server.alice,
        HttpTransport::new(server.http(), token_for(server.alice, "alice")),
        &alice_feed,
    );
    alice.open(server.bob).await.unwrap();

    let sent = alice.send(MessageContent::text("hi bob")).await.unwrap();
    assert_eq!(alice.entries().len(), 1);

    tokio::time::timeout(Duration::from_secs(2), async {
        while bob.entries().is_empty() {
            bob.changed().await;
        }
    })
    .await
    .expect("push never reached bob's view");
    assert_eq!(bob.entries()[0].message, sent);

    let err = alice.send(MessageContent::text("")).await.unwrap_err();
    assert!(matches!(err, courier_client::ClientError::EmptyMessage));
}
