use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, jwk::JwkSet, Algorithm, EncodingKey, Header};
use notechat_server::app;
use notechat_server::core::auth::jwks::JwksVerifier;
use notechat_server::config::{AppState, ServerConfig, TokenMode};
use notechat_server::core::mail::{MailError, Mailer};
use notechat_server::realtime::ChannelEvent;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_otp(&self, to: &str, code: &str, _valid_minutes: i64) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), code.to_string()));
        Ok(())
    }
}

fn test_config(dir: &TempDir) -> ServerConfig {
    let db = dir.path().join("api.sqlite");
    ServerConfig {
        port: 0,
        database_url: format!("sqlite://{}", db.to_string_lossy().replace('\\', "/")),
        database_max_connections: 4,
        tokens: TokenMode::Local {
            secret: "integration-secret".to_string(),
            ttl: Duration::from_secs(3600),
        },
        smtp: None,
        otp_ttl: Duration::from_secs(600),
        bcrypt_cost: 4,
        allowed_origins: vec!["http://localhost:3000".to_string()],
        max_concurrent_requests: 64,
        max_sockets: 8,
        store_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(30),
        socket_join_timeout: Duration::from_secs(10),
    }
}

async fn setup() -> (TempDir, AppState, Arc<RecordingMailer>, Router) {
    let dir = tempdir().unwrap();
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::build(test_config(&dir), mailer.clone()).await.unwrap();
    let router = app(state.clone());
    (dir, state, mailer, router)
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(router: &Router, uname: &str) -> String {
    let (status, body) = call(
        router,
        Method::POST,
        "/api/auth/createuser",
        None,
        Some(json!({
            "name": format!("{} Example", uname),
            "uname": uname,
            "email": format!("{}@test.com", uname),
            "password": "hunter22",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn message_read_flow_reaches_sender_channel() {
    let (_dir, state, _mailer, router) = setup().await;

    // 1. Two users, A listens on its channel
    let token_a = register(&router, "alice").await;
    let token_b = register(&router, "bob").await;
    let mut alice_rx = state.hub.subscribe("alice@test.com");

    // 2. A says hi to B
    let (status, body) = call(
        &router,
        Method::POST,
        "/api/chat/messages",
        Some(&token_a),
        Some(json!({ "receiver_email": "bob@test.com", "content": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let message_id = body["message"]["id"].as_str().unwrap().to_string();

    // 3. B sees one unread message
    let (status, body) = call(
        &router,
        Method::GET,
        "/api/chat/messages/alice@test.com",
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "hi");
    assert!(messages[0]["read_at"].is_null());
    assert_eq!(messages[0]["sender"]["uname"], "alice");

    // 4. B marks it read, twice
    let (status, body) = call(
        &router,
        Method::PATCH,
        "/api/chat/messages/read/alice@test.com",
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updatedCount"], 1);

    let (_, body) = call(
        &router,
        Method::PATCH,
        "/api/chat/messages/read/alice@test.com",
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(body["updatedCount"], 0);

    // 5. A got its own message:new, then the read receipt
    assert!(matches!(alice_rx.try_recv().unwrap(), ChannelEvent::MessageNew(_)));
    match alice_rx.try_recv().unwrap() {
        ChannelEvent::MessageRead {
            message_ids,
            receiver_email,
        } => {
            assert_eq!(message_ids, vec![message_id]);
            assert_eq!(receiver_email, "bob@test.com");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(alice_rx.try_recv().is_err());

    // 6. Both sides see each other as contacts
    let (_, body) = call(&router, Method::GET, "/api/chat/chats", Some(&token_a), None).await;
    assert_eq!(body["contacts"][0]["uname"], "bob");
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let (_dir, _state, _mailer, router) = setup().await;

    let (status, body) = call(&router, Method::GET, "/api/notes/fetchallnotes", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "No token provided");

    let (status, body) = call(
        &router,
        Method::GET,
        "/api/chat/chats",
        Some("not-a-token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Invalid token");

    let (status, _) = call(&router, Method::GET, "/api/auth/getallusers", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn legacy_token_header_is_accepted() {
    let (_dir, _state, _mailer, router) = setup().await;
    let token = register(&router, "carol").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/getuser")
        .header("auth-token", token)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let user: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(user["email"], "carol@test.com");
    assert!(user.get("password_hash").is_none());
}

#[tokio::test]
async fn deleting_someone_else_is_forbidden() {
    let (_dir, _state, _mailer, router) = setup().await;
    let token_a = register(&router, "alice").await;
    let token_b = register(&router, "bob").await;

    let (_, bob) = call(&router, Method::POST, "/api/auth/getuser", Some(&token_b), None).await;
    let bob_id = bob["id"].as_str().unwrap();

    let (status, body) = call(
        &router,
        Method::DELETE,
        &format!("/api/auth/deleteuser/{}", bob_id),
        Some(&token_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["message"], "Not authorized");

    let (status, body) = call(
        &router,
        Method::DELETE,
        &format!("/api/auth/deleteuser/{}", bob_id),
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["uname"], "bob");
}

#[tokio::test]
async fn duplicate_email_and_bad_login_are_400() {
    let (_dir, _state, _mailer, router) = setup().await;
    register(&router, "dave").await;

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/auth/createuser",
        None,
        Some(json!({
            "name": "Other Dave",
            "uname": "dave2",
            "email": "dave@test.com",
            "password": "hunter22",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Email already exists");

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "dave@test.com", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid credentials");

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "dave@test.com", "password": "hunter22" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uname"], "dave");
    assert!(body["token"].is_string());
}

#[tokio::test]
async fn malformed_json_gets_a_json_error() {
    let (_dir, _state, _mailer, router) = setup().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/login")
        .header("content-type", "application/json")
        .body(Body::from("{\"email\": "))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn notes_belong_to_their_owner() {
    let (_dir, _state, _mailer, router) = setup().await;
    let token_a = register(&router, "alice").await;
    let token_b = register(&router, "bob").await;

    let (status, note) = call(
        &router,
        Method::POST,
        "/api/notes/addnote",
        Some(&token_a),
        Some(json!({ "title": "groceries", "description": "milk", "tag": "home" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let note_id = note["id"].as_str().unwrap();

    let (status, _) = call(
        &router,
        Method::PUT,
        &format!("/api/notes/updatenote/{}", note_id),
        Some(&token_b),
        Some(json!({ "title": "mine now" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, updated) = call(
        &router,
        Method::PUT,
        &format!("/api/notes/updatenote/{}", note_id),
        Some(&token_a),
        Some(json!({ "description": "milk, eggs" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "groceries");
    assert_eq!(updated["description"], "milk, eggs");

    let (_, notes) = call(&router, Method::GET, "/api/notes/fetchallnotes", Some(&token_b), None).await;
    assert_eq!(notes.as_array().unwrap().len(), 0);

    let (status, body) = call(&router, Method::DELETE, "/api/notes/clearallnotes", Some(&token_a), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deletedCount"], 1);
}

#[tokio::test]
async fn otp_is_mailed_and_single_use() {
    let (_dir, _state, mailer, router) = setup().await;

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/auth/send-email-otp",
        None,
        Some(json!({ "email": "erin@test.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let code = mailer.sent.lock().unwrap()[0].1.clone();

    let verify = |otp: String| {
        call(
            &router,
            Method::POST,
            "/api/auth/verify-email-otp",
            None,
            Some(json!({ "email": "erin@test.com", "otp": otp })),
        )
    };

    let (status, _) = verify(code.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = verify(code).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "No OTP sent to this email");
}

#[tokio::test]
async fn health_reports_presence_not_values() {
    let (_dir, _state, _mailer, router) = setup().await;

    for path in ["/", "/health"] {
        let (status, body) = call(&router, Method::GET, path, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        let config = body["config"].as_object().unwrap();
        for name in ["DATABASE_URL", "JWT_SECRET", "JWKS_URL", "EMAIL_HOST", "EMAIL_USER", "EMAIL_PASS"] {
            assert!(config[name].is_boolean(), "{} should be a flag", name);
        }
    }
}

const PROVIDER_SECRET: &[u8] = b"provider-signing-secret";

/// Token as the identity provider would sign it
fn provider_token(sub: &str) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("key-1".to_string());
    let exp = chrono::Utc::now().timestamp() + 600;
    encode(
        &header,
        &json!({ "sub": sub, "exp": exp }),
        &EncodingKey::from_secret(PROVIDER_SECRET),
    )
    .unwrap()
}

async fn provider_setup() -> (TempDir, Router) {
    let dir = tempdir().unwrap();
    let mut config = test_config(&dir);
    config.tokens = TokenMode::External {
        jwks_url: "http://127.0.0.1:9/jwks.json".to_string(),
        issuer: None,
        audience: None,
        cache_ttl: Duration::from_secs(600),
    };
    let mut state = AppState::build(config, Arc::new(RecordingMailer::default()))
        .await
        .unwrap();

    let keys: JwkSet = serde_json::from_value(json!({
        "keys": [{ "kty": "oct", "kid": "key-1", "alg": "HS256", "k": URL_SAFE_NO_PAD.encode(PROVIDER_SECRET) }]
    }))
    .unwrap();
    let verifier = JwksVerifier::new(
        "http://127.0.0.1:9/jwks.json".to_string(),
        None,
        None,
        Duration::from_secs(600),
    )
    .unwrap()
    .with_keys(&keys);
    state.tokens = Arc::new(verifier);

    let router = app(state);
    (dir, router)
}

async fn provision(router: &Router, token: &str, uname: &str) -> (StatusCode, Value) {
    call(
        router,
        Method::POST,
        "/api/auth/createuser",
        Some(token),
        Some(json!({
            "name": format!("{} Example", uname),
            "uname": uname,
            "email": format!("{}@test.com", uname),
        })),
    )
    .await
}

#[tokio::test]
async fn provider_accounts_are_created_from_their_token() {
    let (_dir, router) = provider_setup().await;
    let token_a = provider_token("idp|alice");
    let token_b = provider_token("idp|bob");

    // 1. No token, no account
    let (status, _) = call(
        &router,
        Method::POST,
        "/api/auth/createuser",
        None,
        Some(json!({ "name": "A", "uname": "alice", "email": "alice@test.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // 2. The verified subject becomes the user id
    let (status, body) = provision(&router, &token_a, "alice").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["token"], token_a.as_str());
    let (status, _) = provision(&router, &token_b, "bob").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&router, Method::POST, "/api/auth/getuser", Some(&token_a), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "idp|alice");
    assert_eq!(body["email"], "alice@test.com");

    // 3. Provisioned users can chat
    let (status, body) = call(
        &router,
        Method::POST,
        "/api/chat/messages",
        Some(&token_a),
        Some(json!({ "receiver_email": "bob@test.com", "content": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let (_, body) = call(
        &router,
        Method::GET,
        "/api/chat/messages/alice@test.com",
        Some(&token_b),
        None,
    )
    .await;
    assert_eq!(body["messages"][0]["content"], "hello");

    // 4. A second createuser for the same subject is refused
    let (status, body) = provision(&router, &token_a, "alice2").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Account already exists");

    // 5. Password login is off, and says so
    let (status, body) = call(
        &router,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": "alice@test.com", "password": "whatever" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body["error"]["message"],
        "Local sign-in is disabled; sign in with the identity provider"
    );
}
