//! End-to-end scenarios driven over the real control socket, with a
//! `wiremock` server standing in for the OIDC issuer.

use std::sync::Arc;
use std::time::Duration;

use oidc_broker::config::Config;
use oidc_broker::context::AgentContext;
use oidc_broker::{dispatcher, housekeeping};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Spawn the dispatcher's accept loop against a fresh socket under a
/// temp directory and return a path clients can connect to.
async fn spawn_broker(config: Config) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("broker.sock");
    let interval = config.session.housekeeping_interval;
    let ctx = Arc::new(AgentContext::new(config).unwrap());
    tokio::spawn(housekeeping::run(ctx.clone(), interval));
    tokio::spawn(async move {
        let _ = dispatcher::run(ctx, &socket_path).await;
    });
    // Give the accept loop a moment to bind before the first connection.
    tokio::time::sleep(Duration::from_millis(50)).await;
    dir
}

async fn roundtrip(socket: &std::path::Path, request: Value) -> Value {
    let stream = UnixStream::connect(socket).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = serde_json::to_vec(&request).unwrap();
    line.push(b'\n');
    write_half.write_all(&line).await.unwrap();

    let mut response = String::new();
    reader.read_line(&mut response).await.unwrap();
    serde_json::from_str(&response).unwrap()
}

async fn discovery_mock(issuer: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer.uri(),
            "authorization_endpoint": format!("{}/authorize", issuer.uri()),
            "token_endpoint": format!("{}/token", issuer.uri()),
            "registration_endpoint": format!("{}/register", issuer.uri()),
            "revocation_endpoint": format!("{}/revoke", issuer.uri()),
            "device_authorization_endpoint": format!("{}/device", issuer.uri()),
            "scopes_supported": ["openid", "offline_access"],
            "code_challenge_methods_supported": ["S256"],
        })))
        .mount(issuer)
        .await;
}

#[tokio::test]
async fn add_then_access_token_against_mock_issuer() {
    let issuer = MockServer::start().await;
    discovery_mock(&issuer).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 3600,
        })))
        .mount(&issuer)
        .await;

    let dir = spawn_broker(Config::default()).await;
    let socket = dir.path().join("broker.sock");

    let add = roundtrip(
        &socket,
        json!({
            "request": "add",
            "account": {
                "shortname": "acme",
                "issuer": issuer.uri(),
                "client_id": "cid",
                "refresh_token": "seed-rt",
            },
        }),
    )
    .await;
    assert_eq!(add["status"], "success");

    let token = roundtrip(
        &socket,
        json!({"request": "access_token", "account_name": "acme"}),
    )
    .await;
    assert_eq!(token["status"], "success");
    assert_eq!(token["access_token"], "at-1");
    assert_eq!(token["issuer_url"], issuer.uri());

    // A second request within the token's lifetime is served from cache,
    // not a fresh token-endpoint hit (only one /token mock was mounted
    // without an expectation cap, but the cached path never calls it).
    let cached = roundtrip(
        &socket,
        json!({"request": "access_token", "account_name": "acme"}),
    )
    .await;
    assert_eq!(cached["status"], "success");
    assert_eq!(cached["access_token"], "at-1");
}

#[tokio::test]
async fn access_token_for_unknown_account_is_autoload_denied() {
    let dir = spawn_broker(Config::default()).await;
    let socket = dir.path().join("broker.sock");

    // No prompter command configured -> NullPrompter cancels autoload.
    let response = roundtrip(
        &socket,
        json!({"request": "access_token", "account_name": "nope"}),
    )
    .await;
    assert_eq!(response["status"], "notfound");
    assert_eq!(response["kind"], "not_loaded");
}

#[tokio::test]
async fn code_flow_gen_then_code_exchange_completes() {
    let issuer = MockServer::start().await;
    discovery_mock(&issuer).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-code",
            "refresh_token": "rt-code",
            "expires_in": 3600,
        })))
        .mount(&issuer)
        .await;

    let dir = spawn_broker(Config::default()).await;
    let socket = dir.path().join("broker.sock");

    let gen = roundtrip(
        &socket,
        json!({
            "request": "gen",
            "account": {
                "shortname": "acme",
                "issuer": issuer.uri(),
                "client_id": "cid",
                "redirect_uris": ["https://client.example/cb"],
            },
            "flow": ["code"],
        }),
    )
    .await;
    assert_eq!(gen["status"], "accepted");
    let state = gen["state"].as_str().unwrap().to_string();
    assert!(gen["code_uri"].as_str().unwrap().contains("code_challenge="));

    let lookup = roundtrip(&socket, json!({"request": "state_lookup", "state": state})).await;
    assert_eq!(lookup["status"], "success");
    assert_eq!(lookup["account_name"], "acme");

    let exchange = roundtrip(
        &socket,
        json!({
            "request": "code_exchange",
            "account": "acme",
            "code": "auth-code-1",
            "redirect_uri": "https://client.example/cb",
            "state": state,
            "code_verifier": "whatever-the-client-kept",
        }),
    )
    .await;
    assert_eq!(exchange["status"], "success");
}

#[tokio::test]
async fn delete_revokes_rotated_refresh_token_not_the_seed() {
    let issuer = MockServer::start().await;
    discovery_mock(&issuer).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-rotated",
            "expires_in": 3600,
        })))
        .mount(&issuer)
        .await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&issuer)
        .await;

    let dir = spawn_broker(Config::default()).await;
    let socket = dir.path().join("broker.sock");

    roundtrip(
        &socket,
        json!({
            "request": "add",
            "account": {
                "shortname": "acme",
                "issuer": issuer.uri(),
                "client_id": "cid",
                "refresh_token": "seed-rt",
            },
        }),
    )
    .await;

    // `delete` takes a fresh account config rather than a loaded
    // shortname lookup; pass the rotated token explicitly, as a caller
    // who read it back via `list`/storage would.
    let delete = roundtrip(
        &socket,
        json!({
            "request": "delete",
            "account": {
                "shortname": "acme",
                "issuer": issuer.uri(),
                "client_id": "cid",
                "refresh_token": "rt-rotated",
            },
        }),
    )
    .await;
    assert_eq!(delete["status"], "success");

    let listed = roundtrip(&socket, json!({"request": "list"})).await;
    assert!(!listed["accounts"].as_array().unwrap().contains(&json!("acme")));
}

#[tokio::test]
async fn lock_blocks_access_token_until_unlocked() {
    let issuer = MockServer::start().await;
    discovery_mock(&issuer).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 3600,
        })))
        .mount(&issuer)
        .await;

    let dir = spawn_broker(Config::default()).await;
    let socket = dir.path().join("broker.sock");

    roundtrip(
        &socket,
        json!({
            "request": "add",
            "account": {
                "shortname": "acme",
                "issuer": issuer.uri(),
                "client_id": "cid",
                "refresh_token": "seed-rt",
            },
        }),
    )
    .await;

    let locked = roundtrip(&socket, json!({"request": "lock", "password": "hunter2"})).await;
    assert_eq!(locked["status"], "success");

    let denied = roundtrip(
        &socket,
        json!({"request": "access_token", "account_name": "acme"}),
    )
    .await;
    assert_eq!(denied["status"], "failure");
    assert_eq!(denied["kind"], "locked");

    let wrong_pw = roundtrip(&socket, json!({"request": "unlock", "password": "nope"})).await;
    assert_eq!(wrong_pw["status"], "failure");

    let unlocked = roundtrip(&socket, json!({"request": "unlock", "password": "hunter2"})).await;
    assert_eq!(unlocked["status"], "success");

    let allowed = roundtrip(
        &socket,
        json!({"request": "access_token", "account_name": "acme"}),
    )
    .await;
    assert_eq!(allowed["status"], "success");
    assert_eq!(allowed["access_token"], "at-1");
}

#[tokio::test]
async fn registration_missing_offline_access_is_error_client() {
    let issuer = MockServer::start().await;
    discovery_mock(&issuer).await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client_id": "new-cid",
            "client_secret": "new-secret",
            "scope": "openid profile",
        })))
        .mount(&issuer)
        .await;

    let dir = spawn_broker(Config::default()).await;
    let socket = dir.path().join("broker.sock");

    let register = roundtrip(
        &socket,
        json!({
            "request": "register",
            "account": {
                "shortname": "acme",
                "issuer": issuer.uri(),
                "redirect_uris": ["https://client.example/cb"],
            },
            "flows": ["code"],
        }),
    )
    .await;
    assert_eq!(register["status"], "error_client");
    assert_eq!(register["kind"], "invalid_scope");

    // A rejected registration never touches the registry.
    let listed = roundtrip(&socket, json!({"request": "list"})).await;
    assert!(listed["accounts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_request_kind_gets_a_clean_bad_request_response() {
    let dir = spawn_broker(Config::default()).await;
    let socket = dir.path().join("broker.sock");

    let response = roundtrip(&socket, json!({"request": "levitate"})).await;
    assert_eq!(response["status"], "badrequest");
    assert_eq!(response["kind"], "bad_request");

    // The connection closes cleanly afterward; a second, unrelated
    // request on a fresh connection still gets served normally.
    let list = roundtrip(&socket, json!({"request": "list"})).await;
    assert_eq!(list["status"], "success");
}

#[tokio::test]
async fn add_with_zero_timeout_never_evicts() {
    let issuer = MockServer::start().await;
    discovery_mock(&issuer).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 3600,
        })))
        .mount(&issuer)
        .await;

    let mut config = Config::default();
    config.session.housekeeping_interval = Duration::from_millis(20);
    let dir = spawn_broker(config).await;
    let socket = dir.path().join("broker.sock");

    roundtrip(
        &socket,
        json!({
            "request": "add",
            "account": {
                "shortname": "acme",
                "issuer": issuer.uri(),
                "client_id": "cid",
                "refresh_token": "seed-rt",
            },
            "timeout": 0,
        }),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;

    let listed = roundtrip(&socket, json!({"request": "list"})).await;
    assert!(listed["accounts"].as_array().unwrap().contains(&json!("acme")));
}

#[tokio::test]
async fn add_with_nonzero_timeout_is_evicted_by_housekeeping() {
    let issuer = MockServer::start().await;
    discovery_mock(&issuer).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_in": 3600,
        })))
        .mount(&issuer)
        .await;

    let mut config = Config::default();
    config.session.housekeeping_interval = Duration::from_millis(50);
    let dir = spawn_broker(config).await;
    let socket = dir.path().join("broker.sock");

    roundtrip(
        &socket,
        json!({
            "request": "add",
            "account": {
                "shortname": "acme",
                "issuer": issuer.uri(),
                "client_id": "cid",
                "refresh_token": "seed-rt",
            },
            "timeout": 1,
        }),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(1300)).await;

    let listed = roundtrip(&socket, json!({"request": "list"})).await;
    assert!(!listed["accounts"].as_array().unwrap().contains(&json!("acme")));
}
