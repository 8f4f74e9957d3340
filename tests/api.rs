use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokenkeeper::api;
use tokenkeeper::server::Server;
use tokenkeeper::settings::parse_settings_str;
use warp::http::StatusCode;

const SETTINGS: &str = r#"
[http]
address = "127.0.0.1:0"
trust_forwarded_for = true

[log]
filter = "warn"

[storage]
backend = "fake"

[jwt]
secret = "api-test-signing-key-0123456789abcdef"
issuer = "tokenkeeper.test"
audience = "chat-client"

[auth]
admin_key = "test-admin-key"
refresh_pepper = "api-test-pepper-0000"
argon2_memory_kib = 1024
argon2_iterations = 1
"#;

async fn server() -> Arc<Server> {
    let settings = parse_settings_str(SETTINGS).unwrap();
    Arc::new(Server::try_new(&settings).await.unwrap())
}

fn peer(n: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, n], 40000))
}

fn body(resp: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
    serde_json::from_slice(resp.body()).unwrap()
}

async fn post(
    server: &Arc<Server>,
    path: &str,
    from: SocketAddr,
    payload: Value,
) -> warp::http::Response<warp::hyper::body::Bytes> {
    warp::test::request()
        .method("POST")
        .path(path)
        .remote_addr(from)
        .json(&payload)
        .reply(&api::v1::app(server.clone()))
        .await
}

#[tokio::test]
async fn register_login_refresh_logout_over_http() {
    let server = server().await;
    let creds = json!({"username": "alice", "password": "hunter2hunter2"});

    let resp = post(&server, "/api/auth/register", peer(1), creds.clone()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(body(&resp)["success"], true);

    let resp = post(&server, "/api/auth/register", peer(2), creds.clone()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body(&resp)["error"]["code"], "USERNAME_TAKEN");

    let resp = post(&server, "/api/auth/login", peer(3), creds).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let data = body(&resp);
    assert!(data.get("success").is_none());
    assert!(data["userId"].is_string());
    let access = data["accessToken"].as_str().unwrap().to_string();
    let refresh = data["refreshToken"].as_str().unwrap().to_string();
    assert!(data["accessTokenExpiresAt"].is_string());
    assert!(data["refreshTokenExpiresAt"].is_string());

    let resp = post(
        &server,
        "/api/auth/refresh",
        peer(4),
        json!({"refreshToken": refresh}),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let rotated = body(&resp)["refreshToken"].as_str().unwrap().to_string();

    let resp = post(
        &server,
        "/api/auth/refresh",
        peer(5),
        json!({"refreshToken": refresh}),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body(&resp)["error"]["code"], "INVALID_REFRESH_TOKEN");
    assert_eq!(body(&resp)["error"]["message"], "authentication failed");

    let app = api::v1::app(server.clone());
    let logout = || {
        warp::test::request()
            .method("POST")
            .path("/api/auth/logout")
            .remote_addr(peer(6))
            .header("authorization", format!("Bearer {access}"))
            .json(&json!({"refreshToken": rotated}))
            .reply(&app)
    };
    assert_eq!(logout().await.status(), StatusCode::NO_CONTENT);
    assert_eq!(logout().await.status(), StatusCode::UNAUTHORIZED);

    server.shutdown().await;
}

#[tokio::test]
async fn bad_requests_map_to_400_and_missing_auth_to_401() {
    let server = server().await;

    let resp = post(
        &server,
        "/api/auth/register",
        peer(1),
        json!({"username": "x", "password": "hunter2hunter2"}),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&resp)["error"]["code"], "INVALID_REQUEST");

    let resp = post(&server, "/api/auth/login", peer(2), json!({"user": "x"})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = post(
        &server,
        "/api/auth/logout",
        peer(3),
        json!({"refreshToken": "00"}),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = warp::test::request()
        .method("GET")
        .path("/api/auth/nowhere")
        .reply(&api::v1::app(server.clone()))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.shutdown().await;
}

#[tokio::test]
async fn revoke_requires_the_admin_key() {
    let server = server().await;
    let user_id = uuid::Uuid::new_v4();

    let app = api::v1::app(server.clone());
    let revoke = |key: Option<&'static str>, n: u8| {
        let mut req = warp::test::request()
            .method("POST")
            .path("/api/auth/revoke")
            .remote_addr(peer(n))
            .json(&json!({"userId": user_id}));
        if let Some(key) = key {
            req = req.header("x-admin-key", key);
        }
        req.reply(&app)
    };

    assert_eq!(revoke(None, 1).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(revoke(Some("wrong"), 2).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        revoke(Some("test-admin-key"), 3).await.status(),
        StatusCode::NO_CONTENT
    );

    server.shutdown().await;
}

#[tokio::test]
async fn rate_limit_is_per_endpoint_and_per_client() {
    let server = server().await;
    let app = api::v1::app(server.clone());
    let register = |forwarded: &'static str, name: &'static str| {
        warp::test::request()
            .method("POST")
            .path("/api/auth/register")
            .remote_addr(peer(1))
            .header("x-forwarded-for", forwarded)
            .json(&json!({"username": name, "password": "hunter2hunter2"}))
            .reply(&app)
    };

    // register allows a burst of one
    assert_eq!(register("192.0.2.1", "first").await.status(), StatusCode::CREATED);
    let limited = register("192.0.2.1", "second").await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body(&limited)["error"]["code"], "RATE_LIMITED");

    // another client, and another endpoint for the same client
    assert_eq!(
        register("192.0.2.2, 10.0.0.1", "third").await.status(),
        StatusCode::CREATED
    );
    let health = warp::test::request()
        .method("GET")
        .path("/api/auth/health")
        .remote_addr(peer(1))
        .header("x-forwarded-for", "192.0.2.1")
        .reply(&app)
        .await;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(body(&health)["data"]["status"], "ok");

    server.shutdown().await;
}
