use authclient_lib::http::{HttpError, RefreshError, ReqwestDispatcher, RequestDescriptor};
use authclient_lib::secrets::{MemorySecretStore, SecretStore, KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN};
use authclient_lib::session::{
    poll_once, spawn_identity_poll, PollOutcome, SessionController, SessionOptions, SignInError,
};
use authclient_lib::types::AuthState;
use reqwest::Url;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn user_json() -> Value {
    json!({
        "id": 1,
        "username": "emilys",
        "email": "emily.johnson@x.dummyjson.com",
        "firstName": "Emily",
        "lastName": "Johnson",
        "gender": "female",
        "image": "https://dummyjson.com/icon/emilys/128"
    })
}

async fn store_with(access: &str, refresh: &str) -> MemorySecretStore {
    let store = MemorySecretStore::new();
    store.set(KEY_ACCESS_TOKEN, access).await.unwrap();
    store.set(KEY_REFRESH_TOKEN, refresh).await.unwrap();
    store
}

fn session(server: &MockServer, store: MemorySecretStore) -> SessionController {
    let dispatcher =
        ReqwestDispatcher::new(&Url::parse(&server.uri()).unwrap(), Duration::from_secs(5)).unwrap();
    SessionController::new(
        Arc::new(dispatcher),
        Arc::new(store),
        SessionOptions {
            token_expires_in_mins: 1,
            refresh_timeout: Some(Duration::from_secs(5)),
        },
    )
}

async fn mount_me(server: &MockServer, token: &str, status: u16) {
    let template = if status == 200 {
        ResponseTemplate::new(200).set_body_json(user_json())
    } else {
        ResponseTemplate::new(status).set_body_json(json!({ "message": "Token Expired!" }))
    };
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(template)
        .mount(server)
        .await;
}

async fn wait_for<F>(session: &SessionController, mut done: F)
where
    F: FnMut(&AuthState) -> bool,
{
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if done(&*rx.borrow_and_update()) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .expect("state did not settle in time");
}

async fn refresh_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/auth/refresh")
        .count()
}

#[tokio::test]
async fn bootstrap_without_tokens_is_unauthenticated() {
    let server = MockServer::start().await;
    let session = session(&server, MemorySecretStore::new());

    assert_eq!(session.state(), AuthState::Loading);
    assert_eq!(session.bootstrap().await, AuthState::Unauthenticated);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn bootstrap_recovers_an_expired_access_token() {
    let server = MockServer::start().await;
    mount_me(&server, "old", 401).await;
    mount_me(&server, "new", 200).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_partial_json(json!({ "refreshToken": "r1", "expiresInMins": 1 })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "new", "refreshToken": "r2" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server, store_with("old", "r1").await);
    let state = session.bootstrap().await;

    match state {
        AuthState::Authenticated { user, tokens } => {
            assert_eq!(user.username, "emilys");
            assert_eq!(tokens.access_token, "new");
            assert_eq!(tokens.refresh_token, "r2");
        }
        other => panic!("expected authenticated, got {other:?}"),
    }
    assert_eq!(session.storage().get_refresh_token().await.as_deref(), Some("r2"));
}

#[tokio::test]
async fn failed_refresh_during_bootstrap_forces_logout() {
    let server = MockServer::start().await;
    mount_me(&server, "old", 401).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Invalid refresh token" })))
        .mount(&server)
        .await;

    let session = session(&server, store_with("old", "r1").await);
    assert_eq!(session.bootstrap().await, AuthState::Unauthenticated);

    tokio::time::timeout(Duration::from_secs(5), async {
        while session.storage().get_refresh_token().await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("tokens were not cleared");
    assert_eq!(session.storage().get_access_token().await, None);
}

#[tokio::test]
async fn concurrent_expired_requests_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/\d$"))
        .and(header("authorization", "Bearer expired-token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/\d$"))
        .and(header("authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": "new-token", "refreshToken": "r2" }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server, store_with("expired-token", "r1").await);
    let (r1, r2, r3) = tokio::join!(
        session.execute(RequestDescriptor::get("/api/1")),
        session.execute(RequestDescriptor::get("/api/2")),
        session.execute(RequestDescriptor::get("/api/3")),
    );

    for res in [r1, r2, r3] {
        assert_eq!(res.unwrap().status, 200);
    }
    assert_eq!(refresh_count(&server).await, 1);
}

#[tokio::test]
async fn concurrent_requests_all_fail_when_refresh_fails() {
    let server = MockServer::start().await;
    Mock::given(path_regex(r"^/api/\d$"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(403).set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;

    let session = session(&server, store_with("expired-token", "r1").await);
    let (r1, r2, r3) = tokio::join!(
        session.execute(RequestDescriptor::get("/api/1")),
        session.execute(RequestDescriptor::get("/api/2")),
        session.execute(RequestDescriptor::get("/api/3")),
    );

    for res in [r1, r2, r3] {
        let err = res.unwrap_err();
        assert!(matches!(err, HttpError::Refresh(RefreshError::Endpoint(_))));
        assert_eq!(err.status(), Some(403));
    }
    assert_eq!(refresh_count(&server).await, 1);
}

#[tokio::test]
async fn refresh_endpoint_401_through_the_session_is_not_recovered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server, store_with("some-token", "r1").await);
    let err = session
        .execute(RequestDescriptor::post("/auth/refresh", json!({})))
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn sign_in_persists_tokens_and_authenticates() {
    let server = MockServer::start().await;
    let mut body = user_json();
    body["accessToken"] = json!("a1");
    body["refreshToken"] = json!("r1");
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_partial_json(json!({ "username": "emilys", "password": "emilyspass", "expiresInMins": 1 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let session = session(&server, MemorySecretStore::new());
    let user = session.sign_in("emilys", "emilyspass").await.unwrap();

    assert_eq!(user.id, 1);
    assert!(session.state().is_authenticated());
    assert_eq!(session.storage().get_access_token().await.as_deref(), Some("a1"));
}

#[tokio::test]
async fn sign_in_with_bad_credentials_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "message": "Invalid credentials" })))
        .mount(&server)
        .await;

    let session = session(&server, MemorySecretStore::new());
    let err = session.sign_in("emilys", "wrong").await.unwrap_err();

    assert!(matches!(err, SignInError::InvalidCredentials));
    assert!(!session.state().is_authenticated());
    assert_eq!(refresh_count(&server).await, 0);
}

#[tokio::test]
async fn logout_clears_tokens_and_state() {
    let server = MockServer::start().await;
    mount_me(&server, "a1", 200).await;

    let session = session(&server, store_with("a1", "r1").await);
    assert!(session.bootstrap().await.is_authenticated());

    session.logout().await;

    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert_eq!(session.storage().get_access_token().await, None);
    assert_eq!(session.storage().get_refresh_token().await, None);
}

#[tokio::test]
async fn logout_during_refresh_keeps_tokens_cleared() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": "new", "refreshToken": "r2" }))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let session = session(&server, store_with("old", "r1").await);
    let logout = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.logout().await;
    };
    let (res, ()) = tokio::join!(session.execute(RequestDescriptor::get("/api/1")), logout);

    assert!(matches!(res.unwrap_err(), HttpError::Disposed));
    assert_eq!(session.state(), AuthState::Unauthenticated);

    // Long after the refresh response would have landed.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.storage().get_access_token().await, None);
    assert_eq!(session.storage().get_refresh_token().await, None);
    assert_eq!(session.state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn poll_logs_out_when_401_survives_refresh() {
    let server = MockServer::start().await;
    mount_me(&server, "a1", 200).await;
    mount_me(&server, "a2", 401).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "a2", "refreshToken": "r2" })),
        )
        .mount(&server)
        .await;

    let session = session(&server, store_with("a1", "r1").await);
    assert!(session.bootstrap().await.is_authenticated());

    // Server-side revocation of the current access token.
    session.storage().save("revoked", "r1").await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer revoked"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert_eq!(poll_once(&session).await, PollOutcome::LoggedOut);
    assert_eq!(session.state(), AuthState::Unauthenticated);
    assert_eq!(refresh_count(&server).await, 1);
}

#[tokio::test]
async fn background_poll_ends_session_after_refresh_failure() {
    let server = MockServer::start().await;
    mount_me(&server, "a1", 200).await;

    let session = session(&server, store_with("a1", "r1").await);
    assert!(session.bootstrap().await.is_authenticated());

    let poll = spawn_identity_poll(&session, Duration::from_millis(20));

    session.storage().save("expired", "r1").await;
    mount_me(&server, "expired", 401).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    wait_for(&session, |state| *state == AuthState::Unauthenticated).await;

    session.shutdown().await;
    tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .expect("poll did not stop")
        .unwrap();
}
