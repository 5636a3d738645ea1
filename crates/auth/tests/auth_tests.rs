use academy_portal_auth::{AuthChangeEvent, Auth, AuthOptions};
use reqwest::Client;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_json(token: &str) -> serde_json::Value {
    json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": "test_refresh_token",
        "user": {
            "id": "test_user_id",
            "email": "test@example.com",
            "role": "authenticated"
        }
    })
}

#[tokio::test]
async fn test_session_lifecycle_events() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json("access_1")))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let auth = Auth::new(
        &mock_server.uri(),
        "test_anon_key",
        Client::new(),
        AuthOptions::default(),
    );
    let mut changes = auth.on_auth_state_change();

    auth.sign_in_with_password("test@example.com", "password123")
        .await
        .unwrap();
    auth.sign_out().await.unwrap();

    let first = changes.recv().await.unwrap();
    let second = changes.recv().await.unwrap();
    assert_eq!(first.event, AuthChangeEvent::SignedIn);
    assert_eq!(first.session.unwrap().user.id, "test_user_id");
    assert_eq!(second.event, AuthChangeEvent::SignedOut);
    assert!(auth.get_session().is_none());
}

#[tokio::test]
async fn test_sign_out_failure_still_clears_local_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": 401,
            "msg": "invalid JWT"
        })))
        .mount(&mock_server)
        .await;

    let auth = Auth::new(
        &mock_server.uri(),
        "test_anon_key",
        Client::new(),
        AuthOptions::default(),
    );
    auth.set_session(serde_json::from_value(session_json("expired")).unwrap());

    let result = auth.sign_out().await;

    assert!(result.is_err());
    assert!(auth.get_session().is_none());
}

#[tokio::test]
async fn test_get_user_uses_bearer_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(wiremock::matchers::header("authorization", "Bearer access_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "test_user_id",
            "email": "test@example.com"
        })))
        .mount(&mock_server)
        .await;

    let auth = Auth::new(
        &mock_server.uri(),
        "test_anon_key",
        Client::new(),
        AuthOptions::default(),
    );
    auth.set_session(serde_json::from_value(session_json("access_2")).unwrap());

    let user = auth.get_user().await.unwrap();
    assert_eq!(user.email.as_deref(), Some("test@example.com"));
}
