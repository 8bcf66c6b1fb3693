//! Integration tests for the session client against a mock OpenAccess service.

use mockito::{Matcher, Server};
use rstest::rstest;
use session_client::{SessionClient, SessionError};

fn authentication_path() -> Matcher {
    Matcher::Regex(r"^/api/authentication".to_string())
}

#[test]
fn test_login_and_logout_round() {
    let mut server = Server::new();

    let login = server
        .mock("POST", authentication_path())
        .match_query(Matcher::UrlEncoded("version".into(), "1.0".into()))
        .match_header("application-id", "app-42")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "user_name": "admin",
            "password": "secret",
            "directory_id": "id-1"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"session_token":"tok-123","token_expiration_time":"2026-10-19T12:00:00Z"}"#)
        .create();

    let logout = server
        .mock("DELETE", authentication_path())
        .match_header("application-id", "app-42")
        .match_header("session-token", "tok-123")
        .with_status(200)
        .create();

    let mut client = SessionClient::new(format!("{}/api/", server.url()), "app-42");

    let token = client.login_internal("admin", "secret").expect("login should succeed");
    assert_eq!(token, "tok-123");
    assert_eq!(client.session_token(), Some("tok-123"));
    assert_eq!(client.expires_at(), Some("2026-10-19T12:00:00Z"));

    client.logout().expect("logout should succeed");
    assert!(client.session_token().is_none());

    login.assert();
    logout.assert();
}

#[rstest]
#[case(400, r#"{"error":{"code":"openaccess.general.invalidapplicationid","message":"Invalid application id"}}"#, Some("openaccess.general.invalidapplicationid"))]
#[case(401, "", None)]
#[case(500, "internal failure", None)]
fn test_login_failures(#[case] status: usize, #[case] body: &str, #[case] expected_code: Option<&str>) {
    let mut server = Server::new();

    let _mock = server
        .mock("POST", authentication_path())
        .with_status(status)
        .with_body(body)
        .create();

    let mut client = SessionClient::new(format!("{}/api/", server.url()), "app-42");
    let error = client
        .login("admin", "wrong", "id-1")
        .expect_err("login should fail");

    match expected_code {
        Some(code) => {
            assert_eq!(error.code(), Some(code));
            assert!(error.to_string().contains("Invalid application id"));
        }
        None => assert!(matches!(error, SessionError::Http(s) if s as usize == status)),
    }
    assert!(client.session_token().is_none());
}

#[test]
fn test_login_unreachable_service() {
    // Port 9 (discard) is not expected to have an HTTP listener
    let mut client = SessionClient::new("http://127.0.0.1:9/api/", "app-42");
    let error = client.login_internal("admin", "secret").unwrap_err();
    assert!(matches!(error, SessionError::Network(_)));
}
