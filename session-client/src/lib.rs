//! Private REST client for the OpenAccess authentication resource
//!
//! Exchanges user credentials for an opaque session token and releases it
//! again on logout. The token is what the event bridge expects inside the
//! connection identity of every subscription call.

mod error;

pub use error::SessionError;

use serde::{Deserialize, Serialize};
use std::time::Duration;

const AUTHENTICATION_RESOURCE: &str = "authentication";
const API_VERSION_QUERY: &str = "?version=1.0";

/// Authentication directory of users defined inside OpenAccess itself
pub const INTERNAL_DIRECTORY_ID: &str = "id-1";

#[derive(Debug, Serialize)]
struct AuthenticationRequest<'a> {
    user_name: &'a str,
    password: &'a str,
    directory_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthenticationResponse {
    session_token: String,
    #[serde(default)]
    token_expiration_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// A minimal client for OpenAccess session management
#[derive(Debug, Clone)]
pub struct SessionClient {
    agent: ureq::Agent,
    service_url: String,
    application_id: String,
    session_token: Option<String>,
    token_expiration: Option<String>,
}

impl SessionClient {
    /// Create a new session client for the given service URL and application id
    ///
    /// The service URL is used as a prefix, so it is expected to end with `/`.
    pub fn new(service_url: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(5))
                .timeout_read(Duration::from_secs(10))
                .build(),
            service_url: service_url.into(),
            application_id: application_id.into(),
            session_token: None,
            token_expiration: None,
        }
    }

    /// Login with the credentials of an internal OpenAccess user
    pub fn login_internal(&mut self, username: &str, password: &str) -> Result<String, SessionError> {
        self.login(username, password, INTERNAL_DIRECTORY_ID)
    }

    /// Login and return the authenticated session token
    ///
    /// The token is also kept by the client and sent with every later request.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Service` when OpenAccess rejects the credentials,
    /// `SessionError::Http` for failures without a readable body and
    /// `SessionError::Network` when the service is unreachable.
    pub fn login(
        &mut self,
        username: &str,
        password: &str,
        directory_id: &str,
    ) -> Result<String, SessionError> {
        let body = AuthenticationRequest {
            user_name: username,
            password,
            directory_id,
        };

        tracing::debug!(url = %self.authentication_url(), user = username, "Requesting session token");

        let response = check_response(
            self.request("POST", &self.authentication_url())
                .send_json(&body),
        )?;

        let authentication: AuthenticationResponse = response
            .into_json()
            .map_err(|e| SessionError::Parse(e.to_string()))?;

        self.session_token = Some(authentication.session_token.clone());
        self.token_expiration = authentication.token_expiration_time;

        tracing::info!(application_id = %self.application_id, "Session established");
        Ok(authentication.session_token)
    }

    /// Logout, invalidating and clearing the session token
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotLoggedIn` if there is no session to release.
    pub fn logout(&mut self) -> Result<(), SessionError> {
        if self.session_token.is_none() {
            return Err(SessionError::NotLoggedIn);
        }

        check_response(self.request("DELETE", &self.authentication_url()).call())?;

        self.session_token = None;
        self.token_expiration = None;
        tracing::info!("Session released");
        Ok(())
    }

    /// The application id sent with every request
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// The current session token, if logged in
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Expiration time reported for the current token
    pub fn expires_at(&self) -> Option<&str> {
        self.token_expiration.as_deref()
    }

    fn authentication_url(&self) -> String {
        format!("{}{}{}", self.service_url, AUTHENTICATION_RESOURCE, API_VERSION_QUERY)
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        let request = self
            .agent
            .request(method, url)
            .set("application-id", &self.application_id);

        match &self.session_token {
            Some(token) => request.set("session-token", token),
            None => request,
        }
    }
}

/// Turn a non-success response into the matching `SessionError`
fn check_response(
    result: Result<ureq::Response, ureq::Error>,
) -> Result<ureq::Response, SessionError> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(error_from_body(status, &body))
        }
        Err(ureq::Error::Transport(transport)) => Err(SessionError::Network(transport.to_string())),
    }
}

fn error_from_body(status: u16, body: &str) -> SessionError {
    if body.trim().is_empty() {
        return SessionError::Http(status);
    }

    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => SessionError::Service {
            code: parsed.error.code,
            message: parsed.error.message,
        },
        Err(_) => SessionError::Http(status),
    }
}
