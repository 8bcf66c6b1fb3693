//! Bridge URLs and the HTTP half of the handshake.
//!
//! Both transports negotiate a connection token, call `start` once their
//! link is up and send an `abort` when the client goes away. The query
//! string differs only in the `transport` parameter.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::config::BridgeConfig;
use crate::error::ConnectionError;

const ABORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire transport named in the `transport` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportKind {
    WebSockets,
    LongPolling,
}

impl TransportKind {
    fn as_query(self) -> &'static str {
        match self {
            TransportKind::WebSockets => "webSockets",
            TransportKind::LongPolling => "longPolling",
        }
    }
}

/// Outcome of `negotiate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct Negotiation {
    #[serde(rename = "ConnectionToken")]
    pub connection_token: String,
    #[serde(rename = "TryWebSockets", default)]
    pub try_websockets: Option<bool>,
}

impl Negotiation {
    pub fn allows_websockets(&self) -> bool {
        self.try_websockets != Some(false)
    }
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    #[serde(rename = "Response")]
    response: String,
}

/// Location of the bridge plus the HTTP client used to talk to it.
#[derive(Debug, Clone)]
pub(crate) struct BridgeEndpoint {
    bridge_url: Url,
    config: BridgeConfig,
    http: reqwest::Client,
}

impl BridgeEndpoint {
    /// The URL must be http or https; a trailing `/` is added when missing.
    pub fn new(bridge_url: &str, config: BridgeConfig) -> Result<Self, ConnectionError> {
        let mut bridge_url = Url::parse(bridge_url)
            .map_err(|e| ConnectionError::InvalidUrl(format!("{}: {}", bridge_url, e)))?;

        if !matches!(bridge_url.scheme(), "http" | "https") {
            return Err(ConnectionError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                bridge_url.scheme()
            )));
        }

        if !bridge_url.path().ends_with('/') {
            let path = format!("{}/", bridge_url.path());
            bridge_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(config.connect_timeout)
            .build()
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        Ok(Self {
            bridge_url,
            config,
            http,
        })
    }

    pub fn bridge_url(&self) -> &Url {
        &self.bridge_url
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn connection_data(&self) -> String {
        serde_json::json!([{ "name": self.config.hub_name.to_ascii_lowercase() }]).to_string()
    }

    /// Build `{bridge}{path}` with the protocol query parameters.
    ///
    /// `link` is absent only for `negotiate`, which precedes the choice of
    /// transport and the token.
    pub fn url(
        &self,
        path: &str,
        link: Option<(TransportKind, &str)>,
    ) -> Result<Url, ConnectionError> {
        let mut url = self
            .bridge_url
            .join(path)
            .map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            if let Some((kind, _)) = link {
                query.append_pair("transport", kind.as_query());
            }
            query.append_pair("clientProtocol", &self.config.client_protocol);
            if let Some((_, token)) = link {
                query.append_pair("connectionToken", token);
            }
            query.append_pair("connectionData", &self.connection_data());
        }

        Ok(url)
    }

    pub async fn negotiate(&self) -> Result<Negotiation, ConnectionError> {
        let url = self.url("negotiate", None)?;
        tracing::debug!(url = %url, "Negotiating bridge connection");

        self.http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ConnectionError::Negotiate(e.to_string()))?
            .json::<Negotiation>()
            .await
            .map_err(|e| ConnectionError::Negotiate(e.to_string()))
    }

    pub async fn start(&self, kind: TransportKind, token: &str) -> Result<(), ConnectionError> {
        let url = self.url("start", Some((kind, token)))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?
            .json::<StartResponse>()
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        if response.response != "started" {
            return Err(ConnectionError::Handshake(format!(
                "unexpected start response '{}'",
                response.response
            )));
        }

        Ok(())
    }

    /// The abort request to send when the link is closed locally, if enabled.
    pub fn abort_request(
        &self,
        kind: TransportKind,
        token: &str,
    ) -> Result<Option<AbortRequest>, ConnectionError> {
        if !self.config.abort_on_close {
            return Ok(None);
        }
        Ok(Some(AbortRequest {
            http: self.http.clone(),
            url: self.url("abort", Some((kind, token)))?,
        }))
    }
}

/// Best-effort notification that the client is leaving.
#[derive(Debug)]
pub(crate) struct AbortRequest {
    http: reqwest::Client,
    url: Url,
}

impl AbortRequest {
    pub async fn send(self) {
        let result = tokio::time::timeout(ABORT_TIMEOUT, self.http.post(self.url).send()).await;
        match result {
            Ok(Ok(response)) => {
                tracing::debug!(status = %response.status(), "Abort request acknowledged")
            }
            Ok(Err(e)) => tracing::debug!(error = %e, "Abort request failed"),
            Err(_) => tracing::debug!("Abort request timed out"),
        }
    }
}
