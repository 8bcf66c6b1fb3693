//! Long-polling transport for the event bridge.
//!
//! The handshake mirrors the WebSocket one over plain HTTP:
//!
//! 1. `GET {bridge}negotiate` to obtain a connection token
//! 2. `POST {bridge}connect`, whose response must carry `"S": 1`
//! 3. `GET {bridge}start`, which must answer `{"Response": "started"}`
//!
//! Afterwards one `POST {bridge}poll` is always outstanding. Each poll
//! response is forwarded as an inbound frame and its message id (`"C"`)
//! becomes the cursor of the next poll. Outbound frames are posted to
//! `{bridge}send` as the form field `data`; the response to a send is the
//! invocation's completion and is forwarded inbound like any other frame.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use url::Url;

use crate::config::BridgeConfig;
use crate::endpoint::{AbortRequest, BridgeEndpoint, TransportKind};
use crate::error::ConnectionError;
use crate::protocol::{decode_frame, ServerFrame};
use crate::transport::{FrameLink, Transport};

/// Position in the bridge's message stream.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
struct Cursor {
    #[serde(rename = "C")]
    message_id: Option<String>,
    #[serde(rename = "G")]
    groups_token: Option<String>,
    /// Set when the bridge asks the client to go away
    #[serde(rename = "D")]
    disconnect: Option<u8>,
}

impl Cursor {
    /// Take the cursor fields from a poll response, keeping the old values
    /// where the response has none.
    fn advance(&mut self, body: &str) -> bool {
        match serde_json::from_str::<Cursor>(body) {
            Ok(next) => {
                if next.message_id.is_some() {
                    self.message_id = next.message_id;
                }
                if next.groups_token.is_some() {
                    self.groups_token = next.groups_token;
                }
                next.disconnect != Some(1)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Poll response without a cursor");
                true
            }
        }
    }
}

/// [`Transport`] that reaches the bridge with HTTP long polling.
#[derive(Debug, Clone)]
pub struct LongPollingTransport {
    endpoint: BridgeEndpoint,
}

impl LongPollingTransport {
    /// Create a transport for the bridge at `bridge_url`.
    ///
    /// The URL must be http or https; a trailing `/` is added when missing.
    pub fn new(bridge_url: &str, config: BridgeConfig) -> Result<Self, ConnectionError> {
        Ok(Self {
            endpoint: BridgeEndpoint::new(bridge_url, config)?,
        })
    }

    pub(crate) fn from_endpoint(endpoint: BridgeEndpoint) -> Self {
        Self { endpoint }
    }

    /// The normalized bridge URL.
    pub fn bridge_url(&self) -> &Url {
        self.endpoint.bridge_url()
    }

    /// Finish the handshake for an already negotiated token.
    pub(crate) async fn open_negotiated(&self, token: &str) -> Result<FrameLink, ConnectionError> {
        let channel = PollChannel {
            endpoint: self.endpoint.clone(),
            token: token.to_string(),
        };

        let connect_url = channel.url("connect", &Cursor::default())?;
        tracing::debug!(url = %connect_url, "Connecting with long polling");
        let body = channel
            .post(connect_url)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;

        let initialized = matches!(
            decode_frame(&body),
            Ok(ServerFrame::Push {
                initialized: true,
                ..
            })
        );
        if !initialized {
            return Err(ConnectionError::Handshake(
                "connect response did not initialize the transport".to_string(),
            ));
        }

        let mut cursor = Cursor::default();
        cursor.advance(&body);

        self.endpoint.start(TransportKind::LongPolling, token).await?;
        tracing::info!(bridge = %self.bridge_url(), "Bridge transport started");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        // Pushes that arrived with the connect response
        let _ = inbound_tx.send(body);

        let abort = self
            .endpoint
            .abort_request(TransportKind::LongPolling, token)?;
        tokio::spawn(run(channel, cursor, outbound_rx, inbound_tx, abort));

        Ok(FrameLink::new(outbound_tx, inbound_rx))
    }
}

#[async_trait]
impl Transport for LongPollingTransport {
    async fn open(&self) -> Result<FrameLink, ConnectionError> {
        let negotiation = self.endpoint.negotiate().await?;
        self.open_negotiated(&negotiation.connection_token).await
    }
}

/// HTTP requests on one negotiated connection.
struct PollChannel {
    endpoint: BridgeEndpoint,
    token: String,
}

impl PollChannel {
    fn url(&self, path: &str, cursor: &Cursor) -> Result<Url, ConnectionError> {
        let mut url = self
            .endpoint
            .url(path, Some((TransportKind::LongPolling, &self.token)))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(message_id) = &cursor.message_id {
                query.append_pair("messageId", message_id);
            }
            if let Some(groups_token) = &cursor.groups_token {
                query.append_pair("groupsToken", groups_token);
            }
        }
        Ok(url)
    }

    async fn post(&self, url: Url) -> Result<String, reqwest::Error> {
        self.endpoint
            .http()
            .post(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    /// A poll that owns everything it needs, so it can stay pending while
    /// frames are sent.
    fn poll(&self, cursor: &Cursor) -> BoxFuture<'static, Result<String, ConnectionError>> {
        let url = self.url("poll", cursor);
        let http = self.endpoint.http().clone();
        let timeout = self.endpoint.config().poll_timeout;

        async move {
            http.post(url?)
                .timeout(timeout)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| ConnectionError::Transport(e.to_string()))?
                .text()
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))
        }
        .boxed()
    }

    async fn send(&self, frame: String) -> Result<String, ConnectionError> {
        let url = self.url("send", &Cursor::default())?;
        self.endpoint
            .http()
            .post(url)
            .form(&[("data", frame)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ConnectionError::Transport(e.to_string()))?
            .text()
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }
}

/// Keep a poll outstanding and post outbound frames until either side closes.
async fn run(
    channel: PollChannel,
    mut cursor: Cursor,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<String>,
    abort: Option<AbortRequest>,
) {
    let mut polling = channel.poll(&cursor);

    let closed_locally = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    tracing::trace!(size = text.len(), "Sending frame");
                    match channel.send(text).await {
                        Ok(reply) if reply.trim().is_empty() => {}
                        Ok(reply) => {
                            if inbound.send(reply).is_err() {
                                break true;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to send frame; dropping link");
                            break false;
                        }
                    }
                }
                None => {
                    tracing::debug!("Link closed locally; stopping long polling");
                    break true;
                }
            },
            response = &mut polling => match response {
                Ok(body) => {
                    let keep_going = cursor.advance(&body);
                    if !body.trim().is_empty() {
                        tracing::trace!(size = body.len(), "Received frame");
                        if inbound.send(body).is_err() {
                            break true;
                        }
                    }
                    if !keep_going {
                        tracing::info!("Bridge ended the long-polling connection");
                        break false;
                    }
                    polling = channel.poll(&cursor);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Poll failed; dropping link");
                    break false;
                }
            },
        }
    };

    if closed_locally {
        if let Some(abort) = abort {
            abort.send().await;
        }
    }
}
