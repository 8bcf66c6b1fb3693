//! WebSocket transport for the event bridge.
//!
//! Opening a link runs the bridge handshake:
//!
//! 1. `GET {bridge}negotiate` to obtain a connection token
//! 2. WebSocket connect to `{bridge}connect`
//! 3. wait for the transport-initialized frame (`"S": 1`)
//! 4. `GET {bridge}start`, which must answer `{"Response": "started"}`
//!
//! After the handshake a pump task shuttles text frames between the socket
//! and the [`FrameLink`] channels until either side goes away.
//!
//! A bridge that answers `negotiate` with `"TryWebSockets": false` is
//! reached over [`LongPollingTransport`] instead, reusing the negotiated
//! token.

use std::fmt::Display;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::BridgeConfig;
use crate::endpoint::{AbortRequest, BridgeEndpoint, TransportKind};
use crate::error::ConnectionError;
use crate::longpolling::LongPollingTransport;
use crate::protocol::{decode_frame, ServerFrame};
use crate::transport::{FrameLink, Transport};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Transport`] that reaches the bridge over a WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    endpoint: BridgeEndpoint,
}

impl WebSocketTransport {
    /// Create a transport for the bridge at `bridge_url`.
    ///
    /// The URL must be http or https; a trailing `/` is added when missing.
    pub fn new(bridge_url: &str, config: BridgeConfig) -> Result<Self, ConnectionError> {
        Ok(Self {
            endpoint: BridgeEndpoint::new(bridge_url, config)?,
        })
    }

    /// The normalized bridge URL.
    pub fn bridge_url(&self) -> &Url {
        self.endpoint.bridge_url()
    }

    async fn connect_socket(&self, token: &str) -> Result<Socket, ConnectionError> {
        let mut url = self
            .endpoint
            .url("connect", Some((TransportKind::WebSockets, token)))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ConnectionError::InvalidUrl(format!("cannot use scheme {}", scheme)))?;

        tracing::debug!(url = %url, "Opening WebSocket");
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        Ok(socket)
    }

    /// Read until the transport-initialized frame arrives.
    ///
    /// Frames received before it are returned so they can be forwarded once
    /// the link is up.
    async fn await_init(socket: &mut Socket) -> Result<Vec<String>, ConnectionError> {
        let mut early = Vec::new();

        loop {
            let text = match socket.next().await {
                Some(Ok(Message::Text(text))) => text.to_string(),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ConnectionError::Handshake(
                        "socket closed before the bridge initialized the transport".to_string(),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
            };

            match decode_frame(&text) {
                Ok(ServerFrame::Push {
                    initialized: true,
                    messages,
                }) => {
                    if !messages.is_empty() {
                        early.push(text);
                    }
                    return Ok(early);
                }
                Ok(ServerFrame::KeepAlive) => {}
                _ => early.push(text),
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<FrameLink, ConnectionError> {
        let negotiation = self.endpoint.negotiate().await?;
        let token = negotiation.connection_token.as_str();

        if !negotiation.allows_websockets() {
            tracing::info!("Bridge declined WebSockets; falling back to long polling");
            return LongPollingTransport::from_endpoint(self.endpoint.clone())
                .open_negotiated(token)
                .await;
        }

        let mut socket = self.connect_socket(token).await?;
        let early = Self::await_init(&mut socket).await?;
        self.endpoint.start(TransportKind::WebSockets, token).await?;

        tracing::info!(bridge = %self.bridge_url(), "Bridge transport started");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        for frame in early {
            // The receiver is still held below, so this cannot fail
            let _ = inbound_tx.send(frame);
        }

        let abort = self
            .endpoint
            .abort_request(TransportKind::WebSockets, token)?;
        let (sink, stream) = socket.split();
        tokio::spawn(pump(sink, stream, outbound_rx, inbound_tx, abort));

        Ok(FrameLink::new(outbound_tx, inbound_rx))
    }
}

/// Which side ended the link.
#[derive(Debug, PartialEq, Eq)]
enum Ending {
    /// The connection dropped either end of its link
    Local,
    /// The socket failed or the bridge closed it
    Remote,
}

/// Move frames between the socket and the link until either side closes.
///
/// When the link ends locally the socket is closed and the bridge is sent
/// the abort request.
async fn pump<K, R, E>(
    mut sink: K,
    mut stream: R,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<String>,
    abort: Option<AbortRequest>,
) where
    K: Sink<Message> + Unpin,
    K::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let ending = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    tracing::trace!(size = text.len(), "Sending frame");
                    if let Err(e) = sink.send(Message::text(text)).await {
                        tracing::warn!(error = %e, "Failed to send frame; dropping link");
                        break Ending::Remote;
                    }
                }
                None => {
                    tracing::debug!("Link closed locally; closing socket");
                    break Ending::Local;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(size = text.len(), "Received frame");
                    if inbound.send(text.to_string()).is_err() {
                        tracing::debug!("Link reader is gone; closing socket");
                        break Ending::Local;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Bridge closed the socket");
                    break Ending::Remote;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket error; dropping link");
                    break Ending::Remote;
                }
                None => break Ending::Remote,
            },
        }
    };

    if ending == Ending::Local {
        let _ = sink.close().await;
        if let Some(abort) = abort {
            abort.send().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use warp::Filter;

    /// Serve `POST /eventbridge/abort` and count the requests.
    fn abort_counter() -> (Option<AbortRequest>, Arc<AtomicUsize>) {
        let aborted = Arc::new(AtomicUsize::new(0));
        let counter = aborted.clone();
        let route = warp::post()
            .and(warp::path!("eventbridge" / "abort"))
            .map(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                warp::reply()
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let endpoint = BridgeEndpoint::new(
            &format!("http://{}/eventbridge/", addr),
            BridgeConfig::default(),
        )
        .unwrap();
        let abort = endpoint
            .abort_request(TransportKind::WebSockets, "token")
            .unwrap();
        (abort, aborted)
    }

    #[test]
    fn test_normalizes_bridge_url() {
        let transport =
            WebSocketTransport::new("http://host/api/eventbridge", BridgeConfig::default())
                .unwrap();
        assert_eq!(transport.bridge_url().as_str(), "http://host/api/eventbridge/");
    }

    #[test]
    fn test_rejects_unusable_urls() {
        assert!(matches!(
            WebSocketTransport::new("ftp://host/eventbridge/", BridgeConfig::default()),
            Err(ConnectionError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_pump_closes_and_aborts_when_reader_is_gone() {
        let (abort, aborted) = abort_counter();
        let (sink, mut sent) = futures::channel::mpsc::unbounded::<Message>();
        let stream = futures::stream::iter(vec![Ok::<_, String>(Message::text("{}"))])
            .chain(futures::stream::pending());

        let (_outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        drop(inbound_rx);

        pump(sink, stream, outbound_rx, inbound_tx, abort).await;

        assert!(sent.next().await.is_none());
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pump_closes_and_aborts_on_local_close() {
        let (abort, aborted) = abort_counter();
        let (sink, mut sent) = futures::channel::mpsc::unbounded::<Message>();
        let stream = futures::stream::pending::<Result<Message, String>>();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel::<String>();
        outbound_tx.send("frame".to_string()).unwrap();
        drop(outbound_tx);

        pump(sink, stream, outbound_rx, inbound_tx, abort).await;

        assert_eq!(sent.next().await, Some(Message::text("frame")));
        assert!(sent.next().await.is_none());
        assert_eq!(aborted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pump_skips_abort_when_bridge_ends_the_stream() {
        let (abort, aborted) = abort_counter();
        let (sink, _sent) = futures::channel::mpsc::unbounded::<Message>();
        let stream = futures::stream::iter(Vec::<Result<Message, String>>::new());

        let (_outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel::<String>();

        pump(sink, stream, outbound_rx, inbound_tx, abort).await;

        assert_eq!(aborted.load(Ordering::SeqCst), 0);
    }
}
