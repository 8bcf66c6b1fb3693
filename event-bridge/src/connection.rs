//! Bridge connection: transport ownership, invocations and push routing.
//!
//! A [`BridgeConnection`] opens a [`FrameLink`](crate::transport::FrameLink) through its [`Transport`],
//! spawns a reader task that routes pushes to the [`EventHandler`] in
//! arrival order and resolves invocation completions through a correlation
//! table keyed by invocation id.
//!
//! ```text
//! Disconnected --connect()--> Connecting --handshake--> Connected
//!      ^                                                    |
//!      +------------- close() or transport lost ------------+
//! ```
//!
//! `OnConnectionToMessageBus*` pushes are delivered to the handler and
//! never change [`ConnectionState`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::error::{ConnectionError, InvocationError};
use crate::handler::EventHandler;
use crate::protocol::{decode_frame, HubInvocation, RemoteFailure, ServerFrame};
use crate::router::{DispatchOutcome, PushRouter};
use crate::transport::Transport;
use crate::types::ConnectionState;

type CompletionSlot = oneshot::Sender<Result<Value, RemoteFailure>>;

/// Invocations in flight on one link.
#[derive(Default)]
struct Correlation {
    pending: DashMap<String, CompletionSlot>,
    next_id: AtomicU64,
}

impl Correlation {
    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn complete(&self, id: &str, outcome: Result<Value, RemoteFailure>) {
        match self.pending.remove(id) {
            Some((_, slot)) => {
                // The caller may have timed out already
                let _ = slot.send(outcome);
            }
            None => tracing::debug!(id, "Completion for unknown invocation"),
        }
    }

    /// Drop every slot so waiting callers see the link as gone.
    fn fail_all(&self) {
        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "Abandoned in-flight invocations");
        }
    }
}

struct ActiveLink {
    outbound: mpsc::UnboundedSender<String>,
    correlation: Arc<Correlation>,
    reader: JoinHandle<()>,
}

#[derive(Default)]
struct Status {
    state: ConnectionState,
    /// Bumped by every connect attempt and every close
    epoch: u64,
    link: Option<ActiveLink>,
}

#[derive(Default)]
struct Shared {
    status: Mutex<Status>,
}

impl Shared {
    /// Detach and tear down the active link, if any.
    fn close(&self) {
        let link = {
            let mut status = self.status.lock();
            status.epoch += 1;
            status.state = ConnectionState::Disconnected;
            status.link.take()
        };

        if let Some(link) = link {
            tracing::info!("Closing bridge connection");
            link.reader.abort();
            link.correlation.fail_all();
            drop(link.outbound);
        }
    }

    /// Called by the reader when the inbound side of the link ends.
    fn transport_lost(&self, epoch: u64, correlation: &Correlation) {
        let lost = {
            let mut status = self.status.lock();
            if status.epoch == epoch && status.link.is_some() {
                status.state = ConnectionState::Disconnected;
                status.link.take()
            } else {
                None
            }
        };

        if lost.is_some() {
            tracing::warn!("Bridge transport lost");
        }
        correlation.fail_all();
    }
}

/// Resets a `Connecting` state if the connect attempt is abandoned.
struct ConnectingGuard<'a> {
    shared: &'a Shared,
    epoch: u64,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut status = self.shared.status.lock();
        if status.epoch == self.epoch && status.state == ConnectionState::Connecting {
            status.state = ConnectionState::Disconnected;
        }
    }
}

/// A connection to the event bridge.
///
/// Dropping the connection closes it.
pub struct BridgeConnection {
    transport: Arc<dyn Transport>,
    router: PushRouter,
    config: BridgeConfig,
    shared: Arc<Shared>,
}

impl BridgeConnection {
    pub fn new(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn EventHandler>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            transport,
            router: PushRouter::new(&config.hub_name, handler),
            config,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Current local transport state.
    pub fn state(&self) -> ConnectionState {
        self.shared.status.lock().state
    }

    /// Whether pushes are currently routed to the handler.
    pub fn is_handler_registered(&self) -> bool {
        self.shared.status.lock().link.is_some()
    }

    /// Open the transport and start routing pushes.
    ///
    /// Fails with [`ConnectionError::AlreadyConnected`] unless the connection
    /// is `Disconnected`. Any other failure leaves it `Disconnected`.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.config.validate()?;

        let epoch = {
            let mut status = self.shared.status.lock();
            if status.state != ConnectionState::Disconnected {
                return Err(ConnectionError::AlreadyConnected);
            }
            status.state = ConnectionState::Connecting;
            status.epoch += 1;
            status.epoch
        };
        let guard = ConnectingGuard {
            shared: &self.shared,
            epoch,
            armed: true,
        };

        tracing::debug!("Connecting to the event bridge");
        let link =
            match tokio::time::timeout(self.config.connect_timeout, self.transport.open()).await {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to open bridge transport");
                    return Err(e);
                }
                Err(_) => {
                    tracing::warn!(after = ?self.config.connect_timeout, "Bridge connect timed out");
                    return Err(ConnectionError::Timeout(self.config.connect_timeout));
                }
            };

        let mut status = self.shared.status.lock();
        if status.epoch != epoch {
            // close() ran while the transport was opening
            return Err(ConnectionError::Closed);
        }

        let (outbound, inbound) = link.into_parts();
        let correlation = Arc::new(Correlation::default());
        let reader = tokio::spawn(read_frames(
            inbound,
            self.router.clone(),
            correlation.clone(),
            self.shared.clone(),
            epoch,
        ));

        status.link = Some(ActiveLink {
            outbound,
            correlation,
            reader,
        });
        status.state = ConnectionState::Connected;
        drop(status);
        guard.disarm();

        tracing::info!("Connected to the event bridge");
        Ok(())
    }

    /// Invoke a hub method and wait for its completion.
    ///
    /// Waits at most `invoke_timeout`. Closing the connection or losing
    /// the transport fails the call with
    /// [`InvocationError::ConnectionDropped`].
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, InvocationError> {
        let (outbound, correlation) = {
            let status = self.shared.status.lock();
            match (status.state, status.link.as_ref()) {
                (ConnectionState::Connected, Some(link)) => {
                    (link.outbound.clone(), link.correlation.clone())
                }
                _ => return Err(InvocationError::NotConnected),
            }
        };

        let id = correlation.next_id();
        let frame = HubInvocation {
            hub: &self.config.hub_name,
            method,
            args: &args,
            id: id.clone(),
        }
        .encode()?;

        let (slot, completion) = oneshot::channel();
        correlation.pending.insert(id.clone(), slot);

        tracing::debug!(method, id = %id, "Invoking hub method");
        let sent = outbound.send(frame);
        drop(outbound);
        if sent.is_err() {
            correlation.pending.remove(&id);
            return Err(InvocationError::ConnectionDropped(method.to_string()));
        }

        match tokio::time::timeout(self.config.invoke_timeout, completion).await {
            Ok(Ok(Ok(value))) => {
                tracing::debug!(method, id = %id, "Invocation completed");
                Ok(value)
            }
            Ok(Ok(Err(failure))) => {
                tracing::warn!(
                    method,
                    id = %id,
                    hub_exception = failure.is_hub_exception,
                    message = %failure.message,
                    "Invocation failed on the bridge"
                );
                Err(InvocationError::Remote {
                    method: method.to_string(),
                    message: failure.message,
                    data: failure.data,
                })
            }
            Ok(Err(_)) => Err(InvocationError::ConnectionDropped(method.to_string())),
            Err(_) => {
                correlation.pending.remove(&id);
                Err(InvocationError::Timeout {
                    method: method.to_string(),
                    after: self.config.invoke_timeout,
                })
            }
        }
    }

    /// Tear down the transport and stop routing pushes.
    ///
    /// Safe to call any number of times, including while `connect` is in
    /// progress.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for BridgeConnection {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for BridgeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConnection")
            .field("state", &self.state())
            .field("hub", &self.config.hub_name)
            .finish()
    }
}

async fn read_frames(
    mut inbound: mpsc::UnboundedReceiver<String>,
    router: PushRouter,
    correlation: Arc<Correlation>,
    shared: Arc<Shared>,
    epoch: u64,
) {
    while let Some(text) = inbound.recv().await {
        match decode_frame(&text) {
            Ok(ServerFrame::KeepAlive) => {}
            Ok(ServerFrame::Push { messages, .. }) => {
                for message in &messages {
                    let outcome = router.dispatch(message);
                    if outcome != DispatchOutcome::Ignored {
                        tracing::trace!(method = %message.method, ?outcome, "Dispatched push");
                    }
                }
            }
            Ok(ServerFrame::Completion { id, outcome }) => correlation.complete(&id, outcome),
            Ok(ServerFrame::Progress { id }) => {
                tracing::trace!(id = %id, "Ignoring invocation progress")
            }
            Err(e) => {
                tracing::warn!(error = %e, size = text.len(), "Skipping unparseable frame")
            }
        }
    }

    shared.transport_lost(epoch, &correlation);
}
