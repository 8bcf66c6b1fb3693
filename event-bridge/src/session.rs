//! Subscription lifecycle on top of a [`BridgeConnection`].
//!
//! `start_receiving` connects and creates the server-side subscription;
//! `stop_receiving` stops it and closes the connection. Every failure path
//! leaves the connection closed.

use std::sync::Arc;

use serde_json::Value;

use crate::config::BridgeConfig;
use crate::connection::BridgeConnection;
use crate::error::{ConnectionError, InvocationError, Result, SubscriptionError};
use crate::handler::EventHandler;
use crate::protocol::{CREATE_SUBSCRIPTION, STOP_SUBSCRIPTION};
use crate::transport::Transport;
use crate::types::{ConnectionIdentity, ConnectionState, SubscriptionDescriptor};
use crate::websocket::WebSocketTransport;

/// Closes the connection when dropped unless disarmed.
struct CloseOnDrop<'a> {
    connection: &'a BridgeConnection,
    armed: bool,
}

impl<'a> CloseOnDrop<'a> {
    fn new(connection: &'a BridgeConnection) -> Self {
        Self {
            connection,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.connection.close();
        }
    }
}

/// A single subscription to the event bridge.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use event_bridge::{
///     BridgeConfig, BusinessEvent, ConnectionIdentity, EventHandler, SubscriptionDescriptor,
///     SubscriptionSession,
/// };
///
/// struct Printer;
///
/// impl EventHandler for Printer {
///     fn on_business_event(&self, event: &BusinessEvent) {
///         println!("{} attributes", event.len());
///     }
///     fn on_exception_raised(&self, message: &str) {
///         println!("Error: {}", message);
///     }
///     fn on_management_event(&self, message: &str) {
///         println!("ManagementEvent: {}", message);
///     }
///     fn on_connection_to_message_bus_established(&self) {}
///     fn on_connection_to_message_bus_lost(&self) {}
/// }
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let session = SubscriptionSession::for_bridge(
///     "https://host/api/eventbridge/",
///     ConnectionIdentity::new("session-token", "application-id"),
///     SubscriptionDescriptor::new("demo", "business_event_class eq 'hardware_event'"),
///     Arc::new(Printer),
///     BridgeConfig::default(),
/// )?;
///
/// session.start_receiving().await?;
/// // ... events arrive on the handler ...
/// session.stop_receiving().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SubscriptionSession {
    connection: BridgeConnection,
    identity: ConnectionIdentity,
    descriptor: SubscriptionDescriptor,
}

impl SubscriptionSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: ConnectionIdentity,
        descriptor: SubscriptionDescriptor,
        handler: Arc<dyn EventHandler>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            connection: BridgeConnection::new(transport, handler, config),
            identity,
            descriptor,
        }
    }

    /// Create a session that reaches the bridge over a WebSocket, or over
    /// long polling when the bridge declines WebSockets.
    pub fn for_bridge(
        bridge_url: &str,
        identity: ConnectionIdentity,
        descriptor: SubscriptionDescriptor,
        handler: Arc<dyn EventHandler>,
        config: BridgeConfig,
    ) -> std::result::Result<Self, ConnectionError> {
        let transport = WebSocketTransport::new(bridge_url, config.clone())?;
        Ok(Self::new(
            Arc::new(transport),
            identity,
            descriptor,
            handler,
            config,
        ))
    }

    /// Connect and create the subscription.
    ///
    /// Fails with [`SubscriptionError::AlreadyConnected`] if the session is
    /// already connected; the existing subscription is left untouched.
    pub async fn start_receiving(&self) -> Result<()> {
        match self.connection.connect().await {
            Ok(()) => {}
            Err(ConnectionError::AlreadyConnected) => {
                return Err(SubscriptionError::AlreadyConnected)
            }
            Err(e) => {
                self.connection.close();
                return Err(e.into());
            }
        }

        let guard = CloseOnDrop::new(&self.connection);

        let args = self.create_args().map_err(SubscriptionError::CreateFailed)?;
        let ack = self
            .connection
            .invoke(CREATE_SUBSCRIPTION, args)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Subscription was not created");
                SubscriptionError::CreateFailed(e)
            })?;

        guard.disarm();
        tracing::info!(
            filter = %self.descriptor.filter,
            durable = self.descriptor.is_durable,
            ?ack,
            "Subscription created"
        );
        Ok(())
    }

    /// Stop the subscription and close the connection.
    ///
    /// Without an active connection this only logs and closes.
    pub async fn stop_receiving(&self) -> Result<()> {
        let _guard = CloseOnDrop::new(&self.connection);

        if self.connection.state() != ConnectionState::Connected {
            tracing::info!("No active subscription to stop");
            return Ok(());
        }

        self.connection
            .invoke(STOP_SUBSCRIPTION, Vec::new())
            .await
            .map_err(SubscriptionError::StopFailed)?;

        tracing::info!("Subscription stopped");
        Ok(())
    }

    /// Close the connection without stopping the subscription.
    pub fn close(&self) {
        self.connection.close();
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn descriptor(&self) -> &SubscriptionDescriptor {
        &self.descriptor
    }

    pub fn connection(&self) -> &BridgeConnection {
        &self.connection
    }

    fn create_args(&self) -> std::result::Result<Vec<Value>, InvocationError> {
        Ok(vec![
            serde_json::to_value(&self.identity)?,
            serde_json::to_value(&self.descriptor)?,
        ])
    }
}
