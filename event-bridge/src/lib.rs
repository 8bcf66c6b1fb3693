//! Client for the OpenAccess web event bridge.
//!
//! This crate opens a persistent connection to the event bridge, creates a
//! server-side filtered subscription and delivers the pushed business
//! events to an [`EventHandler`].
//!
//! # Overview
//!
//! - [`SubscriptionSession`]: start/stop lifecycle of one subscription.
//! - [`BridgeConnection`]: owns the transport, correlates invocations with
//!   their completions and routes pushes in arrival order.
//! - [`Transport`]: seam that opens a [`FrameLink`]. [`WebSocketTransport`]
//!   is the production implementation and falls back to
//!   [`LongPollingTransport`] when the bridge declines WebSockets.
//! - [`PushRouter`]: fixed dispatch table from notification names to
//!   handler callbacks. Unknown names are ignored.
//!
//! Handler callbacks run on the connection's reader task, not on the task
//! that called [`SubscriptionSession::start_receiving`]. A panicking
//! callback is logged and dispatch continues with the next push.

mod config;
mod connection;
mod endpoint;
mod error;
mod handler;
mod longpolling;
pub mod protocol;
mod router;
mod session;
mod transport;
mod types;
mod websocket;

pub use config::BridgeConfig;
pub use connection::BridgeConnection;
pub use error::*;
pub use handler::EventHandler;
pub use longpolling::LongPollingTransport;
pub use router::{DispatchOutcome, Notification, PushRouter};
pub use session::SubscriptionSession;
pub use transport::{FrameLink, Transport};
pub use types::*;
pub use websocket::WebSocketTransport;
