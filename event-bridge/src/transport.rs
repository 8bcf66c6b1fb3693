//! Transport seam between the connection and the wire.
//!
//! A [`Transport`] opens a [`FrameLink`]: a pair of unbounded channels that
//! carry text frames in each direction. The connection never touches
//! sockets directly, which lets tests drive it with an in-memory link.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ConnectionError;

/// Opens links to the bridge.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake and return a ready link.
    ///
    /// When this returns, the bridge has accepted the connection and
    /// invocations may be sent.
    async fn open(&self) -> Result<FrameLink, ConnectionError>;
}

/// An open, bidirectional frame channel.
///
/// Dropping `outbound` asks the transport to close the link. The
/// `inbound` receiver yields `None` once the link is gone.
#[derive(Debug)]
pub struct FrameLink {
    /// Frames to send to the bridge
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames received from the bridge, in arrival order
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl FrameLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Split into the outbound sender and the inbound receiver.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        (self.outbound, self.inbound)
    }
}
