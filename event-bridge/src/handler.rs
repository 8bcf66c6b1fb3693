//! Event handler capability implemented by presentation layers.

use crate::types::BusinessEvent;

/// Receives the notifications pushed by the bridge.
///
/// Callbacks run on the connection's reader task, not on the task that
/// started the subscription, and are invoked one at a time in arrival order.
/// A panicking callback is caught and logged; delivery continues with the
/// next notification.
#[cfg_attr(test, mockall::automock)]
pub trait EventHandler: Send + Sync {
    /// A business event matching the subscription filter was received.
    fn on_business_event(&self, event: &BusinessEvent);

    /// The bridge reported a service exception.
    ///
    /// This is data about the remote service, not a failure of the
    /// subscription; the subscription stays active.
    fn on_exception_raised(&self, message: &str);

    /// The bridge sent a management message.
    fn on_management_event(&self, message: &str);

    /// The bridge (re)established its connection to the message bus.
    fn on_connection_to_message_bus_established(&self);

    /// The bridge lost its connection to the message bus.
    ///
    /// The local bridge connection is unaffected.
    fn on_connection_to_message_bus_lost(&self);
}
