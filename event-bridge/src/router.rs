//! Push notification routing.
//!
//! This module maps the five notification names the bridge pushes onto the
//! matching [`EventHandler`] callbacks through a fixed dispatch table.
//! Names that are not in the table are ignored so newer bridges can add
//! notifications without breaking older clients.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::handler::EventHandler;
use crate::protocol::HubMessage;
use crate::types::BusinessEvent;

/// Push notifications understood by the client.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Notification {
    /// `OnBusinessEventReceived(map)`
    BusinessEventReceived,
    /// `OnExceptionRaised(string)`
    ExceptionRaised,
    /// `OnManagementEvent(string)`
    ManagementEvent,
    /// `OnConnectionToMessageBusEstablished()`
    ConnectionEstablished,
    /// `OnConnectionToMessageBusLost()`
    ConnectionLost,
}

impl Notification {
    /// All notifications, in table order.
    pub const ALL: [Notification; 5] = [
        Notification::BusinessEventReceived,
        Notification::ExceptionRaised,
        Notification::ManagementEvent,
        Notification::ConnectionEstablished,
        Notification::ConnectionLost,
    ];

    /// Method name used on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            Notification::BusinessEventReceived => "OnBusinessEventReceived",
            Notification::ExceptionRaised => "OnExceptionRaised",
            Notification::ManagementEvent => "OnManagementEvent",
            Notification::ConnectionEstablished => "OnConnectionToMessageBusEstablished",
            Notification::ConnectionLost => "OnConnectionToMessageBusLost",
        }
    }
}

/// Result of routing a single push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The matching callback ran to completion
    Delivered(Notification),
    /// The push is for another hub or has an unknown name
    Ignored,
    /// The push arguments did not have the expected shape
    Malformed(String),
    /// The callback panicked; the panic was contained
    HandlerPanicked(Notification),
}

type Delivery = fn(&dyn EventHandler, &[Value]) -> Result<(), String>;

fn deliver_business_event(handler: &dyn EventHandler, args: &[Value]) -> Result<(), String> {
    match args.first() {
        Some(Value::Object(map)) => {
            handler.on_business_event(&BusinessEvent::new(map.clone()));
            Ok(())
        }
        Some(other) => Err(format!("expected an attribute map, got {}", other)),
        None => Err("missing business event argument".to_string()),
    }
}

fn deliver_exception(handler: &dyn EventHandler, args: &[Value]) -> Result<(), String> {
    handler.on_exception_raised(&text_argument(args));
    Ok(())
}

fn deliver_management_event(handler: &dyn EventHandler, args: &[Value]) -> Result<(), String> {
    handler.on_management_event(&text_argument(args));
    Ok(())
}

fn deliver_bus_established(handler: &dyn EventHandler, _args: &[Value]) -> Result<(), String> {
    handler.on_connection_to_message_bus_established();
    Ok(())
}

fn deliver_bus_lost(handler: &dyn EventHandler, _args: &[Value]) -> Result<(), String> {
    handler.on_connection_to_message_bus_lost();
    Ok(())
}

/// First argument as text; non-string values keep their JSON form.
fn text_argument(args: &[Value]) -> String {
    match args.first() {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Routes pushes from one hub to a handler.
#[derive(Clone)]
pub struct PushRouter {
    hub: String,
    handler: Arc<dyn EventHandler>,
    table: HashMap<String, (Notification, Delivery)>,
}

impl PushRouter {
    /// Create a router for pushes sent by `hub`.
    pub fn new(hub: &str, handler: Arc<dyn EventHandler>) -> Self {
        let table = Notification::ALL
            .iter()
            .map(|&notification| {
                let delivery: Delivery = match notification {
                    Notification::BusinessEventReceived => deliver_business_event,
                    Notification::ExceptionRaised => deliver_exception,
                    Notification::ManagementEvent => deliver_management_event,
                    Notification::ConnectionEstablished => deliver_bus_established,
                    Notification::ConnectionLost => deliver_bus_lost,
                };
                (notification.wire_name().to_ascii_lowercase(), (notification, delivery))
            })
            .collect();

        Self {
            hub: hub.to_ascii_lowercase(),
            handler,
            table,
        }
    }

    /// Route one pushed hub message to the handler.
    ///
    /// Hub and method names match case-insensitively. Pushes without a hub
    /// name are accepted.
    pub fn dispatch(&self, message: &HubMessage) -> DispatchOutcome {
        if !message.hub.is_empty() && !message.hub.eq_ignore_ascii_case(&self.hub) {
            tracing::trace!(hub = %message.hub, "Ignoring push for another hub");
            return DispatchOutcome::Ignored;
        }

        let Some(&(notification, deliver)) = self.table.get(&message.method.to_ascii_lowercase())
        else {
            tracing::debug!(method = %message.method, "Ignoring unknown push notification");
            return DispatchOutcome::Ignored;
        };

        let handler = self.handler.as_ref();
        match catch_unwind(AssertUnwindSafe(|| deliver(handler, &message.args))) {
            Ok(Ok(())) => DispatchOutcome::Delivered(notification),
            Ok(Err(reason)) => {
                tracing::warn!(method = %message.method, %reason, "Malformed push notification");
                DispatchOutcome::Malformed(reason)
            }
            Err(_) => {
                tracing::error!(
                    method = %message.method,
                    "Event handler panicked; continuing with the next notification"
                );
                DispatchOutcome::HandlerPanicked(notification)
            }
        }
    }
}
