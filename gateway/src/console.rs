//! Console presentation of bridged events.
//!
//! [`ConsoleEventHandler`] writes every callback to an output stream in a
//! plain, line-oriented format and counts what it has seen so a summary can
//! be logged at shutdown.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use event_bridge::{BusinessEvent, EventHandler};
use serde_json::Value;

/// Separator printed before each business event
pub const EVENT_SEPARATOR: &str = "===========================================";

/// Render an event attribute value for display.
///
/// Numbers that fit a signed 64-bit integer print without a fraction
/// (`72.0` → `72`). Every other number prints like a Java `double`: plain
/// decimals between 10^-3 and 10^7 (`72.5`), scientific notation outside
/// that range (`1.0E20`). Strings print verbatim and `null` prints as
/// `null`.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if is_integral(f) => (f as i64).to_string(),
            (None, Some(f)) => format_double(f),
            (None, None) => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn is_integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
}

/// Shortest round-trip digits in Java's `Double.toString` layout.
fn format_double(f: f64) -> String {
    let magnitude = f.abs();
    if !f.is_finite() || (1e-3..1e7).contains(&magnitude) {
        let plain = f.to_string();
        return if plain.contains('.') || !f.is_finite() {
            plain
        } else {
            format!("{}.0", plain)
        };
    }
    if magnitude == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let scientific = format!("{:e}", f);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    if mantissa.contains('.') {
        format!("{}E{}", mantissa, exponent)
    } else {
        format!("{}.0E{}", mantissa, exponent)
    }
}

/// Counts of callbacks received
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventStats {
    pub business_events: u64,
    pub exceptions: u64,
    pub management_events: u64,
    pub bus_established: u64,
    pub bus_lost: u64,
}

impl EventStats {
    pub fn total(&self) -> u64 {
        self.business_events
            + self.exceptions
            + self.management_events
            + self.bus_established
            + self.bus_lost
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "Events: {} total, {} business, {} errors, {} management, {} bus up, {} bus down",
            self.total(),
            self.business_events,
            self.exceptions,
            self.management_events,
            self.bus_established,
            self.bus_lost
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    business_events: AtomicU64,
    exceptions: AtomicU64,
    management_events: AtomicU64,
    bus_established: AtomicU64,
    bus_lost: AtomicU64,
}

/// Event handler that prints to a writer.
pub struct ConsoleEventHandler<W: Write + Send> {
    out: Mutex<W>,
    counters: Counters,
}

impl<W: Write + Send> ConsoleEventHandler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> EventStats {
        EventStats {
            business_events: self.counters.business_events.load(Ordering::Relaxed),
            exceptions: self.counters.exceptions.load(Ordering::Relaxed),
            management_events: self.counters.management_events.load(Ordering::Relaxed),
            bus_established: self.counters.bus_established.load(Ordering::Relaxed),
            bus_lost: self.counters.bus_lost.load(Ordering::Relaxed),
        }
    }

    /// Consume the handler and return the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lines(&self, lines: &[String]) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = lines
            .iter()
            .try_for_each(|line| writeln!(out, "{}", line))
            .and_then(|()| out.flush());
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to write event output");
        }
    }
}

impl<W: Write + Send> EventHandler for ConsoleEventHandler<W> {
    fn on_business_event(&self, event: &BusinessEvent) {
        self.counters.business_events.fetch_add(1, Ordering::Relaxed);

        let mut lines = Vec::with_capacity(event.len() + 1);
        lines.push(EVENT_SEPARATOR.to_string());
        lines.extend(
            event
                .iter()
                .map(|(key, value)| format!("{}: {}", key, format_value(value))),
        );
        self.write_lines(&lines);
    }

    fn on_exception_raised(&self, message: &str) {
        self.counters.exceptions.fetch_add(1, Ordering::Relaxed);
        self.write_lines(&[format!("Error: {}", message)]);
    }

    fn on_management_event(&self, message: &str) {
        self.counters.management_events.fetch_add(1, Ordering::Relaxed);
        self.write_lines(&[format!("ManagementEvent: {}", message)]);
    }

    fn on_connection_to_message_bus_established(&self) {
        self.counters.bus_established.fetch_add(1, Ordering::Relaxed);
        self.write_lines(&["Connection to message bus established.".to_string()]);
    }

    fn on_connection_to_message_bus_lost(&self) {
        self.counters.bus_lost.fetch_add(1, Ordering::Relaxed);
        self.write_lines(&["Connection to message bus lost.".to_string()]);
    }
}
