//! Outward notifications and telemetry
//!
//! The core never talks to a UI directly. Everything a presentation layer
//! needs is published as a `Notification` through a `NotificationSink`,
//! fire-and-forget. Telemetry goes through a separate `TelemetrySink` whose
//! failures are swallowed.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::device::{ConnectionState, Device, DeviceAddress};
use crate::error::SinkError;

/// Telemetry event: a new host was adopted as default
pub const EVENT_DEVICE_CONNECTED: &str = "device_connected";

/// Telemetry event: a reconnect attempt was abandoned at its deadline
pub const EVENT_CONNECT_TIMED_OUT: &str = "connect_timed_out";

/// UI-facing events published by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The default host was replaced (or cleared)
    DefaultHostChanged {
        device: Option<Device>,
        state: ConnectionState,
    },
    /// The known-hosts list changed
    AvailableHostsChanged { hosts: Vec<Device> },
    /// The current default host changed link state
    DefaultHostStateChanged {
        device: Device,
        state: ConnectionState,
    },
    /// Service-level connection indicator, published on start and stop
    ConnectionIndicator {
        device: Option<Device>,
        state: ConnectionState,
    },
    /// A reconnect attempt reached its deadline without connecting
    ConnectAttemptTimedOut { device: Device },
    /// A report arrived with no foreground consumer; the user must act
    ActionRequired { source: DeviceAddress },
}

/// Receiver of UI notifications
pub trait NotificationSink: Send + Sync {
    /// Publish without waiting for the receiver
    fn publish(&self, notification: Notification) -> Result<(), SinkError>;
}

/// Receiver of named telemetry events. Must not fail.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &str, payload: Option<serde_json::Value>);
}

/// Shared notification sink handle
pub type SharedSink = Arc<dyn NotificationSink>;

/// Publish and downgrade any failure to a warning
pub(crate) fn publish_or_warn(sink: &dyn NotificationSink, notification: Notification) {
    if let Err(e) = sink.publish(notification) {
        tracing::warn!(error = %e, "Failed to publish notification");
    }
}

// ============================================================================
// Channel Sink
// ============================================================================

/// Notification sink backed by an unbounded tokio channel
///
/// Publishing never blocks the platform callback thread; a consumer task
/// drains the receiver and forwards to the real transport.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn publish(&self, notification: Notification) -> Result<(), SinkError> {
        self.tx.send(notification).map_err(|_| SinkError::Closed)
    }
}

// ============================================================================
// Tracing Telemetry
// ============================================================================

/// Telemetry sink that renders events as structured log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: &str, payload: Option<serde_json::Value>) {
        match payload {
            Some(payload) => tracing::info!(target: "telemetry", event, %payload, "Telemetry event"),
            None => tracing::info!(target: "telemetry", event, "Telemetry event"),
        }
    }
}
