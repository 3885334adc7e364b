//! Connection state interpreter
//!
//! Reacts to link-layer transitions reported by the platform. It does not
//! model connection state itself; the platform's report is authoritative.
//!
//! Two rules:
//! - While host monitoring is armed, a bonded and previously unknown host
//!   reaching `connected` is cached and promoted to default.
//! - Whenever the default host changes state, that state is published.
//!
//! The monitor check, cache lookup and promotion run under the cache lock
//! as one critical section. Notifications are published after the lock is
//! released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::{lock_cache, SharedDeviceCache};
use crate::controller::ConnectionStateListener;
use crate::device::{ConnectionState, Device};
use crate::events::{self, Notification, SharedSink, TelemetrySink};

pub struct ConnectionStateMachine {
    cache: SharedDeviceCache,
    sink: SharedSink,
    telemetry: Arc<dyn TelemetrySink>,
    monitoring: AtomicBool,
}

/// What one transition decided, computed under the lock
struct Decision {
    promoted: Option<Vec<Device>>,
    is_default: bool,
}

impl ConnectionStateMachine {
    pub fn new(
        cache: SharedDeviceCache,
        sink: SharedSink,
        telemetry: Arc<dyn TelemetrySink>,
        monitoring: bool,
    ) -> Self {
        Self {
            cache,
            sink,
            telemetry,
            monitoring: AtomicBool::new(monitoring),
        }
    }

    /// Allow newly connected bonded hosts to become the default
    pub fn arm_monitoring(&self) {
        self.set_monitoring(true);
    }

    pub fn disarm_monitoring(&self) {
        self.set_monitoring(false);
    }

    pub fn set_monitoring(&self, armed: bool) {
        // Taken under the cache lock so it orders against in-flight promotions
        let _guard = lock_cache(&self.cache);
        let previous = self.monitoring.swap(armed, Ordering::SeqCst);
        if previous != armed {
            tracing::info!(armed, "Host monitoring changed");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    fn decide(&self, device: &Device, state: ConnectionState) -> Decision {
        let mut cache = lock_cache(&self.cache);

        let adopt = self.monitoring.load(Ordering::SeqCst)
            && state == ConnectionState::Connected
            && device.is_bonded()
            && !cache.is_known_host(&device.address);

        let promoted = if adopt {
            tracing::info!(address = %device.address, name = %device.name, "New HID host connected and bonded");
            cache.promote_to_default(device.clone());
            Some(cache.list_known_hosts())
        } else {
            None
        };

        Decision {
            promoted,
            is_default: cache.is_default(&device.address),
        }
    }
}

impl ConnectionStateListener for ConnectionStateMachine {
    fn on_connection_state_changed(&self, device: &Device, state: ConnectionState) {
        tracing::debug!(address = %device.address, %state, "Connection state changed");

        let decision = self.decide(device, state);

        if let Some(hosts) = decision.promoted {
            self.telemetry.record(events::EVENT_DEVICE_CONNECTED, None);
            events::publish_or_warn(
                self.sink.as_ref(),
                Notification::DefaultHostChanged {
                    device: Some(device.clone()),
                    state,
                },
            );
            events::publish_or_warn(self.sink.as_ref(), Notification::AvailableHostsChanged { hosts });
        }

        if decision.is_default {
            events::publish_or_warn(
                self.sink.as_ref(),
                Notification::DefaultHostStateChanged {
                    device: device.clone(),
                    state,
                },
            );
        }
    }
}
