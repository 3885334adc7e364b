//! HID profile controller
//!
//! Sole owner of the platform registration. Platform callbacks enter here
//! and are dispatched to three narrow listeners (state, reports, app
//! status) that were armed by `register`. Also owns the reconnect
//! deadline: `request_connect` issues a connect and arms a single-shot
//! `ConnectionTimer`; reaching `connected` settles it, unregistering
//! cancels it, and elapsing abandons the attempt without retrying.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use crate::cache::{lock_cache, SharedDeviceCache};
use crate::device::{ConnectionState, Device, DeviceAddress, InputReport};
use crate::error::HidHostError;
use crate::events::{self, Notification, SharedSink, TelemetrySink};
use crate::platform::{HidProfileService, ReportSender};
use crate::timer::{ConnectionTimer, PendingReconnect};

/// Default reconnect deadline (8 seconds)
pub const DEFAULT_RECONNECT_TIMEOUT_MS: u64 = 8000;

// ============================================================================
// Listener Interfaces
// ============================================================================

/// Receives link-layer connection state transitions
pub trait ConnectionStateListener: Send + Sync {
    fn on_connection_state_changed(&self, device: &Device, state: ConnectionState);
}

/// Receives inbound interrupt reports
pub trait ReportListener: Send + Sync {
    fn on_interrupt_data(&self, report: InputReport, host: &dyn ReportSender);
}

/// Receives platform registration status changes
pub trait AppStatusListener: Send + Sync {
    fn on_app_status_changed(&self, registered: bool);
}

/// The listeners armed by one registration
#[derive(Clone)]
pub struct ProfileListeners {
    pub state: Arc<dyn ConnectionStateListener>,
    pub reports: Arc<dyn ReportListener>,
    pub app_status: Option<Arc<dyn AppStatusListener>>,
}

/// Proof of one live registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationHandle {
    id: u64,
}

impl RegistrationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Reconnect behaviour applied on app-status callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Deadline for each connect attempt
    pub timeout: Duration,
    /// Connect to the default host when registration comes up
    pub on_register: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_RECONNECT_TIMEOUT_MS),
            on_register: true,
        }
    }
}

#[derive(Default)]
struct Registration {
    next_id: u64,
    live: Option<(RegistrationHandle, ProfileListeners)>,
}

// ============================================================================
// Controller
// ============================================================================

pub struct HidController<P: HidProfileService> {
    platform: Arc<P>,
    cache: SharedDeviceCache,
    sink: SharedSink,
    telemetry: Arc<dyn TelemetrySink>,
    timer: ConnectionTimer,
    registration: Mutex<Registration>,
    policy: RwLock<ReconnectPolicy>,
}

impl<P: HidProfileService> HidController<P> {
    pub fn new(
        platform: Arc<P>,
        cache: SharedDeviceCache,
        sink: SharedSink,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            platform,
            cache,
            sink,
            telemetry,
            timer: ConnectionTimer::new(),
            registration: Mutex::new(Registration::default()),
            policy: RwLock::new(ReconnectPolicy::default()),
        }
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        *self.policy.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_reconnect_policy(&self, policy: ReconnectPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
        tracing::debug!(
            timeout_ms = policy.timeout.as_millis() as u64,
            on_register = policy.on_register,
            "Reconnect policy updated"
        );
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register with the platform profile service and arm `listeners`
    ///
    /// Fails with `AlreadyRegistered` while a previous registration has not
    /// been unregistered.
    pub fn register(&self, listeners: ProfileListeners) -> Result<RegistrationHandle, HidHostError> {
        // Armed before the platform call and not held across it: the
        // platform may call back synchronously.
        let handle = {
            let mut registration = self.lock_registration();
            if registration.live.is_some() {
                tracing::warn!("Register called while already registered");
                return Err(HidHostError::AlreadyRegistered);
            }
            registration.next_id += 1;
            let handle = RegistrationHandle {
                id: registration.next_id,
            };
            registration.live = Some((handle, listeners));
            handle
        };

        if let Err(e) = self.platform.register() {
            let mut registration = self.lock_registration();
            if registration.live.as_ref().map(|(live, _)| *live) == Some(handle) {
                registration.live = None;
            }
            return Err(e.into());
        }

        tracing::info!(registration = handle.id, "HID profile registered");
        Ok(handle)
    }

    /// Tear down the live registration, if any
    ///
    /// Idempotent. Cancels the pending reconnect. Returns `true` if a
    /// registration was torn down by this call.
    pub fn unregister(&self) -> bool {
        let Some((handle, _listeners)) = self.lock_registration().live.take() else {
            tracing::debug!("Unregister called while not registered");
            return false;
        };

        self.timer.cancel();
        if let Err(e) = self.platform.unregister() {
            tracing::warn!(error = %e, "Platform unregister failed");
        }

        tracing::info!(registration = handle.id, "HID profile unregistered");
        true
    }

    pub fn is_registered(&self) -> bool {
        self.lock_registration().live.is_some()
    }

    // ------------------------------------------------------------------------
    // Connect requests
    // ------------------------------------------------------------------------

    /// Connect to `device`, abandoning the attempt after `timeout`
    ///
    /// An abandoned attempt is reported once as `ConnectAttemptTimedOut`
    /// and never retried. A new request replaces the pending one.
    pub fn request_connect(&self, device: &Device, timeout: Duration) -> Result<(), HidHostError> {
        if !self.is_registered() {
            return Err(HidHostError::NotRegistered);
        }

        if let Err(e) = self.platform.connect(&device.address) {
            tracing::warn!(address = %device.address, error = %e, "Connect request failed");
            return Err(e.into());
        }

        tracing::info!(
            address = %device.address,
            timeout_ms = timeout.as_millis() as u64,
            "Requested connection to HID host"
        );

        let sink = self.sink.clone();
        let telemetry = self.telemetry.clone();
        self.timer.schedule(device.clone(), timeout, move |target| {
            tracing::warn!(address = %target.address, "Connect attempt timed out, not retrying");
            telemetry.record(
                events::EVENT_CONNECT_TIMED_OUT,
                Some(serde_json::json!({ "address": target.address.as_str() })),
            );
            events::publish_or_warn(
                sink.as_ref(),
                Notification::ConnectAttemptTimedOut { device: target },
            );
        });

        Ok(())
    }

    /// Connect to the cached default host using the configured deadline
    pub fn reconnect_default(&self) -> Result<(), HidHostError> {
        let default = lock_cache(&self.cache).get_default();
        match default {
            Some(device) => self.request_connect(&device, self.reconnect_policy().timeout),
            None => Err(HidHostError::NoDefaultDevice),
        }
    }

    pub fn pending_reconnect(&self) -> Option<PendingReconnect> {
        self.timer.pending()
    }

    /// Send one outbound report to a host outside the relay path
    pub fn send_report(&self, device: &DeviceAddress, report_id: u8, data: &[u8]) -> Result<(), HidHostError> {
        if !self.is_registered() {
            return Err(HidHostError::NotRegistered);
        }
        self.platform.send_report(device, report_id, data)?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Platform callbacks
    // ------------------------------------------------------------------------

    /// Platform reported a connection state transition
    pub fn handle_connection_state(&self, device: &Device, state: ConnectionState) {
        if state == ConnectionState::Connected {
            self.timer.settle(&device.address);
        }

        match self.listeners() {
            Some(listeners) => listeners.state.on_connection_state_changed(device, state),
            None => tracing::trace!(address = %device.address, ?state, "State change while unregistered"),
        }
    }

    /// Platform reported registration status
    ///
    /// Coming up triggers a connect to the default host; going down tears
    /// the registration down on our side too.
    pub fn handle_app_status(&self, registered: bool) {
        tracing::debug!(registered, "App status changed");

        if registered && self.reconnect_policy().on_register {
            match self.reconnect_default() {
                Ok(()) => {}
                Err(HidHostError::NoDefaultDevice) => {
                    tracing::debug!("No default HID host, skipping reconnect");
                }
                Err(e) => tracing::warn!(error = %e, "Reconnect to default host failed"),
            }
        }

        if let Some(listener) = self.listeners().and_then(|l| l.app_status) {
            listener.on_app_status_changed(registered);
        }

        if !registered {
            self.unregister();
        }
    }

    /// Platform delivered an interrupt report
    pub fn handle_interrupt_data(&self, report: InputReport) {
        match self.listeners() {
            Some(listeners) => listeners.reports.on_interrupt_data(report, self.platform.as_ref()),
            None => tracing::trace!(address = %report.source, "Report dropped while unregistered"),
        }
    }

    fn listeners(&self) -> Option<ProfileListeners> {
        self.lock_registration()
            .live
            .as_ref()
            .map(|(_, listeners)| listeners.clone())
    }

    fn lock_registration(&self) -> MutexGuard<'_, Registration> {
        self.registration.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
