//! Host service lifecycle
//!
//! `HostService` wires the device cache, controller, state machine and
//! report relay together and is the single object the daemon (or a test)
//! drives. Platform callbacks enter through the `on_*` methods; operator
//! actions through the rest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::{lock_cache, new_shared_cache, DeviceCache, SharedDeviceCache};
use crate::config::Config;
use crate::controller::{HidController, ProfileListeners, RegistrationHandle};
use crate::device::{ConnectionState, Device, DeviceAddress, InputReport};
use crate::error::{HidHostError, StoreError};
use crate::events::{self, Notification, SharedSink, TelemetrySink};
use crate::platform::HidProfileService;
use crate::relay::{ReportConsumer, ReportRelay};
use crate::state_machine::ConnectionStateMachine;
use crate::store::{DeviceStore, JsonDeviceStore};

/// Open the JSON host store named by the config, or the default location
pub fn open_store(config: &Config) -> Result<JsonDeviceStore, StoreError> {
    match &config.store.path {
        Some(path) => Ok(JsonDeviceStore::new(path.clone())),
        None => JsonDeviceStore::open_default(),
    }
}

pub struct HostService<P: HidProfileService> {
    platform: Arc<P>,
    cache: SharedDeviceCache,
    controller: HidController<P>,
    state_machine: Arc<ConnectionStateMachine>,
    relay: Arc<ReportRelay>,
    sink: SharedSink,
    started: AtomicBool,
}

impl<P: HidProfileService> HostService<P> {
    pub fn new(
        platform: Arc<P>,
        store: Box<dyn DeviceStore>,
        sink: SharedSink,
        telemetry: Arc<dyn TelemetrySink>,
        config: &Config,
    ) -> Self {
        let cache = new_shared_cache(DeviceCache::open(store));
        let controller = HidController::new(
            platform.clone(),
            cache.clone(),
            sink.clone(),
            telemetry.clone(),
        );
        let state_machine = Arc::new(ConnectionStateMachine::new(
            cache.clone(),
            sink.clone(),
            telemetry,
            config.monitoring.armed,
        ));
        let relay = Arc::new(ReportRelay::new(sink.clone()));

        let service = Self {
            platform,
            cache,
            controller,
            state_machine,
            relay,
            sink,
            started: AtomicBool::new(false),
        };
        service.apply_config(config);
        service
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Register with the platform and publish the connection indicator
    pub fn start(&self) -> Result<RegistrationHandle, HidHostError> {
        let handle = self.controller.register(ProfileListeners {
            state: self.state_machine.clone(),
            reports: self.relay.clone(),
            app_status: None,
        })?;
        self.started.store(true, Ordering::SeqCst);

        let (device, state) = match self.default_host() {
            Some((device, state)) => (Some(device), state),
            None => (None, ConnectionState::Disconnected),
        };
        tracing::info!(
            default = ?device.as_ref().map(|d| d.address.as_str()),
            %state,
            "HID host service started"
        );
        events::publish_or_warn(
            self.sink.as_ref(),
            Notification::ConnectionIndicator { device, state },
        );

        Ok(handle)
    }

    /// Unregister and clear the connection indicator
    ///
    /// Safe to call repeatedly; only the first call after `start` has any
    /// effect. Returns `true` for that call.
    pub fn stop(&self) -> bool {
        if !self.started.swap(false, Ordering::SeqCst) {
            return false;
        }

        self.controller.unregister();
        events::publish_or_warn(
            self.sink.as_ref(),
            Notification::ConnectionIndicator {
                device: None,
                state: ConnectionState::Disconnected,
            },
        );
        tracing::info!("HID host service stopped");
        true
    }

    pub fn is_registered(&self) -> bool {
        self.controller.is_registered()
    }

    /// Apply reconnect, monitoring and alert settings to the running service
    pub fn apply_config(&self, config: &Config) {
        self.controller.set_reconnect_policy(config.reconnect.policy());
        self.state_machine.set_monitoring(config.monitoring.armed);
        self.relay.set_alerts_enabled(config.alerts.enabled);
    }

    // ------------------------------------------------------------------------
    // Platform callbacks
    // ------------------------------------------------------------------------

    pub fn on_connection_state_changed(&self, device: &Device, state: ConnectionState) {
        self.controller.handle_connection_state(device, state);
    }

    pub fn on_app_status_changed(&self, registered: bool) {
        self.controller.handle_app_status(registered);
    }

    pub fn on_interrupt_data(&self, report: InputReport) {
        self.controller.handle_interrupt_data(report);
    }

    // ------------------------------------------------------------------------
    // Operator actions
    // ------------------------------------------------------------------------

    pub fn arm_monitoring(&self) {
        self.state_machine.arm_monitoring();
    }

    pub fn disarm_monitoring(&self) {
        self.state_machine.disarm_monitoring();
    }

    pub fn set_monitoring(&self, armed: bool) {
        self.state_machine.set_monitoring(armed);
    }

    pub fn is_monitoring(&self) -> bool {
        self.state_machine.is_monitoring()
    }

    pub fn attach_consumer(&self, consumer: Arc<dyn ReportConsumer>) {
        self.relay.attach_consumer(consumer);
    }

    pub fn detach_consumer(&self) -> bool {
        self.relay.detach_consumer()
    }

    pub fn has_active_consumer(&self) -> bool {
        self.relay.is_active()
    }

    /// Known hosts as currently cached
    pub fn known_hosts(&self) -> Vec<Device> {
        lock_cache(&self.cache).list_known_hosts()
    }

    /// Known hosts reconciled with the platform's bonded-device list
    pub fn available_hosts(&self) -> Result<Vec<Device>, HidHostError> {
        let paired = self.platform.bonded_devices()?;

        let (changed, default_dropped, hosts) = {
            let mut cache = lock_cache(&self.cache);
            let had_default = cache.get_default().is_some();
            let changed = cache.sync_with_paired(&paired);
            let default_dropped = had_default && cache.get_default().is_none();
            (changed, default_dropped, cache.list_known_hosts())
        };

        if changed {
            events::publish_or_warn(
                self.sink.as_ref(),
                Notification::AvailableHostsChanged {
                    hosts: hosts.clone(),
                },
            );
        }
        if default_dropped {
            events::publish_or_warn(
                self.sink.as_ref(),
                Notification::DefaultHostChanged {
                    device: None,
                    state: ConnectionState::Disconnected,
                },
            );
        }
        Ok(hosts)
    }

    /// The default host and its current link state
    pub fn default_host(&self) -> Option<(Device, ConnectionState)> {
        let device = lock_cache(&self.cache).get_default()?;
        let state = self.platform.connection_state(&device.address);
        Some((device, state))
    }

    /// Make a known host the default
    pub fn set_default_host(&self, address: &DeviceAddress) -> Result<Device, HidHostError> {
        let (device, changed) = {
            let mut cache = lock_cache(&self.cache);
            let changed = !cache.is_default(address);
            if !cache.promote_known(address) {
                return Err(HidHostError::UnknownHost(address.clone()));
            }
            match cache.get_default() {
                Some(device) => (device, changed),
                None => return Err(HidHostError::NoDefaultDevice),
            }
        };

        if changed {
            let state = self.platform.connection_state(&device.address);
            events::publish_or_warn(
                self.sink.as_ref(),
                Notification::DefaultHostChanged {
                    device: Some(device.clone()),
                    state,
                },
            );
        }
        Ok(device)
    }

    /// Drop a known host. Returns `false` if it was not known.
    pub fn forget_host(&self, address: &DeviceAddress) -> bool {
        let (was_default, hosts) = {
            let mut cache = lock_cache(&self.cache);
            let was_default = cache.is_default(address);
            if !cache.forget_host(address) {
                return false;
            }
            (was_default, cache.list_known_hosts())
        };

        tracing::info!(address = %address, was_default, "HID host forgotten");
        events::publish_or_warn(self.sink.as_ref(), Notification::AvailableHostsChanged { hosts });
        if was_default {
            events::publish_or_warn(
                self.sink.as_ref(),
                Notification::DefaultHostChanged {
                    device: None,
                    state: ConnectionState::Disconnected,
                },
            );
        }
        true
    }

    /// Connect to the default host now
    pub fn reconnect_default(&self) -> Result<(), HidHostError> {
        self.controller.reconnect_default()
    }

    pub fn send_report(&self, address: &DeviceAddress, report_id: u8, data: &[u8]) -> Result<(), HidHostError> {
        self.controller.send_report(address, report_id, data)
    }

    pub fn controller(&self) -> &HidController<P> {
        &self.controller
    }

    pub fn cache(&self) -> &SharedDeviceCache {
        &self.cache
    }
}
