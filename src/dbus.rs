//! D-Bus IPC server for hidhostd
//!
//! Implements the org.hidhost.Daemon interface. Two kinds of clients talk
//! to it: the platform HID profile helper, which owns the actual link and
//! relays its callbacks in as method calls, and operator/UI clients.
//!
//! ## Interface: org.hidhost.Daemon
//!
//! ### Methods (profile helper):
//! - `ConnectionStateChanged(address, name, bond: u32, state: u32)`
//! - `AppStatusChanged(registered: bool)`
//! - `InterruptData(address, report_id: u8, data: ay)`
//! - `BondedDevices(devices: a(ssu))` (reconciles the known hosts)
//!
//! ### Methods (operator):
//! - `SetMonitoring(armed: bool)`
//! - `GetDefaultHost() -> (address, name)`
//! - `ListHosts() -> a(ss)`
//! - `SetDefaultHost(address)`, `ForgetHost(address) -> bool`
//! - `ClaimForeground()`, `ReleaseForeground()`
//! - `SendReport(address, report_id: u8, data: ay)`
//! - `ReloadConfig()`
//!
//! ### Signals:
//! - To the helper: `RegisterRequested`, `UnregisterRequested`,
//!   `ConnectRequested(address)`, `ReportOut(address, report_id, data)`
//! - To UI clients: `DefaultHostChanged`, `AvailableHostsChanged`,
//!   `DefaultHostStateChanged`, `ConnectionIndicator`,
//!   `ConnectAttemptTimedOut`, `ActionRequired`, `ReportForwarded`

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use zbus::{fdo, interface, object_server::SignalEmitter};

use crate::config::{reload_shared_config, SharedConfig};
use crate::device::{BondState, ConnectionState, Device, DeviceAddress, InputReport};
use crate::error::{HidHostError, PlatformError};
use crate::events::Notification;
use crate::platform::{HidProfileService, ReportSender};
use crate::relay::ReportConsumer;
use crate::service::HostService;

/// D-Bus interface name
pub const DBUS_INTERFACE: &str = "org.hidhost.Daemon";

/// D-Bus object path
pub const DBUS_PATH: &str = "/org/hidhost/Daemon";

/// D-Bus bus name
pub const DBUS_NAME: &str = "org.hidhost";

// ============================================================================
// Platform Bridge
// ============================================================================

/// A request for the profile helper, emitted as a signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformRequest {
    Register,
    Unregister,
    Connect(DeviceAddress),
    Report {
        device: DeviceAddress,
        report_id: u8,
        data: Vec<u8>,
    },
}

/// `HidProfileService` backed by the external profile helper
///
/// Outbound calls are queued for the signal forwarder and never block.
/// Link state and the bonded list are whatever the helper last told us;
/// until the first `BondedDevices` call there is no bonded list at all.
pub struct PlatformBridge {
    requests: mpsc::UnboundedSender<PlatformRequest>,
    states: Mutex<HashMap<DeviceAddress, ConnectionState>>,
    bonded: Mutex<Option<Vec<Device>>>,
}

impl PlatformBridge {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlatformRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (
            Self {
                requests,
                states: Mutex::new(HashMap::new()),
                bonded: Mutex::new(None),
            },
            rx,
        )
    }

    /// Remember the link state the helper reported
    pub fn record_state(&self, device: &DeviceAddress, state: ConnectionState) {
        lock(&self.states).insert(device.clone(), state);
    }

    /// Replace the bonded-device snapshot
    pub fn set_bonded(&self, devices: Vec<Device>) {
        *lock(&self.bonded) = Some(devices);
    }

    fn request(&self, request: PlatformRequest) -> Result<(), PlatformError> {
        self.requests
            .send(request)
            .map_err(|_| PlatformError::Unavailable)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ReportSender for PlatformBridge {
    fn send_report(&self, device: &DeviceAddress, report_id: u8, data: &[u8]) -> Result<(), PlatformError> {
        self.request(PlatformRequest::Report {
            device: device.clone(),
            report_id,
            data: data.to_vec(),
        })
    }
}

impl HidProfileService for PlatformBridge {
    fn register(&self) -> Result<(), PlatformError> {
        self.request(PlatformRequest::Register)
    }

    fn unregister(&self) -> Result<(), PlatformError> {
        self.request(PlatformRequest::Unregister)
    }

    fn connect(&self, device: &DeviceAddress) -> Result<(), PlatformError> {
        self.request(PlatformRequest::Connect(device.clone()))
    }

    fn connection_state(&self, device: &DeviceAddress) -> ConnectionState {
        lock(&self.states).get(device).copied().unwrap_or_default()
    }

    fn bonded_devices(&self) -> Result<Vec<Device>, PlatformError> {
        lock(&self.bonded).clone().ok_or(PlatformError::Unavailable)
    }
}

/// Foreground session on the bus
///
/// Each report the relay hands over is queued for the forwarder, which
/// emits it as `ReportForwarded`. The session answers asynchronously with
/// `SendReport`, so nothing is produced inline.
struct ForegroundSession {
    forwards: mpsc::UnboundedSender<InputReport>,
}

impl ReportConsumer for ForegroundSession {
    fn handle_report(&self, _raw: &[u8]) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn handle_input(&self, report: &InputReport) -> Vec<Vec<u8>> {
        if self.forwards.send(report.clone()).is_err() {
            tracing::warn!(address = %report.source, "Signal forwarder gone, report not forwarded");
        }
        Vec::new()
    }
}

// ============================================================================
// D-Bus Service
// ============================================================================

pub type DaemonService = HostService<PlatformBridge>;

/// hidhostd D-Bus service
pub struct HidHostDaemon {
    service: Arc<DaemonService>,
    config: SharedConfig,
    /// Monitoring stays armed across reloads (`--arm`)
    force_arm: bool,
    forwards: mpsc::UnboundedSender<InputReport>,
    version: String,
}

impl HidHostDaemon {
    pub fn new(
        service: Arc<DaemonService>,
        config: SharedConfig,
        force_arm: bool,
        forwards: mpsc::UnboundedSender<InputReport>,
    ) -> Self {
        Self {
            service,
            config,
            force_arm,
            forwards,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn parse_address(raw: &str) -> fdo::Result<DeviceAddress> {
    DeviceAddress::parse(raw).map_err(|e| fdo::Error::InvalidArgs(e.to_string()))
}

fn to_fdo(err: HidHostError) -> fdo::Error {
    match err {
        HidHostError::UnknownHost(_) => fdo::Error::InvalidArgs(err.to_string()),
        other => fdo::Error::Failed(other.to_string()),
    }
}

fn host_pair(device: &Device) -> (String, String) {
    (device.address.to_string(), device.name.clone())
}

fn host_pairs(hosts: &[Device]) -> Vec<(String, String)> {
    hosts.iter().map(host_pair).collect()
}

#[interface(name = "org.hidhost.Daemon")]
impl HidHostDaemon {
    // =========================================================================
    // PROFILE HELPER METHODS
    // =========================================================================

    /// Link state transition reported by the helper
    async fn connection_state_changed(
        &self,
        address: &str,
        name: &str,
        bond: u32,
        state: u32,
    ) -> fdo::Result<()> {
        let address = parse_address(address)?;
        let bond = BondState::from_u32(bond)
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("Unknown bond state {}", bond)))?;
        let state = ConnectionState::from_u32(state)
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("Unknown connection state {}", state)))?;

        let device = Device::new(address, name, bond);
        self.service.controller().platform().record_state(&device.address, state);
        self.service.on_connection_state_changed(&device, state);
        Ok(())
    }

    /// Registration status reported by the helper
    async fn app_status_changed(&self, registered: bool) -> fdo::Result<()> {
        tracing::info!(registered, "AppStatusChanged called");
        self.service.on_app_status_changed(registered);
        Ok(())
    }

    /// Inbound interrupt report
    ///
    /// Forwarded to the foreground session as `ReportForwarded` when one
    /// has claimed the foreground, otherwise alerted as `ActionRequired`.
    async fn interrupt_data(&self, address: &str, report_id: u8, data: Vec<u8>) -> fdo::Result<()> {
        let source = parse_address(address)?;
        self.service
            .on_interrupt_data(InputReport::new(source, report_id, data));
        Ok(())
    }

    /// Replace the bonded-device list and reconcile the known hosts
    async fn bonded_devices(&self, devices: Vec<(String, String, u32)>) -> fdo::Result<()> {
        let mut bonded = Vec::with_capacity(devices.len());
        for (address, name, bond) in devices {
            match (DeviceAddress::parse(&address), BondState::from_u32(bond)) {
                (Ok(address), Some(bond)) => bonded.push(Device::new(address, name, bond)),
                _ => tracing::warn!(address = %address, bond, "Skipping malformed bonded device"),
            }
        }

        tracing::debug!(count = bonded.len(), "Bonded devices updated");
        self.service.controller().platform().set_bonded(bonded);
        self.service.available_hosts().map_err(to_fdo)?;
        Ok(())
    }

    // =========================================================================
    // OPERATOR METHODS
    // =========================================================================

    /// Arm or disarm adoption of newly connected hosts
    async fn set_monitoring(&self, armed: bool) -> fdo::Result<()> {
        tracing::info!(armed, "SetMonitoring called");
        self.service.set_monitoring(armed);
        Ok(())
    }

    /// Default host as (address, name), or two empty strings
    async fn get_default_host(&self) -> fdo::Result<(String, String)> {
        Ok(self
            .service
            .default_host()
            .map(|(device, _)| host_pair(&device))
            .unwrap_or_default())
    }

    /// Known hosts as cached; reconciliation happens in `BondedDevices`
    async fn list_hosts(&self) -> fdo::Result<Vec<(String, String)>> {
        Ok(host_pairs(&self.service.known_hosts()))
    }

    async fn set_default_host(&self, address: &str) -> fdo::Result<()> {
        let address = parse_address(address)?;
        tracing::info!(address = %address, "SetDefaultHost called");
        self.service.set_default_host(&address).map_err(to_fdo)?;
        Ok(())
    }

    async fn forget_host(&self, address: &str) -> fdo::Result<bool> {
        let address = parse_address(address)?;
        tracing::info!(address = %address, "ForgetHost called");
        Ok(self.service.forget_host(&address))
    }

    /// A foreground session started and wants reports
    async fn claim_foreground(&self) -> fdo::Result<()> {
        self.service.attach_consumer(Arc::new(ForegroundSession {
            forwards: self.forwards.clone(),
        }));
        Ok(())
    }

    async fn release_foreground(&self) -> fdo::Result<()> {
        self.service.detach_consumer();
        Ok(())
    }

    /// Outbound report from the foreground session
    async fn send_report(&self, address: &str, report_id: u8, data: Vec<u8>) -> fdo::Result<()> {
        let address = parse_address(address)?;
        self.service
            .send_report(&address, report_id, &data)
            .map_err(to_fdo)
    }

    /// Reload configuration from disk
    ///
    /// Applies reconnect timeout, monitoring and alert settings to the
    /// running service without a restart.
    async fn reload_config(&self) -> fdo::Result<()> {
        tracing::info!("ReloadConfig called - reloading configuration from disk");

        match reload_shared_config(&self.config, self.force_arm) {
            Ok(config) => {
                self.service.apply_config(&config);
                tracing::info!(
                    timeout_ms = config.reconnect.timeout_ms,
                    monitoring = config.monitoring.armed,
                    "Configuration reloaded successfully"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload configuration");
                Err(fdo::Error::Failed(format!("Config reload failed: {}", e)))
            }
        }
    }

    // =========================================================================
    // SIGNALS (profile helper)
    // =========================================================================

    #[zbus(signal)]
    async fn register_requested(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn unregister_requested(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn connect_requested(emitter: &SignalEmitter<'_>, address: String) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn report_out(
        emitter: &SignalEmitter<'_>,
        address: String,
        report_id: u8,
        data: Vec<u8>,
    ) -> zbus::Result<()>;

    // =========================================================================
    // SIGNALS (UI)
    // =========================================================================

    /// Default host replaced; empty address when cleared
    #[zbus(signal)]
    async fn default_host_changed(
        emitter: &SignalEmitter<'_>,
        address: String,
        name: String,
        state: u32,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn available_hosts_changed(
        emitter: &SignalEmitter<'_>,
        hosts: Vec<(String, String)>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn default_host_state_changed(
        emitter: &SignalEmitter<'_>,
        address: String,
        state: u32,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn connection_indicator(
        emitter: &SignalEmitter<'_>,
        address: String,
        state: u32,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn connect_attempt_timed_out(emitter: &SignalEmitter<'_>, address: String) -> zbus::Result<()>;

    /// A report arrived with no foreground session; ask the user to open one
    #[zbus(signal)]
    async fn action_required(emitter: &SignalEmitter<'_>, address: String) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn report_forwarded(
        emitter: &SignalEmitter<'_>,
        address: String,
        report_id: u8,
        data: Vec<u8>,
    ) -> zbus::Result<()>;

    // =========================================================================
    // PROPERTIES
    // =========================================================================

    #[zbus(property)]
    async fn monitoring_armed(&self) -> bool {
        self.service.is_monitoring()
    }

    /// Get daemon version
    #[zbus(property)]
    async fn daemon_version(&self) -> &str {
        &self.version
    }
}

// ============================================================================
// Signal Forwarding
// ============================================================================

enum Outbound {
    Notification(Notification),
    Platform(PlatformRequest),
    Forwarded(InputReport),
}

async fn emit_notification(emitter: &SignalEmitter<'_>, notification: Notification) -> zbus::Result<()> {
    let optional = |device: Option<Device>| device.map(|d| host_pair(&d)).unwrap_or_default();

    match notification {
        Notification::DefaultHostChanged { device, state } => {
            let (address, name) = optional(device);
            HidHostDaemon::default_host_changed(emitter, address, name, state.as_u32()).await
        }
        Notification::AvailableHostsChanged { hosts } => {
            HidHostDaemon::available_hosts_changed(emitter, host_pairs(&hosts)).await
        }
        Notification::DefaultHostStateChanged { device, state } => {
            HidHostDaemon::default_host_state_changed(emitter, device.address.to_string(), state.as_u32()).await
        }
        Notification::ConnectionIndicator { device, state } => {
            let (address, _) = optional(device);
            HidHostDaemon::connection_indicator(emitter, address, state.as_u32()).await
        }
        Notification::ConnectAttemptTimedOut { device } => {
            HidHostDaemon::connect_attempt_timed_out(emitter, device.address.to_string()).await
        }
        Notification::ActionRequired { source } => {
            HidHostDaemon::action_required(emitter, source.to_string()).await
        }
    }
}

async fn emit_request(emitter: &SignalEmitter<'_>, request: PlatformRequest) -> zbus::Result<()> {
    match request {
        PlatformRequest::Register => HidHostDaemon::register_requested(emitter).await,
        PlatformRequest::Unregister => HidHostDaemon::unregister_requested(emitter).await,
        PlatformRequest::Connect(address) => {
            HidHostDaemon::connect_requested(emitter, address.to_string()).await
        }
        PlatformRequest::Report {
            device,
            report_id,
            data,
        } => HidHostDaemon::report_out(emitter, device.to_string(), report_id, data).await,
    }
}

/// Drain the notification, platform-request and forwarded-report queues
/// into signals
///
/// Runs until all queues are closed. Emission failures are logged and
/// the item is dropped.
pub async fn forward_signals(
    connection: zbus::Connection,
    notifications: mpsc::UnboundedReceiver<Notification>,
    requests: mpsc::UnboundedReceiver<PlatformRequest>,
    forwarded: mpsc::UnboundedReceiver<InputReport>,
) -> zbus::Result<()> {
    let emitter = SignalEmitter::new(&connection, DBUS_PATH)?;

    let mut outbound = UnboundedReceiverStream::new(notifications)
        .map(Outbound::Notification)
        .merge(UnboundedReceiverStream::new(requests).map(Outbound::Platform))
        .merge(UnboundedReceiverStream::new(forwarded).map(Outbound::Forwarded));

    while let Some(item) = outbound.next().await {
        let result = match item {
            Outbound::Notification(notification) => emit_notification(&emitter, notification).await,
            Outbound::Platform(request) => emit_request(&emitter, request).await,
            Outbound::Forwarded(report) => {
                HidHostDaemon::report_forwarded(&emitter, report.source.to_string(), report.report_id, report.data)
                    .await
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to emit D-Bus signal");
        }
    }

    tracing::debug!("Signal forwarder finished");
    Ok(())
}

/// Initialize and run the D-Bus service
///
/// Connects to the session bus, registers the service name, and exports
/// the interface at the specified object path.
///
/// # Returns
/// A `zbus::Connection` that should be kept alive for the service to run.
pub async fn init_dbus_service(
    service: Arc<DaemonService>,
    config: SharedConfig,
    force_arm: bool,
    forwards: mpsc::UnboundedSender<InputReport>,
) -> zbus::Result<zbus::Connection> {
    let daemon = HidHostDaemon::new(service, config, force_arm, forwards);

    let connection = zbus::connection::Builder::session()?
        .name(DBUS_NAME)?
        .serve_at(DBUS_PATH, daemon)?
        .build()
        .await?;

    tracing::info!(
        name = DBUS_NAME,
        path = DBUS_PATH,
        "D-Bus service registered"
    );

    Ok(connection)
}
