//! hidhostd Library
//!
//! Default-host bookkeeping, reconnect and report relay for a HID
//! peripheral. Public API for the daemon, tests and benchmarks.

pub mod cache;
pub mod config;
pub mod controller;
pub mod dbus;
pub mod device;
pub mod error;
pub mod events;
pub mod platform;
pub mod relay;
pub mod service;
pub mod state_machine;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod timer;
pub mod watcher;

/// Re-export commonly used types
pub use cache::{lock_cache, new_shared_cache, DeviceCache, SharedDeviceCache};
pub use config::{load_shared_config, new_shared_config, Config, ConfigError, SharedConfig};
pub use controller::{
    AppStatusListener, ConnectionStateListener, HidController, ProfileListeners, ReconnectPolicy,
    RegistrationHandle, ReportListener,
};
pub use dbus::{init_dbus_service, HidHostDaemon, PlatformBridge, DBUS_INTERFACE, DBUS_NAME, DBUS_PATH};
pub use device::{AddressError, BondState, ConnectionState, Device, DeviceAddress, InputReport};
pub use error::{HidHostError, PlatformError, SinkError, StoreError};
pub use events::{ChannelSink, Notification, NotificationSink, SharedSink, TelemetrySink, TracingTelemetry};
pub use platform::{HidProfileService, ReportSender};
pub use relay::{RelayOutcome, ReportConsumer, ReportRelay};
pub use service::HostService;
pub use state_machine::ConnectionStateMachine;
pub use store::{DeviceStore, JsonDeviceStore, MemoryDeviceStore, StoredHosts};
pub use timer::{ConnectionTimer, PendingReconnect};
