//! Platform HID profile service seam
//!
//! The core only needs register/unregister, connect and report send from
//! the platform, plus two read-only queries used for presentation. How
//! those reach the link layer is the implementor's business.

use crate::device::{ConnectionState, Device, DeviceAddress};
use crate::error::PlatformError;

/// Sends outbound interrupt reports back to a host
pub trait ReportSender: Send + Sync {
    fn send_report(&self, device: &DeviceAddress, report_id: u8, data: &[u8]) -> Result<(), PlatformError>;
}

/// Platform HID device profile service
pub trait HidProfileService: ReportSender {
    /// Bring up the peripheral role. Completion arrives as an app-status callback.
    fn register(&self) -> Result<(), PlatformError>;

    /// Tear down the peripheral role
    fn unregister(&self) -> Result<(), PlatformError>;

    /// Ask the link layer to connect to `device`
    fn connect(&self, device: &DeviceAddress) -> Result<(), PlatformError>;

    /// Current link state of `device` as the platform sees it
    fn connection_state(&self, device: &DeviceAddress) -> ConnectionState;

    /// The platform's paired-device list
    fn bonded_devices(&self) -> Result<Vec<Device>, PlatformError>;
}
