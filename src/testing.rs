//! Recording test doubles for the platform, sink and consumer seams
//!
//! Compiled for unit tests and behind the `testing` feature for the
//! scenario tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::device::{ConnectionState, Device, DeviceAddress};
use crate::error::{PlatformError, SinkError};
use crate::events::{Notification, NotificationSink, TelemetrySink};
use crate::platform::{HidProfileService, ReportSender};
use crate::relay::ReportConsumer;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A call made into the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Register,
    Unregister,
    Connect(DeviceAddress),
    SendReport {
        device: DeviceAddress,
        report_id: u8,
        data: Vec<u8>,
    },
}

/// Platform that records every call
#[derive(Default)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    states: Mutex<HashMap<DeviceAddress, ConnectionState>>,
    bonded: Mutex<Vec<Device>>,
    fail_register: AtomicBool,
    fail_sends: AtomicBool,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        lock(&self.calls).clone()
    }

    pub fn connect_calls(&self) -> Vec<DeviceAddress> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Connect(address) => Some(address.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_reports(&self) -> Vec<(DeviceAddress, u8, Vec<u8>)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                PlatformCall::SendReport {
                    device,
                    report_id,
                    data,
                } => Some((device.clone(), *report_id, data.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &PlatformCall) -> usize {
        lock(&self.calls).iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }

    pub fn set_state(&self, device: &DeviceAddress, state: ConnectionState) {
        lock(&self.states).insert(device.clone(), state);
    }

    pub fn set_bonded(&self, devices: Vec<Device>) {
        *lock(&self.bonded) = devices;
    }

    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

impl ReportSender for RecordingPlatform {
    fn send_report(&self, device: &DeviceAddress, report_id: u8, data: &[u8]) -> Result<(), PlatformError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable);
        }
        lock(&self.calls).push(PlatformCall::SendReport {
            device: device.clone(),
            report_id,
            data: data.to_vec(),
        });
        Ok(())
    }
}

impl HidProfileService for RecordingPlatform {
    fn register(&self) -> Result<(), PlatformError> {
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(PlatformError::Rejected("register refused".into()));
        }
        lock(&self.calls).push(PlatformCall::Register);
        Ok(())
    }

    fn unregister(&self) -> Result<(), PlatformError> {
        lock(&self.calls).push(PlatformCall::Unregister);
        Ok(())
    }

    fn connect(&self, device: &DeviceAddress) -> Result<(), PlatformError> {
        lock(&self.calls).push(PlatformCall::Connect(device.clone()));
        Ok(())
    }

    fn connection_state(&self, device: &DeviceAddress) -> ConnectionState {
        lock(&self.states).get(device).copied().unwrap_or_default()
    }

    fn bonded_devices(&self) -> Result<Vec<Device>, PlatformError> {
        Ok(lock(&self.bonded).clone())
    }
}

/// Notification sink that keeps everything it was given
#[derive(Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
    fail_alerts: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    pub fn count<F: Fn(&Notification) -> bool>(&self, predicate: F) -> usize {
        lock(&self.notifications).iter().filter(|n| predicate(n)).count()
    }

    pub fn clear(&self) {
        lock(&self.notifications).clear();
    }

    /// Make user alerts fail as if no presentation handle was available
    pub fn fail_alerts(&self, fail: bool) {
        self.fail_alerts.store(fail, Ordering::SeqCst);
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, notification: Notification) -> Result<(), SinkError> {
        if matches!(notification, Notification::ActionRequired { .. })
            && self.fail_alerts.load(Ordering::SeqCst)
        {
            return Err(SinkError::Presentation("no alert channel".into()));
        }
        lock(&self.notifications).push(notification);
        Ok(())
    }
}

/// Telemetry sink that keeps event names and payloads
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<(String, Option<serde_json::Value>)>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        lock(&self.events).iter().map(|(name, _)| name.clone()).collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: &str, payload: Option<serde_json::Value>) {
        lock(&self.events).push((event.to_string(), payload));
    }
}

/// Consumer that answers every report with a fixed list of payloads
#[derive(Default)]
pub struct ScriptedConsumer {
    replies: Vec<Vec<u8>>,
    received: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedConsumer {
    pub fn new(replies: Vec<Vec<u8>>) -> Self {
        Self {
            replies,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        lock(&self.received).clone()
    }
}

impl ReportConsumer for ScriptedConsumer {
    fn handle_report(&self, raw: &[u8]) -> Vec<Vec<u8>> {
        lock(&self.received).push(raw.to_vec());
        self.replies.clone()
    }
}
