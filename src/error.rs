//! Error types shared by the core components
//!
//! Only programmer misuse and benign "nothing to do" outcomes are returned
//! as errors. Timeouts and undeliverable reports are observable outcomes,
//! not failures (see `events::Notification::ConnectAttemptTimedOut` and
//! `relay::RelayOutcome::DeliveryUnavailable`).

use std::fmt;

use crate::device::DeviceAddress;

/// Core operation error
#[derive(Debug)]
pub enum HidHostError {
    /// `register` called while a registration is still live
    AlreadyRegistered,
    /// Operation needs a live registration
    NotRegistered,
    /// No default host is cached; reconnect not attempted
    NoDefaultDevice,
    /// The host is not in the known-hosts set
    UnknownHost(DeviceAddress),
    /// Platform profile service call failed
    Platform(PlatformError),
}

impl fmt::Display for HidHostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HidHostError::AlreadyRegistered => {
                write!(f, "HID profile already registered for this process")
            }
            HidHostError::NotRegistered => write!(f, "HID profile is not registered"),
            HidHostError::NoDefaultDevice => write!(f, "No default HID host"),
            HidHostError::UnknownHost(address) => write!(f, "Unknown HID host {}", address),
            HidHostError::Platform(e) => write!(f, "Platform error: {}", e),
        }
    }
}

impl std::error::Error for HidHostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HidHostError::Platform(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PlatformError> for HidHostError {
    fn from(err: PlatformError) -> Self {
        HidHostError::Platform(err)
    }
}

/// Failure reported by the platform HID profile service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The profile service is not reachable
    Unavailable,
    /// The service refused the request
    Rejected(String),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::Unavailable => write!(f, "HID profile service unavailable"),
            PlatformError::Rejected(msg) => write!(f, "Request rejected: {}", msg),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Failure delivering a notification or alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The receiving side has gone away
    Closed,
    /// Could not obtain a presentation handle for a user alert
    Presentation(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Closed => write!(f, "Notification channel closed"),
            SinkError::Presentation(msg) => write!(f, "Presentation failed: {}", msg),
        }
    }
}

impl std::error::Error for SinkError {}

/// Durable host store error
#[derive(Debug)]
pub enum StoreError {
    /// I/O error reading/writing the store file
    IoError(std::io::Error),
    /// JSON (de)serialization error
    ParseError(serde_json::Error),
    /// No store location could be determined
    NoLocation,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::IoError(e) => write!(f, "I/O error: {}", e),
            StoreError::ParseError(e) => write!(f, "Parse error: {}", e),
            StoreError::NoLocation => write!(f, "Could not determine host store location"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::IoError(e) => Some(e),
            StoreError::ParseError(e) => Some(e),
            StoreError::NoLocation => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::ParseError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            HidHostError::AlreadyRegistered.to_string(),
            "HID profile already registered for this process"
        );
        assert_eq!(HidHostError::NoDefaultDevice.to_string(), "No default HID host");

        let err = HidHostError::from(PlatformError::Rejected("busy".into()));
        assert_eq!(err.to_string(), "Platform error: Request rejected: busy");
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let err = HidHostError::from(PlatformError::Unavailable);
        assert!(err.source().is_some());
        assert!(HidHostError::NotRegistered.source().is_none());

        let err = StoreError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(err.source().is_some());
        assert!(StoreError::NoLocation.source().is_none());
    }
}
