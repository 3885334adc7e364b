//! Device model for HID hosts
//!
//! A `Device` is what the link layer reports about a remote host: its
//! hardware address, display name and bond status. Connection state is
//! transient and owned by the platform; we only observe it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of octets in a Bluetooth device address
const ADDRESS_OCTETS: usize = 6;

// ============================================================================
// Device Address
// ============================================================================

/// Stable hardware address of a remote host, normalized to `AA:BB:CC:DD:EE:FF`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Parse and normalize an address string
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let octets: Vec<&str> = raw.trim().split(':').collect();
        if octets.len() != ADDRESS_OCTETS {
            return Err(AddressError::WrongLength(raw.to_string()));
        }

        for octet in &octets {
            if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(AddressError::InvalidOctet(raw.to_string()));
            }
        }

        Ok(Self(octets.join(":").to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

/// Address parse error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Not six colon-separated octets
    WrongLength(String),
    /// An octet is not two hex digits
    InvalidOctet(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::WrongLength(raw) => {
                write!(f, "Address '{}' must have {} octets", raw, ADDRESS_OCTETS)
            }
            AddressError::InvalidOctet(raw) => {
                write!(f, "Address '{}' contains an invalid octet", raw)
            }
        }
    }
}

impl std::error::Error for AddressError {}

// ============================================================================
// Bond and Connection State
// ============================================================================

/// Pairing trust relationship at the link-security layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BondState {
    Unbonded,
    Bonding,
    Bonded,
}

impl BondState {
    /// Wire value used on the D-Bus bridge
    pub fn as_u32(self) -> u32 {
        match self {
            BondState::Unbonded => 0,
            BondState::Bonding => 1,
            BondState::Bonded => 2,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(BondState::Unbonded),
            1 => Some(BondState::Bonding),
            2 => Some(BondState::Bonded),
            _ => None,
        }
    }
}

/// Link-layer connection state of one host, as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Wire value used on the D-Bus bridge (profile state numbering)
    pub fn as_u32(self) -> u32 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Disconnecting => 3,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ConnectionState::Disconnected),
            1 => Some(ConnectionState::Connecting),
            2 => Some(ConnectionState::Connected),
            3 => Some(ConnectionState::Disconnecting),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Device
// ============================================================================

/// A remote HID host as last observed on the link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub address: DeviceAddress,
    pub name: String,
    pub bond: BondState,
}

impl Device {
    pub fn new(address: DeviceAddress, name: impl Into<String>, bond: BondState) -> Self {
        Self {
            address,
            name: name.into(),
            bond,
        }
    }

    pub fn is_bonded(&self) -> bool {
        self.bond == BondState::Bonded
    }
}

/// One inbound interrupt report from a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputReport {
    pub source: DeviceAddress,
    pub report_id: u8,
    pub data: Vec<u8>,
}

impl InputReport {
    pub fn new(source: DeviceAddress, report_id: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            report_id,
            data: data.into(),
        }
    }
}
