//! Device kinds and zones
//!
//! A zone is one physical compute unit: a backend kind plus the index of the device within that
//! kind on the local machine.

use crate::constants::DEVICE_INDEX_LIMIT;
use crate::{contract_violation, LocationError, Result};
use std::fmt;
use std::str::FromStr;

/// Index of a device within its kind
pub type DeviceIndex = u32;

/// Rank of a process in a distributed job
pub type Rank = u32;

/// Backend kind of a zone
///
/// The discriminants are the codes stored in packed location keys and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum DeviceKind {
    /// Not yet assigned
    #[default]
    Invalid = 0,
    Cpu = 1,
    Gpu = 2,
    FakeDevice = 3,
    Abc = 4,
    Enflame = 5,
}

impl DeviceKind {
    /// Every kind, in code order
    pub const ALL: [DeviceKind; 6] = [
        DeviceKind::Invalid,
        DeviceKind::Cpu,
        DeviceKind::Gpu,
        DeviceKind::FakeDevice,
        DeviceKind::Abc,
        DeviceKind::Enflame,
    ];

    /// Code stored in packed keys
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Inverse of [`DeviceKind::code`]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Invalid),
            1 => Some(Self::Cpu),
            2 => Some(Self::Gpu),
            3 => Some(Self::FakeDevice),
            4 => Some(Self::Abc),
            5 => Some(Self::Enflame),
            _ => None,
        }
    }

    /// Device tag used in user-facing placement strings
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::FakeDevice => "dummy",
            Self::Abc => "abc",
            Self::Enflame => "enflame",
        }
    }

    /// Whether the wire format carries a device index for this kind
    ///
    /// Kinds without one always live at index 0.
    pub const fn carries_device_index(self) -> bool {
        matches!(self, Self::Gpu | Self::Enflame)
    }

    /// Whether this kind is a device backend other than the host
    pub const fn is_accelerator(self) -> bool {
        !matches!(self, Self::Invalid | Self::Cpu)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DeviceKind {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Gpu),
            "dummy" => Ok(Self::FakeDevice),
            "abc" => Ok(Self::Abc),
            "enflame" => Ok(Self::Enflame),
            _ => Err(LocationError::UnknownDeviceTag(s.to_string())),
        }
    }
}

/// A physical compute unit: `(device kind, device index)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ZoneId {
    device_kind: DeviceKind,
    device_index: DeviceIndex,
}

impl ZoneId {
    /// The "not yet assigned" zone
    pub const INVALID: ZoneId = ZoneId {
        device_kind: DeviceKind::Invalid,
        device_index: 0,
    };

    /// The host zone
    pub const HOST: ZoneId = ZoneId {
        device_kind: DeviceKind::Cpu,
        device_index: 0,
    };

    /// Create a zone
    ///
    /// # Panics
    ///
    /// Panics if `device_index` does not fit the packed index width.
    #[track_caller]
    pub fn new(device_kind: DeviceKind, device_index: DeviceIndex) -> Self {
        match Self::try_new(device_kind, device_index) {
            Ok(zone) => zone,
            Err(err) => contract_violation(err),
        }
    }

    /// Create a zone, rejecting indices that do not fit the packed index width
    pub fn try_new(device_kind: DeviceKind, device_index: DeviceIndex) -> Result<Self> {
        if device_index >= DEVICE_INDEX_LIMIT {
            return Err(LocationError::DeviceIndexOutOfRange {
                kind: device_kind,
                index: i64::from(device_index),
                limit: DEVICE_INDEX_LIMIT,
            });
        }
        Ok(Self {
            device_kind,
            device_index,
        })
    }

    /// Assemble a zone whose index is already known to fit
    pub(crate) const fn from_parts(device_kind: DeviceKind, device_index: DeviceIndex) -> Self {
        debug_assert!(device_index < DEVICE_INDEX_LIMIT);
        Self {
            device_kind,
            device_index,
        }
    }

    pub const fn device_kind(&self) -> DeviceKind {
        self.device_kind
    }

    pub const fn device_index(&self) -> DeviceIndex {
        self.device_index
    }

    pub const fn is_valid(&self) -> bool {
        !matches!(self.device_kind, DeviceKind::Invalid)
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_kind, self.device_index)
    }
}
