//! Location identities
//!
//! A [`LocationId`] is a zone plus the host-memory qualifiers that matter for transfers: the
//! accelerator a host buffer is pinned (page-locked) for, and whether the buffer is registered
//! with the network transport. Both qualifiers only exist on host zones.

use crate::zone::{DeviceIndex, DeviceKind, Rank, ZoneId};
use crate::{contract_violation, LocationError, Result};
use std::fmt;

/// Where a buffer lives and under which access constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LocationId {
    zone: ZoneId,
    host_pin_kind: DeviceKind,
    network_registered: bool,
}

impl LocationId {
    /// Location of a buffer whose placement has not been decided yet
    pub const INVALID: LocationId = LocationId {
        zone: ZoneId::INVALID,
        host_pin_kind: DeviceKind::Invalid,
        network_registered: false,
    };

    /// Create a location
    ///
    /// # Panics
    ///
    /// Panics if host qualifiers are set on a non-host zone, or if the pin kind is the host itself.
    #[track_caller]
    pub fn new(zone: ZoneId, host_pin_kind: DeviceKind, network_registered: bool) -> Self {
        match Self::try_new(zone, host_pin_kind, network_registered) {
            Ok(location) => location,
            Err(err) => contract_violation(err),
        }
    }

    /// Create a location, validating the host-qualifier invariant
    pub fn try_new(zone: ZoneId, host_pin_kind: DeviceKind, network_registered: bool) -> Result<Self> {
        let host_zone = zone.device_kind() == DeviceKind::Cpu;
        let qualified = host_pin_kind != DeviceKind::Invalid || network_registered;
        if (!host_zone && qualified) || host_pin_kind == DeviceKind::Cpu {
            return Err(LocationError::InvalidHostQualifier {
                zone,
                pin_kind: host_pin_kind,
                network_registered,
            });
        }
        Ok(Self {
            zone,
            host_pin_kind,
            network_registered,
        })
    }

    /// Assemble a location the caller has already validated
    pub(crate) const fn from_parts(zone: ZoneId, host_pin_kind: DeviceKind, network_registered: bool) -> Self {
        Self {
            zone,
            host_pin_kind,
            network_registered,
        }
    }

    /// Unqualified location in `zone`
    pub const fn device(zone: ZoneId) -> Self {
        Self {
            zone,
            host_pin_kind: DeviceKind::Invalid,
            network_registered: false,
        }
    }

    /// Pageable host memory
    pub const fn host() -> Self {
        Self::device(ZoneId::HOST)
    }

    /// Host memory pinned for `device_index` of `pin_kind`
    #[track_caller]
    pub fn pinned_host(pin_kind: DeviceKind, device_index: DeviceIndex) -> Self {
        Self::new(ZoneId::new(DeviceKind::Cpu, device_index), pin_kind, false)
    }

    /// Same location with the network-registration flag set
    ///
    /// # Panics
    ///
    /// Panics if this is not a host location.
    #[track_caller]
    pub fn registered_by_network(self) -> Self {
        Self::new(self.zone, self.host_pin_kind, true)
    }

    pub const fn zone(&self) -> ZoneId {
        self.zone
    }

    pub const fn device_kind(&self) -> DeviceKind {
        self.zone.device_kind()
    }

    pub const fn device_index(&self) -> DeviceIndex {
        self.zone.device_index()
    }

    /// Accelerator kind this host memory is page-locked for, `Invalid` when pageable
    pub const fn host_pin_kind(&self) -> DeviceKind {
        self.host_pin_kind
    }

    pub const fn is_network_registered(&self) -> bool {
        self.network_registered
    }

    pub const fn is_valid(&self) -> bool {
        self.zone.is_valid()
    }

    pub fn is_host(&self) -> bool {
        self.zone.device_kind() == DeviceKind::Cpu
    }

    pub fn is_pinned(&self) -> bool {
        self.host_pin_kind != DeviceKind::Invalid
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.zone)?;
        if self.is_pinned() {
            write!(f, "[pinned:{}]", self.host_pin_kind)?;
        }
        if self.network_registered {
            f.write_str("[net]")?;
        }
        Ok(())
    }
}

/// A location qualified by the rank of the process that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GlobalLocationId {
    rank: Rank,
    location: LocationId,
}

impl GlobalLocationId {
    pub const fn new(rank: Rank, location: LocationId) -> Self {
        Self { rank, location }
    }

    pub const fn rank(&self) -> Rank {
        self.rank
    }

    pub const fn location(&self) -> &LocationId {
        &self.location
    }
}

impl fmt::Display for GlobalLocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank{}/{}", self.rank, self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_qualifiers_allowed_on_host() {
        let location = LocationId::new(ZoneId::HOST, DeviceKind::Gpu, true);
        assert!(location.is_pinned());
        assert!(location.is_network_registered());
        assert_eq!(location.to_string(), "cpu:0[pinned:gpu][net]");
    }

    #[test]
    fn test_host_qualifiers_rejected_on_device() {
        let zone = ZoneId::new(DeviceKind::Gpu, 1);
        assert!(LocationId::try_new(zone, DeviceKind::Gpu, false).is_err());
        assert!(LocationId::try_new(zone, DeviceKind::Invalid, true).is_err());
        assert!(LocationId::try_new(zone, DeviceKind::Invalid, false).is_ok());
    }

    #[test]
    fn test_pin_for_host_rejected() {
        let err = LocationId::try_new(ZoneId::HOST, DeviceKind::Cpu, false).unwrap_err();
        assert!(matches!(err, LocationError::InvalidHostQualifier { pin_kind: DeviceKind::Cpu, .. }));
    }

    #[test]
    #[should_panic(expected = "location contract violated")]
    fn test_new_panics_on_violation() {
        let _ = LocationId::new(ZoneId::new(DeviceKind::Enflame, 0), DeviceKind::Invalid, true);
    }

    #[test]
    fn test_equality_covers_every_field() {
        let plain = LocationId::host();
        let registered = plain.registered_by_network();
        assert_ne!(plain, registered);
        assert_ne!(plain, LocationId::pinned_host(DeviceKind::Gpu, 0));
        assert_eq!(LocationId::default(), LocationId::INVALID);
    }

    #[test]
    fn test_global_location() {
        let global = GlobalLocationId::new(3, LocationId::device(ZoneId::new(DeviceKind::Gpu, 1)));
        assert_eq!(global.rank(), 3);
        assert_eq!(global.location().device_index(), 1);
        assert_eq!(global.to_string(), "rank3/gpu:1");
    }
}
