//! Conversions between descriptors, location ids and packed keys
//!
//! # Representations
//!
//! - [`MemoryDescriptor`]: the wire form other subsystems store and exchange
//! - [`LocationId`]: the validated in-memory form used for comparisons
//! - `i64` keys: bit-packed ids for hashing and cross-process equality (layout in
//!   [`crate::constants`])
//!
//! # Patching
//!
//! [`patch`] threads placement constraints through chains of buffer reuse during graph
//! compilation: the consumer's requirement must be at least as strict as what the producer
//! already guarantees, so an established pin or network registration is never weakened. A
//! `false` result is an ordinary outcome telling the caller to insert a copy.

use crate::constants::*;
use crate::descriptor::{HostMem, HostPin, MemoryCase, MemoryDescriptor};
use crate::location::{GlobalLocationId, LocationId};
use crate::zone::{DeviceIndex, DeviceKind, ZoneId};
use crate::{contract_violation, LocationError, Result};

// ================================================================================================
// Descriptor <-> LocationId
// ================================================================================================

/// Decode a wire descriptor
///
/// An unset descriptor decodes to [`LocationId::INVALID`].
///
/// # Panics
///
/// Panics if a `device_id` does not fit the packed index width.
#[track_caller]
pub fn decode(descriptor: &MemoryDescriptor) -> LocationId {
    match try_decode(descriptor) {
        Ok(location) => location,
        Err(err) => contract_violation(err),
    }
}

/// Decode a wire descriptor, reporting out-of-range device ids
pub fn try_decode(descriptor: &MemoryDescriptor) -> Result<LocationId> {
    let Some(case) = descriptor.case() else {
        return Ok(LocationId::INVALID);
    };

    let location = match case {
        MemoryCase::HostMem(host) => {
            let (pin_kind, device_index) = match &host.pin {
                None => (DeviceKind::Invalid, 0),
                Some(HostPin::CudaPinned { device_id }) => (DeviceKind::Gpu, wire_index(DeviceKind::Gpu, *device_id)?),
                Some(HostPin::FakeDevPinned {}) => (DeviceKind::FakeDevice, 0),
                Some(HostPin::AbcPinned {}) => (DeviceKind::Abc, 0),
                Some(HostPin::EnflamePinned { device_id }) => {
                    (DeviceKind::Enflame, wire_index(DeviceKind::Enflame, *device_id)?)
                }
            };
            LocationId::from_parts(
                ZoneId::from_parts(DeviceKind::Cpu, device_index),
                pin_kind,
                host.used_by_network,
            )
        }
        MemoryCase::DeviceCudaMem { device_id } => {
            device_location(DeviceKind::Gpu, wire_index(DeviceKind::Gpu, *device_id)?)
        }
        MemoryCase::FakeDevMem {} => device_location(DeviceKind::FakeDevice, 0),
        MemoryCase::DeviceAbcMem {} => device_location(DeviceKind::Abc, 0),
        MemoryCase::DeviceEnflameMem { device_id } => {
            device_location(DeviceKind::Enflame, wire_index(DeviceKind::Enflame, *device_id)?)
        }
    };
    Ok(location)
}

/// Encode a location into its wire descriptor
///
/// Kinds whose wire variant carries no device id encode without their index.
///
/// # Panics
///
/// Panics if the zone kind has no wire variant, which means the location was never assigned.
#[track_caller]
pub fn encode(location: &LocationId) -> MemoryDescriptor {
    match try_encode(location) {
        Ok(descriptor) => descriptor,
        Err(err) => contract_violation(err),
    }
}

/// Encode a location, reporting kinds without a wire representation
pub fn try_encode(location: &LocationId) -> Result<MemoryDescriptor> {
    // Indices are below DEVICE_INDEX_LIMIT, so the cast is lossless
    let device_id = location.device_index() as i32;
    let case = match location.device_kind() {
        DeviceKind::Cpu => {
            let pin = match location.host_pin_kind() {
                DeviceKind::Invalid => None,
                DeviceKind::Gpu => Some(HostPin::CudaPinned { device_id }),
                DeviceKind::FakeDevice => Some(HostPin::FakeDevPinned {}),
                DeviceKind::Abc => Some(HostPin::AbcPinned {}),
                DeviceKind::Enflame => Some(HostPin::EnflamePinned { device_id }),
                DeviceKind::Cpu => return Err(LocationError::Unencodable(location.zone())),
            };
            MemoryCase::HostMem(HostMem {
                pin,
                used_by_network: location.is_network_registered(),
            })
        }
        DeviceKind::Gpu => MemoryCase::DeviceCudaMem { device_id },
        DeviceKind::FakeDevice => MemoryCase::FakeDevMem {},
        DeviceKind::Abc => MemoryCase::DeviceAbcMem {},
        DeviceKind::Enflame => MemoryCase::DeviceEnflameMem { device_id },
        DeviceKind::Invalid => return Err(LocationError::Unencodable(location.zone())),
    };
    Ok(MemoryDescriptor::new(case))
}

fn wire_index(kind: DeviceKind, device_id: i32) -> Result<DeviceIndex> {
    u32::try_from(device_id)
        .ok()
        .filter(|index| *index < DEVICE_INDEX_LIMIT)
        .ok_or(LocationError::DeviceIndexOutOfRange {
            kind,
            index: i64::from(device_id),
            limit: DEVICE_INDEX_LIMIT,
        })
}

fn device_location(kind: DeviceKind, device_index: DeviceIndex) -> LocationId {
    LocationId::device(ZoneId::from_parts(kind, device_index))
}

impl TryFrom<&MemoryDescriptor> for LocationId {
    type Error = LocationError;

    fn try_from(descriptor: &MemoryDescriptor) -> Result<Self> {
        try_decode(descriptor)
    }
}

impl TryFrom<&LocationId> for MemoryDescriptor {
    type Error = LocationError;

    fn try_from(location: &LocationId) -> Result<Self> {
        try_encode(location)
    }
}

// ================================================================================================
// Packed keys
// ================================================================================================

/// Pack a location into its 18-bit key
pub fn serialize_to_i64(location: &LocationId) -> i64 {
    let mut key = i64::from(location.is_network_registered());
    key |= i64::from(location.host_pin_kind().code()) << PIN_KIND_SHIFT;
    key |= i64::from(location.device_index()) << DEVICE_INDEX_SHIFT;
    key |= i64::from(location.device_kind().code()) << DEVICE_KIND_SHIFT;
    key
}

/// Pack a global location: location key in the low bits, rank above it
pub fn serialize_global_to_i64(global: &GlobalLocationId) -> i64 {
    serialize_to_i64(global.location()) | (i64::from(global.rank()) << RANK_SHIFT)
}

/// Unpack a key produced by [`serialize_to_i64`]
pub fn deserialize_from_i64(key: i64) -> Result<LocationId> {
    if key < 0 || key >> LOCATION_KEY_BITS != 0 {
        return Err(LocationError::MalformedKey {
            key,
            reason: "reserved bits set",
        });
    }

    let network_registered = key & mask(NETWORK_FLAG_BITS) != 0;
    let pin_kind = kind_field(key, PIN_KIND_SHIFT, PIN_KIND_BITS)?;
    let device_index = ((key >> DEVICE_INDEX_SHIFT) & mask(DEVICE_INDEX_BITS)) as DeviceIndex;
    let device_kind = kind_field(key, DEVICE_KIND_SHIFT, DEVICE_KIND_BITS)?;

    LocationId::try_new(
        ZoneId::from_parts(device_kind, device_index),
        pin_kind,
        network_registered,
    )
}

/// Unpack a key produced by [`serialize_global_to_i64`]
pub fn deserialize_global_from_i64(key: i64) -> Result<GlobalLocationId> {
    if key < 0 || key >> GLOBAL_KEY_BITS != 0 {
        return Err(LocationError::MalformedKey {
            key,
            reason: "reserved bits set",
        });
    }
    let rank = ((key >> RANK_SHIFT) & mask(RANK_BITS)) as u32;
    let location = deserialize_from_i64(key & mask(LOCATION_KEY_BITS))?;
    Ok(GlobalLocationId::new(rank, location))
}

fn kind_field(key: i64, shift: u32, bits: u32) -> Result<DeviceKind> {
    let code = ((key >> shift) & mask(bits)) as u8;
    DeviceKind::from_code(code).ok_or(LocationError::MalformedKey {
        key,
        reason: "unknown device kind code",
    })
}

// ================================================================================================
// Constraint patching
// ================================================================================================

/// Merge `src`'s constraints into `dst`
///
/// Returns `false`, leaving `dst` untouched, when `src` is unassigned, when the kinds differ, or
/// when two non-host locations sit on different devices. For host locations a pin in `src`
/// replaces `dst`'s pin and network registration is OR-ed. `dst` takes `src`'s device index only
/// when the new pin kind carries one.
pub fn patch(dst: &mut LocationId, src: &LocationId) -> bool {
    let kind = src.device_kind();
    if kind == DeviceKind::Invalid || kind != dst.device_kind() {
        return false;
    }

    if kind != DeviceKind::Cpu {
        return dst.device_index() == src.device_index();
    }

    let (pin_kind, device_index) = match src.is_pinned() {
        true if src.host_pin_kind().carries_device_index() => (src.host_pin_kind(), src.device_index()),
        true => (src.host_pin_kind(), dst.device_index()),
        false => (dst.host_pin_kind(), dst.device_index()),
    };
    *dst = LocationId::from_parts(
        ZoneId::from_parts(DeviceKind::Cpu, device_index),
        pin_kind,
        dst.is_network_registered() || src.is_network_registered(),
    );
    true
}

/// [`patch`] applied to wire descriptors
///
/// `dst` is rewritten only when the patch succeeds.
///
/// # Panics
///
/// Panics if either descriptor carries an out-of-range device id.
#[track_caller]
pub fn patch_descriptor(dst: &mut MemoryDescriptor, src: &MemoryDescriptor) -> bool {
    match try_patch_descriptor(dst, src) {
        Ok(patched) => patched,
        Err(err) => contract_violation(err),
    }
}

/// Fallible form of [`patch_descriptor`]
pub fn try_patch_descriptor(dst: &mut MemoryDescriptor, src: &MemoryDescriptor) -> Result<bool> {
    let src_location = try_decode(src)?;
    let mut dst_location = try_decode(dst)?;
    if !patch(&mut dst_location, &src_location) {
        return Ok(false);
    }
    *dst = try_encode(&dst_location)?;
    Ok(true)
}

// ================================================================================================
// Staging locations
// ================================================================================================

/// Host location pinned for the accelerator `location` lives on
///
/// This is where the staging buffer shadowing a device buffer lives for host/device copies.
///
/// # Panics
///
/// Panics if `location` is a host or unassigned location.
#[track_caller]
pub fn corresponding_pinned_host(location: &LocationId) -> LocationId {
    match try_corresponding_pinned_host(location) {
        Ok(host) => host,
        Err(err) => contract_violation(err),
    }
}

/// Fallible form of [`corresponding_pinned_host`]
pub fn try_corresponding_pinned_host(location: &LocationId) -> Result<LocationId> {
    let kind = location.device_kind();
    if !kind.is_accelerator() {
        return Err(LocationError::NotAnAccelerator(location.zone()));
    }
    let device_index = if kind.carries_device_index() {
        location.device_index()
    } else {
        0
    };
    Ok(LocationId::from_parts(
        ZoneId::from_parts(DeviceKind::Cpu, device_index),
        kind,
        false,
    ))
}

/// [`corresponding_pinned_host`] applied to a wire descriptor
#[track_caller]
pub fn corresponding_pinned_host_descriptor(descriptor: &MemoryDescriptor) -> MemoryDescriptor {
    encode(&corresponding_pinned_host(&decode(descriptor)))
}
