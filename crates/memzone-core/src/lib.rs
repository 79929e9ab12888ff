//! # Memzone Core – Memory Location Identity
//!
//! `memzone-core` answers one question for the rest of the runtime: *where does a buffer live,
//! and under which access constraints?* Graph placement, the parallel-cast rewrite and the
//! kernels all need to decide cheaply whether two buffers share a location or require a copy.
//!
//! ## Architecture Overview
//!
//! - [`ZoneId`] names a physical compute unit as `(device kind, device index)`.
//! - [`LocationId`] adds host-memory qualifiers: which accelerator the host memory is pinned for,
//!   and whether it is registered with the network transport.
//! - [`GlobalLocationId`] adds the distributed rank.
//! - [`MemoryDescriptor`] is the tagged-union wire form exchanged with other subsystems.
//! - The [`codec`] module converts between the three representations (descriptor, id, packed
//!   `i64` key) and implements constraint patching.
//!
//! ## Quick Start
//!
//! ```
//! use memzone_core::{codec, DeviceKind, LocationId, MemoryDescriptor, ZoneId};
//!
//! // A buffer on GPU 2 needs a pinned staging buffer on the host
//! let device = LocationId::device(ZoneId::new(DeviceKind::Gpu, 2));
//! let staging = codec::corresponding_pinned_host(&device);
//! assert_eq!(staging.host_pin_kind(), DeviceKind::Gpu);
//!
//! // The wire form round-trips
//! let descriptor = codec::encode(&staging);
//! assert_eq!(codec::decode(&descriptor), staging);
//!
//! // Packed keys are cheap to hash and compare across processes
//! assert_ne!(codec::serialize_to_i64(&device), codec::serialize_to_i64(&staging));
//!
//! // An unset descriptor means "not yet assigned"
//! assert_eq!(codec::decode(&MemoryDescriptor::default()), LocationId::INVALID);
//! ```

pub mod codec;
pub mod constants;
pub mod descriptor;
pub mod location;
pub mod zone;

pub use codec::{
    corresponding_pinned_host, decode, deserialize_from_i64, deserialize_global_from_i64, encode, patch,
    patch_descriptor, serialize_global_to_i64, serialize_to_i64,
};
pub use constants::*;
pub use descriptor::{HostMem, HostPin, MemoryCase, MemoryDescriptor};
pub use location::{GlobalLocationId, LocationId};
pub use zone::{DeviceIndex, DeviceKind, Rank, ZoneId};

/// Result type for location operations
pub type Result<T> = std::result::Result<T, LocationError>;

/// Errors that can occur while building or converting location identities
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("device index {index} out of range for {kind} (must be < {limit})")]
    DeviceIndexOutOfRange { kind: DeviceKind, index: i64, limit: u32 },

    #[error("host qualifiers not allowed on {zone}: pinned for {pin_kind}, network registered = {network_registered}")]
    InvalidHostQualifier {
        zone: ZoneId,
        pin_kind: DeviceKind,
        network_registered: bool,
    },

    #[error("location on {0} has no wire representation")]
    Unencodable(ZoneId),

    #[error("{0} is not an accelerator zone")]
    NotAnAccelerator(ZoneId),

    #[error("malformed location key {key:#x}: {reason}")]
    MalformedKey { key: i64, reason: &'static str },

    #[error("unknown device tag: {0:?}")]
    UnknownDeviceTag(String),

    #[error("malformed memory descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),
}

/// Panic with the diagnostic of a violated caller contract.
///
/// Used by the infallible constructors and codec entry points; every one of them has a `try_*`
/// counterpart that returns the error instead.
#[track_caller]
pub(crate) fn contract_violation(err: LocationError) -> ! {
    tracing::error!(error = %err, "location contract violated");
    panic!("location contract violated: {err}")
}
