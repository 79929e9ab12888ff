//! Bit layout of the packed location keys
//!
//! ```text
//! LocationId key
//! |              | device_kind | device_index |                           |
//! |              | ---- 5 ---- | ----- 7 ---- |                           |
//! |              |          ZoneId            |  pin_kind  | net_registered|
//! |              | ----------- 12 ----------- | ---- 5 --- | ----- 1 ----- |
//! |   reserved   |                      LocationId                        |
//! | ---- 46 ---- | ------------------------ 18 -------------------------- |
//!
//! GlobalLocationId key
//! |          |   rank   | LocationId |
//! |          | -- 32 -- | --- 18 --- |
//! | reserved |   GlobalLocationId    |
//! | -- 14 -- | -------- 50 --------- |
//! ```
//!
//! These widths are part of the wire contract: keys are compared across processes and machines.

use crate::zone::DeviceKind;

/// Width of the network-registered flag
pub const NETWORK_FLAG_BITS: u32 = 1;

/// Width of the host-pin device kind
pub const PIN_KIND_BITS: u32 = 5;

/// Width of the zone's device index
pub const DEVICE_INDEX_BITS: u32 = 7;

/// Width of the zone's device kind
pub const DEVICE_KIND_BITS: u32 = 5;

/// Width of the distributed rank in a global key
pub const RANK_BITS: u32 = 32;

pub const PIN_KIND_SHIFT: u32 = NETWORK_FLAG_BITS;
pub const DEVICE_INDEX_SHIFT: u32 = PIN_KIND_SHIFT + PIN_KIND_BITS;
pub const DEVICE_KIND_SHIFT: u32 = DEVICE_INDEX_SHIFT + DEVICE_INDEX_BITS;

/// Total width of a packed `LocationId` (18)
pub const LOCATION_KEY_BITS: u32 = DEVICE_KIND_SHIFT + DEVICE_KIND_BITS;

pub const RANK_SHIFT: u32 = LOCATION_KEY_BITS;

/// Total width of a packed `GlobalLocationId` (50)
pub const GLOBAL_KEY_BITS: u32 = RANK_SHIFT + RANK_BITS;

/// Number of addressable devices per kind on one machine
pub const DEVICE_INDEX_LIMIT: u32 = 1 << DEVICE_INDEX_BITS;

const _: () = assert!(LOCATION_KEY_BITS <= 18, "location key must leave room for the rank");
const _: () = assert!(GLOBAL_KEY_BITS <= 63, "global key must stay non-negative in an i64");
const _: () = assert!(DeviceKind::ALL.len() <= 1 << DEVICE_KIND_BITS);
const _: () = assert!(DeviceKind::ALL.len() <= 1 << PIN_KIND_BITS);

/// Low-bit mask of the given width
pub(crate) const fn mask(bits: u32) -> i64 {
    (1i64 << bits) - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_constants() {
        assert_eq!(PIN_KIND_SHIFT, 1);
        assert_eq!(DEVICE_INDEX_SHIFT, 6);
        assert_eq!(DEVICE_KIND_SHIFT, 13);
        assert_eq!(LOCATION_KEY_BITS, 18);
        assert_eq!(RANK_SHIFT, 18);
        assert_eq!(GLOBAL_KEY_BITS, 50);
        assert_eq!(DEVICE_INDEX_LIMIT, 128);
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask(1), 0b1);
        assert_eq!(mask(5), 0b11111);
        assert_eq!(mask(LOCATION_KEY_BITS), 0x3FFFF);
    }
}
