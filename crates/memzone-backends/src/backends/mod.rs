//! Built-in device backends
//!
//! - `host` - The CPU zone; ops run inline
//! - `simulated` - Executor-thread accelerator for any device kind, used in tests and benches
//!
//! Vendor backends implement [`DeviceBackend`](crate::DeviceBackend) in their own crates and are
//! registered at runtime.

pub mod host;
pub mod simulated;

pub use host::{HostBackend, HostDevice};
pub use simulated::{SimulatedBackend, SimulatedDevice, SimulatedStats};
