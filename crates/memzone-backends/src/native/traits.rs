//! The native device seam
//!
//! Everything a worker needs from a vendor runtime goes through [`NativeDevice`]. Backends wrap
//! their driver API in it; the worker layer never sees vendor types.

use super::types::{RawContext, RawFence, RawStream, StreamOp};
use crate::error::Result;
use memzone_core::{DeviceIndex, DeviceKind};

/// Native device API for one device kind
///
/// Implementations must be callable from any thread. A worker creates one context per zone and at
/// most one stream per context; all submission happens from the worker's actor thread, while
/// fence waits happen on its poller thread.
///
/// ```text
/// actor thread                      poller thread
/// ────────────                      ─────────────
/// create_context(index)
/// create_stream(ctx)   (lazy)
/// launch(stream, op) ...
/// record_fence(stream) ──fence──▶   wait_fence(fence)
///                                   callback()
/// destroy_stream(ctx, stream)
/// destroy_context(ctx)
/// ```
pub trait NativeDevice: Send + Sync {
    /// Device kind this API drives
    fn kind(&self) -> DeviceKind;

    /// Create a context on the device with the given index
    fn create_context(&self, device_index: DeviceIndex) -> Result<RawContext>;

    /// Destroy a context. Every stream created on it has already been destroyed.
    fn destroy_context(&self, context: RawContext) -> Result<()>;

    /// Create an in-order stream on `context`
    fn create_stream(&self, context: &RawContext) -> Result<RawStream>;

    /// Destroy a stream created on `context`
    fn destroy_stream(&self, context: &RawContext, stream: RawStream) -> Result<()>;

    /// Block until every op launched on `stream` so far has completed
    fn synchronize(&self, stream: &RawStream) -> Result<()>;

    /// Enqueue `op` on `stream`
    fn launch(&self, stream: &RawStream, op: StreamOp) -> Result<()>;

    /// Record a completion marker after the ops launched so far.
    ///
    /// Devices whose work completes synchronously return `None`.
    fn record_fence(&self, _stream: &RawStream) -> Result<Option<RawFence>> {
        Ok(None)
    }

    /// Block until `fence` has completed
    fn wait_fence(&self, _fence: RawFence) -> Result<()> {
        Ok(())
    }
}
