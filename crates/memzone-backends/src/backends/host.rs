//! Host (CPU) device
//!
//! The host has no native runtime: contexts and streams are plain tokens and every op runs on
//! the submitting thread, so there is never outstanding work to wait for.

use crate::error::{BackendError, Result};
use crate::native::{NativeCall, NativeDevice, RawContext, RawStream, StreamOp};
use crate::registry::DeviceBackend;
use memzone_core::{DeviceIndex, DeviceKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Native device for `cpu` zones
#[derive(Debug, Default)]
pub struct HostDevice {
    next_handle: AtomicU64,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl NativeDevice for HostDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Cpu
    }

    fn create_context(&self, _device_index: DeviceIndex) -> Result<RawContext> {
        Ok(RawContext::new(self.next()))
    }

    fn destroy_context(&self, _context: RawContext) -> Result<()> {
        Ok(())
    }

    fn create_stream(&self, _context: &RawContext) -> Result<RawStream> {
        Ok(RawStream::new(self.next()))
    }

    fn destroy_stream(&self, _context: &RawContext, _stream: RawStream) -> Result<()> {
        Ok(())
    }

    fn synchronize(&self, _stream: &RawStream) -> Result<()> {
        Ok(())
    }

    fn launch(&self, _stream: &RawStream, op: StreamOp) -> Result<()> {
        op.run();
        Ok(())
    }
}

/// Backend serving the host zone
#[derive(Debug, Default)]
pub struct HostBackend {
    device: Arc<HostDevice>,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceBackend for HostBackend {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Cpu
    }

    fn native(&self, device_index: DeviceIndex) -> Result<Arc<dyn NativeDevice>> {
        // Pinned-host locations carry a device index, but they all live in the one host zone
        if device_index != 0 {
            return Err(BackendError::native(
                NativeCall::CreateContext,
                DeviceKind::Cpu,
                -1,
                format!("no host device {device_index}"),
            ));
        }
        let device: Arc<dyn NativeDevice> = self.device.clone();
        Ok(device)
    }
}
