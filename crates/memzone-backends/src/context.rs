//! Native resources owned by one device worker

use crate::channel::Channel;
use crate::error::{fatal, BackendError, Result};
use crate::native::{NativeDevice, RawContext, RawFence, RawStream, StreamOp};
use memzone_core::{DeviceKind, ZoneId};
use memzone_tracing::WaitTimer;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A callback waiting for the device work registered before it
pub struct CallbackRecord {
    fence: Option<RawFence>,
    callback: Box<dyn FnOnce() + Send>,
}

impl CallbackRecord {
    pub fn new(fence: Option<RawFence>, callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            fence,
            callback: Box::new(callback),
        }
    }

    /// Completion marker the poller waits on before invoking the callback
    pub fn fence(&self) -> Option<RawFence> {
        self.fence
    }

    pub fn invoke(self) {
        (self.callback)()
    }
}

impl fmt::Debug for CallbackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRecord").field("fence", &self.fence).finish_non_exhaustive()
    }
}

/// FIFO of callbacks between a worker's actor and poller threads
pub type CallbackChannel = Channel<CallbackRecord>;

/// Native context and stream of one zone
///
/// The context is created when the handle is built. The stream is created on first use and at
/// most once, even when several threads race for it. Dropping the handle destroys the stream (if
/// one was created) and then the context.
pub struct DeviceContextHandle {
    zone: ZoneId,
    device: Arc<dyn NativeDevice>,
    context: RawContext,
    stream: OnceLock<RawStream>,
    callbacks: Arc<CallbackChannel>,
}

impl DeviceContextHandle {
    pub(crate) fn create(zone: ZoneId, device: Arc<dyn NativeDevice>, callbacks: Arc<CallbackChannel>) -> Result<Self> {
        let context = device.create_context(zone.device_index())?;
        tracing::debug!(zone = %zone, context = %context, "native context created");
        Ok(Self {
            zone,
            device,
            context,
            stream: OnceLock::new(),
            callbacks,
        })
    }

    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    pub fn device_kind(&self) -> DeviceKind {
        self.device.kind()
    }

    pub fn native_context(&self) -> RawContext {
        self.context
    }

    /// The zone's stream, created on first call.
    ///
    /// Stream creation failure is fatal.
    pub fn native_stream(&self) -> RawStream {
        *self.stream.get_or_init(|| match self.device.create_stream(&self.context) {
            Ok(stream) => {
                tracing::debug!(zone = %self.zone, stream = %stream, "native stream created");
                stream
            }
            Err(err) => fatal(err),
        })
    }

    /// Whether the stream has been created yet
    pub fn has_stream(&self) -> bool {
        self.stream.get().is_some()
    }

    /// Block until every op submitted on the stream so far has completed.
    ///
    /// Returns immediately when no stream exists, since nothing can have been submitted.
    pub fn sync_device(&self) {
        let Some(stream) = self.stream.get() else {
            return;
        };
        let _timer = WaitTimer::start("sync_device");
        if let Err(err) = self.device.synchronize(stream) {
            fatal(err);
        }
    }

    /// Enqueue `op` on the stream, creating the stream if needed
    pub fn launch(&self, op: StreamOp) {
        let stream = self.native_stream();
        tracing::trace!(zone = %self.zone, op = op.name(), "launching stream op");
        if let Err(err) = self.device.launch(&stream, op) {
            fatal(err);
        }
    }

    /// Run `callback` on the poller thread once the work submitted so far has completed.
    ///
    /// Blocks only while a bounded callback channel is full. Registering after the worker has
    /// closed its callback channel is fatal.
    pub fn add_callback(&self, callback: impl FnOnce() + Send + 'static) {
        let fence = match self.stream.get() {
            Some(stream) => self.device.record_fence(stream).unwrap_or_else(|err| fatal(err)),
            None => None,
        };
        tracing::trace!(zone = %self.zone, fence = ?fence, "callback registered");
        if self.callbacks.send(CallbackRecord::new(fence, callback)).is_err() {
            fatal(BackendError::ChannelClosed);
        }
    }

    fn teardown(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            self.device.destroy_stream(&self.context, stream)?;
            tracing::debug!(zone = %self.zone, stream = %stream, "native stream destroyed");
        }
        self.device.destroy_context(self.context)?;
        tracing::debug!(zone = %self.zone, context = %self.context, "native context destroyed");
        Ok(())
    }
}

impl Drop for DeviceContextHandle {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            fatal(err);
        }
    }
}

impl fmt::Debug for DeviceContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContextHandle")
            .field("zone", &self.zone)
            .field("context", &self.context)
            .field("stream", &self.stream.get())
            .finish()
    }
}
