//! Simulated accelerator
//!
//! Behaves like an asynchronous device runtime without any hardware: each stream is an in-order
//! executor thread, `synchronize` and fences block until the ops queued ahead of them have run.
//! Resource counters and fault injection let tests observe lifecycle ordering and drive the fatal
//! paths.
//!
//! ```text
//! launch(op) ──▶ ┌──────────── stream queue ────────────┐ ──▶ executor thread
//!                │ Run(op) Run(op) Signal(fence) Run(op)│      runs ops in order,
//!                └──────────────────────────────────────┘      completes signals
//! ```

use crate::channel::Channel;
use crate::error::{BackendError, Result};
use crate::native::{NativeCall, NativeDevice, RawContext, RawFence, RawStream, StreamOp};
use crate::registry::DeviceBackend;
use memzone_core::{DeviceIndex, DeviceKind, LocationError};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Error code reported for calls failed through [`SimulatedDevice::fail_on`]
pub const INJECTED_FAULT_CODE: i32 = -1;

/// Error code reported when an op panicked on the stream being synchronized
pub const STREAM_FAULT_CODE: i32 = -2;

/// Error code reported for handles the device does not know
pub const INVALID_HANDLE_CODE: i32 = -3;

/// Snapshot of a simulated device's resource counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedStats {
    pub contexts_created: usize,
    pub contexts_destroyed: usize,
    pub streams_created: usize,
    pub streams_destroyed: usize,
    pub ops_launched: usize,
    pub fences_recorded: usize,
}

#[derive(Default)]
struct Counters {
    contexts_created: AtomicUsize,
    contexts_destroyed: AtomicUsize,
    streams_created: AtomicUsize,
    streams_destroyed: AtomicUsize,
    ops_launched: AtomicUsize,
    fences_recorded: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> SimulatedStats {
        SimulatedStats {
            contexts_created: self.contexts_created.load(Ordering::SeqCst),
            contexts_destroyed: self.contexts_destroyed.load(Ordering::SeqCst),
            streams_created: self.streams_created.load(Ordering::SeqCst),
            streams_destroyed: self.streams_destroyed.load(Ordering::SeqCst),
            ops_launched: self.ops_launched.load(Ordering::SeqCst),
            fences_recorded: self.fences_recorded.load(Ordering::SeqCst),
        }
    }
}

/// One-shot completion flag
#[derive(Default)]
struct Completion {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Completion {
    fn complete(&self) {
        *self.done.lock() = true;
        self.signal.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.signal.wait(&mut done);
        }
    }
}

enum Task {
    Run(StreamOp),
    Signal(Arc<Completion>),
}

struct StreamExecutor {
    context: u64,
    queue: Arc<Channel<Task>>,
    faulted: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl StreamExecutor {
    /// Let queued ops finish, then stop the executor thread
    fn stop(self) -> bool {
        self.queue.close();
        self.thread.join().is_ok()
    }
}

#[derive(Default)]
struct Resources {
    contexts: HashSet<u64>,
    streams: HashMap<u64, StreamExecutor>,
    fences: HashMap<u64, Arc<Completion>>,
}

/// Native device backed by executor threads
pub struct SimulatedDevice {
    kind: DeviceKind,
    op_latency: Duration,
    next_handle: AtomicU64,
    resources: Mutex<Resources>,
    faults: Mutex<HashSet<NativeCall>>,
    counters: Counters,
}

impl SimulatedDevice {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            op_latency: Duration::ZERO,
            next_handle: AtomicU64::new(0),
            resources: Mutex::new(Resources::default()),
            faults: Mutex::new(HashSet::new()),
            counters: Counters::default(),
        }
    }

    /// Sleep this long before running each op, to keep work in flight
    pub fn with_op_latency(mut self, latency: Duration) -> Self {
        self.op_latency = latency;
        self
    }

    /// Make every subsequent `call` fail until cleared
    pub fn fail_on(&self, call: NativeCall) {
        self.faults.lock().insert(call);
    }

    pub fn clear_fault(&self, call: NativeCall) {
        self.faults.lock().remove(&call);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    pub fn stats(&self) -> SimulatedStats {
        self.counters.snapshot()
    }

    pub fn live_contexts(&self) -> usize {
        self.resources.lock().contexts.len()
    }

    pub fn live_streams(&self) -> usize {
        self.resources.lock().streams.len()
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn check(&self, call: NativeCall) -> Result<()> {
        if self.faults.lock().contains(&call) {
            return Err(BackendError::native(call, self.kind, INJECTED_FAULT_CODE, "injected fault"));
        }
        Ok(())
    }

    fn invalid_handle(&self, call: NativeCall, detail: String) -> BackendError {
        BackendError::native(call, self.kind, INVALID_HANDLE_CODE, detail)
    }

    fn stream_queue(&self, call: NativeCall, stream: &RawStream) -> Result<(Arc<Channel<Task>>, Arc<AtomicBool>)> {
        let resources = self.resources.lock();
        let executor = resources
            .streams
            .get(&stream.id())
            .ok_or_else(|| self.invalid_handle(call, format!("unknown {stream}")))?;
        Ok((Arc::clone(&executor.queue), Arc::clone(&executor.faulted)))
    }

    fn enqueue(&self, call: NativeCall, stream: &RawStream, task: Task) -> Result<Arc<AtomicBool>> {
        let (queue, faulted) = self.stream_queue(call, stream)?;
        queue
            .send(task)
            .map_err(|_| self.invalid_handle(call, format!("{stream} is being destroyed")))?;
        Ok(faulted)
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(DeviceKind::FakeDevice)
    }
}

impl NativeDevice for SimulatedDevice {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn create_context(&self, _device_index: DeviceIndex) -> Result<RawContext> {
        self.check(NativeCall::CreateContext)?;
        let id = self.next();
        self.resources.lock().contexts.insert(id);
        self.counters.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(RawContext::new(id))
    }

    fn destroy_context(&self, context: RawContext) -> Result<()> {
        self.check(NativeCall::DestroyContext)?;
        let mut resources = self.resources.lock();
        if !resources.contexts.contains(&context.id()) {
            return Err(self.invalid_handle(NativeCall::DestroyContext, format!("unknown {context}")));
        }
        if resources.streams.values().any(|executor| executor.context == context.id()) {
            return Err(self.invalid_handle(
                NativeCall::DestroyContext,
                format!("{context} still has live streams"),
            ));
        }
        resources.contexts.remove(&context.id());
        self.counters.contexts_destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_stream(&self, context: &RawContext) -> Result<RawStream> {
        self.check(NativeCall::CreateStream)?;
        let mut resources = self.resources.lock();
        if !resources.contexts.contains(&context.id()) {
            return Err(self.invalid_handle(NativeCall::CreateStream, format!("unknown {context}")));
        }

        let id = self.next();
        let queue: Arc<Channel<Task>> = Arc::new(Channel::unbounded());
        let faulted = Arc::new(AtomicBool::new(false));
        let thread = {
            let queue = Arc::clone(&queue);
            let faulted = Arc::clone(&faulted);
            let latency = self.op_latency;
            thread::Builder::new()
                .name(format!("sim-{}-stream{id}", self.kind))
                .spawn(move || run_stream(queue, faulted, latency))
                .map_err(BackendError::ThreadSpawn)?
        };

        resources.streams.insert(
            id,
            StreamExecutor {
                context: context.id(),
                queue,
                faulted,
                thread,
            },
        );
        self.counters.streams_created.fetch_add(1, Ordering::SeqCst);
        Ok(RawStream::new(id))
    }

    fn destroy_stream(&self, context: &RawContext, stream: RawStream) -> Result<()> {
        self.check(NativeCall::DestroyStream)?;
        let executor = {
            let mut resources = self.resources.lock();
            match resources.streams.get(&stream.id()) {
                Some(executor) if executor.context == context.id() => {}
                Some(_) => {
                    return Err(self.invalid_handle(
                        NativeCall::DestroyStream,
                        format!("{stream} does not belong to {context}"),
                    ))
                }
                None => return Err(self.invalid_handle(NativeCall::DestroyStream, format!("unknown {stream}"))),
            }
            resources.streams.remove(&stream.id())
        };

        if let Some(executor) = executor {
            if !executor.stop() {
                return Err(BackendError::native(
                    NativeCall::DestroyStream,
                    self.kind,
                    STREAM_FAULT_CODE,
                    format!("{stream} executor exited abnormally"),
                ));
            }
        }
        self.counters.streams_destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn synchronize(&self, stream: &RawStream) -> Result<()> {
        self.check(NativeCall::Synchronize)?;
        let completion = Arc::new(Completion::default());
        let faulted = self.enqueue(NativeCall::Synchronize, stream, Task::Signal(Arc::clone(&completion)))?;
        completion.wait();
        if faulted.load(Ordering::SeqCst) {
            return Err(BackendError::native(
                NativeCall::Synchronize,
                self.kind,
                STREAM_FAULT_CODE,
                format!("an op on {stream} panicked"),
            ));
        }
        Ok(())
    }

    fn launch(&self, stream: &RawStream, op: StreamOp) -> Result<()> {
        self.check(NativeCall::Launch)?;
        self.enqueue(NativeCall::Launch, stream, Task::Run(op))?;
        self.counters.ops_launched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn record_fence(&self, stream: &RawStream) -> Result<Option<RawFence>> {
        self.check(NativeCall::RecordFence)?;
        let id = self.next();
        let completion = Arc::new(Completion::default());
        self.resources.lock().fences.insert(id, Arc::clone(&completion));
        if let Err(err) = self.enqueue(NativeCall::RecordFence, stream, Task::Signal(completion)) {
            self.resources.lock().fences.remove(&id);
            return Err(err);
        }
        self.counters.fences_recorded.fetch_add(1, Ordering::SeqCst);
        Ok(Some(RawFence::new(id)))
    }

    fn wait_fence(&self, fence: RawFence) -> Result<()> {
        self.check(NativeCall::WaitFence)?;
        let completion = self
            .resources
            .lock()
            .fences
            .remove(&fence.id())
            .ok_or_else(|| self.invalid_handle(NativeCall::WaitFence, format!("unknown {fence}")))?;
        completion.wait();
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        let streams: Vec<StreamExecutor> = self
            .resources
            .get_mut()
            .streams
            .drain()
            .map(|(_, executor)| executor)
            .collect();
        if !streams.is_empty() {
            tracing::warn!(kind = %self.kind, leaked = streams.len(), "simulated device dropped with live streams");
        }
        for executor in streams {
            executor.stop();
        }
    }
}

fn run_stream(queue: Arc<Channel<Task>>, faulted: Arc<AtomicBool>, latency: Duration) {
    while let Ok(task) = queue.receive() {
        match task {
            Task::Run(op) => {
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                if panic::catch_unwind(AssertUnwindSafe(|| op.run())).is_err() {
                    tracing::error!("simulated stream op panicked");
                    faulted.store(true, Ordering::SeqCst);
                }
            }
            Task::Signal(completion) => completion.complete(),
        }
    }
}

/// Backend serving `device_count` simulated devices of one kind
pub struct SimulatedBackend {
    kind: DeviceKind,
    device_count: DeviceIndex,
    op_latency: Duration,
    devices: Mutex<BTreeMap<DeviceIndex, Arc<SimulatedDevice>>>,
}

impl SimulatedBackend {
    pub fn new(kind: DeviceKind, device_count: DeviceIndex) -> Self {
        Self {
            kind,
            device_count,
            op_latency: Duration::ZERO,
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    /// Apply an op latency to every device this backend creates
    pub fn with_op_latency(mut self, latency: Duration) -> Self {
        self.op_latency = latency;
        self
    }

    pub fn device_count(&self) -> DeviceIndex {
        self.device_count
    }

    /// The simulated device with the given index, created on first use
    pub fn device(&self, device_index: DeviceIndex) -> Result<Arc<SimulatedDevice>> {
        if device_index >= self.device_count {
            return Err(LocationError::DeviceIndexOutOfRange {
                kind: self.kind,
                index: i64::from(device_index),
                limit: self.device_count,
            }
            .into());
        }
        let mut devices = self.devices.lock();
        let device = devices
            .entry(device_index)
            .or_insert_with(|| Arc::new(SimulatedDevice::new(self.kind).with_op_latency(self.op_latency)));
        Ok(Arc::clone(device))
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(DeviceKind::FakeDevice, 1)
    }
}

impl DeviceBackend for SimulatedBackend {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn native(&self, device_index: DeviceIndex) -> Result<Arc<dyn NativeDevice>> {
        let device: Arc<dyn NativeDevice> = self.device(device_index)?;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_with_stream() -> (SimulatedDevice, RawContext, RawStream) {
        let device = SimulatedDevice::new(DeviceKind::Gpu);
        let context = device.create_context(0).unwrap();
        let stream = device.create_stream(&context).unwrap();
        (device, context, stream)
    }

    #[test]
    fn test_ops_run_in_launch_order() {
        let (device, context, stream) = device_with_stream();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..32 {
            let order = Arc::clone(&order);
            device
                .launch(&stream, StreamOp::new("push", move || order.lock().push(i)))
                .unwrap();
        }
        device.synchronize(&stream).unwrap();
        assert_eq!(*order.lock(), (0..32).collect::<Vec<_>>());

        device.destroy_stream(&context, stream).unwrap();
        device.destroy_context(context).unwrap();
    }

    #[test]
    fn test_fence_completes_after_prior_ops() {
        let device = SimulatedDevice::new(DeviceKind::Gpu).with_op_latency(Duration::from_millis(2));
        let context = device.create_context(0).unwrap();
        let stream = device.create_stream(&context).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            device
                .launch(&stream, StreamOp::new("count", move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        let fence = device.record_fence(&stream).unwrap().unwrap();
        device.wait_fence(fence).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 5);

        // Fences are single-wait
        assert!(device.wait_fence(fence).is_err());

        device.destroy_stream(&context, stream).unwrap();
        device.destroy_context(context).unwrap();
    }

    #[test]
    fn test_context_with_live_stream_cannot_be_destroyed() {
        let (device, context, stream) = device_with_stream();
        let err = device.destroy_context(context).unwrap_err();
        assert!(matches!(err, BackendError::Native { call: NativeCall::DestroyContext, .. }));

        device.destroy_stream(&context, stream).unwrap();
        device.destroy_context(context).unwrap();
        assert_eq!(device.live_contexts(), 0);
    }

    #[test]
    fn test_fault_injection() {
        let device = SimulatedDevice::default();
        device.fail_on(NativeCall::CreateContext);
        let err = device.create_context(0).unwrap_err();
        assert!(matches!(
            err,
            BackendError::Native {
                call: NativeCall::CreateContext,
                code: INJECTED_FAULT_CODE,
                ..
            }
        ));

        device.clear_faults();
        let context = device.create_context(0).unwrap();
        device.destroy_context(context).unwrap();
    }

    #[test]
    fn test_panicking_op_fails_synchronize() {
        let (device, context, stream) = device_with_stream();
        device.launch(&stream, StreamOp::new("explode", || panic!("op exploded"))).unwrap();
        let err = device.synchronize(&stream).unwrap_err();
        assert!(matches!(err, BackendError::Native { code: STREAM_FAULT_CODE, .. }));

        device.destroy_stream(&context, stream).unwrap();
        device.destroy_context(context).unwrap();
    }

    #[test]
    fn test_stats_track_lifecycle() {
        let (device, context, stream) = device_with_stream();
        device.launch(&stream, StreamOp::new("noop", || {})).unwrap();
        device.record_fence(&stream).unwrap();
        device.destroy_stream(&context, stream).unwrap();
        device.destroy_context(context).unwrap();

        assert_eq!(
            device.stats(),
            SimulatedStats {
                contexts_created: 1,
                contexts_destroyed: 1,
                streams_created: 1,
                streams_destroyed: 1,
                ops_launched: 1,
                fences_recorded: 1,
            }
        );
    }

    #[test]
    fn test_backend_rejects_out_of_range_index() {
        let backend = SimulatedBackend::new(DeviceKind::Enflame, 2);
        assert!(backend.device(1).is_ok());
        let err = backend.device(2).err().unwrap();
        assert!(matches!(
            err,
            BackendError::Core(LocationError::DeviceIndexOutOfRange { index: 2, limit: 2, .. })
        ));
    }

    #[test]
    fn test_backend_reuses_devices() {
        let backend = SimulatedBackend::default();
        let first = backend.device(0).unwrap();
        let second = backend.device(0).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
