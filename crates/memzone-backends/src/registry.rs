//! Backend registration and per-zone worker management

use crate::config::WorkerConfig;
use crate::context::DeviceContextHandle;
use crate::error::{BackendError, Result};
use crate::native::NativeDevice;
use crate::worker::{DeviceWorker, Instruction};
use memzone_core::{DeviceIndex, DeviceKind, ZoneId};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// A device kind's entry point: hands out native devices and builds workers for them
pub trait DeviceBackend: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Native API for the device with the given index
    fn native(&self, device_index: DeviceIndex) -> Result<Arc<dyn NativeDevice>>;

    /// Start a worker for the device with the given index
    fn create_worker(&self, device_index: DeviceIndex, config: &WorkerConfig) -> Result<DeviceWorker> {
        let zone = ZoneId::try_new(self.kind(), device_index)?;
        DeviceWorker::spawn(self.native(device_index)?, zone, config)
    }
}

/// Device kind to backend map
///
/// Backends are registered at runtime; a kind with no registered backend has no workers.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<DeviceKind, Arc<dyn DeviceBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the host backend already registered
    pub fn with_host() -> Self {
        let mut registry = Self::new();
        registry.backends.insert(DeviceKind::Cpu, Arc::new(crate::backends::HostBackend::new()));
        registry
    }

    /// Register `backend` under its device kind
    pub fn register(&mut self, backend: Arc<dyn DeviceBackend>) -> Result<()> {
        let kind = backend.kind();
        if kind == DeviceKind::Invalid {
            return Err(BackendError::invalid_config("cannot register a backend for the invalid device kind"));
        }
        if self.backends.contains_key(&kind) {
            return Err(BackendError::DuplicateBackend(kind));
        }
        tracing::debug!(kind = %kind, "backend registered");
        self.backends.insert(kind, backend);
        Ok(())
    }

    pub fn get(&self, kind: DeviceKind) -> Option<Arc<dyn DeviceBackend>> {
        self.backends.get(&kind).cloned()
    }

    pub fn contains(&self, kind: DeviceKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Registered kinds, in code order
    pub fn kinds(&self) -> Vec<DeviceKind> {
        self.backends.keys().copied().collect()
    }

    /// Start a worker for `zone` using its kind's backend
    pub fn create_worker(&self, zone: ZoneId, config: &WorkerConfig) -> Result<DeviceWorker> {
        let backend = self
            .get(zone.device_kind())
            .ok_or(BackendError::BackendNotRegistered(zone.device_kind()))?;
        backend.create_worker(zone.device_index(), config)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry").field("kinds", &self.kinds()).finish()
    }
}

/// A zone's worker, set once. `init` serializes the starts for that zone only, so a slow
/// context creation never holds the runtime-wide map lock.
#[derive(Default)]
struct WorkerSlot {
    worker: OnceLock<Arc<DeviceWorker>>,
    init: Mutex<()>,
}

/// One worker per zone, created on first use
///
/// The runtime is an explicit object passed to whoever needs device access; there is no global
/// instance. Dropping it shuts every worker down.
pub struct DeviceRuntime {
    registry: BackendRegistry,
    config: WorkerConfig,
    workers: RwLock<BTreeMap<ZoneId, Arc<WorkerSlot>>>,
    is_shutdown: AtomicBool,
}

impl DeviceRuntime {
    pub fn new(registry: BackendRegistry, config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            workers: RwLock::new(BTreeMap::new()),
            is_shutdown: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The worker serving `zone`, started on first request.
    ///
    /// Callers racing for the same zone wait for one start; lookups for other zones do not.
    pub fn worker(&self, zone: ZoneId) -> Result<Arc<DeviceWorker>> {
        let slot = self.slot(zone)?;
        if let Some(worker) = slot.worker.get() {
            return Ok(Arc::clone(worker));
        }

        let _init = slot.init.lock();
        if let Some(worker) = slot.worker.get() {
            return Ok(Arc::clone(worker));
        }
        // Shutdown sets the flag before it empties the map, then waits on each slot's `init`
        if self.is_shutdown() {
            return Err(BackendError::WorkerClosed(zone));
        }

        let worker = Arc::new(self.registry.create_worker(zone, &self.config)?);
        tracing::debug!(zone = %zone, "worker started");
        let _ = slot.worker.set(Arc::clone(&worker));
        Ok(worker)
    }

    fn slot(&self, zone: ZoneId) -> Result<Arc<WorkerSlot>> {
        if let Some(slot) = self.workers.read().get(&zone) {
            return Ok(Arc::clone(slot));
        }

        let mut workers = self.workers.write();
        if self.is_shutdown() {
            return Err(BackendError::WorkerClosed(zone));
        }
        Ok(Arc::clone(workers.entry(zone).or_default()))
    }

    /// Context handle of the worker serving `zone`
    pub fn context(&self, zone: ZoneId) -> Result<Arc<DeviceContextHandle>> {
        Ok(self.worker(zone)?.context())
    }

    /// Queue an instruction on the worker serving `zone`
    pub fn submit(&self, zone: ZoneId, instruction: Instruction) -> Result<()> {
        self.worker(zone)?.submit(instruction)
    }

    /// Zones with a started worker, in zone order
    pub fn active_zones(&self) -> Vec<ZoneId> {
        self.workers
            .read()
            .iter()
            .filter(|(_, slot)| slot.worker.get().is_some())
            .map(|(zone, _)| *zone)
            .collect()
    }

    /// Shut every worker down in zone order. Idempotent.
    pub fn shutdown(&self) {
        let workers = {
            let mut workers = self.workers.write();
            if self.is_shutdown.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *workers)
        };
        for (zone, slot) in workers {
            // Wait out a start already in progress
            drop(slot.init.lock());
            if let Some(worker) = slot.worker.get() {
                tracing::debug!(zone = %zone, "shutting down worker");
                worker.shutdown();
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for DeviceRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DeviceRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRuntime")
            .field("registry", &self.registry)
            .field("active_zones", &self.active_zones())
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{HostBackend, SimulatedBackend};
    use crate::native::{RawContext, RawStream, StreamOp};
    use std::sync::mpsc;
    use std::thread;

    /// GPU device whose context creation blocks until the test opens the gate
    struct GatedDevice {
        entered: Mutex<mpsc::Sender<()>>,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl NativeDevice for GatedDevice {
        fn kind(&self) -> DeviceKind {
            DeviceKind::Gpu
        }

        fn create_context(&self, device_index: DeviceIndex) -> Result<RawContext> {
            let _ = self.entered.lock().send(());
            let _ = self.gate.lock().recv();
            Ok(RawContext::new(u64::from(device_index) + 1))
        }

        fn destroy_context(&self, _context: RawContext) -> Result<()> {
            Ok(())
        }

        fn create_stream(&self, context: &RawContext) -> Result<RawStream> {
            Ok(RawStream::new(context.id()))
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

    struct GatedBackend(Arc<GatedDevice>);

    impl DeviceBackend for GatedBackend {
        fn kind(&self) -> DeviceKind {
            DeviceKind::Gpu
        }

        fn native(&self, _device_index: DeviceIndex) -> Result<Arc<dyn NativeDevice>> {
            let device: Arc<dyn NativeDevice> = self.0.clone();
            Ok(device)
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = BackendRegistry::with_host();
        let err = registry.register(Arc::new(HostBackend::new())).unwrap_err();
        assert!(matches!(err, BackendError::DuplicateBackend(DeviceKind::Cpu)));
    }

    #[test]
    fn test_invalid_kind_cannot_register() {
        let mut registry = BackendRegistry::new();
        let err = registry
            .register(Arc::new(SimulatedBackend::new(DeviceKind::Invalid, 1)))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidConfig(_)));
    }

    #[test]
    fn test_kinds_are_sorted() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(SimulatedBackend::new(DeviceKind::Enflame, 1))).unwrap();
        registry.register(Arc::new(HostBackend::new())).unwrap();
        registry.register(Arc::new(SimulatedBackend::new(DeviceKind::Gpu, 2))).unwrap();

        assert_eq!(registry.kinds(), vec![DeviceKind::Cpu, DeviceKind::Gpu, DeviceKind::Enflame]);
        assert!(registry.contains(DeviceKind::Gpu));
        assert!(!registry.contains(DeviceKind::Abc));
        assert!(registry.get(DeviceKind::Abc).is_none());
    }

    #[test]
    fn test_unregistered_kind_has_no_worker() {
        let registry = BackendRegistry::with_host();
        let zone = ZoneId::new(DeviceKind::Abc, 0);
        let err = registry.create_worker(zone, &WorkerConfig::default()).unwrap_err();
        assert!(matches!(err, BackendError::BackendNotRegistered(DeviceKind::Abc)));
    }

    #[test]
    fn test_runtime_rejects_bad_config() {
        let config = WorkerConfig::default().with_callback_capacity(Some(0));
        assert!(DeviceRuntime::new(BackendRegistry::with_host(), config).is_err());
    }

    #[test]
    fn test_slow_worker_start_does_not_block_other_zones() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let device = Arc::new(GatedDevice {
            entered: Mutex::new(entered_tx),
            gate: Mutex::new(gate_rx),
        });
        let mut registry = BackendRegistry::with_host();
        registry.register(Arc::new(GatedBackend(device))).unwrap();
        let runtime = Arc::new(DeviceRuntime::new(registry, WorkerConfig::default()).unwrap());

        let gpu0 = ZoneId::new(DeviceKind::Gpu, 0);
        let starting = {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || runtime.worker(gpu0).map(|worker| worker.zone()))
        };
        entered_rx.recv().unwrap();

        // gpu:0 is still inside create_context here
        runtime.worker(ZoneId::HOST).unwrap();
        assert_eq!(runtime.active_zones(), vec![ZoneId::HOST]);

        gate_tx.send(()).unwrap();
        assert_eq!(starting.join().unwrap().unwrap(), gpu0);
        assert_eq!(runtime.active_zones(), vec![ZoneId::HOST, gpu0]);
        runtime.shutdown();
    }
}
