//! Per-zone device worker
//!
//! Each worker owns two named threads:
//!
//! ```text
//!   submit() ──▶ inbox ──▶ [actor]  ── launch / add_callback ──▶ callback channel ──▶ [poller]
//!                           owns the DeviceContextHandle           waits fence, runs callback
//! ```
//!
//! The actor executes instructions one at a time in receive order. The poller invokes callbacks
//! in the order they were registered, each after its fence completes. Shutdown closes the inbox
//! first so the actor stops registering callbacks, then closes the callback channel and lets the
//! poller drain everything already queued.

use crate::channel::{Channel, CloseOnDrop};
use crate::config::WorkerConfig;
use crate::context::{CallbackChannel, DeviceContextHandle};
use crate::error::{fatal, BackendError, Result};
use crate::native::NativeDevice;
use memzone_core::ZoneId;
use memzone_tracing::WaitTimer;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A named unit of work executed on a worker's actor thread
pub struct Instruction {
    name: Cow<'static, str>,
    body: Box<dyn FnOnce(&DeviceContextHandle) + Send>,
}

impl Instruction {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        body: impl FnOnce(&DeviceContextHandle) + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn run(self, context: &DeviceContextHandle) {
        (self.body)(context)
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruction").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Lifecycle of a [`DeviceWorker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Accepting instructions
    Running,
    /// Inbox closed, poller delivering the remaining callbacks
    Draining,
    /// Both threads have exited
    Closed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Closed => "closed",
        })
    }
}

struct WorkerThreads {
    actor: JoinHandle<()>,
    poller: JoinHandle<()>,
}

type Handoff = Channel<Arc<DeviceContextHandle>>;

/// Actor and poller threads serving one zone
pub struct DeviceWorker {
    zone: ZoneId,
    inbox: Arc<Channel<Instruction>>,
    callbacks: Arc<CallbackChannel>,
    context: Arc<DeviceContextHandle>,
    state: Mutex<WorkerState>,
    threads: Mutex<Option<WorkerThreads>>,
}

impl DeviceWorker {
    /// Start the worker threads for `zone`.
    ///
    /// The native context is created on the actor thread before this returns, and its failure is
    /// fatal. Configuration and thread-spawn failures are returned.
    pub fn spawn(device: Arc<dyn NativeDevice>, zone: ZoneId, config: &WorkerConfig) -> Result<Self> {
        config.validate()?;
        if device.kind() != zone.device_kind() {
            return Err(BackendError::invalid_config(format!(
                "{} device cannot serve zone {zone}",
                device.kind()
            )));
        }

        let callbacks = Arc::new(CallbackChannel::new(config.callback_bound()?));
        let inbox = Arc::new(Channel::new(config.inbox_bound()?));

        let handoff: Arc<Handoff> = Arc::new(Channel::bounded(NonZeroUsize::MIN));
        let actor = {
            let device = Arc::clone(&device);
            let callbacks = Arc::clone(&callbacks);
            let inbox = Arc::clone(&inbox);
            let handoff = Arc::clone(&handoff);
            thread::Builder::new()
                .name(config.thread_name(zone, "actor"))
                .spawn(move || run_actor(zone, device, callbacks, inbox, handoff))
                .map_err(BackendError::ThreadSpawn)?
        };

        let context = match handoff.receive() {
            Ok(context) => context,
            Err(_) => match actor.join() {
                Err(payload) => panic::resume_unwind(payload),
                Ok(()) => return Err(BackendError::ChannelClosed),
            },
        };

        let poller = {
            let callbacks = Arc::clone(&callbacks);
            thread::Builder::new()
                .name(config.thread_name(zone, "poller"))
                .spawn(move || run_poller(zone, device, callbacks))
        };
        let poller = match poller {
            Ok(poller) => poller,
            Err(err) => {
                inbox.close();
                let _ = actor.join();
                callbacks.close();
                return Err(BackendError::ThreadSpawn(err));
            }
        };

        tracing::debug!(zone = %zone, state = %WorkerState::Running, "worker state");
        Ok(Self {
            zone,
            inbox,
            callbacks,
            context,
            state: Mutex::new(WorkerState::Running),
            threads: Mutex::new(Some(WorkerThreads { actor, poller })),
        })
    }

    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    /// Shared handle to the zone's native resources, for callers that need `sync_device()`
    pub fn context(&self) -> Arc<DeviceContextHandle> {
        Arc::clone(&self.context)
    }

    /// Queue an instruction for the actor thread
    pub fn submit(&self, instruction: Instruction) -> Result<()> {
        self.inbox
            .send(instruction)
            .map_err(|_| BackendError::WorkerClosed(self.zone))
    }

    /// Queue a closure as an instruction
    pub fn execute(
        &self,
        name: impl Into<Cow<'static, str>>,
        body: impl FnOnce(&DeviceContextHandle) + Send + 'static,
    ) -> Result<()> {
        self.submit(Instruction::new(name, body))
    }

    /// Instructions waiting for the actor
    pub fn pending_instructions(&self) -> usize {
        self.inbox.len()
    }

    /// Callbacks waiting for the poller
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    /// Stop both threads after draining queued work. Idempotent.
    ///
    /// Every instruction submitted before the call runs, and every callback registered by those
    /// instructions is invoked. A panic on either worker thread is re-raised here.
    pub fn shutdown(&self) {
        let mut threads = self.threads.lock();
        let Some(WorkerThreads { actor, poller }) = threads.take() else {
            return;
        };

        self.inbox.close();
        let actor_panic = actor.join().err();

        self.set_state(WorkerState::Draining);
        self.callbacks.close();
        let poller_panic = {
            let _timer = WaitTimer::start("drain_callbacks");
            poller.join().err()
        };

        self.set_state(WorkerState::Closed);
        drop(threads);

        if let Some(payload) = actor_panic.or(poller_panic) {
            if thread::panicking() {
                tracing::error!(zone = %self.zone, "worker thread panicked; already unwinding");
            } else {
                panic::resume_unwind(payload);
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
        tracing::debug!(zone = %self.zone, state = %state, "worker state");
    }
}

impl Drop for DeviceWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DeviceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceWorker")
            .field("zone", &self.zone)
            .field("state", &self.state())
            .field("pending_instructions", &self.pending_instructions())
            .field("pending_callbacks", &self.pending_callbacks())
            .finish()
    }
}

fn run_actor(
    zone: ZoneId,
    device: Arc<dyn NativeDevice>,
    callbacks: Arc<CallbackChannel>,
    inbox: Arc<Channel<Instruction>>,
    handoff: Arc<Handoff>,
) {
    let _inbox_guard = CloseOnDrop(Arc::clone(&inbox));

    let context = {
        let _handoff_guard = CloseOnDrop(Arc::clone(&handoff));
        let context = match DeviceContextHandle::create(zone, device, callbacks) {
            Ok(context) => Arc::new(context),
            Err(err) => fatal(err),
        };
        if handoff.send(Arc::clone(&context)).is_err() {
            return;
        }
        context
    };
    drop(handoff);

    let mut executed = 0u64;
    while let Ok(instruction) = inbox.receive() {
        tracing::trace!(zone = %zone, instruction = instruction.name(), "executing instruction");
        instruction.run(&context);
        executed += 1;
    }
    tracing::debug!(zone = %zone, executed, "actor finished");
}

fn run_poller(zone: ZoneId, device: Arc<dyn NativeDevice>, callbacks: Arc<CallbackChannel>) {
    let _guard = CloseOnDrop(Arc::clone(&callbacks));

    let mut invoked = 0u64;
    while let Ok(record) = callbacks.receive() {
        if let Some(fence) = record.fence() {
            let _timer = WaitTimer::start("callback_fence");
            if let Err(err) = device.wait_fence(fence) {
                fatal(err);
            }
        }
        tracing::trace!(zone = %zone, "invoking callback");
        record.invoke();
        invoked += 1;
    }
    tracing::debug!(zone = %zone, invoked, "poller finished");
}
