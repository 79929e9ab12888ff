//! Per-zone device workers for memzone
//!
//! This crate provides:
//! - **Native seam**: [`NativeDevice`], the trait a vendor runtime is wrapped in
//! - **Device workers**: one actor thread and one poller thread per zone
//! - **Backend registry**: runtime selection of backends by device kind
//! - **Built-in backends**: the host, plus a simulated accelerator for tests
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     DeviceRuntime                         │
//! │        (one lazily started worker per ZoneId)             │
//! └─────────────────────┬────────────────────────────────────┘
//!                       │ BackendRegistry: DeviceKind → DeviceBackend
//!         ┌─────────────┼─────────────┬─────────────┐
//!         ▼             ▼             ▼             ▼
//!   ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐
//!   │ cpu:0    │  │ gpu:0    │  │ gpu:1    │  │ dummy:0  │
//!   │ worker   │  │ worker   │  │ worker   │  │ worker   │
//!   └──────────┘  └──────────┘  └──────────┘  └──────────┘
//!    actor + poller threads, DeviceContextHandle, callback channel
//! ```
//!
//! # Usage
//!
//! ```rust
//! use memzone_backends::{BackendRegistry, DeviceRuntime, Instruction, WorkerConfig};
//! use memzone_core::ZoneId;
//! use std::sync::mpsc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = DeviceRuntime::new(BackendRegistry::with_host(), WorkerConfig::default())?;
//!
//! let (tx, rx) = mpsc::channel();
//! runtime.submit(
//!     ZoneId::HOST,
//!     Instruction::new("notify", move |context| {
//!         context.add_callback(move || tx.send("done").unwrap());
//!     }),
//! )?;
//!
//! assert_eq!(rx.recv()?, "done");
//! runtime.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod native;
pub mod registry;
pub mod worker;

pub use channel::{Channel, ChannelClosed, ChannelStatus};
pub use config::WorkerConfig;
pub use context::{CallbackChannel, CallbackRecord, DeviceContextHandle};
pub use error::{fatal, BackendError, Result};
pub use native::{NativeCall, NativeDevice, RawContext, RawFence, RawStream, StreamOp};
pub use registry::{BackendRegistry, DeviceBackend, DeviceRuntime};
pub use worker::{DeviceWorker, Instruction, WorkerState};
