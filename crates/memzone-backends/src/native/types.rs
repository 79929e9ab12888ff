//! Opaque native handles and stream work units

use std::borrow::Cow;
use std::fmt;

/// Handle to a native device context
///
/// Contexts are opaque tokens issued by a [`NativeDevice`](super::NativeDevice); only the device
/// that created one can interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawContext(pub u64);

impl RawContext {
    /// Create a new context handle
    pub const fn new(id: u64) -> Self {
        RawContext(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RawContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// Handle to an in-order native stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawStream(pub u64);

impl RawStream {
    /// Create a new stream handle
    pub const fn new(id: u64) -> Self {
        RawStream(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RawStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream{}", self.0)
    }
}

/// Handle to a completion marker recorded on a stream
///
/// A fence completes once every op launched on its stream before it was recorded has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawFence(pub u64);

impl RawFence {
    /// Create a new fence handle
    pub const fn new(id: u64) -> Self {
        RawFence(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RawFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fence{}", self.0)
    }
}

/// A named unit of work enqueued on a native stream
pub struct StreamOp {
    name: Cow<'static, str>,
    body: Box<dyn FnOnce() + Send>,
}

impl StreamOp {
    pub fn new(name: impl Into<Cow<'static, str>>, body: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute the op on the calling thread
    pub fn run(self) {
        (self.body)()
    }
}

impl fmt::Debug for StreamOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOp").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Native device API entry points, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NativeCall {
    CreateContext,
    DestroyContext,
    CreateStream,
    DestroyStream,
    Synchronize,
    Launch,
    RecordFence,
    WaitFence,
}

impl NativeCall {
    pub const ALL: [NativeCall; 8] = [
        NativeCall::CreateContext,
        NativeCall::DestroyContext,
        NativeCall::CreateStream,
        NativeCall::DestroyStream,
        NativeCall::Synchronize,
        NativeCall::Launch,
        NativeCall::RecordFence,
        NativeCall::WaitFence,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            NativeCall::CreateContext => "create_context",
            NativeCall::DestroyContext => "destroy_context",
            NativeCall::CreateStream => "create_stream",
            NativeCall::DestroyStream => "destroy_stream",
            NativeCall::Synchronize => "synchronize",
            NativeCall::Launch => "launch",
            NativeCall::RecordFence => "record_fence",
            NativeCall::WaitFence => "wait_fence",
        }
    }
}

impl fmt::Display for NativeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
