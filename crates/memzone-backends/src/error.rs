//! Error types for device workers and backends

use crate::native::NativeCall;
use memzone_core::{DeviceKind, LocationError, ZoneId};

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while driving a device
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A native device API call reported failure
    #[error("{kind} native call {call} failed with code {code}: {detail}")]
    Native {
        call: NativeCall,
        kind: DeviceKind,
        code: i32,
        detail: String,
    },

    /// The OS refused to start a worker thread
    #[error("failed to spawn device thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// The worker no longer accepts instructions
    #[error("worker for {0} is closed")]
    WorkerClosed(ZoneId),

    /// A send on a closed channel
    #[error("channel is closed")]
    ChannelClosed,

    /// No backend is registered for the zone's device kind
    #[error("no backend registered for device kind {0}")]
    BackendNotRegistered(DeviceKind),

    /// A backend for this device kind is already registered
    #[error("a backend for device kind {0} is already registered")]
    DuplicateBackend(DeviceKind),

    /// Rejected worker or registry configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Location-level failure
    #[error(transparent)]
    Core(#[from] LocationError),
}

impl BackendError {
    /// Create a native call failure
    pub fn native(call: NativeCall, kind: DeviceKind, code: i32, detail: impl Into<String>) -> Self {
        Self::Native {
            call,
            kind,
            code,
            detail: detail.into(),
        }
    }

    /// Create a configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Terminate the process on an unrecoverable backend failure.
///
/// Stream, context and channel failures leave a worker with no way to make progress. Unwinding
/// would only end the calling thread while its peers kept accepting work, so the diagnostic is
/// logged at `error`, written to stderr for processes without a subscriber, and the process
/// aborts.
#[track_caller]
pub fn fatal(err: BackendError) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(error = %err, %location, "fatal backend failure");
    eprintln!("fatal backend failure at {location}: {err}");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_error_message_names_the_call() {
        let err = BackendError::native(NativeCall::CreateStream, DeviceKind::Gpu, 2, "out of memory");
        assert_eq!(err.to_string(), "gpu native call create_stream failed with code 2: out of memory");
    }

    #[test]
    fn location_errors_convert() {
        let err: BackendError = LocationError::UnknownDeviceTag("tpu".to_string()).into();
        assert!(matches!(err, BackendError::Core(LocationError::UnknownDeviceTag(_))));
    }
}
