//! Worker configuration

use crate::error::{BackendError, Result};
use memzone_core::ZoneId;
use std::env;
use std::num::NonZeroUsize;

/// Queue sizing and thread naming for device workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum queued callbacks per worker; `None` is unbounded.
    ///
    /// When bounded, `add_callback` blocks the actor while the poller catches up.
    pub callback_capacity: Option<usize>,
    /// Maximum queued instructions per worker; `None` is unbounded.
    pub inbox_capacity: Option<usize>,
    /// Prefix for worker thread names
    pub thread_name_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            callback_capacity: None,
            inbox_capacity: None,
            thread_name_prefix: "memzone".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `MEMZONE_CALLBACK_CAPACITY` - Callback queue bound, or `unbounded`
    /// - `MEMZONE_INBOX_CAPACITY` - Instruction queue bound, or `unbounded`
    /// - `MEMZONE_THREAD_PREFIX` - Worker thread name prefix
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = env::var("MEMZONE_CALLBACK_CAPACITY") {
            config.callback_capacity = parse_capacity("MEMZONE_CALLBACK_CAPACITY", &value)?;
        }
        if let Ok(value) = env::var("MEMZONE_INBOX_CAPACITY") {
            config.inbox_capacity = parse_capacity("MEMZONE_INBOX_CAPACITY", &value)?;
        }
        if let Ok(prefix) = env::var("MEMZONE_THREAD_PREFIX") {
            if !prefix.trim().is_empty() {
                config.thread_name_prefix = prefix.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_callback_capacity(mut self, capacity: Option<usize>) -> Self {
        self.callback_capacity = capacity;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: Option<usize>) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Reject zero capacities and an empty thread prefix
    pub fn validate(&self) -> Result<()> {
        self.callback_bound()?;
        self.inbox_bound()?;
        if self.thread_name_prefix.is_empty() {
            return Err(BackendError::invalid_config("thread name prefix must not be empty"));
        }
        Ok(())
    }

    pub(crate) fn callback_bound(&self) -> Result<Option<NonZeroUsize>> {
        bound("callback_capacity", self.callback_capacity)
    }

    pub(crate) fn inbox_bound(&self) -> Result<Option<NonZeroUsize>> {
        bound("inbox_capacity", self.inbox_capacity)
    }

    /// Thread name for one of a zone's worker threads, e.g. `memzone-gpu:1-actor`
    pub fn thread_name(&self, zone: ZoneId, role: &str) -> String {
        format!("{}-{}-{}", self.thread_name_prefix, zone, role)
    }
}

fn bound(field: &str, capacity: Option<usize>) -> Result<Option<NonZeroUsize>> {
    match capacity {
        None => Ok(None),
        Some(value) => NonZeroUsize::new(value)
            .map(Some)
            .ok_or_else(|| BackendError::invalid_config(format!("{field} must be greater than zero"))),
    }
}

fn parse_capacity(var: &str, value: &str) -> Result<Option<usize>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("unbounded") {
        return Ok(None);
    }
    value
        .parse::<usize>()
        .map(Some)
        .map_err(|err| BackendError::invalid_config(format!("{var}={value:?}: {err}")))
}
