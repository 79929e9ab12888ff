//! Closeable FIFO channel shared by worker threads
//!
//! A [`Channel`] wraps a `crossbeam_channel` pair behind a shared reference. Closing it drops the
//! one stored sender, so new sends fail while queued items stay in place: receivers keep draining
//! them and only see [`ChannelStatus::Closed`] once the queue is empty and disconnected. Workers
//! rely on that to deliver every callback registered before shutdown.

use crossbeam_channel::{Receiver, RecvError, SendError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Returned by [`Channel::send`] after close, handing the rejected item back
#[derive(thiserror::Error)]
#[error("sending on a closed channel")]
pub struct ChannelClosed<T>(pub T);

impl<T> ChannelClosed<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for ChannelClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChannelClosed(..)")
    }
}

impl<T> From<ChannelClosed<T>> for crate::error::BackendError {
    fn from(_: ChannelClosed<T>) -> Self {
        crate::error::BackendError::ChannelClosed
    }
}

/// Why a receive produced no item
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelStatus {
    /// Nothing queued right now (non-blocking receive only)
    #[error("channel is empty")]
    Empty,
    /// Closed and fully drained
    #[error("channel is closed")]
    Closed,
}

impl From<RecvError> for ChannelStatus {
    fn from(_: RecvError) -> Self {
        ChannelStatus::Closed
    }
}

impl From<TryRecvError> for ChannelStatus {
    fn from(err: TryRecvError) -> Self {
        match err {
            TryRecvError::Empty => ChannelStatus::Empty,
            TryRecvError::Disconnected => ChannelStatus::Closed,
        }
    }
}

/// Multi-producer multi-consumer FIFO with close semantics and optional back-pressure
pub struct Channel<T> {
    sender: Mutex<Option<Sender<T>>>,
    receiver: Receiver<T>,
    capacity: Option<NonZeroUsize>,
}

impl<T> Channel<T> {
    /// Create a channel; `None` means unbounded
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        let (sender, receiver) = match capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity.get()),
            None => crossbeam_channel::unbounded(),
        };
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self::new(Some(capacity))
    }

    /// Queue `item`, blocking while the channel is full.
    ///
    /// Fails once the channel is closed. A send already waiting for room when the channel closes
    /// still completes once a receiver makes room, and its item is drained like any other.
    pub fn send(&self, item: T) -> Result<(), ChannelClosed<T>> {
        // Clone out of the lock so a blocked send never holds up `close`
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => sender.send(item).map_err(|SendError(item)| ChannelClosed(item)),
            None => Err(ChannelClosed(item)),
        }
    }

    /// Take the oldest item, blocking while the channel is empty and open.
    pub fn receive(&self) -> Result<T, ChannelStatus> {
        Ok(self.receiver.recv()?)
    }

    /// Take the oldest item without blocking
    pub fn try_receive(&self) -> Result<T, ChannelStatus> {
        Ok(self.receiver.try_recv()?)
    }

    /// Stop accepting items and wake every idle receiver. Idempotent.
    pub fn close(&self) {
        drop(self.sender.lock().take());
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Closes the channel when dropped, so a thread that exits (or unwinds) never leaves its peers
/// blocked on it.
pub(crate) struct CloseOnDrop<T>(pub(crate) Arc<Channel<T>>);

impl<T> Drop for CloseOnDrop<T> {
    fn drop(&mut self) {
        self.0.close();
    }
}
