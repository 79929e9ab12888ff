//! Native device trait and handle types

mod traits;
mod types;

pub use traits::NativeDevice;
pub use types::{NativeCall, RawContext, RawFence, RawStream, StreamOp};
