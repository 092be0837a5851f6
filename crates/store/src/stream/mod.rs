//! Ordered, backpressure-aware binary output streams.
//!
//! One [`StreamSink`] wraps one open destination (a file being assembled, or
//! one part of an outgoing multipart response). All writes pass through a
//! bounded FIFO queue drained by a dedicated task, which gives three
//! properties at once: submission order is preserved even when producers do
//! not await between calls, a saturated destination pushes back on producers
//! instead of buffering unboundedly, and a failure recorded mid-stream stops
//! the flow without panicking anyone.

mod multipart;
mod sink;
mod value;

pub use multipart::{extract_part, ExtractedPart, MultipartFraming, FIXED_BOUNDARY};
pub use sink::{SinkDestination, StreamSink};
pub use value::BinaryValue;
