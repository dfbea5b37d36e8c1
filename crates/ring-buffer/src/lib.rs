//! Lock-Free Bounded Queue
//!
//! Provides a fixed-capacity single-producer/single-consumer ring used to
//! carry reports from a hardware worker thread back to the control thread.
//! Unlike a telemetry ring, a full queue never overwrites: the producer is
//! told there is no room and retries later.

mod buffer;

pub use buffer::{BoundedQueue, QueueReader, QueueWriter};
