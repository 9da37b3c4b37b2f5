//! Work queue between the API (producers) and the background consumer.
//!
//! - FIFO across all producers, no priorities
//! - Unbounded: `enqueue` never waits for the consumer
//! - Messages cross the boundary as encoded bytes, so the consumer always
//!   decodes its own independent copy of the batch
//! - In-memory only: whatever is queued is lost when the process group exits

mod work_queue;

pub use work_queue::{QueueError, WorkQueueConsumer, WorkQueueProducer, work_queue};
