//! Infrastructure layer: configuration, storage, work queue, shutdown
//! signalling, and the background consumer.

pub mod config;
pub mod db;
pub mod queue;
pub mod shutdown;
pub mod workers;


pub use config::{Config, ConfigError};
pub use db::{Database, StoreError};
pub use queue::{QueueError, WorkQueueConsumer, WorkQueueProducer, work_queue};
pub use shutdown::ShutdownSignal;
pub use workers::{ChargeConsumer, ConsumerConfig, ConsumerError, ConsumerStats};
