//! Background workers.

pub mod charge_consumer;

pub use charge_consumer::{ChargeConsumer, ConsumerConfig, ConsumerError, ConsumerStats, process_message};
