//! Adapters for the domain ports.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod in_memory;
pub mod in_memory_queue;
pub mod locks;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
