//! Application layer containing the movement pipeline.
//!
//! `LedgerEngine` is the transactional core. Each recorded movement is handed
//! to the `OutcomePublisher`, which puts an outcome event on the log queue;
//! the `LogConsumer` drains that queue into ledger logs on its own schedule.
//! The two sides share nothing but the queue, so audit logging can lag or
//! fail without holding up money movement.

pub mod consumer;
pub mod engine;
pub mod publisher;
pub mod service;
