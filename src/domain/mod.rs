//! Domain layer: value objects, entities, the queue wire contract and the
//! ports the application layer depends on.

pub mod account;
pub mod ledger_log;
pub mod movement;
pub mod ports;
pub mod queue;
