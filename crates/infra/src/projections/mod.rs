//! Read-model projections fed from committed events.

pub mod catalog;
pub mod order_history;
