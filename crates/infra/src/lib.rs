//! Infrastructure layer: event storage, command dispatch, the checkout
//! transaction engine, and read-model projections.

pub mod cart_service;
pub mod checkout;
pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;

#[cfg(test)]
mod integration_tests;
