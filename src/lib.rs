//! A single-node proof-of-work ledger.
//!
//! The [`blockchain`] module holds the engine (blocks, signed transactions,
//! the pending pool with balance-aware admission, and the balance store);
//! [`api`] exposes it over HTTP and [`config`] loads the node settings.

pub mod api;
pub mod blockchain;
pub mod config;
