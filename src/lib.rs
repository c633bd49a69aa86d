//! Market data gateway library.
//!
//! Exposes the component modules for use by `main.rs`, integration tests under
//! `tests/`, and `testutil` fakes. Component modules are independent of each other
//! except through the `ports` traits they depend on.

pub mod config;
pub mod data_mapper_cache;
pub mod error;
pub mod market_status;
pub mod orchestrator;
pub mod ports;
pub mod recovery;
pub mod rules;
pub mod storage;
pub mod stream;
pub mod support;
pub mod symbol;
pub mod testutil;
pub mod transformer;
