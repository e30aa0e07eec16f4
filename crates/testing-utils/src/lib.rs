//! # Scheduler Testing Utils
//!
//! Shared testing utilities for the experiment scheduler workspace.
//!
//! ## Features
//!
//! - **Test Data Builders**: tasks, workers, experiments and compute resources
//!   with sensible defaults
//! - **Recording Doubles**: hooks, spawners, data movers and orchestrators that
//!   remember every call so tests can assert on them
//! - **Helpers**: polling utilities for asynchronous assertions
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
