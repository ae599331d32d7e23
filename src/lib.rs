//! Load and bulk-test harness for the marketplace price suggestion and chat
//! moderation API.
//!
//! Data flows from a [`dataset`] or the [`generator`] through a runner
//! ([`bulk`] or [`benchmark`]) into the wave [`dispatch`]er, which calls an
//! [`executor::Executor`] once per case.

pub mod benchmark;
pub mod bulk;
pub mod config;
pub mod context;
pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod generator;
pub mod stats;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{HarnessError, Result};
