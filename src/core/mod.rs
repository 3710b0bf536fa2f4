//! Port core
//!
//! Configuration, errors, shared port state, critical sections and the
//! scheduler interface.

pub mod config;
pub mod critical;
pub mod error;
pub mod kernel;
pub mod types;
pub mod task;
#[cfg(target_arch = "arm")]
pub mod cs_cell;
