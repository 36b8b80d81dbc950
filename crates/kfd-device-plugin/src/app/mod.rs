//! Application module
//!
//! Wires configuration into the long-running tasks and owns their lifecycle.

pub mod core;
pub mod tasks;

pub use core::Application;
