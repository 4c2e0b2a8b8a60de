//! Application module
//!
//! Wires the pod change stream to the lifecycle processor and manages their
//! background tasks.

pub mod core;
pub mod tasks;

// Re-export main types
pub use core::Application;
pub use tasks::Tasks;
