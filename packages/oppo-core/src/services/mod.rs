//! Application services layer.
//!
//! Long-running tasks that sit between the device session and the owner.

pub mod dispatcher;

pub use dispatcher::StatusDispatcher;
