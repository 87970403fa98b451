//! Scheduler layer for the worker
//!
//! This layer owns the message lifecycle: consuming build commands,
//! settling each one with the broker, and keeping the broker session alive
//! across disconnects.

pub mod consumer;
pub mod session;
pub mod supervisor;

pub use session::AmqpSession;
pub use supervisor::ReconnectSupervisor;
