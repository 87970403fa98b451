//! Data Transfer Objects for inter-service communication
//!
//! DTOs published by the worker on the results queue.

pub mod status;
