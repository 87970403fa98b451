//! Kiln Core
//!
//! Core types shared by the Kiln build worker and its clients.
//!
//! This crate contains:
//! - Domain types: build instructions, lifecycle status and pipeline results
//! - DTOs: the status events published on the results queue

pub mod domain;
pub mod dto;
