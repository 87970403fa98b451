//! Core domain types
//!
//! These types describe a build as the worker sees it. The system of record
//! lives in a separate service; the worker only receives commands and
//! reports outcomes.

pub mod build;
