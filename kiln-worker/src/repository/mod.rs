//! Repository layer
//!
//! Repositories are thin adapters over the broker and object store
//! clients. They provide small, focused interfaces without business logic.
//!
//! All repositories are trait-based to enable testing with in-memory fakes.

mod dead_letters;
mod objects;
mod status;

// Re-export traits
pub use dead_letters::DeadLetterRepository;
pub use objects::ObjectRepository;
pub use status::StatusRepository;

// Re-export implementations
pub use dead_letters::AmqpDeadLetterRepository;
pub use objects::S3ObjectRepository;
pub use status::AmqpStatusRepository;
