//! Service layer
//!
//! Services contain the worker's business logic: running build pipelines,
//! uploading artifacts and reporting status. They use repositories for all
//! outside communication.
//!
//! Services with more than one sensible implementation are trait-based to
//! enable testing and dependency injection.

mod artifacts;
mod pipeline;
mod progress;
mod status;

// Re-export traits
pub use artifacts::ArtifactService;
pub use pipeline::BuildService;
pub use progress::ProgressSink;

// Re-export implementations
pub use artifacts::StandardArtifactService;
pub use pipeline::StandardBuildService;
pub use progress::TracingProgressSink;
pub use status::StatusReporter;
