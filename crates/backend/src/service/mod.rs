//! Indexing services.
//!
//! - [`engine`] - the [`Engine`](engine::Engine) service object owning all state
//! - [`orchestrator`] - full index and sync runs over local folders
//! - [`repo`] - repository index and manifest-driven resync
//! - [`status`] - run status, the single-flight slot and cancellation

pub mod engine;
pub mod orchestrator;
pub mod repo;
pub mod status;

pub use engine::{Engine, EngineError, EngineStats};
pub use orchestrator::{IndexRequest, RunReport};
pub use repo::RepoIndexRequest;
pub use status::{RunKind, RunPhase, RunStatus, SourceKind};

#[cfg(test)]
mod __tests__;
