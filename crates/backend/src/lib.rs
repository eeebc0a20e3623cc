//! semdex - incremental semantic indexing of local folders and repositories
//!
//! The [`Engine`] owns all state: change detection, per-mode sync queues, the
//! folder watcher, branch manifests and vector collections.

mod domain;
pub use domain::{config, event, mode, paths};

pub mod dirs;
pub mod embedding;
pub mod index;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod watch;

pub use service::{Engine, EngineError, IndexRequest, RepoIndexRequest, RunPhase, RunReport, RunStatus};
