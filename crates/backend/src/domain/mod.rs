//! Domain types - core engine entities
//!
//! Chunking modes, change events, path canonicalization and configuration.
//! These types are shared by every layer and carry no persistence or I/O
//! concerns of their own.

pub mod config;
pub mod event;
pub mod mode;
pub mod paths;
