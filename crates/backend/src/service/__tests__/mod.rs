mod cancellation;
mod helpers;
mod indexing;
mod repository;
mod sync;
mod watcher;
