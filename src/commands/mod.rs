// ABOUTME: Command implementations for each mirror job
// ABOUTME: Exports the run commands (sync, init, prune, schema, resync) and the tables listing

pub mod run;
pub mod tables;

pub use run::{init, prune, resync, schema, sync};
pub use tables::tables;
