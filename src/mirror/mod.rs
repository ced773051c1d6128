// ABOUTME: Timestamp-cursor mirroring engine, independent of the database driver
// ABOUTME: Works against the Catalog/SourceDatabase/MirrorDatabase seams in `store`

pub mod cursor;
#[cfg(test)]
pub mod memory;
pub mod reader;
pub mod reconciler;
pub mod runner;
pub mod schema;
pub mod store;
pub mod table_sync;
pub mod writer;

pub use cursor::{CursorPosition, KeySet, RowBatch};
pub use reconciler::{ReconcileResult, Reconciler};
pub use runner::{RunSummary, Runner, SyncMode, UnitOutcome, UnitReport};
pub use schema::SchemaPropagator;
pub use store::{Catalog, MirrorDatabase, ObjectKind, ReadRequest, Routine, SourceDatabase};
pub use table_sync::{ChangeOptions, TableDescriptor, TableSync, TableSyncReport};
