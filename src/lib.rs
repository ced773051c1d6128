// ABOUTME: Library root for database-mirror
// ABOUTME: Batch MySQL primary-to-mirror replication over timestamp cursors

pub mod commands;
pub mod config;
pub mod ddl;
pub mod filters;
pub mod mirror;
pub mod mysql;
pub mod utils;
