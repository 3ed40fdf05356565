//! CLI command implementations
//!
//! Commands are organized by flow:
//! - `artifacts` - Stored export management (list, delete)
//! - `common` - Shared utilities (config loading, backend, report output)
//! - `delete` - Dependency-ordered delete runs
//! - `export` - Snapshot export
//! - `import` - Snapshot import
//! - `schema` - Entity schema listing

pub mod artifacts;
pub mod common;
pub mod delete;
pub mod export;
pub mod import;
pub mod schema;

// Re-export command functions for main.rs
pub use artifacts::*;
pub use common::*;
pub use delete::*;
pub use export::*;
pub use import::*;
pub use schema::*;
