// Branch Directory - Core Library
// Exposes the record store and the bulk interchange engine for the CLI, the API server and tests

pub mod branch;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod export;
pub mod import;
pub mod staging;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use branch::{Branch, BranchFields, BranchId};
pub use config::{init_tracing, ServerConfig};
pub use dataset::{read_dataset, Dataset, DatasetFormat, RowRecord};
pub use db::{setup_database, BranchRepository, SqliteStore};
pub use error::{InterchangeError, StoreError};
pub use export::{export_snapshot, ExportArtifact, ExportFormat};
pub use import::{apply_rows, import_file, ImportReport, RowFailure, RowWarning};
pub use staging::StagedUpload;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
