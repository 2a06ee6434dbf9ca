//! Core engine for the tsq PostgreSQL/TimescaleDB command-line client.
//!
//! This crate provides everything below the CLI surface:
//!
//! - **error**: the shared failure taxonomy and its exit-status mapping
//! - **config**: config-file loading, DSN parsing, and layered parameter resolution
//! - **models**: resolved connection parameters, query requests, cells, and row streams
//! - **services**: connection setup, bounded query execution, administrative queries
//! - **render**: table, JSON, and CSV output
//! - **logging**: structured logging setup (stderr)

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod render;
pub mod services;

pub use config::{CliOverrides, FileConfig, Profile};
pub use error::TsqError;
pub use models::{
    Cell, ColumnMeta, ConnectionSpec, PgInterval, QueryHandle, QueryOutput, QueryRequest, Row,
    RowEvent, RowStream, SslMode,
};
pub use render::{Format, RenderRequest};
pub use services::{CatalogService, DbConnection, QueryExecutor, TimescaleService};
