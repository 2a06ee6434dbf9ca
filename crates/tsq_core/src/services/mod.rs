//! Database-facing services: connection establishment, query execution, and
//! the canned catalog and TimescaleDB inspection queries.

pub mod catalog;
pub mod connection;
pub mod query;
pub mod timescale;

pub use catalog::CatalogService;
pub use connection::{BackendCanceller, DbConnection};
pub use query::QueryExecutor;
pub use timescale::TimescaleService;
