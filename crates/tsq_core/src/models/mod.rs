//! Domain models shared across the engine.

pub mod connection;
pub mod query;

pub use connection::{ConnectionSpec, SpecSources, SslMode};
pub use query::{
    Cell, ColumnMeta, PgInterval, QueryHandle, QueryOutput, QueryRequest, Row, RowEvent, RowStream,
};
