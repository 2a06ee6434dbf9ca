//! Canned pg_catalog queries behind the `databases` and `connections`
//! commands.

use std::time::Duration;

use crate::error::TsqError;
use crate::models::{QueryHandle, QueryOutput, QueryRequest};
use crate::services::connection::DbConnection;
use crate::services::query::QueryExecutor;

const DATABASES_SQL: &str = "
SELECT
    d.datname AS name,
    pg_catalog.pg_get_userbyid(d.datdba) AS owner,
    pg_catalog.pg_encoding_to_char(d.encoding) AS encoding,
    pg_catalog.pg_database_size(d.datname) AS size_bytes
FROM pg_catalog.pg_database d
ORDER BY pg_catalog.pg_database_size(d.datname) DESC";

/// Server-side catalog lookups. These run through the normal executor, so
/// the time budget and Ctrl-C behave exactly as they do for ad-hoc queries.
pub struct CatalogService;

impl CatalogService {
    /// All databases with owner, encoding, and size, largest first.
    pub async fn databases(
        conn: &DbConnection,
        handle: QueryHandle,
        timeout: Option<Duration>,
    ) -> Result<QueryOutput, TsqError> {
        let request = QueryRequest::new(DATABASES_SQL).with_timeout(timeout);
        QueryExecutor::execute(conn, request, handle).await
    }

    /// Sessions from pg_stat_activity, excluding this client's own backend.
    /// Idle sessions are filtered out unless `include_all` is set.
    pub async fn connections(
        conn: &DbConnection,
        handle: QueryHandle,
        timeout: Option<Duration>,
        include_all: bool,
    ) -> Result<QueryOutput, TsqError> {
        let request = QueryRequest::new(connections_sql(include_all)).with_timeout(timeout);
        QueryExecutor::execute(conn, request, handle).await
    }
}

fn connections_sql(include_all: bool) -> String {
    let mut filters = vec!["pid != pg_backend_pid()"];
    if !include_all {
        filters.push("state IS NOT NULL AND state != 'idle'");
    }
    let where_clause =
        filters.iter().map(|f| format!("({f})")).collect::<Vec<_>>().join(" AND ");

    format!(
        "
SELECT
    pid,
    usename AS user,
    datname AS database,
    application_name,
    client_addr::text AS client_address,
    state,
    wait_event,
    backend_start::text AS connected_since,
    EXTRACT(EPOCH FROM (now() - backend_start))::float8 AS connected_seconds,
    query_start::text AS query_start,
    EXTRACT(EPOCH FROM (now() - query_start))::float8 AS query_seconds,
    query
FROM pg_stat_activity
WHERE {where_clause}
ORDER BY query_start"
    )
}
