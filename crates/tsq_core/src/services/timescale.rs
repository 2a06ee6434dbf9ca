//! TimescaleDB inspection queries behind the `ts` subcommands.
//!
//! Everything here reads `timescaledb_information` views, so each command
//! first verifies the extension exists and fails with guidance instead of a
//! raw "relation does not exist" error.

use std::time::Duration;

use crate::error::TsqError;
use crate::models::{Cell, QueryHandle, QueryOutput, QueryRequest};
use crate::services::connection::DbConnection;
use crate::services::query::QueryExecutor;

const EXTENSION_SQL: &str = "
SELECT EXISTS(
    SELECT 1 FROM pg_extension WHERE extname = 'timescaledb'
) AS timescaledb_installed";

const CHUNKS_SQL: &str = "
SELECT
    c.chunk_name,
    c.range_start::text AS range_start,
    c.range_end::text AS range_end,
    c.is_compressed,
    pg_total_relation_size(('_timescaledb_internal.' || quote_ident(c.chunk_name))::regclass) AS chunk_size_bytes
FROM timescaledb_information.chunks c
WHERE c.hypertable_schema = $1
  AND c.hypertable_name = $2
ORDER BY c.range_start";

const JOBS_SQL: &str = "
SELECT
    j.job_id,
    j.application_name,
    CASE WHEN j.hypertable_schema IS NOT NULL
         THEN format('%I.%I', j.hypertable_schema, j.hypertable_name)
         ELSE NULL END AS hypertable,
    j.schedule_interval::text AS schedule,
    js.last_run_started_at::text AS last_run,
    CASE WHEN js.last_run_started_at IS NOT NULL
         AND js.last_run_started_at > '-infinity'::timestamptz
         AND js.last_run_started_at < 'infinity'::timestamptz
         THEN EXTRACT(EPOCH FROM (now() - js.last_run_started_at))::float8
         ELSE NULL END AS last_run_seconds,
    js.last_run_status,
    js.next_start::text AS next_start,
    CASE WHEN js.next_start IS NOT NULL
         AND js.next_start > '-infinity'::timestamptz
         AND js.next_start < 'infinity'::timestamptz
         THEN EXTRACT(EPOCH FROM (js.next_start - now()))::float8
         ELSE NULL END AS next_start_seconds,
    js.total_runs,
    js.total_successes,
    js.total_failures
FROM timescaledb_information.jobs j
LEFT JOIN timescaledb_information.job_stats js
  ON j.job_id = js.job_id
ORDER BY j.job_id";

const CAGGS_SQL: &str = "
SELECT
    ca.view_schema,
    ca.view_name,
    format('%I.%I', ca.hypertable_schema, ca.hypertable_name) AS source_hypertable,
    ca.materialized_only,
    ca.compression_enabled,
    format('%I.%I', ca.materialization_hypertable_schema, ca.materialization_hypertable_name) AS materialization_hypertable,
    ca.finalized
FROM timescaledb_information.continuous_aggregates ca
ORDER BY ca.view_schema, ca.view_name";

/// TimescaleDB catalog lookups, all running through the normal executor.
pub struct TimescaleService;

impl TimescaleService {
    /// Error if the TimescaleDB extension is not installed.
    pub async fn ensure_available(
        conn: &DbConnection,
        handle: QueryHandle,
        timeout: Option<Duration>,
    ) -> Result<(), TsqError> {
        let request = QueryRequest::new(EXTENSION_SQL).with_timeout(timeout);
        let output = QueryExecutor::execute(conn, request, handle).await?;
        if extension_installed(&output) {
            Ok(())
        } else {
            Err(TsqError::query(
                "TimescaleDB extension is not installed in this database. \
                 Install it with: CREATE EXTENSION IF NOT EXISTS timescaledb;",
                None,
                None,
                None,
                None,
            ))
        }
    }

    /// Hypertables with dimension, size, and compression figures, optionally
    /// restricted to one schema.
    pub async fn hypertables(
        conn: &DbConnection,
        handle: QueryHandle,
        timeout: Option<Duration>,
        schema: Option<&str>,
    ) -> Result<QueryOutput, TsqError> {
        let request = QueryRequest::new(hypertables_sql(schema.is_some()))
            .with_params(schema.map(str::to_string).into_iter().collect())
            .with_timeout(timeout);
        QueryExecutor::execute(conn, request, handle).await
    }

    /// Chunks of one hypertable, oldest range first.
    pub async fn chunks(
        conn: &DbConnection,
        handle: QueryHandle,
        timeout: Option<Duration>,
        schema: &str,
        table: &str,
    ) -> Result<QueryOutput, TsqError> {
        let request = QueryRequest::new(CHUNKS_SQL)
            .with_params(vec![schema.to_string(), table.to_string()])
            .with_timeout(timeout);
        QueryExecutor::execute(conn, request, handle).await
    }

    /// Background jobs with their run statistics.
    pub async fn jobs(
        conn: &DbConnection,
        handle: QueryHandle,
        timeout: Option<Duration>,
    ) -> Result<QueryOutput, TsqError> {
        let request = QueryRequest::new(JOBS_SQL).with_timeout(timeout);
        QueryExecutor::execute(conn, request, handle).await
    }

    /// Continuous aggregates and their materialization state.
    pub async fn continuous_aggregates(
        conn: &DbConnection,
        handle: QueryHandle,
        timeout: Option<Duration>,
    ) -> Result<QueryOutput, TsqError> {
        let request = QueryRequest::new(CAGGS_SQL).with_timeout(timeout);
        QueryExecutor::execute(conn, request, handle).await
    }
}

fn extension_installed(output: &QueryOutput) -> bool {
    matches!(output.rows.first().and_then(|row| row.first()), Some(Cell::Bool(true)))
}

fn hypertables_sql(filter_schema: bool) -> String {
    let where_clause = if filter_schema { "WHERE h.hypertable_schema = $1" } else { "" };
    format!(
        "
SELECT
    h.hypertable_schema,
    h.hypertable_name,
    d.column_name,
    d.time_interval::text,
    hypertable_size((quote_ident(h.hypertable_schema) || '.' || quote_ident(h.hypertable_name))::regclass) AS size_bytes,
    (SELECT COUNT(*) FILTER (WHERE NOT c.is_compressed) FROM timescaledb_information.chunks c
     WHERE c.hypertable_schema = h.hypertable_schema AND c.hypertable_name = h.hypertable_name) AS uncompr_chunks,
    (SELECT COUNT(*) FILTER (WHERE c.is_compressed) FROM timescaledb_information.chunks c
     WHERE c.hypertable_schema = h.hypertable_schema AND c.hypertable_name = h.hypertable_name) AS compr_chunks,
    cs.before_compression_total_bytes,
    cs.after_compression_total_bytes,
    h.compression_enabled
FROM timescaledb_information.hypertables h
LEFT JOIN timescaledb_information.dimensions d
  ON h.hypertable_schema = d.hypertable_schema
  AND h.hypertable_name = d.hypertable_name
  AND d.dimension_number = 1
LEFT JOIN LATERAL (
    SELECT
        SUM(before_compression_total_bytes)::bigint AS before_compression_total_bytes,
        SUM(after_compression_total_bytes)::bigint AS after_compression_total_bytes
    FROM hypertable_compression_stats(
        (quote_ident(h.hypertable_schema) || '.' || quote_ident(h.hypertable_name))::regclass
    )
) cs ON true
{where_clause}
ORDER BY h.hypertable_schema, h.hypertable_name"
    )
}
