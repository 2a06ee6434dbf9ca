//! `tsq connections` - show active backends from pg_stat_activity.

use tsq_core::services::CatalogService;
use tsq_core::{Cell, ColumnMeta, Format, QueryOutput, TsqError};

use crate::helpers::{format_duration_human, format_relative_time};

use super::Context;

pub async fn run(ctx: &Context, all: bool) -> Result<(), TsqError> {
    let spec = ctx.resolve_spec(None)?;
    let request = ctx.render_request(spec.format);
    let table_mode = request.format == Format::Table;

    let (conn, handle) = super::connect(&spec).await?;
    let raw = CatalogService::connections(&conn, handle, spec.timeout, all).await?;
    let output = reshape(raw, table_mode);
    super::render_output(output, &request).await
}

/// The catalog query carries both text timestamps and elapsed-seconds columns
/// for each backend. Table output shows relative ages built from the seconds;
/// JSON and CSV keep the timestamps and drop the redundant seconds.
fn reshape(raw: QueryOutput, table_mode: bool) -> QueryOutput {
    let mut rows = Vec::with_capacity(raw.rows.len());
    for mut row in raw.rows {
        if table_mode {
            let conn_secs = super::cell_f64(&row[8]);
            let query_secs = super::cell_f64(&row[10]);
            let query = row.remove(11);
            row.truncate(7);
            row.push(Cell::Text(format_relative_time(conn_secs)));
            row.push(Cell::Text(format_relative_time(query_secs)));
            row.push(Cell::Text(format_duration_human(query_secs)));
            row.push(query);
        } else {
            let query = row.remove(11);
            let query_start = row.remove(9);
            row.truncate(8);
            row.push(query_start);
            row.push(query);
        }
        rows.push(row);
    }

    let columns = if table_mode {
        vec![
            ColumnMeta::int4("pid"),
            ColumnMeta::text("user"),
            ColumnMeta::text("database"),
            ColumnMeta::text("app"),
            ColumnMeta::text("client"),
            ColumnMeta::text("state"),
            ColumnMeta::text("wait_event"),
            ColumnMeta::text("connected"),
            ColumnMeta::text("query_start"),
            ColumnMeta::text("duration"),
            ColumnMeta::text("query"),
        ]
    } else {
        vec![
            ColumnMeta::int4("pid"),
            ColumnMeta::text("user"),
            ColumnMeta::text("database"),
            ColumnMeta::text("application_name"),
            ColumnMeta::text("client_address"),
            ColumnMeta::text("state"),
            ColumnMeta::text("wait_event"),
            ColumnMeta::text("connected_since"),
            ColumnMeta::text("query_start"),
            ColumnMeta::text("query"),
        ]
    };
    QueryOutput::new(columns, rows, raw.elapsed)
}
