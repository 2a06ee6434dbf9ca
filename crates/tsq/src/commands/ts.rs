//! `tsq ts` - TimescaleDB administration: hypertables, chunks, jobs, caggs.

use tsq_core::services::TimescaleService;
use tsq_core::{Cell, ColumnMeta, Format, QueryOutput, TsqError};

use crate::cli::TsAction;
use crate::helpers::{
    format_duration_human, format_relative_time, format_size_compact, format_timestamp,
    normalize_pg_interval, parse_table_arg,
};

use super::Context;

pub async fn run(ctx: &Context, action: TsAction) -> Result<(), TsqError> {
    match action {
        TsAction::Hypertables { schema } => hypertables(ctx, schema).await,
        TsAction::Chunks { hypertable } => chunks(ctx, hypertable).await,
        TsAction::Jobs => jobs(ctx).await,
        TsAction::Caggs => caggs(ctx).await,
    }
}

async fn hypertables(ctx: &Context, schema: Option<String>) -> Result<(), TsqError> {
    let spec = ctx.resolve_spec(None)?;
    let request = ctx.render_request(spec.format);
    let table_mode = request.format == Format::Table;

    let (conn, handle) = super::connect(&spec).await?;
    TimescaleService::ensure_available(&conn, handle.clone(), spec.timeout).await?;
    let raw =
        TimescaleService::hypertables(&conn, handle, spec.timeout, schema.as_deref()).await?;
    let output = summarize_hypertables(raw, table_mode);
    super::render_output(output, &request).await
}

async fn chunks(ctx: &Context, hypertable: String) -> Result<(), TsqError> {
    let (schema, table) = parse_table_arg(&hypertable);

    let spec = ctx.resolve_spec(None)?;
    let request = ctx.render_request(spec.format);
    let table_mode = request.format == Format::Table;

    let (conn, handle) = super::connect(&spec).await?;
    TimescaleService::ensure_available(&conn, handle.clone(), spec.timeout).await?;
    let raw = TimescaleService::chunks(&conn, handle, spec.timeout, &schema, &table).await?;

    let (output, tally) = summarize_chunks(raw, table_mode);
    super::render_output(output, &request).await?;

    if table_mode {
        eprintln!(
            "\nUncompressed: {} chunks, {}\nCompressed: {} chunks, {}\nTotal: {} chunks, {}",
            tally.uncompressed_count,
            format_size_compact(Some(tally.uncompressed_bytes)),
            tally.compressed_count,
            format_size_compact(Some(tally.compressed_bytes)),
            tally.uncompressed_count + tally.compressed_count,
            format_size_compact(Some(tally.uncompressed_bytes + tally.compressed_bytes)),
        );
    }
    Ok(())
}

async fn jobs(ctx: &Context) -> Result<(), TsqError> {
    let spec = ctx.resolve_spec(None)?;
    let request = ctx.render_request(spec.format);
    let table_mode = request.format == Format::Table;

    let (conn, handle) = super::connect(&spec).await?;
    TimescaleService::ensure_available(&conn, handle.clone(), spec.timeout).await?;
    let raw = TimescaleService::jobs(&conn, handle, spec.timeout).await?;
    let output = reshape_jobs(raw, table_mode);
    super::render_output(output, &request).await
}

async fn caggs(ctx: &Context) -> Result<(), TsqError> {
    let spec = ctx.resolve_spec(None)?;
    let request = ctx.render_request(spec.format);

    let (conn, handle) = super::connect(&spec).await?;
    TimescaleService::ensure_available(&conn, handle.clone(), spec.timeout).await?;
    let output = TimescaleService::continuous_aggregates(&conn, handle, spec.timeout).await?;
    super::render_output(output, &request).await
}

/// Humanize the dimension interval and sizes, derive the uncompressed share,
/// and append a TOTAL row. Machine formats keep raw byte counts.
fn summarize_hypertables(raw: QueryOutput, table_mode: bool) -> QueryOutput {
    let mut total_size: i64 = 0;
    let mut total_uncompr: i64 = 0;
    let mut total_compr: i64 = 0;
    let mut total_before: i64 = 0;
    let mut total_after: i64 = 0;

    let mut rows = Vec::with_capacity(raw.rows.len() + 1);
    for mut row in raw.rows {
        let size = super::cell_i64(&row[4]).unwrap_or(0);
        let before = super::cell_i64(&row[7]).unwrap_or(0);
        let after = super::cell_i64(&row[8]).unwrap_or(0);
        total_size += size;
        total_uncompr += super::cell_i64(&row[5]).unwrap_or(0);
        total_compr += super::cell_i64(&row[6]).unwrap_or(0);
        total_before += before;
        total_after += after;
        // Compressed chunks already shrank the table size, so the uncompressed
        // share is what remains after subtracting the compressed bytes.
        let uncompressed = if after != 0 { size - after } else { size };

        let interval = normalize_pg_interval(super::cell_str(&row[3]));
        row[3] = Cell::Text(interval);
        row[4] = compact_size_cell(size, table_mode);
        row[7] = compact_size_or_dash(before, table_mode);
        row[8] = compact_size_or_dash(after, table_mode);
        row.insert(7, compact_size_or_dash(uncompressed, table_mode));
        rows.push(row);
    }

    let total_uncompressed = total_size - total_after;
    rows.push(vec![
        Cell::Text("TOTAL".to_string()),
        Cell::Text(String::new()),
        Cell::Text(String::new()),
        Cell::Text(String::new()),
        compact_size_cell(total_size, table_mode),
        Cell::Int(total_uncompr),
        Cell::Int(total_compr),
        compact_size_or_dash(total_uncompressed, table_mode),
        compact_size_or_dash(total_before, table_mode),
        compact_size_or_dash(total_after, table_mode),
        Cell::Text(String::new()),
    ]);

    let columns = vec![
        ColumnMeta::text("schema"),
        ColumnMeta::text("table"),
        ColumnMeta::text("time_col"),
        ColumnMeta::text("chunk_iv"),
        size_column("size", table_mode),
        ColumnMeta::int8("uncompr"),
        ColumnMeta::int8("compr"),
        size_column("uncompr_size", table_mode),
        size_column("before_size", table_mode),
        size_column("after_size", table_mode),
        ColumnMeta::boolean("compr_on"),
    ];
    QueryOutput::new(columns, rows, raw.elapsed)
}

#[derive(Default)]
struct ChunkTally {
    uncompressed_count: i64,
    uncompressed_bytes: i64,
    compressed_count: i64,
    compressed_bytes: i64,
}

fn summarize_chunks(raw: QueryOutput, table_mode: bool) -> (QueryOutput, ChunkTally) {
    let mut tally = ChunkTally::default();
    let mut total: i64 = 0;

    let mut rows = Vec::with_capacity(raw.rows.len() + 1);
    for mut row in raw.rows {
        let size = super::cell_i64(&row[4]).unwrap_or(0);
        total += size;
        if matches!(row[3], Cell::Bool(true)) {
            tally.compressed_count += 1;
            tally.compressed_bytes += size;
        } else {
            tally.uncompressed_count += 1;
            tally.uncompressed_bytes += size;
        }
        row[4] = compact_size_cell(size, table_mode);
        rows.push(row);
    }
    rows.push(vec![
        Cell::Text("TOTAL".to_string()),
        Cell::Text(String::new()),
        Cell::Text(String::new()),
        Cell::Text(String::new()),
        compact_size_cell(total, table_mode),
    ]);

    let columns = vec![
        ColumnMeta::text("chunk_name"),
        ColumnMeta::text("range_start"),
        ColumnMeta::text("range_end"),
        ColumnMeta::boolean("is_compressed"),
        size_column("size", table_mode),
    ];
    (QueryOutput::new(columns, rows, raw.elapsed), tally)
}

/// Both modes humanize the schedule interval; the table shows relative run
/// ages while machine formats keep cleaned-up timestamps. The raw
/// elapsed-seconds columns are dropped either way.
fn reshape_jobs(raw: QueryOutput, table_mode: bool) -> QueryOutput {
    let mut rows = Vec::with_capacity(raw.rows.len());
    for mut row in raw.rows {
        let schedule = normalize_pg_interval(super::cell_str(&row[3]));
        row[3] = Cell::Text(schedule);
        if table_mode {
            row[4] = Cell::Text(format_relative_time(super::cell_f64(&row[5])));
            row[7] = Cell::Text(next_start_text(super::cell_f64(&row[8])));
        } else {
            let last_run = format_timestamp(super::cell_str(&row[4]));
            row[4] = Cell::Text(last_run);
            let next_start = format_timestamp(super::cell_str(&row[7]));
            row[7] = Cell::Text(next_start);
        }
        row.remove(8);
        row.remove(5);
        rows.push(row);
    }

    let columns = vec![
        ColumnMeta::int4("job_id"),
        ColumnMeta::text("application_name"),
        ColumnMeta::text("hypertable"),
        ColumnMeta::text("schedule"),
        ColumnMeta::text("last_run"),
        ColumnMeta::text("last_run_status"),
        ColumnMeta::text("next_start"),
        ColumnMeta::int8("total_runs"),
        ColumnMeta::int8("total_successes"),
        ColumnMeta::int8("total_failures"),
    ];
    QueryOutput::new(columns, rows, raw.elapsed)
}

/// Overdue jobs show their age, scheduled ones a countdown. A paused or
/// never-scheduled job shows a dash.
fn next_start_text(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s < 0.0 => format_relative_time(Some(-s)),
        Some(s) if s != 0.0 => format!("in {}", format_duration_human(Some(s))),
        _ => "-".to_string(),
    }
}

fn compact_size_cell(bytes: i64, table_mode: bool) -> Cell {
    if table_mode {
        Cell::Text(format_size_compact(Some(bytes)))
    } else {
        Cell::Int(bytes)
    }
}

fn compact_size_or_dash(bytes: i64, table_mode: bool) -> Cell {
    if table_mode && bytes == 0 {
        Cell::Text("-".to_string())
    } else {
        compact_size_cell(bytes, table_mode)
    }
}

fn size_column(name: &str, table_mode: bool) -> ColumnMeta {
    if table_mode {
        ColumnMeta::text(name)
    } else {
        ColumnMeta::int8(name)
    }
}
