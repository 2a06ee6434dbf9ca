//! `tsq databases` - list databases with sizes and a TOTAL row.

use tsq_core::services::CatalogService;
use tsq_core::{Cell, ColumnMeta, Format, QueryOutput, TsqError};

use crate::helpers::fmt_size;

use super::Context;

pub async fn run(ctx: &Context) -> Result<(), TsqError> {
    let spec = ctx.resolve_spec(None)?;
    let request = ctx.render_request(spec.format);
    let table_mode = request.format == Format::Table;

    let (conn, handle) = super::connect(&spec).await?;
    let raw = CatalogService::databases(&conn, handle, spec.timeout).await?;
    let output = summarize(raw, table_mode);
    super::render_output(output, &request).await
}

/// Replace the raw byte count with a display cell and append a TOTAL row.
/// Table output gets human sizes; JSON and CSV keep raw byte counts.
fn summarize(raw: QueryOutput, table_mode: bool) -> QueryOutput {
    let mut total: i64 = 0;
    let mut rows = Vec::with_capacity(raw.rows.len() + 1);
    for mut row in raw.rows {
        let size = super::cell_i64(&row[3]).unwrap_or(0);
        total += size;
        row[3] = size_cell(size, table_mode);
        rows.push(row);
    }
    rows.push(vec![
        Cell::Text("TOTAL".to_string()),
        Cell::Text(String::new()),
        Cell::Text(String::new()),
        size_cell(total, table_mode),
    ]);

    let columns = vec![
        ColumnMeta::text("name"),
        ColumnMeta::text("owner"),
        ColumnMeta::text("encoding"),
        if table_mode {
            ColumnMeta::text("size")
        } else {
            ColumnMeta::int8("size_bytes")
        },
    ];
    QueryOutput::new(columns, rows, raw.elapsed)
}

fn size_cell(bytes: i64, table_mode: bool) -> Cell {
    if table_mode {
        Cell::Text(fmt_size(Some(bytes)))
    } else {
        Cell::Int(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn raw_output() -> QueryOutput {
        QueryOutput::new(
            vec![
                ColumnMeta::text("name"),
                ColumnMeta::text("owner"),
                ColumnMeta::text("encoding"),
                ColumnMeta::int8("size_bytes"),
            ],
            vec![
                vec![
                    Cell::Text("metrics".to_string()),
                    Cell::Text("postgres".to_string()),
                    Cell::Text("UTF8".to_string()),
                    Cell::Int(1 << 30),
                ],
                vec![
                    Cell::Text("app".to_string()),
                    Cell::Text("postgres".to_string()),
                    Cell::Text("UTF8".to_string()),
                    Cell::Int(1 << 20),
                ],
            ],
            Duration::from_millis(5),
        )
    }

    #[test]
    fn table_mode_humanizes_sizes_and_totals() {
        let output = summarize(raw_output(), true);
        assert_eq!(output.rows.len(), 3);
        assert_eq!(output.rows[0][3], Cell::Text("1.0 GB".to_string()));
        assert_eq!(output.rows[2][0], Cell::Text("TOTAL".to_string()));
        assert_eq!(
            output.rows[2][3],
            Cell::Text(fmt_size(Some((1 << 30) + (1 << 20))))
        );
        assert_eq!(output.columns[3].name, "size");
    }

    #[test]
    fn machine_modes_keep_raw_byte_counts() {
        let output = summarize(raw_output(), false);
        assert_eq!(output.rows[0][3], Cell::Int(1 << 30));
        assert_eq!(output.rows[2][3], Cell::Int((1 << 30) + (1 << 20)));
        assert_eq!(output.columns[3].name, "size_bytes");
    }

    #[test]
    fn null_sizes_count_as_zero() {
        let raw = QueryOutput::new(
            vec![
                ColumnMeta::text("name"),
                ColumnMeta::text("owner"),
                ColumnMeta::text("encoding"),
                ColumnMeta::int8("size_bytes"),
            ],
            vec![vec![
                Cell::Text("locked".to_string()),
                Cell::Text("postgres".to_string()),
                Cell::Text("UTF8".to_string()),
                Cell::Null,
            ]],
            Duration::ZERO,
        );
        let output = summarize(raw, false);
        assert_eq!(output.rows[0][3], Cell::Int(0));
        assert_eq!(output.rows[1][3], Cell::Int(0));
    }
}
