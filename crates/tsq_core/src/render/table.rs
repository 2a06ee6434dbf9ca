//! Aligned text table output.
//!
//! Column widths come from the widest rendered value per column, so this
//! mode buffers the whole result before emitting anything. The other modes
//! stream; a table cannot, because alignment needs every row first.

use std::io;

use crate::error::TsqError;
use crate::models::{RowEvent, RowStream};
use crate::render::{CountingWriter, RenderRequest};

/// Fixed marker for SQL NULL, distinguishable from an empty string.
const NULL_TEXT: &str = "NULL";

const NO_RESULTS: &str = "No results";

pub(crate) async fn render<W: io::Write>(
    mut stream: RowStream,
    request: &RenderRequest,
    out: &mut CountingWriter<W>,
) -> Result<(), TsqError> {
    let width_limit = request.width.max(1);
    let headers: Vec<String> = stream.columns().iter().map(|c| c.name.clone()).collect();

    let mut rows: Vec<Vec<String>> = Vec::new();
    loop {
        match stream.next_event().await {
            RowEvent::Row(row) => {
                let rendered = row
                    .iter()
                    .map(|cell| {
                        let text = cell.render_text().unwrap_or_else(|| NULL_TEXT.to_string());
                        truncate(&text, width_limit)
                    })
                    .collect();
                rows.push(rendered);
            }
            RowEvent::Finished { .. } => break,
            RowEvent::Failed(err) => return Err(err),
        }
    }

    if rows.is_empty() {
        out.write_str(NO_RESULTS)?;
        return out.write_str("\n");
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, value) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(value.chars().count());
            }
        }
    }

    write_line(out, &headers, &widths)?;
    write_separator(out, &widths)?;
    for row in &rows {
        write_line(out, row, &widths)?;
    }
    Ok(())
}

/// Headers pass through untruncated; only cell values are clipped.
fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut out: String = value.chars().take(width - 1).collect();
    out.push('…');
    out
}

fn write_line<W: io::Write>(
    out: &mut CountingWriter<W>,
    values: &[String],
    widths: &[usize],
) -> Result<(), TsqError> {
    let mut line = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            line.push_str(" | ");
        }
        line.push_str(value);
        // The last column stays unpadded so lines carry no trailing spaces.
        if i + 1 < values.len() {
            let width = widths.get(i).copied().unwrap_or(0);
            for _ in 0..width.saturating_sub(value.chars().count()) {
                line.push(' ');
            }
        }
    }
    line.push('\n');
    out.write_str(&line)
}

fn write_separator<W: io::Write>(
    out: &mut CountingWriter<W>,
    widths: &[usize],
) -> Result<(), TsqError> {
    let line = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-");
    out.write_str(&line)?;
    out.write_str("\n")
}
