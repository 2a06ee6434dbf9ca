//! JSON array output.
//!
//! Rows are serialized as an array of objects keyed by column name. Array
//! delimiters are emitted incrementally, so large results stream instead of
//! buffering. Pretty output uses two-space indentation; compact output has
//! no insignificant whitespace.

use std::io;

use serde_json::{Map, Number, Value};

use crate::error::TsqError;
use crate::models::{Cell, ColumnMeta, Row, RowEvent, RowStream};
use crate::render::{CountingWriter, RenderRequest};

pub(crate) async fn render<W: io::Write>(
    mut stream: RowStream,
    request: &RenderRequest,
    out: &mut CountingWriter<W>,
) -> Result<(), TsqError> {
    let columns = stream.columns().to_vec();
    let mut first = true;
    loop {
        match stream.next_event().await {
            RowEvent::Row(row) => {
                let object = row_object(&columns, &row);
                let encoded = if request.compact {
                    serde_json::to_string(&object)
                } else {
                    serde_json::to_string_pretty(&object)
                }
                .map_err(|e| TsqError::internal(format!("failed to encode row as JSON: {e}")))?;

                if request.compact {
                    out.write_str(if first { "[" } else { "," })?;
                    out.write_str(&encoded)?;
                } else {
                    out.write_str(if first { "[\n" } else { ",\n" })?;
                    out.write_str(&indent(&encoded))?;
                }
                first = false;
            }
            RowEvent::Finished { .. } => break,
            RowEvent::Failed(err) => return Err(err),
        }
    }

    if first {
        out.write_str("[]\n")
    } else if request.compact {
        out.write_str("]\n")
    } else {
        out.write_str("\n]\n")
    }
}

fn row_object(columns: &[ColumnMeta], row: &Row) -> Value {
    let mut object = Map::with_capacity(columns.len());
    for (column, cell) in columns.iter().zip(row) {
        object.insert(column.name.clone(), cell_value(cell));
    }
    Value::Object(object)
}

/// JSON mapping for each cell variant.
///
/// Non-finite floats have no JSON number form and become null. Timestamps,
/// intervals, and binary values take their shared text coercion, which is
/// total for non-null cells.
fn cell_value(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Bool(b) => Value::Bool(*b),
        Cell::Int(i) => Value::Number(Number::from(*i)),
        Cell::Float(x) => Number::from_f64(*x).map_or(Value::Null, Value::Number),
        Cell::Text(s) => Value::String(s.clone()),
        Cell::Timestamp(_) | Cell::Interval(_) | Cell::Bytes(_) => {
            Value::String(cell.render_text().unwrap_or_default())
        }
    }
}

/// Shift a pretty-printed object two spaces right so it nests inside the
/// surrounding array at the conventional indentation.
fn indent(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len() + 16);
    for (i, line) in encoded.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str("  ");
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use chrono::Utc;

    use super::*;
    use crate::models::{PgInterval, QueryOutput};
    use crate::render::Format;

    async fn render_to_string(output: QueryOutput, compact: bool) -> String {
        let request = RenderRequest { compact, ..RenderRequest::new(Format::Json) };
        let mut out = CountingWriter::new(Vec::new());
        render(RowStream::from_output(output), &request, &mut out).await.unwrap();
        String::from_utf8(out.into_inner()).unwrap()
    }

    fn id_name_output(rows: Vec<Vec<Cell>>) -> QueryOutput {
        let columns = vec![ColumnMeta::int4("id"), ColumnMeta::text("name")];
        QueryOutput::new(columns, rows, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn pretty_output_uses_two_space_indentation() {
        let output = id_name_output(vec![
            vec![Cell::Int(1), Cell::Text("a".to_string())],
            vec![Cell::Int(2), Cell::Null],
        ]);
        let text = render_to_string(output, false).await;
        assert_eq!(
            text,
            concat!(
                "[\n",
                "  {\n",
                "    \"id\": 1,\n",
                "    \"name\": \"a\"\n",
                "  },\n",
                "  {\n",
                "    \"id\": 2,\n",
                "    \"name\": null\n",
                "  }\n",
                "]\n",
            )
        );
    }

    #[tokio::test]
    async fn compact_output_has_no_insignificant_whitespace() {
        let output = id_name_output(vec![
            vec![Cell::Int(1), Cell::Text("a".to_string())],
            vec![Cell::Int(2), Cell::Null],
        ]);
        let text = render_to_string(output, true).await;
        assert_eq!(text, "[{\"id\":1,\"name\":\"a\"},{\"id\":2,\"name\":null}]\n");
    }

    #[tokio::test]
    async fn empty_result_is_an_empty_array() {
        assert_eq!(render_to_string(id_name_output(vec![]), false).await, "[]\n");
        assert_eq!(render_to_string(id_name_output(vec![]), true).await, "[]\n");
    }

    #[tokio::test]
    async fn keys_follow_column_order() {
        let columns = vec![ColumnMeta::text("zulu"), ColumnMeta::text("alpha")];
        let output = QueryOutput::new(
            columns,
            vec![vec![Cell::Text("1".to_string()), Cell::Text("2".to_string())]],
            Duration::ZERO,
        );
        let request = RenderRequest { compact: true, ..RenderRequest::new(Format::Json) };
        let mut out = CountingWriter::new(Vec::new());
        render(RowStream::from_output(output), &request, &mut out).await.unwrap();
        let text = String::from_utf8(out.into_inner()).unwrap();
        assert_eq!(text, "[{\"zulu\":\"1\",\"alpha\":\"2\"}]\n");
    }

    #[test]
    fn cell_values_map_to_natural_json_types() {
        assert_eq!(cell_value(&Cell::Null), Value::Null);
        assert_eq!(cell_value(&Cell::Bool(true)), Value::Bool(true));
        assert_eq!(cell_value(&Cell::Int(-7)), Value::Number(Number::from(-7)));
        assert_eq!(cell_value(&Cell::Float(1.5)), Value::Number(Number::from_f64(1.5).unwrap()));
        assert_eq!(
            cell_value(&Cell::Text("x".to_string())),
            Value::String("x".to_string())
        );

        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(
            cell_value(&Cell::Timestamp(ts)),
            Value::String("2024-01-15T10:30:00Z".to_string())
        );
        assert_eq!(
            cell_value(&Cell::Interval(PgInterval { micros: 0, days: 2, months: 0 })),
            Value::String("2 days".to_string())
        );
        assert_eq!(
            cell_value(&Cell::Bytes(vec![0xde, 0xad])),
            Value::String("\\xdead".to_string())
        );
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(cell_value(&Cell::Float(f64::NAN)), Value::Null);
        assert_eq!(cell_value(&Cell::Float(f64::INFINITY)), Value::Null);
        assert_eq!(cell_value(&Cell::Float(f64::NEG_INFINITY)), Value::Null);
    }
}
