//! RFC 4180 CSV output.
//!
//! Streams row-by-row with no buffering. Fields containing the delimiter, a
//! quote, or a line break are quoted; embedded quotes double. SQL NULL is an
//! empty field. Lines end with a bare newline.

use std::io;

use crate::error::TsqError;
use crate::models::{RowEvent, RowStream};
use crate::render::{CountingWriter, RenderRequest};

pub(crate) async fn render<W: io::Write>(
    mut stream: RowStream,
    request: &RenderRequest,
    out: &mut CountingWriter<W>,
) -> Result<(), TsqError> {
    if !request.no_header {
        let names: Vec<&str> = stream.columns().iter().map(|c| c.name.as_str()).collect();
        out.write_str(&encode_line(&names))?;
    }

    loop {
        match stream.next_event().await {
            RowEvent::Row(row) => {
                let fields: Vec<String> =
                    row.iter().map(|cell| cell.render_text().unwrap_or_default()).collect();
                out.write_str(&encode_line(&fields))?;
            }
            RowEvent::Finished { .. } => return Ok(()),
            RowEvent::Failed(err) => return Err(err),
        }
    }
}

fn encode_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        push_field(&mut line, field.as_ref());
    }
    line.push('\n');
    line
}

fn push_field(line: &mut String, field: &str) {
    if field.contains(['"', ',', '\n', '\r']) {
        line.push('"');
        for ch in field.chars() {
            if ch == '"' {
                line.push('"');
            }
            line.push(ch);
        }
        line.push('"');
    } else {
        line.push_str(field);
    }
}
