//! Output rendering: table, JSON, and CSV encodings of a row stream.
//!
//! Format selection and the shared sink wrapper live here; each encoding has
//! its own module. All three modes coerce values through the same [`Cell`]
//! rules, so the same result carries identical content in every encoding.
//!
//! [`Cell`]: crate::models::Cell

pub mod csv;
pub mod json;
pub mod table;

use std::fmt;
use std::io;

use crate::error::TsqError;
use crate::models::RowStream;

/// Default per-column display width for the table format.
pub const DEFAULT_TABLE_WIDTH: usize = 40;

/// Output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Table,
    Json,
    Csv,
}

impl Format {
    pub fn parse(value: &str) -> Option<Format> {
        match value {
            "table" => Some(Format::Table),
            "json" => Some(Format::Json),
            "csv" => Some(Format::Csv),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Table => "table",
            Format::Json => "json",
            Format::Csv => "csv",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one result should be rendered.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub format: Format,
    /// JSON only: omit insignificant whitespace.
    pub compact: bool,
    /// CSV only: omit the header row.
    pub no_header: bool,
    /// Table only: per-column display width limit, in characters.
    pub width: usize,
}

impl RenderRequest {
    pub fn new(format: Format) -> Self {
        Self { format, compact: false, no_header: false, width: DEFAULT_TABLE_WIDTH }
    }
}

/// Pick the output format.
///
/// An explicit `--format` wins. Otherwise `--compact` implies JSON and
/// `--no-header` implies CSV, then a configured default format applies, and
/// finally a terminal gets a table while a pipe gets CSV.
pub fn resolve_format(
    explicit: Option<Format>,
    compact: bool,
    no_header: bool,
    configured: Option<Format>,
    is_tty: bool,
) -> Format {
    if let Some(format) = explicit {
        return format;
    }
    if compact {
        return Format::Json;
    }
    if no_header {
        return Format::Csv;
    }
    if let Some(format) = configured {
        return format;
    }
    if is_tty {
        Format::Table
    } else {
        Format::Csv
    }
}

/// Byte sink that remembers whether anything was written.
///
/// A sink failure before the first byte exits differently from one after
/// partial output, so every renderer write funnels through here.
pub struct CountingWriter<W> {
    inner: W,
    wrote: bool,
}

impl<W: io::Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, wrote: false }
    }

    pub fn write_str(&mut self, s: &str) -> Result<(), TsqError> {
        if s.is_empty() {
            return Ok(());
        }
        match self.inner.write_all(s.as_bytes()) {
            Ok(()) => {
                self.wrote = true;
                Ok(())
            }
            Err(e) => Err(self.sink_error(&e)),
        }
    }

    pub fn flush(&mut self) -> Result<(), TsqError> {
        match self.inner.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.sink_error(&e)),
        }
    }

    pub fn wrote_output(&self) -> bool {
        self.wrote
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn sink_error(&self, e: &io::Error) -> TsqError {
        TsqError::output(format!("Failed to write output: {e}"), self.wrote)
    }
}

/// Render a row stream to `writer` in the requested format.
///
/// A query failure arriving mid-stream propagates unchanged; a sink failure
/// maps to an output error that records whether any bytes made it out first.
pub async fn render<W: io::Write>(
    stream: RowStream,
    request: &RenderRequest,
    writer: W,
) -> Result<(), TsqError> {
    let mut out = CountingWriter::new(writer);
    match request.format {
        Format::Table => table::render(stream, request, &mut out).await?,
        Format::Json => json::render(stream, request, &mut out).await?,
        Format::Csv => csv::render(stream, request, &mut out).await?,
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingWriter;

    impl io::Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn format_parses_known_names_only() {
        assert_eq!(Format::parse("table"), Some(Format::Table));
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("csv"), Some(Format::Csv));
        assert_eq!(Format::parse("xml"), None);
        assert_eq!(Format::parse("Table"), None);
    }

    #[test]
    fn explicit_format_beats_everything() {
        let format = resolve_format(Some(Format::Json), false, true, Some(Format::Table), true);
        assert_eq!(format, Format::Json);
    }

    #[test]
    fn compact_implies_json_and_no_header_implies_csv() {
        assert_eq!(resolve_format(None, true, false, None, true), Format::Json);
        assert_eq!(resolve_format(None, false, true, None, true), Format::Csv);
        // Compact outranks no-header when both are given without a format.
        assert_eq!(resolve_format(None, true, true, None, true), Format::Json);
    }

    #[test]
    fn configured_default_beats_terminal_detection() {
        assert_eq!(resolve_format(None, false, false, Some(Format::Json), true), Format::Json);
    }

    #[test]
    fn terminal_gets_table_and_pipe_gets_csv() {
        assert_eq!(resolve_format(None, false, false, None, true), Format::Table);
        assert_eq!(resolve_format(None, false, false, None, false), Format::Csv);
    }

    #[test]
    fn counting_writer_tracks_written_bytes() {
        let mut out = CountingWriter::new(Vec::new());
        assert!(!out.wrote_output());
        out.write_str("").unwrap();
        assert!(!out.wrote_output());
        out.write_str("hello").unwrap();
        assert!(out.wrote_output());
        assert_eq!(out.into_inner(), b"hello");
    }

    #[test]
    fn sink_failure_before_output_exits_nonzero() {
        let mut out = CountingWriter::new(FailingWriter);
        let err = out.write_str("x").unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn sink_failure_after_output_preserves_success() {
        // Once bytes are out, a broken pipe must not turn success into failure.
        let err = TsqError::output("Failed to write output: broken pipe", true);
        assert_eq!(err.exit_code(), 0);
    }
}
