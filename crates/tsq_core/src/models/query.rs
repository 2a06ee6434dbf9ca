//! Query requests, decoded result values, and the row event stream.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_postgres::types::{FromSql, Type};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::error::TsqError;

/// A single statement to execute.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Statement text, passed to the server verbatim.
    pub sql: String,
    /// Text parameters for `$1`-style placeholders. Empty for ad-hoc queries;
    /// used by the administrative queries.
    pub params: Vec<String>,
    /// Client-side deadline. `None` means no deadline.
    pub timeout: Option<Duration>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new(), timeout: None }
    }

    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Metadata for a single result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_oid: u32,
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_oid: u32, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_oid, type_name: type_name.into() }
    }

    /// Text column, for results synthesized by the administrative commands.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, 25, "text")
    }

    pub fn int4(name: impl Into<String>) -> Self {
        Self::new(name, 23, "int4")
    }

    pub fn int8(name: impl Into<String>) -> Self {
        Self::new(name, 20, "int8")
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, 16, "bool")
    }
}

/// PostgreSQL `interval`, decoded from its binary wire form.
///
/// The three components are kept separate because PostgreSQL does not
/// normalize between them (a month is not a fixed number of days).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PgInterval {
    pub micros: i64,
    pub days: i32,
    pub months: i32,
}

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        if raw.len() != 16 {
            return Err(format!("invalid interval length: {}", raw.len()).into());
        }
        let micros = i64::from_be_bytes(raw[0..8].try_into()?);
        let days = i32::from_be_bytes(raw[8..12].try_into()?);
        let months = i32::from_be_bytes(raw[12..16].try_into()?);
        Ok(PgInterval { micros, days, months })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

// Renders in PostgreSQL's default output style: "1 year 2 mons 3 days
// 04:05:06.5". The time part is omitted when zero unless it is the only
// component.
impl fmt::Display for PgInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn plural(n: i64) -> &'static str {
            if n.abs() == 1 {
                ""
            } else {
                "s"
            }
        }

        let years = i64::from(self.months / 12);
        let months = i64::from(self.months % 12);
        let days = i64::from(self.days);

        let mut parts: Vec<String> = Vec::new();
        if years != 0 {
            parts.push(format!("{years} year{}", plural(years)));
        }
        if months != 0 {
            parts.push(format!("{months} mon{}", plural(months)));
        }
        if days != 0 {
            parts.push(format!("{days} day{}", plural(days)));
        }
        if self.micros != 0 || parts.is_empty() {
            let sign = if self.micros < 0 { "-" } else { "" };
            let abs = self.micros.unsigned_abs();
            let hours = abs / 3_600_000_000;
            let minutes = (abs / 60_000_000) % 60;
            let seconds = (abs / 1_000_000) % 60;
            let fraction = abs % 1_000_000;
            if fraction == 0 {
                parts.push(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"));
            } else {
                let padded = format!("{fraction:06}");
                let trimmed = padded.trim_end_matches('0');
                parts.push(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{trimmed}"));
            }
        }
        f.write_str(&parts.join(" "))
    }
}

/// A decoded result value.
///
/// This is a closed set: every renderer matches exhaustively, so adding a
/// variant forces every output mode to decide how to show it.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Interval(PgInterval),
    Bytes(Vec<u8>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Shared text coercion for the table and CSV modes.
    ///
    /// Returns `None` for SQL NULL so each mode picks its own null marker
    /// (`NULL` in tables, the empty field in CSV).
    pub fn render_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Bool(b) => Some(if *b { "t".to_string() } else { "f".to_string() }),
            Cell::Int(i) => Some(i.to_string()),
            Cell::Float(x) => Some(x.to_string()),
            Cell::Text(s) => Some(s.clone()),
            Cell::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Cell::Interval(iv) => Some(iv.to_string()),
            Cell::Bytes(bytes) => {
                let mut out = String::with_capacity(2 + bytes.len() * 2);
                out.push_str("\\x");
                for byte in bytes {
                    out.push_str(&format!("{byte:02x}"));
                }
                Some(out)
            }
        }
    }
}

/// One result row, cells in column order.
pub type Row = Vec<Cell>;

/// Events delivered over a [`RowStream`]: zero or more `Row` events followed
/// by exactly one terminal `Finished` or `Failed`.
#[derive(Debug)]
pub enum RowEvent {
    Row(Row),
    Finished { row_count: usize, elapsed: Duration },
    Failed(TsqError),
}

/// A fully materialized result.
#[derive(Debug)]
pub struct QueryOutput {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub elapsed: Duration,
}

impl QueryOutput {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>, elapsed: Duration) -> Self {
        let row_count = rows.len();
        Self { columns, rows, row_count, elapsed }
    }
}

/// Ordered, consume-once stream of result rows.
///
/// Column metadata is available before the first row because the executor
/// prepares the statement up front, so zero-row results still carry headers.
pub struct RowStream {
    columns: Vec<ColumnMeta>,
    rx: mpsc::Receiver<RowEvent>,
}

impl RowStream {
    pub fn new(columns: Vec<ColumnMeta>, rx: mpsc::Receiver<RowEvent>) -> Self {
        Self { columns, rx }
    }

    /// Replay a materialized result as a stream, for results that were
    /// post-processed before rendering.
    pub fn from_output(output: QueryOutput) -> Self {
        let (tx, rx) = mpsc::channel(output.rows.len() + 1);
        let columns = output.columns;
        for row in output.rows {
            let _ = tx.try_send(RowEvent::Row(row));
        }
        let _ = tx.try_send(RowEvent::Finished {
            row_count: output.row_count,
            elapsed: output.elapsed,
        });
        Self { columns, rx }
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Next event in order. A producer that goes away without sending a
    /// terminal event surfaces as an internal failure.
    pub async fn next_event(&mut self) -> RowEvent {
        match self.rx.recv().await {
            Some(event) => event,
            None => RowEvent::Failed(TsqError::internal("row stream ended unexpectedly")),
        }
    }
}

/// Handle for one query execution: identity for log correlation plus the
/// cancellation token that Ctrl-C trips.
#[derive(Clone)]
pub struct QueryHandle {
    id: Uuid,
    token: CancellationToken,
    started_at: Instant,
}

impl QueryHandle {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), token: CancellationToken::new(), started_at: Instant::now() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation. Idempotent; clones share the same token.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when `cancel` has been called on any clone.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for QueryHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandle")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .field("elapsed_ms", &self.started_at.elapsed().as_millis())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn interval_decodes_from_wire_bytes() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&4_500_000_i64.to_be_bytes());
        raw.extend_from_slice(&3_i32.to_be_bytes());
        raw.extend_from_slice(&14_i32.to_be_bytes());

        let interval = PgInterval::from_sql(&Type::INTERVAL, &raw).unwrap();
        assert_eq!(interval, PgInterval { micros: 4_500_000, days: 3, months: 14 });
    }

    #[test]
    fn interval_rejects_wrong_length() {
        assert!(PgInterval::from_sql(&Type::INTERVAL, &[0u8; 8]).is_err());
    }

    #[test]
    fn interval_accepts_only_interval_columns() {
        assert!(<PgInterval as FromSql>::accepts(&Type::INTERVAL));
        assert!(!<PgInterval as FromSql>::accepts(&Type::TEXT));
        assert!(!<PgInterval as FromSql>::accepts(&Type::TIMESTAMPTZ));
    }

    #[test]
    fn interval_display_matches_postgres_style() {
        let zero = PgInterval::default();
        assert_eq!(zero.to_string(), "00:00:00");

        let full = PgInterval { micros: 4 * 3_600_000_000 + 5 * 60_000_000, days: 3, months: 14 };
        assert_eq!(full.to_string(), "1 year 2 mons 3 days 04:05:00");

        let singular = PgInterval { micros: 0, days: 1, months: 1 };
        assert_eq!(singular.to_string(), "1 mon 1 day");

        let fractional = PgInterval { micros: 500_000, days: 0, months: 0 };
        assert_eq!(fractional.to_string(), "00:00:00.5");

        let negative_time = PgInterval { micros: -90_000_000, days: 0, months: 0 };
        assert_eq!(negative_time.to_string(), "-00:01:30");
    }

    #[test]
    fn render_text_covers_every_variant() {
        assert_eq!(Cell::Null.render_text(), None);
        assert_eq!(Cell::Bool(true).render_text().as_deref(), Some("t"));
        assert_eq!(Cell::Bool(false).render_text().as_deref(), Some("f"));
        assert_eq!(Cell::Int(-42).render_text().as_deref(), Some("-42"));
        assert_eq!(Cell::Float(1.5).render_text().as_deref(), Some("1.5"));
        assert_eq!(Cell::Text("a".to_string()).render_text().as_deref(), Some("a"));

        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(Cell::Timestamp(ts).render_text().as_deref(), Some("2024-01-15T10:30:00Z"));

        let iv = PgInterval { micros: 0, days: 7, months: 0 };
        assert_eq!(Cell::Interval(iv).render_text().as_deref(), Some("7 days"));

        assert_eq!(
            Cell::Bytes(vec![0xde, 0xad, 0xbe, 0xef]).render_text().as_deref(),
            Some("\\xdeadbeef")
        );
    }

    #[tokio::test]
    async fn from_output_replays_rows_then_finishes() {
        let output = QueryOutput::new(
            vec![ColumnMeta::text("name")],
            vec![vec![Cell::Text("a".to_string())], vec![Cell::Null]],
            Duration::from_millis(5),
        );
        let mut stream = RowStream::from_output(output);
        assert_eq!(stream.columns().len(), 1);

        match stream.next_event().await {
            RowEvent::Row(row) => assert_eq!(row, vec![Cell::Text("a".to_string())]),
            other => panic!("expected row, got {other:?}"),
        }
        match stream.next_event().await {
            RowEvent::Row(row) => assert_eq!(row, vec![Cell::Null]),
            other => panic!("expected row, got {other:?}"),
        }
        match stream.next_event().await {
            RowEvent::Finished { row_count, .. } => assert_eq!(row_count, 2),
            other => panic!("expected finished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_output_finishes_immediately() {
        let output = QueryOutput::new(vec![ColumnMeta::text("name")], vec![], Duration::ZERO);
        let mut stream = RowStream::from_output(output);
        match stream.next_event().await {
            RowEvent::Finished { row_count, .. } => assert_eq!(row_count, 0),
            other => panic!("expected finished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_producer_surfaces_as_failure() {
        let (tx, rx) = mpsc::channel(1);
        let mut stream = RowStream::new(vec![], rx);
        drop(tx);
        match stream.next_event().await {
            RowEvent::Failed(err) => assert_eq!(err.category(), "Internal"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn handle_clones_share_the_token() {
        let handle = QueryHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
        assert_eq!(handle.id(), clone.id());
    }
}
