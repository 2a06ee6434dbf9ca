//! Query execution under a time budget with server-side cancellation.
//!
//! Both the deadline and Ctrl-C race the query itself. Whichever loses the
//! race sends a cancel request over a second connection and then waits a
//! bounded grace period for the backend to acknowledge, so the executor
//! never resolves while the server may still be running the statement.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant as TokioInstant};
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::Statement;

use crate::error::TsqError;
use crate::models::{
    Cell, ColumnMeta, PgInterval, QueryHandle, QueryOutput, QueryRequest, Row, RowEvent, RowStream,
};
use crate::services::connection::{BackendCanceller, DbConnection};

/// How long to wait for the server to acknowledge a cancel request before
/// abandoning the connection outright.
pub const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Channel depth between the row pump and the renderer.
const ROW_BUFFER: usize = 64;

/// Max characters of statement text echoed into debug logs.
const LOG_SQL_HEAD: usize = 100;

/// Time budget for one execution: the absolute deadline plus the original
/// limit, kept for the timeout message.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: TokioInstant,
    limit: Duration,
}

impl Deadline {
    fn starting_now(limit: Duration) -> Self {
        Self { at: TokioInstant::now() + limit, limit }
    }
}

/// Executes statements against an open [`DbConnection`].
pub struct QueryExecutor;

impl QueryExecutor {
    /// Prepare and run `request`, returning a stream that yields rows as the
    /// server sends them.
    ///
    /// Column metadata comes from the prepared statement, so it is available
    /// before the first row and for zero-row results. The budget covers
    /// prepare and execution together.
    pub async fn execute_streaming(
        conn: &DbConnection,
        request: QueryRequest,
        handle: QueryHandle,
    ) -> Result<RowStream, TsqError> {
        let deadline = request.timeout.map(Deadline::starting_now);

        tracing::debug!(
            query_id = %handle.id(),
            sql = %normalize_sql(&request.sql, LOG_SQL_HEAD),
            timeout = ?request.timeout,
            "executing query"
        );

        let statement =
            Self::bounded(conn, &handle, deadline, conn.client().prepare(&request.sql)).await??;

        let columns = column_meta(&statement)?;

        let row_stream = Self::bounded(
            conn,
            &handle,
            deadline,
            conn.client().query_raw(&statement, slice_iter(&request.params)),
        )
        .await??;

        let (tx, rx) = mpsc::channel(ROW_BUFFER);
        tokio::spawn(Self::pump_rows(row_stream, handle, deadline, conn.canceller(), tx));
        Ok(RowStream::new(columns, rx))
    }

    /// Run `request` to completion and collect every row.
    pub async fn execute(
        conn: &DbConnection,
        request: QueryRequest,
        handle: QueryHandle,
    ) -> Result<QueryOutput, TsqError> {
        let mut stream = Self::execute_streaming(conn, request, handle).await?;
        let columns = stream.columns().to_vec();
        let mut rows = Vec::new();
        loop {
            match stream.next_event().await {
                RowEvent::Row(row) => rows.push(row),
                RowEvent::Finished { elapsed, .. } => {
                    return Ok(QueryOutput::new(columns, rows, elapsed))
                }
                RowEvent::Failed(e) => return Err(e),
            }
        }
    }

    /// Race `work` against the deadline and the interrupt. On loss, deliver
    /// the server-side cancel and give `work` up to [`CANCEL_GRACE`] to
    /// return before reporting the loss.
    async fn bounded<F, T>(
        conn: &DbConnection,
        handle: &QueryHandle,
        deadline: Option<Deadline>,
        work: F,
    ) -> Result<Result<T, tokio_postgres::Error>, TsqError>
    where
        F: std::future::Future<Output = Result<T, tokio_postgres::Error>>,
    {
        tokio::pin!(work);
        let outcome = tokio::select! {
            result = &mut work => return Ok(result),
            _ = sleep_until_opt(deadline) => {
                TsqError::query_timeout(deadline.map(|d| d.limit).unwrap_or_default())
            }
            _ = handle.cancelled() => TsqError::interrupted(handle.id()),
        };
        tracing::debug!(query_id = %handle.id(), "cancelling in-flight query");
        conn.cancel_backend().await;
        let _ = timeout(CANCEL_GRACE, &mut work).await;
        Err(outcome)
    }

    /// Forward rows from the wire to the renderer, enforcing the same race
    /// per row. Runs as a detached task; a dropped receiver stops it.
    async fn pump_rows(
        stream: tokio_postgres::RowStream,
        handle: QueryHandle,
        deadline: Option<Deadline>,
        canceller: BackendCanceller,
        tx: mpsc::Sender<RowEvent>,
    ) {
        tokio::pin!(stream);
        let mut row_count = 0usize;

        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = sleep_until_opt(deadline) => {
                    let limit = deadline.map(|d| d.limit).unwrap_or_default();
                    tracing::debug!(query_id = %handle.id(), "query timed out mid-stream");
                    Self::abandon(stream.as_mut(), &canceller).await;
                    let _ = tx.send(RowEvent::Failed(TsqError::query_timeout(limit))).await;
                    return;
                }
                _ = handle.cancelled() => {
                    tracing::debug!(query_id = %handle.id(), "query interrupted mid-stream");
                    Self::abandon(stream.as_mut(), &canceller).await;
                    let _ = tx.send(RowEvent::Failed(TsqError::interrupted(handle.id()))).await;
                    return;
                }
            };

            match item {
                Some(Ok(row)) => {
                    let decoded = match decode_row(&row) {
                        Ok(cells) => cells,
                        Err(e) => {
                            let _ = tx.send(RowEvent::Failed(e)).await;
                            return;
                        }
                    };
                    row_count += 1;
                    if tx.send(RowEvent::Row(decoded)).await.is_err() {
                        // Renderer went away; nothing left to deliver to.
                        return;
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(RowEvent::Failed(TsqError::from(e))).await;
                    return;
                }
                None => {
                    let elapsed = handle.elapsed();
                    tracing::debug!(
                        query_id = %handle.id(),
                        row_count,
                        duration_ms = elapsed.as_millis() as u64,
                        "query complete"
                    );
                    let _ = tx.send(RowEvent::Finished { row_count, elapsed }).await;
                    return;
                }
            }
        }
    }

    /// Deliver the server-side cancel, then drain what the backend already
    /// sent so the protocol finishes cleanly. Drained rows are discarded.
    async fn abandon(
        mut stream: Pin<&mut tokio_postgres::RowStream>,
        canceller: &BackendCanceller,
    ) {
        canceller.cancel().await;
        let drain = async {
            while let Some(item) = stream.next().await {
                if item.is_err() {
                    break;
                }
            }
        };
        let _ = timeout(CANCEL_GRACE, drain).await;
    }
}

async fn sleep_until_opt(deadline: Option<Deadline>) {
    match deadline {
        Some(deadline) => sleep_until(deadline.at).await,
        None => std::future::pending().await,
    }
}

/// Column metadata from the prepared statement, rejecting types the decoder
/// does not understand before any row arrives.
fn column_meta(statement: &Statement) -> Result<Vec<ColumnMeta>, TsqError> {
    statement
        .columns()
        .iter()
        .map(|col| {
            let ty = col.type_();
            if !is_supported(ty) {
                return Err(TsqError::query(
                    format!("unsupported column type {} for column \"{}\"", ty, col.name()),
                    None,
                    Some("Cast the column to text in the statement".to_string()),
                    None,
                    None,
                ));
            }
            Ok(ColumnMeta::new(col.name(), ty.oid(), ty.name()))
        })
        .collect()
}

fn is_supported(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::CHAR
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::NUMERIC
            | Type::TEXT
            | Type::VARCHAR
            | Type::BPCHAR
            | Type::NAME
            | Type::UNKNOWN
            | Type::TIMESTAMPTZ
            | Type::TIMESTAMP
            | Type::DATE
            | Type::TIME
            | Type::UUID
            | Type::JSON
            | Type::JSONB
            | Type::INTERVAL
            | Type::BYTEA
            | Type::VOID
    )
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row, TsqError> {
    (0..row.columns().len()).map(|idx| decode_cell(row, idx)).collect()
}

/// Decode one column by its wire type. `None` from `try_get` is SQL NULL.
fn decode_cell(row: &tokio_postgres::Row, idx: usize) -> Result<Cell, TsqError> {
    let col = &row.columns()[idx];
    let fail = |e: tokio_postgres::Error| {
        TsqError::internal(format!("failed to decode column \"{}\": {e}", col.name()))
    };

    let cell = match *col.type_() {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map_err(fail)?.map(Cell::Bool),
        Type::CHAR => {
            row.try_get::<_, Option<i8>>(idx).map_err(fail)?.map(|v| Cell::Int(i64::from(v)))
        }
        Type::INT2 => {
            row.try_get::<_, Option<i16>>(idx).map_err(fail)?.map(|v| Cell::Int(i64::from(v)))
        }
        Type::INT4 => {
            row.try_get::<_, Option<i32>>(idx).map_err(fail)?.map(|v| Cell::Int(i64::from(v)))
        }
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map_err(fail)?.map(Cell::Int),
        Type::OID => {
            row.try_get::<_, Option<u32>>(idx).map_err(fail)?.map(|v| Cell::Int(i64::from(v)))
        }
        Type::FLOAT4 => {
            row.try_get::<_, Option<f32>>(idx).map_err(fail)?.map(|v| Cell::Float(f64::from(v)))
        }
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map_err(fail)?.map(Cell::Float),
        Type::NUMERIC => row
            .try_get::<_, Option<PgNumeric>>(idx)
            .map_err(fail)?
            .map(|n| Cell::Text(n.to_string())),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            row.try_get::<_, Option<String>>(idx).map_err(fail)?.map(Cell::Text)
        }
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map_err(fail)?
            .map(Cell::Timestamp),
        // Naive timestamps are reported as UTC rather than guessing a zone.
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map_err(fail)?
            .map(|v| Cell::Timestamp(v.and_utc())),
        Type::DATE => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map_err(fail)?
            .map(|v| Cell::Text(v.format("%Y-%m-%d").to_string())),
        Type::TIME => row
            .try_get::<_, Option<chrono::NaiveTime>>(idx)
            .map_err(fail)?
            .map(|v| Cell::Text(v.format("%H:%M:%S%.f").to_string())),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map_err(fail)?
            .map(|v| Cell::Text(v.to_string())),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map_err(fail)?
            .map(|v| Cell::Text(v.to_string())),
        Type::INTERVAL => {
            row.try_get::<_, Option<PgInterval>>(idx).map_err(fail)?.map(Cell::Interval)
        }
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx).map_err(fail)?.map(Cell::Bytes),
        Type::VOID => None,
        _ => {
            return Err(TsqError::internal(format!(
                "no decoder for column \"{}\" of type {}",
                col.name(),
                col.type_()
            )))
        }
    };
    Ok(cell.unwrap_or(Cell::Null))
}

/// NUMERIC in its binary form: a base-10000 digit-group sequence. Rendered
/// to text because no native Rust type holds arbitrary precision losslessly.
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        if raw.len() < 8 {
            return Err(format!("invalid numeric length: {}", raw.len()).into());
        }
        let ndigits = u16::from_be_bytes(raw[0..2].try_into()?) as usize;
        let weight = i32::from(i16::from_be_bytes(raw[2..4].try_into()?));
        let sign = u16::from_be_bytes(raw[4..6].try_into()?);
        let dscale = u16::from_be_bytes(raw[6..8].try_into()?) as usize;
        if raw.len() < 8 + ndigits * 2 {
            return Err(format!("numeric truncated: {} digit groups", ndigits).into());
        }
        let mut digits = Vec::with_capacity(ndigits);
        let mut off = 8;
        for _ in 0..ndigits {
            digits.push(u16::from_be_bytes(raw[off..off + 2].try_into()?));
            off += 2;
        }

        match sign {
            0xC000 => return Ok(PgNumeric("NaN".to_string())),
            0xD000 => return Ok(PgNumeric("Infinity".to_string())),
            0xF000 => return Ok(PgNumeric("-Infinity".to_string())),
            0x0000 | 0x4000 => {}
            other => return Err(format!("invalid numeric sign: {other:#06x}").into()),
        }

        let mut out = String::new();
        if sign == 0x4000 {
            out.push('-');
        }

        if weight < 0 {
            out.push('0');
        } else {
            for i in 0..=weight as usize {
                let group = digits.get(i).copied().unwrap_or(0);
                if i == 0 {
                    out.push_str(&group.to_string());
                } else {
                    out.push_str(&format!("{group:04}"));
                }
            }
        }

        if dscale > 0 {
            out.push('.');
            let mut frac = String::with_capacity(dscale + 4);
            let mut exp = -1i32;
            while frac.len() < dscale {
                // Group index holding base-10000 exponent `exp`; gaps between
                // the stored groups and the decimal point are zeros.
                let idx = weight - exp;
                let group = if idx >= 0 {
                    digits.get(idx as usize).copied().unwrap_or(0)
                } else {
                    0
                };
                frac.push_str(&format!("{group:04}"));
                exp -= 1;
            }
            frac.truncate(dscale);
            out.push_str(&frac);
        }

        Ok(PgNumeric(out))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

impl fmt::Display for PgNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collapse whitespace and truncate, for statement text in log lines.
fn normalize_sql(sql: &str, max: usize) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > max {
        let head: String = collapsed.chars().take(max).collect();
        format!("{head}…")
    } else {
        collapsed
    }
}

/// Adapter so a text parameter slice satisfies `query_raw`'s iterator bound.
fn slice_iter(params: &[String]) -> impl ExactSizeIterator<Item = &(dyn ToSql + Sync)> + '_ {
    params.iter().map(|p| p as &(dyn ToSql + Sync))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_bytes(digits: &[u16], weight: i16, sign: u16, dscale: u16) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(digits.len() as u16).to_be_bytes());
        raw.extend_from_slice(&weight.to_be_bytes());
        raw.extend_from_slice(&sign.to_be_bytes());
        raw.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    fn numeric(digits: &[u16], weight: i16, sign: u16, dscale: u16) -> String {
        let raw = numeric_bytes(digits, weight, sign, dscale);
        PgNumeric::from_sql(&Type::NUMERIC, &raw).unwrap().to_string()
    }

    #[test]
    fn numeric_renders_integers_and_fractions() {
        assert_eq!(numeric(&[], 0, 0x0000, 0), "0");
        assert_eq!(numeric(&[42], 0, 0x0000, 0), "42");
        assert_eq!(numeric(&[42], 0, 0x4000, 0), "-42");
        assert_eq!(numeric(&[1234, 5600], 0, 0x0000, 2), "1234.56");
        assert_eq!(numeric(&[5000], -1, 0x0000, 1), "0.5");
        assert_eq!(numeric(&[1], -1, 0x0000, 4), "0.0001");
        assert_eq!(numeric(&[1, 2345, 6789], 2, 0x0000, 0), "123456789");
        // Trailing zero groups are omitted on the wire but implied by dscale.
        assert_eq!(numeric(&[5], 0, 0x0000, 4), "5.0000");
        // Leading zero groups between the point and the digits.
        assert_eq!(numeric(&[7], -2, 0x0000, 8), "0.00000007");
    }

    #[test]
    fn numeric_renders_specials() {
        assert_eq!(numeric(&[], 0, 0xC000, 0), "NaN");
        assert_eq!(numeric(&[], 0, 0xD000, 0), "Infinity");
        assert_eq!(numeric(&[], 0, 0xF000, 0), "-Infinity");
    }

    #[test]
    fn numeric_rejects_garbage() {
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &[0u8; 4]).is_err());
        let short = numeric_bytes(&[1, 2], 0, 0x0000, 0);
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &short[..8]).is_err());
        assert!(PgNumeric::from_sql(&Type::NUMERIC, &numeric_bytes(&[], 0, 0x1234, 0)).is_err());
    }

    #[test]
    fn supported_types_cover_the_decode_table() {
        for ty in [
            Type::BOOL,
            Type::INT2,
            Type::INT4,
            Type::INT8,
            Type::FLOAT4,
            Type::FLOAT8,
            Type::NUMERIC,
            Type::TEXT,
            Type::VARCHAR,
            Type::NAME,
            Type::TIMESTAMPTZ,
            Type::TIMESTAMP,
            Type::DATE,
            Type::TIME,
            Type::UUID,
            Type::JSON,
            Type::JSONB,
            Type::INTERVAL,
            Type::BYTEA,
            Type::VOID,
        ] {
            assert!(is_supported(&ty), "{ty} should decode");
        }
        assert!(!is_supported(&Type::POINT));
        assert!(!is_supported(&Type::INT4_ARRAY));
        assert!(!is_supported(&Type::INET));
    }

    #[test]
    fn sql_is_normalized_for_logging() {
        assert_eq!(normalize_sql("SELECT 1", 100), "SELECT 1");
        assert_eq!(
            normalize_sql("SELECT *\n  FROM users\n  WHERE id = 1", 100),
            "SELECT * FROM users WHERE id = 1"
        );
        let long = "x".repeat(150);
        let normalized = normalize_sql(&long, 100);
        assert_eq!(normalized.chars().count(), 101);
        assert!(normalized.ends_with('…'));
    }

    #[tokio::test]
    async fn missing_deadline_never_fires() {
        tokio::select! {
            _ = sleep_until_opt(None) => panic!("fired without a deadline"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
    }

    #[tokio::test]
    async fn deadline_fires_when_reached() {
        let deadline = Deadline::starting_now(Duration::from_millis(5));
        tokio::select! {
            _ = sleep_until_opt(Some(deadline)) => {}
            _ = tokio::time::sleep(Duration::from_secs(5)) => panic!("deadline never fired"),
        }
    }
}
