//! `tsq query` - run SQL from inline text, a file, or stdin.

use std::path::PathBuf;

use tsq_core::services::QueryExecutor;
use tsq_core::{QueryRequest, TsqError};

use super::Context;

pub async fn run(
    ctx: &Context,
    file: Option<PathBuf>,
    execute: Option<String>,
    timeout: Option<f64>,
) -> Result<(), TsqError> {
    let sql = resolve_source(execute, file)?;
    validate_timeout(timeout)?;

    let spec = ctx.resolve_spec(timeout)?;
    let request = ctx.render_request(spec.format);

    let (conn, handle) = super::connect(&spec).await?;
    let query = QueryRequest::new(sql).with_timeout(spec.timeout);
    let stream = QueryExecutor::execute_streaming(&conn, query, handle).await?;
    super::render_stream(stream, &request).await
}

/// Pick the query text: inline `-e` wins, then a file argument, then piped stdin.
fn resolve_source(execute: Option<String>, file: Option<PathBuf>) -> Result<String, TsqError> {
    if let Some(sql) = execute {
        return Ok(sql);
    }
    if let Some(path) = file {
        if !path.exists() {
            return Err(TsqError::input(format!(
                "Query file not found: {}\nUse -e for inline queries or pipe query via stdin.",
                path.display()
            )));
        }
        return std::fs::read_to_string(&path).map_err(|e| {
            TsqError::input(format!(
                "Failed to read query file {}: {e}",
                path.display()
            ))
        });
    }
    if !atty::is(atty::Stream::Stdin) {
        let mut sql = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut sql)
            .map_err(|e| TsqError::input(format!("Failed to read query from stdin: {e}")))?;
        return Ok(sql);
    }
    Err(TsqError::input(
        "No query provided. Use -e, file path, or pipe to stdin.",
    ))
}

/// Reject nonsense timeout values before they reach the resolver.
/// Zero is accepted and disables the budget.
fn validate_timeout(timeout: Option<f64>) -> Result<(), TsqError> {
    if let Some(v) = timeout {
        if !v.is_finite() || v < 0.0 {
            return Err(TsqError::input(format!(
                "Invalid timeout: {v}. Must be zero or a positive number of seconds"
            )));
        }
    }
    Ok(())
}
