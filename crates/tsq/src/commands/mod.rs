//! Command implementations and the plumbing they share.

pub mod config;
pub mod connections;
pub mod databases;
pub mod query;
pub mod ts;

use std::io;
use std::path::PathBuf;

use tsq_core::config::{resolve, CliOverrides, FileConfig};
use tsq_core::render::{self, RenderRequest};
use tsq_core::{
    Cell, ConnectionSpec, DbConnection, Format, QueryHandle, QueryOutput, RowStream, TsqError,
};

use crate::cli::{Commands, ConnectionArgs, OutputArgs};

/// Everything a command needs besides its own flags: the global connection
/// and output arguments, plus the config file location.
pub struct Context {
    config_path: Option<PathBuf>,
    connection: ConnectionArgs,
    output: OutputArgs,
}

impl Context {
    pub fn new(
        config_path: Option<PathBuf>,
        connection: ConnectionArgs,
        output: OutputArgs,
    ) -> Self {
        Self { config_path, connection, output }
    }

    pub fn load_config(&self) -> Result<FileConfig, TsqError> {
        FileConfig::load(self.config_path.as_deref())
    }

    /// Run the full resolution fold for this invocation. `timeout_flag`
    /// carries the per-command `--timeout` value when the command has one.
    pub fn resolve_spec(&self, timeout_flag: Option<f64>) -> Result<ConnectionSpec, TsqError> {
        let config = self.load_config()?;
        let overrides = CliOverrides {
            host: self.connection.host.clone(),
            port: self.connection.port,
            database: self.connection.database.clone(),
            user: self.connection.user.clone(),
            password: self.connection.password.clone(),
            timeout: timeout_flag,
            profile: self.connection.profile.clone(),
            dsn: self.connection.dsn.clone(),
        };
        resolve(&config, &overrides, |key| std::env::var(key).ok())
    }

    /// Final render settings for this invocation, folding the explicit
    /// flags, the configured default, and terminal detection.
    pub fn render_request(&self, configured: Option<Format>) -> RenderRequest {
        let format = render::resolve_format(
            self.output.format.map(crate::cli::FormatArg::into_format),
            self.output.compact,
            self.output.no_header,
            configured,
            atty::is(atty::Stream::Stdout),
        );
        RenderRequest {
            format,
            compact: self.output.compact,
            no_header: self.output.no_header,
            width: self.output.width,
        }
    }

    /// The `--profile` flag, before environment and config-default
    /// fallbacks apply.
    pub fn profile_flag(&self) -> Option<&str> {
        self.connection.profile.as_deref()
    }
}

pub async fn run(ctx: Context, command: Commands) -> Result<(), TsqError> {
    match command {
        Commands::Query { file, execute, timeout } => {
            query::run(&ctx, file, execute, timeout).await
        }
        Commands::Databases => databases::run(&ctx).await,
        Commands::Connections { all } => connections::run(&ctx, all).await,
        Commands::Ts { action } => ts::run(&ctx, action).await,
        Commands::Config { action } => config::run(&ctx, action),
    }
}

/// Open the connection and arm Ctrl-C to cancel whatever statement is in
/// flight on it. Clones of the returned handle share one cancellation token.
pub(crate) async fn connect(spec: &ConnectionSpec) -> Result<(DbConnection, QueryHandle), TsqError> {
    let conn = DbConnection::connect(spec).await?;
    let handle = QueryHandle::new();
    let interrupt = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received, cancelling");
            interrupt.cancel();
        }
    });
    Ok((conn, handle))
}

pub(crate) async fn render_stream(
    stream: RowStream,
    request: &RenderRequest,
) -> Result<(), TsqError> {
    render::render(stream, request, io::stdout().lock()).await
}

pub(crate) async fn render_output(
    output: QueryOutput,
    request: &RenderRequest,
) -> Result<(), TsqError> {
    render_stream(RowStream::from_output(output), request).await
}

// Cell accessors for post-processing materialized results. NULL and
// unexpected variants fall out as None; the caller picks the placeholder.

pub(crate) fn cell_i64(cell: &Cell) -> Option<i64> {
    match cell {
        Cell::Int(i) => Some(*i),
        _ => None,
    }
}

pub(crate) fn cell_f64(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Float(x) => Some(*x),
        Cell::Int(i) => Some(*i as f64),
        _ => None,
    }
}

pub(crate) fn cell_str(cell: &Cell) -> Option<&str> {
    match cell {
        Cell::Text(s) => Some(s.as_str()),
        _ => None,
    }
}
