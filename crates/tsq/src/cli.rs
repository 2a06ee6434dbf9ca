//! Command-line surface.
//!
//! Connection and output flags are global, so they work both before and
//! after the subcommand name. Anything that affects resolution precedence
//! maps one-to-one onto a [`CliOverrides`] field.
//!
//! [`CliOverrides`]: tsq_core::CliOverrides

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tsq_core::render::DEFAULT_TABLE_WIDTH;
use tsq_core::Format;

#[derive(Debug, Parser)]
#[command(name = "tsq")]
#[command(version)]
#[command(about = "PostgreSQL/TimescaleDB query and administration tool", long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// PostgreSQL host
    #[arg(short = 'H', long, global = true)]
    pub host: Option<String>,

    /// PostgreSQL port
    #[arg(short = 'p', long, global = true)]
    pub port: Option<u16>,

    /// Database name
    #[arg(short = 'd', long, global = true)]
    pub database: Option<String>,

    /// User name
    #[arg(short = 'U', long, global = true)]
    pub user: Option<String>,

    /// Password
    #[arg(short = 'W', long, global = true)]
    pub password: Option<String>,

    /// Connection DSN (postgresql://...)
    #[arg(long, global = true, value_name = "DSN")]
    pub dsn: Option<String>,

    /// Named connection profile
    #[arg(short = 'P', long, global = true)]
    pub profile: Option<String>,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Output format
    #[arg(short = 'f', long, global = true, value_enum)]
    pub format: Option<FormatArg>,

    /// Compact JSON output (no indentation)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Suppress header row in CSV output
    #[arg(long, global = true)]
    pub no_header: bool,

    /// Column width for table format
    #[arg(long, global = true, default_value_t = DEFAULT_TABLE_WIDTH)]
    pub width: usize,
}

/// `--format` values. Kept separate from [`Format`] so the core crate does
/// not depend on clap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Table,
    Json,
    Csv,
}

impl FormatArg {
    pub fn into_format(self) -> Format {
        match self {
            FormatArg::Table => Format::Table,
            FormatArg::Json => Format::Json,
            FormatArg::Csv => Format::Csv,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a SQL query from file, inline (-e), or stdin
    Query {
        /// SQL file to execute
        file: Option<PathBuf>,

        /// Execute inline SQL query
        #[arg(short = 'e', long = "execute", value_name = "SQL")]
        execute: Option<String>,

        /// Query timeout in seconds (0 disables the timeout)
        #[arg(short = 't', long, value_name = "SECONDS")]
        timeout: Option<f64>,
    },

    /// List all databases with size and owner information
    Databases,

    /// Show database connections
    Connections {
        /// Include idle connections
        #[arg(long)]
        all: bool,
    },

    /// TimescaleDB administration commands
    Ts {
        #[command(subcommand)]
        action: TsAction,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum TsAction {
    /// List hypertables with size, chunk counts, and compression info
    Hypertables {
        /// Filter by schema
        #[arg(short = 's', long)]
        schema: Option<String>,
    },

    /// Show chunks for a hypertable with size and compression status
    Chunks {
        /// Hypertable name (schema.table or table)
        hypertable: String,
    },

    /// Show background jobs with schedule and execution stats
    Jobs,

    /// List continuous aggregates with materialization details
    Caggs,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Display resolved configuration with source attribution
    Show,

    /// List available connection profiles
    Profiles,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "tsq", "query", "-e", "SELECT 1", "--host", "db", "-p", "5433", "--format", "json",
        ])
        .unwrap();
        assert_eq!(cli.connection.host.as_deref(), Some("db"));
        assert_eq!(cli.connection.port, Some(5433));
        assert_eq!(cli.output.format, Some(FormatArg::Json));
        match cli.command {
            Some(Commands::Query { execute, .. }) => {
                assert_eq!(execute.as_deref(), Some("SELECT 1"));
            }
            _ => panic!("expected query subcommand"),
        }
    }

    #[test]
    fn out_of_range_port_is_a_usage_error() {
        let err = Cli::try_parse_from(["tsq", "-p", "70000", "databases"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn width_defaults_to_forty() {
        let cli = Cli::try_parse_from(["tsq", "databases"]).unwrap();
        assert_eq!(cli.output.width, DEFAULT_TABLE_WIDTH);
    }

    #[test]
    fn ts_subcommands_parse() {
        let cli = Cli::try_parse_from(["tsq", "ts", "chunks", "sensors.readings"]).unwrap();
        match cli.command {
            Some(Commands::Ts { action: TsAction::Chunks { hypertable } }) => {
                assert_eq!(hypertable, "sensors.readings");
            }
            _ => panic!("expected ts chunks subcommand"),
        }
    }
}
