//! Error types for the tsq client.
//!
//! Every failure the resolver, executor, or renderer can produce lives in one
//! taxonomy so the process can map it to a single exit status at the boundary.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Kind of configuration-resolution failure.
///
/// All kinds share exit status 7; they are distinguished so messages can name
/// the offending source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Config file exists but cannot be parsed or holds invalid values.
    MalformedConfig,
    /// A profile was selected that the config file does not define.
    UnknownProfile,
    /// A DSN string does not parse as a postgresql:// URL.
    MalformedDsn,
    /// A port value is not an integer in 1-65535.
    InvalidPort,
}

/// Main error type for the tsq client.
///
/// Display output is what the user sees after `Error: ` on stderr, so the
/// messages carry their own context rather than a category prefix.
#[derive(Debug, Error)]
pub enum TsqError {
    /// Configuration resolution failed before any network I/O.
    #[error("{message}")]
    Config {
        /// Which resolution rule was violated.
        kind: ConfigErrorKind,
        /// Human-readable error message naming the offending source.
        message: String,
    },

    /// Statement input could not be obtained (missing file, empty query).
    #[error("{message}")]
    Input {
        /// Human-readable error message.
        message: String,
    },

    /// Network-level connection failure (refused, DNS, dropped mid-query).
    #[error("{message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The server rejected the supplied credentials.
    #[error("{message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// A client-enforced deadline elapsed (query budget or connect timeout).
    #[error("{message}")]
    Timeout {
        /// Human-readable error message.
        message: String,
    },

    /// Server-reported SQL error with PostgreSQL details.
    #[error("{message}")]
    Query {
        /// PostgreSQL error message, surfaced verbatim.
        message: String,
        /// Additional detail from PostgreSQL.
        detail: Option<String>,
        /// PostgreSQL hint.
        hint: Option<String>,
        /// Position in query (1-indexed).
        position: Option<usize>,
        /// PostgreSQL error code (e.g., "42P01").
        code: Option<String>,
    },

    /// Execution was interrupted by the operator (Ctrl-C).
    #[error("Interrupted")]
    Interrupted {
        /// ID of the interrupted query.
        query_id: Uuid,
    },

    /// The output sink rejected a write.
    #[error("{message}")]
    Output {
        /// Human-readable error message.
        message: String,
        /// Whether any bytes reached the sink before the failure.
        wrote_output: bool,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TsqError {
    // ========== Constructors ==========

    /// Create a config error with an explicit kind.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self::Config { kind, message: message.into() }
    }

    /// Create a malformed-config error.
    pub fn malformed_config(message: impl Into<String>) -> Self {
        Self::config(ConfigErrorKind::MalformedConfig, message)
    }

    /// Create an unknown-profile error.
    pub fn unknown_profile(name: &str, available: &str) -> Self {
        Self::config(
            ConfigErrorKind::UnknownProfile,
            format!("Unknown profile: '{name}'. Available profiles: {available}"),
        )
    }

    /// Create a malformed-DSN error.
    pub fn malformed_dsn(message: impl Into<String>) -> Self {
        Self::config(ConfigErrorKind::MalformedDsn, message)
    }

    /// Create an invalid-port error.
    pub fn invalid_port(message: impl Into<String>) -> Self {
        Self::config(ConfigErrorKind::InvalidPort, message)
    }

    /// Create a new input error.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input { message: message.into() }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            hint: Some("Check username and password".to_string()),
        }
    }

    /// Create a timeout error for an elapsed query budget.
    pub fn query_timeout(limit: Duration) -> Self {
        Self::Timeout { message: format!("Query timed out after {}", format_secs(limit)) }
    }

    /// Create a timeout error for an elapsed connect deadline.
    pub fn connect_timeout(limit: Duration) -> Self {
        Self::Timeout { message: format!("Connection timed out after {}", format_secs(limit)) }
    }

    /// Create a new query error with full PostgreSQL details.
    pub fn query(
        message: impl Into<String>,
        detail: Option<String>,
        hint: Option<String>,
        position: Option<usize>,
        code: Option<String>,
    ) -> Self {
        Self::Query { message: message.into(), detail, hint, position, code }
    }

    /// Create an interrupted error.
    pub fn interrupted(query_id: Uuid) -> Self {
        Self::Interrupted { query_id }
    }

    /// Create a new output error.
    pub fn output(message: impl Into<String>, wrote_output: bool) -> Self {
        Self::Output { message: message.into(), wrote_output }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    // ========== Methods ==========

    /// Map this error onto the process exit status.
    ///
    /// | Code | Condition |
    /// |------|-----------|
    /// | 0    | sink closed after some output was already written |
    /// | 1    | server-reported query error, internal error |
    /// | 3    | input error |
    /// | 4    | output error before any bytes were written |
    /// | 5    | connection / authentication failure |
    /// | 6    | timeout (query budget or connect deadline) |
    /// | 7    | configuration resolution failure |
    /// | 130  | interrupted |
    ///
    /// Usage errors exit 2 through the argument parser and never reach here.
    /// A closed pipe after partial output (e.g. piping into `head`) is treated
    /// as success, matching standard Unix tool behavior.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Query { .. } => 1,
            Self::Input { .. } => 3,
            Self::Output { wrote_output, .. } => {
                if *wrote_output {
                    0
                } else {
                    4
                }
            }
            Self::Connection { .. } => 5,
            Self::Authentication { .. } => 5,
            Self::Timeout { .. } => 6,
            Self::Config { .. } => 7,
            Self::Interrupted { .. } => 130,
            Self::Internal { .. } => 1,
        }
    }

    /// Check if this error represents an interrupted query.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "Config",
            Self::Input { .. } => "Input",
            Self::Connection { .. } => "Connection",
            Self::Authentication { .. } => "Authentication",
            Self::Timeout { .. } => "Timeout",
            Self::Query { .. } => "Query",
            Self::Interrupted { .. } => "Interrupted",
            Self::Output { .. } => "Output",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Config { .. } => None,
            Self::Input { .. } => None,
            Self::Connection { .. } => Some("Check that the database server is running"),
            Self::Authentication { hint, .. } => hint.as_deref(),
            Self::Timeout { .. } => None,
            Self::Query { hint, .. } => hint.as_deref(),
            Self::Interrupted { .. } => None,
            Self::Output { .. } => None,
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Get the server's detail text (if applicable).
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Query { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// Get PostgreSQL error code (if applicable).
    pub fn pg_code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

// ========== Error Conversions ==========

/// SQLSTATE class 28 covers all authentication failures.
fn is_auth_code(code: &str) -> bool {
    code == "28P01" || code == "28000"
}

/// Convert from tokio_postgres::Error, classifying by SQLSTATE.
impl From<tokio_postgres::Error> for TsqError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let detail = db_err.detail().map(String::from);
            let hint = db_err.hint().map(String::from);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos as usize),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let code_str = db_err.code().code();
            let code = Some(code_str.to_string());

            if is_auth_code(code_str) {
                return TsqError::Authentication {
                    message,
                    hint: Some("Check username, password, and pg_hba.conf rules".to_string()),
                };
            }
            // Connection exceptions (08xxx)
            if code_str.starts_with("08") {
                return TsqError::Connection { message, source: Some(Box::new(err)) };
            }
            // Syntax/semantic errors (42xxx) and everything else
            return TsqError::Query { message, detail, hint, position, code };
        }

        if err.is_closed() {
            return TsqError::Connection {
                message: "connection closed".to_string(),
                source: Some(Box::new(err)),
            };
        }

        TsqError::Connection { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Render a duration as a short human figure ("2s", "2.5s", "450ms").
fn format_secs(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", d.as_millis())
    } else if secs.fract() == 0.0 {
        format!("{}s", secs as u64)
    } else {
        format!("{secs:.1}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_documented_table() {
        assert_eq!(TsqError::query("syntax error", None, None, None, None).exit_code(), 1);
        assert_eq!(TsqError::input("no query provided").exit_code(), 3);
        assert_eq!(TsqError::output("broken pipe", false).exit_code(), 4);
        assert_eq!(TsqError::connection("refused").exit_code(), 5);
        assert_eq!(TsqError::authentication("bad password").exit_code(), 5);
        assert_eq!(TsqError::query_timeout(Duration::from_secs(2)).exit_code(), 6);
        assert_eq!(TsqError::malformed_config("bad toml").exit_code(), 7);
        assert_eq!(TsqError::unknown_profile("prod", "none").exit_code(), 7);
        assert_eq!(TsqError::malformed_dsn("bad scheme").exit_code(), 7);
        assert_eq!(TsqError::invalid_port("port 0").exit_code(), 7);
        assert_eq!(TsqError::interrupted(Uuid::new_v4()).exit_code(), 130);
        assert_eq!(TsqError::internal("bug").exit_code(), 1);
    }

    #[test]
    fn broken_pipe_after_partial_output_is_success() {
        assert_eq!(TsqError::output("broken pipe", true).exit_code(), 0);
        assert_eq!(TsqError::output("broken pipe", false).exit_code(), 4);
    }

    #[test]
    fn auth_codes_cover_both_sqlstate_variants() {
        assert!(is_auth_code("28P01"));
        assert!(is_auth_code("28000"));
        assert!(!is_auth_code("42601"));
        assert!(!is_auth_code("08006"));
    }

    #[test]
    fn timeout_messages_use_short_durations() {
        let e = TsqError::query_timeout(Duration::from_secs(2));
        assert_eq!(e.to_string(), "Query timed out after 2s");

        let e = TsqError::query_timeout(Duration::from_millis(2500));
        assert_eq!(e.to_string(), "Query timed out after 2.5s");

        let e = TsqError::connect_timeout(Duration::from_millis(500));
        assert_eq!(e.to_string(), "Connection timed out after 500ms");
    }

    #[test]
    fn config_kinds_are_distinguishable() {
        let e = TsqError::unknown_profile("staging", "local, prod");
        match e {
            TsqError::Config { kind, ref message } => {
                assert_eq!(kind, ConfigErrorKind::UnknownProfile);
                assert!(message.contains("'staging'"));
                assert!(message.contains("local, prod"));
            }
            _ => panic!("expected Config variant"),
        }
        assert_eq!(
            TsqError::unknown_profile("prod", "none").to_string(),
            "Unknown profile: 'prod'. Available profiles: none"
        );
    }

    #[test]
    fn query_error_keeps_server_details() {
        let e = TsqError::query(
            "relation \"missing\" does not exist",
            None,
            Some("Perhaps you meant \"missing_table\"".to_string()),
            Some(15),
            Some("42P01".to_string()),
        );
        assert_eq!(e.pg_code(), Some("42P01"));
        assert_eq!(e.hint(), Some("Perhaps you meant \"missing_table\""));
        assert_eq!(e.category(), "Query");
    }
}
