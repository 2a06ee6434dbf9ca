//! Resolved connection parameters.
//!
//! A [`ConnectionSpec`] is produced once by the resolver in `config`, is
//! immutable afterwards, and is the only thing the connection layer needs.
//! The password never appears in `Debug` output, logs, or error messages.

use std::fmt;
use std::time::Duration;

use crate::render::Format;

/// TLS negotiation mode, mirroring libpq's `sslmode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Never use TLS.
    Disable,
    /// Try plain first, fall back to TLS.
    Allow,
    /// Try TLS first, fall back to plain.
    #[default]
    Prefer,
    /// Require TLS, but accept any certificate.
    Require,
    /// Require TLS and a trusted certificate chain.
    VerifyCa,
    /// Require TLS, a trusted chain, and a matching hostname.
    VerifyFull,
}

/// Accepted spellings, in the order used by error messages.
pub const VALID_SSL_MODES: &str = "allow, disable, prefer, require, verify-ca, verify-full";

impl SslMode {
    /// Parse the libpq spelling. Returns `None` for anything unrecognized;
    /// callers attach their own source-specific error.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "disable" => Some(Self::Disable),
            "allow" => Some(Self::Allow),
            "prefer" => Some(Self::Prefer),
            "require" => Some(Self::Require),
            "verify-ca" => Some(Self::VerifyCa),
            "verify-full" => Some(Self::VerifyFull),
            _ => None,
        }
    }

    /// The libpq spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Allow => "allow",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which layer supplied each resolved field.
///
/// Labels are the layer names shown by `config show`: `default`, `config`,
/// `profile: NAME`, `env: PGHOST`, `dsn`, `cli: --host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSources {
    pub host: String,
    pub port: String,
    pub database: String,
    pub user: String,
    /// Only set when a password was supplied by some layer.
    pub password: Option<String>,
    pub sslmode: String,
    pub connect_timeout: String,
    pub application_name: String,
    pub timeout: String,
    /// Only set when a default format was configured.
    pub format: Option<String>,
}

impl Default for SpecSources {
    fn default() -> Self {
        let default = || "default".to_string();
        Self {
            host: default(),
            port: default(),
            database: default(),
            user: default(),
            password: None,
            sslmode: default(),
            connect_timeout: default(),
            application_name: default(),
            timeout: default(),
            format: None,
        }
    }
}

/// Fully resolved connection parameters plus the per-invocation defaults
/// that ride along with them (query timeout, preferred output format).
#[derive(Clone, PartialEq)]
pub struct ConnectionSpec {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub sslmode: SslMode,
    /// Deadline for establishing the connection. Zero disables it.
    pub connect_timeout: Duration,
    pub application_name: String,
    /// Client-side query deadline. `None` means no deadline.
    pub timeout: Option<Duration>,
    /// Output format configured in the file, if any. The explicit CLI flag
    /// and TTY detection are applied on top of this at render time.
    pub format: Option<Format>,
    /// Name of the profile that participated in resolution, if any.
    pub profile: Option<String>,
    /// Per-field provenance for diagnostics.
    pub sources: SpecSources,
}

impl ConnectionSpec {
    /// `host:port/database`, for log lines and connection errors.
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

// Password is redacted rather than skipped so a reader can tell set from
// unset.
impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("sslmode", &self.sslmode)
            .field("connect_timeout", &self.connect_timeout)
            .field("application_name", &self.application_name)
            .field("timeout", &self.timeout)
            .field("format", &self.format)
            .field("profile", &self.profile)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_password(password: Option<&str>) -> ConnectionSpec {
        ConnectionSpec {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "alice".to_string(),
            password: password.map(String::from),
            sslmode: SslMode::Prefer,
            connect_timeout: Duration::from_secs(10),
            application_name: "tsq".to_string(),
            timeout: Some(Duration::from_secs(30)),
            format: None,
            profile: None,
            sources: SpecSources::default(),
        }
    }

    #[test]
    fn sslmode_parses_all_libpq_spellings() {
        assert_eq!(SslMode::parse("disable"), Some(SslMode::Disable));
        assert_eq!(SslMode::parse("allow"), Some(SslMode::Allow));
        assert_eq!(SslMode::parse("prefer"), Some(SslMode::Prefer));
        assert_eq!(SslMode::parse("require"), Some(SslMode::Require));
        assert_eq!(SslMode::parse("verify-ca"), Some(SslMode::VerifyCa));
        assert_eq!(SslMode::parse("verify-full"), Some(SslMode::VerifyFull));
        assert_eq!(SslMode::parse("verify_full"), None);
        assert_eq!(SslMode::parse("Prefer"), None);
        assert_eq!(SslMode::parse(""), None);
    }

    #[test]
    fn sslmode_round_trips_through_as_str() {
        for mode in [
            SslMode::Disable,
            SslMode::Allow,
            SslMode::Prefer,
            SslMode::Require,
            SslMode::VerifyCa,
            SslMode::VerifyFull,
        ] {
            assert_eq!(SslMode::parse(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn debug_redacts_the_password() {
        let debug = format!("{:?}", spec_with_password(Some("s3cret")));
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("***"));

        let debug = format!("{:?}", spec_with_password(None));
        assert!(debug.contains("None"));
    }

    #[test]
    fn display_target_is_host_port_database() {
        assert_eq!(spec_with_password(None).display_target(), "localhost:5432/postgres");
    }
}
