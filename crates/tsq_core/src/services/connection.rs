//! Connection establishment with TLS negotiation and server-side cancel
//! support.

use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::task::JoinHandle;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{CancelToken, Client, Config, NoTls, Socket};

use crate::error::TsqError;
use crate::models::{ConnectionSpec, SslMode};

/// How to dial the server for the cancel connection. PostgreSQL cancel
/// requests travel over a second connection, which must negotiate TLS the
/// same way the primary did.
#[derive(Clone)]
enum CancelTls {
    Plain,
    Tls(MakeTlsConnector),
}

/// Owned handle that can deliver a server-side cancel request without
/// borrowing the connection, so spawned tasks can carry it.
#[derive(Clone)]
pub struct BackendCanceller {
    token: CancelToken,
    tls: CancelTls,
}

impl BackendCanceller {
    /// Ask the server to abort whatever the primary connection is running.
    ///
    /// Best effort: if the cancel connection cannot be opened the caller's
    /// own deadline still bounds how long it waits.
    pub async fn cancel(&self) {
        let result = match &self.tls {
            CancelTls::Plain => self.token.cancel_query(NoTls).await,
            CancelTls::Tls(connector) => self.token.cancel_query(connector.clone()).await,
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "cancel request failed");
        }
    }
}

/// An open connection: the client, the server-issued cancel token, and the
/// background driver task that owns the socket.
pub struct DbConnection {
    client: Client,
    cancel_token: CancelToken,
    tls: CancelTls,
    driver: JoinHandle<()>,
}

impl DbConnection {
    /// Connect according to `spec`.
    ///
    /// The whole phase, including TLS negotiation and authentication, runs
    /// under `spec.connect_timeout`; a zero timeout disables the bound.
    pub async fn connect(spec: &ConnectionSpec) -> Result<Self, TsqError> {
        let connect = Self::connect_inner(spec);
        if spec.connect_timeout.is_zero() {
            connect.await
        } else {
            match tokio::time::timeout(spec.connect_timeout, connect).await {
                Ok(result) => result,
                Err(_) => Err(TsqError::connect_timeout(spec.connect_timeout)),
            }
        }
    }

    async fn connect_inner(spec: &ConnectionSpec) -> Result<Self, TsqError> {
        let config = build_config(spec);
        let (client, tls, driver) = match spec.sslmode {
            SslMode::Disable => {
                let (client, driver) = establish(&config, NoTls)
                    .await
                    .map_err(|e| classify_connect_error(e, spec))?;
                (client, CancelTls::Plain, driver)
            }
            mode => {
                let connector = build_tls_connector(mode)?;
                let (client, driver) = establish(&config, connector.clone())
                    .await
                    .map_err(|e| classify_connect_error(e, spec))?;
                (client, CancelTls::Tls(connector), driver)
            }
        };

        tracing::debug!(
            host = %spec.host,
            port = spec.port,
            database = %spec.database,
            user = %spec.user,
            sslmode = %spec.sslmode,
            "connected"
        );

        let cancel_token = client.cancel_token();
        Ok(Self { client, cancel_token, tls, driver })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Detachable cancel handle for tasks that outlive this borrow.
    pub fn canceller(&self) -> BackendCanceller {
        BackendCanceller { token: self.cancel_token.clone(), tls: self.tls.clone() }
    }

    /// Ask the server to abort this connection's in-flight query.
    pub async fn cancel_backend(&self) {
        self.canceller().cancel().await;
    }
}

impl Drop for DbConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Connect and spawn the driver task that pumps the socket.
async fn establish<T>(
    config: &Config,
    tls: T,
) -> Result<(Client, JoinHandle<()>), tokio_postgres::Error>
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let (client, connection) = config.connect(tls).await?;
    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "connection driver terminated");
        }
    });
    Ok((client, driver))
}

fn build_config(spec: &ConnectionSpec) -> Config {
    let mut config = Config::new();
    config.host(&spec.host);
    config.port(spec.port);
    config.dbname(&spec.database);
    config.user(&spec.user);
    if let Some(password) = &spec.password {
        config.password(password);
    }
    config.application_name(&spec.application_name);
    if !spec.connect_timeout.is_zero() {
        config.connect_timeout(spec.connect_timeout);
    }
    config.ssl_mode(wire_ssl_mode(spec.sslmode));
    config
}

/// The wire-level negotiation knows only disable/prefer/require; the
/// verify-* modes differ in connector configuration, not negotiation.
fn wire_ssl_mode(mode: SslMode) -> tokio_postgres::config::SslMode {
    match mode {
        SslMode::Disable => tokio_postgres::config::SslMode::Disable,
        SslMode::Allow | SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
        SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
            tokio_postgres::config::SslMode::Require
        }
    }
}

/// Build the TLS connector for a non-disabled mode.
///
/// Below verify-ca, libpq encrypts without verifying anything; verify-ca
/// checks the chain but not the hostname; verify-full checks both.
fn build_tls_connector(mode: SslMode) -> Result<MakeTlsConnector, TsqError> {
    let mut builder = TlsConnector::builder();
    match mode {
        SslMode::Allow | SslMode::Prefer | SslMode::Require => {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::VerifyCa => {
            builder.danger_accept_invalid_hostnames(true);
        }
        SslMode::VerifyFull | SslMode::Disable => {}
    }
    let connector = builder
        .build()
        .map_err(|e| TsqError::connection(format!("Failed to create TLS connector: {e}")))?;
    Ok(MakeTlsConnector::new(connector))
}

/// Wrap connect-phase failures with the target, keeping authentication
/// failures distinct so they map to their own hint and exit status.
fn classify_connect_error(err: tokio_postgres::Error, spec: &ConnectionSpec) -> TsqError {
    match TsqError::from(err) {
        auth @ TsqError::Authentication { .. } => auth,
        other => {
            TsqError::connection(format!("Connection failed to {}: {}", spec.display_target(), other))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_postgres::config::Host;

    use crate::models::SpecSources;

    fn spec() -> ConnectionSpec {
        ConnectionSpec {
            host: "db.example.com".to_string(),
            port: 6432,
            database: "metrics".to_string(),
            user: "svc".to_string(),
            password: Some("secret".to_string()),
            sslmode: SslMode::Require,
            connect_timeout: Duration::from_secs(10),
            application_name: "tsq".to_string(),
            timeout: Some(Duration::from_secs(30)),
            format: None,
            profile: None,
            sources: SpecSources::default(),
        }
    }

    #[test]
    fn config_carries_every_spec_field() {
        let config = build_config(&spec());
        assert!(matches!(&config.get_hosts()[0], Host::Tcp(h) if h == "db.example.com"));
        assert_eq!(config.get_ports(), &[6432]);
        assert_eq!(config.get_dbname(), Some("metrics"));
        assert_eq!(config.get_user(), Some("svc"));
        assert_eq!(config.get_password(), Some("secret".as_bytes()));
        assert_eq!(config.get_application_name(), Some("tsq"));
        assert_eq!(config.get_connect_timeout(), Some(&Duration::from_secs(10)));
    }

    #[test]
    fn missing_password_is_not_sent_as_empty() {
        let mut spec = spec();
        spec.password = None;
        let config = build_config(&spec);
        assert_eq!(config.get_password(), None);
    }

    #[test]
    fn zero_connect_timeout_leaves_the_config_unbounded() {
        let mut spec = spec();
        spec.connect_timeout = Duration::ZERO;
        let config = build_config(&spec);
        assert_eq!(config.get_connect_timeout(), None);
    }

    #[test]
    fn ssl_modes_collapse_to_wire_negotiation() {
        use tokio_postgres::config::SslMode as Wire;
        assert!(matches!(wire_ssl_mode(SslMode::Disable), Wire::Disable));
        assert!(matches!(wire_ssl_mode(SslMode::Allow), Wire::Prefer));
        assert!(matches!(wire_ssl_mode(SslMode::Prefer), Wire::Prefer));
        assert!(matches!(wire_ssl_mode(SslMode::Require), Wire::Require));
        assert!(matches!(wire_ssl_mode(SslMode::VerifyCa), Wire::Require));
        assert!(matches!(wire_ssl_mode(SslMode::VerifyFull), Wire::Require));
    }
}
