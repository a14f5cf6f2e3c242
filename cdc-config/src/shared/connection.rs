use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tokio_postgres::Config as TokioPgConnectOptions;
use tokio_postgres::config::SslMode as TokioPgSslMode;

use crate::shared::ValidationError;

/// Connection configuration for the source Postgres instance.
///
/// This intentionally does not implement `Serialize` to avoid accidentally
/// leaking the password into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: Option<SecretString>,
    pub tls: TlsConfig,
    /// TCP keepalive configuration for connection health monitoring.
    /// When `None`, TCP keepalives are disabled.
    pub keepalive: Option<TcpKeepaliveConfig>,
}

impl PgConnectionConfig {
    /// Builds [`tokio_postgres`] connect options targeting the configured
    /// database.
    pub fn with_db(&self) -> TokioPgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::VerifyFull
        } else {
            TokioPgSslMode::Prefer
        };

        let mut config = TokioPgConnectOptions::new();
        config
            .host(self.host.clone())
            .port(self.port)
            .user(self.username.clone())
            .dbname(self.name.clone())
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        if let Some(keepalive) = &self.keepalive {
            config
                .keepalives(true)
                .keepalives_idle(Duration::from_secs(keepalive.idle_secs))
                .keepalives_interval(Duration::from_secs(keepalive.interval_secs))
                .keepalives_retries(keepalive.retries);
        }

        config
    }
}

/// TLS settings for the source connection.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub trusted_root_certs: String,
    pub enabled: bool,
}

impl TlsConfig {
    pub fn disabled() -> Self {
        Self {
            trusted_root_certs: "".to_string(),
            enabled: false,
        }
    }

    /// Validates that enabled TLS carries trusted root certificates.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// TCP keepalive settings for the source connection.
#[derive(Debug, Clone, Deserialize)]
pub struct TcpKeepaliveConfig {
    pub idle_secs: u64,
    pub interval_secs: u64,
    pub retries: u32,
}

impl Default for TcpKeepaliveConfig {
    fn default() -> Self {
        Self {
            idle_secs: 30,
            interval_secs: 30,
            retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_validation() {
        assert!(TlsConfig::disabled().validate().is_ok());

        let enabled_without_certs = TlsConfig {
            trusted_root_certs: "".to_string(),
            enabled: true,
        };
        assert!(enabled_without_certs.validate().is_err());

        let enabled_with_certs = TlsConfig {
            trusted_root_certs: "-----BEGIN CERTIFICATE-----".to_string(),
            enabled: true,
        };
        assert!(enabled_with_certs.validate().is_ok());
    }
}
