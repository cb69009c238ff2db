use crate::error::SchemaFlowError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the schema registry encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Base URL of the schema registry service.
    pub url: String,
    /// Subject pattern evaluated per message. May reference message
    /// metadata with `${meta:key}` placeholders.
    pub subject: String,
    /// Period after which a cached schema becomes eligible for a
    /// background refresh.
    #[serde(default = "default_refresh_period_ms")]
    pub refresh_period_ms: u64,
    /// Period of disuse after which a cached schema is purged entirely.
    /// Defaults to ten times the refresh period, and must never be
    /// shorter than it.
    #[serde(default)]
    pub purge_period_ms: Option<u64>,
    /// Whether incoming documents are raw JSON matching the schema rather
    /// than the Avro JSON encoding convention.
    #[serde(default)]
    pub raw_json_mode: bool,
    #[serde(default)]
    pub tls: Option<TlsClientConfig>,
}

fn default_refresh_period_ms() -> u64 {
    600_000 // 10 minutes
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            subject: String::new(),
            refresh_period_ms: default_refresh_period_ms(),
            purge_period_ms: None,
            raw_json_mode: false,
            tls: None,
        }
    }
}

impl EncoderConfig {
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| SchemaFlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.url.is_empty() {
            return Err(SchemaFlowError::Config(
                "registry url must not be empty".to_string(),
            ));
        }
        self.url
            .parse::<hyper::Uri>()
            .map_err(|e| SchemaFlowError::Config(format!("invalid registry url: {}", e)))?;
        if self.subject.is_empty() {
            return Err(SchemaFlowError::Config(
                "subject must not be empty".to_string(),
            ));
        }
        if self.refresh_period_ms == 0 {
            return Err(SchemaFlowError::Config(
                "refresh_period_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(purge_ms) = self.purge_period_ms {
            if purge_ms < self.refresh_period_ms {
                return Err(SchemaFlowError::Config(format!(
                    "purge_period_ms ({}) must not be shorter than refresh_period_ms ({})",
                    purge_ms, self.refresh_period_ms
                )));
            }
        }
        Ok(())
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_period_ms)
    }

    /// Idle threshold past which unused cache entries are evicted. An entry
    /// always gets at least one refresh chance before becoming purgeable.
    pub fn purge_period(&self) -> Duration {
        match self.purge_period_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_millis(self.refresh_period_ms.saturating_mul(10)),
        }
    }

    /// Cadence of the background refresher: a tenth of the refresh period,
    /// floored at one second so a large refresh period does not degrade
    /// staleness detection into per-second registry polling.
    pub fn refresh_tick_period(&self) -> Duration {
        let tick = self.refresh_period() / 10;
        if tick < Duration::from_secs(1) {
            Duration::from_secs(1)
        } else {
            tick
        }
    }
}

/// Transport security for the registry HTTP client. Opaque to everything
/// past client construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsClientConfig {
    /// PEM file containing the root certificates to trust.
    pub ca_cert_path: PathBuf,
    /// PEM certificate chain for client authentication.
    pub client_cert_path: Option<PathBuf>,
    /// PEM private key for client authentication.
    pub client_key_path: Option<PathBuf>,
}

impl TlsClientConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(SchemaFlowError::Config(
                "client_cert_path and client_key_path must be set together".to_string(),
            ));
        }
        Ok(())
    }

    pub fn client_config(&self) -> crate::Result<rustls::ClientConfig> {
        self.validate()?;

        let mut roots = rustls::RootCertStore::empty();
        let ca_pem = std::fs::read(&self.ca_cert_path)?;
        let certs = rustls_pemfile::certs(&mut ca_pem.as_slice())?;
        if certs.is_empty() {
            return Err(SchemaFlowError::Config(format!(
                "no certificates found in {}",
                self.ca_cert_path.display()
            )));
        }
        for cert in certs {
            roots.add(&rustls::Certificate(cert))?;
        }

        let builder = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots);

        let config = match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let cert_pem = std::fs::read(cert_path)?;
                let chain = rustls_pemfile::certs(&mut cert_pem.as_slice())?
                    .into_iter()
                    .map(rustls::Certificate)
                    .collect();

                let key_pem = std::fs::read(key_path)?;
                let mut keys = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_slice())?;
                if keys.is_empty() {
                    keys = rustls_pemfile::rsa_private_keys(&mut key_pem.as_slice())?;
                }
                let key = keys.into_iter().next().ok_or_else(|| {
                    SchemaFlowError::Config(format!(
                        "no private key found in {}",
                        key_path.display()
                    ))
                })?;

                builder.with_client_auth_cert(chain, rustls::PrivateKey(key))?
            }
            _ => builder.with_no_client_auth(),
        };

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> EncoderConfig {
        EncoderConfig {
            url: "http://localhost:8081".to_string(),
            subject: "orders-value".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn test_empty_url_rejected() {
        let config = EncoderConfig {
            url: String::new(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_subject_rejected() {
        let config = EncoderConfig {
            subject: String::new(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_purge_shorter_than_refresh_rejected() {
        let config = EncoderConfig {
            refresh_period_ms: 60_000,
            purge_period_ms: Some(30_000),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_purge_defaults_to_ten_refresh_periods() {
        let config = EncoderConfig {
            refresh_period_ms: 60_000,
            ..valid_config()
        };
        assert_eq!(config.purge_period(), Duration::from_secs(600));
    }

    #[test]
    fn test_refresh_tick_floor() {
        let fast = EncoderConfig {
            refresh_period_ms: 2_000,
            ..valid_config()
        };
        assert_eq!(fast.refresh_tick_period(), Duration::from_secs(1));

        let slow = EncoderConfig {
            refresh_period_ms: 600_000,
            ..valid_config()
        };
        assert_eq!(slow.refresh_tick_period(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_toml() {
        let config = EncoderConfig::from_toml(
            r#"
            url = "http://localhost:8081"
            subject = "orders-${meta:kafka_topic}"
            refresh_period_ms = 60000
            raw_json_mode = true
            "#,
        )
        .unwrap();
        assert_eq!(config.subject, "orders-${meta:kafka_topic}");
        assert!(config.raw_json_mode);
        assert_eq!(config.refresh_period(), Duration::from_secs(60));
    }

    #[test]
    fn test_tls_cert_without_key_rejected() {
        let tls = TlsClientConfig {
            ca_cert_path: PathBuf::from("/tmp/ca.pem"),
            client_cert_path: Some(PathBuf::from("/tmp/client.pem")),
            client_key_path: None,
        };
        assert!(tls.validate().is_err());
    }
}
