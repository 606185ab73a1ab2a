//! Proxy Configuration Settings
//!
//! Configuration types for the price stream proxy, loaded from environment
//! variables.

use std::time::Duration;

use crate::application::services::SubscriptionServiceConfig;

/// Upstream price service settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Price service host.
    pub host: String,
    /// Price service port.
    pub port: u16,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// Depth of the outbound interest queue on the price stream.
    pub interest_queue_capacity: usize,
}

impl UpstreamSettings {
    /// Endpoint URI for the gRPC channel.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4000,
            connect_timeout: Duration::from_secs(10),
            interest_queue_capacity: 64,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket gateway port.
    pub gateway_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            gateway_port: 6000,
            health_port: 8082,
        }
    }
}

/// Subscriber fan-out settings.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    /// Capacity of every subscriber outbox.
    pub outbox_capacity: usize,
    /// Period of the interest resync task.
    pub resync_interval: Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        let service = SubscriptionServiceConfig::default();
        Self {
            outbox_capacity: service.outbox_capacity,
            resync_interval: service.resync_interval,
        }
    }
}

impl From<&SubscriptionSettings> for SubscriptionServiceConfig {
    fn from(settings: &SubscriptionSettings) -> Self {
        Self {
            outbox_capacity: settings.outbox_capacity,
            resync_interval: settings.resync_interval,
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Upstream price service settings.
    pub upstream: UpstreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Subscriber fan-out settings.
    pub subscriptions: SubscriptionSettings,
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is empty or semantically invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is empty or semantically invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("PRICE_SERVICE_HOST").unwrap_or(defaults.upstream.host);
        if host.trim().is_empty() {
            return Err(ConfigError::EmptyValue("PRICE_SERVICE_HOST".to_string()));
        }

        let upstream = UpstreamSettings {
            host,
            port: parse_or(&lookup, "PRICE_SERVICE_PORT", defaults.upstream.port),
            connect_timeout: Duration::from_secs(non_zero(
                "PRICE_PROXY_CONNECT_TIMEOUT_SECS",
                parse_or(
                    &lookup,
                    "PRICE_PROXY_CONNECT_TIMEOUT_SECS",
                    defaults.upstream.connect_timeout.as_secs(),
                ),
            )?),
            interest_queue_capacity: non_zero(
                "PRICE_PROXY_INTEREST_QUEUE_CAPACITY",
                parse_or(
                    &lookup,
                    "PRICE_PROXY_INTEREST_QUEUE_CAPACITY",
                    defaults.upstream.interest_queue_capacity,
                ),
            )?,
        };

        let server = ServerSettings {
            gateway_port: parse_or(&lookup, "PORT", defaults.server.gateway_port),
            health_port: parse_or(&lookup, "PRICE_PROXY_HEALTH_PORT", defaults.server.health_port),
        };

        let subscriptions = SubscriptionSettings {
            outbox_capacity: non_zero(
                "PRICE_PROXY_OUTBOX_CAPACITY",
                parse_or(
                    &lookup,
                    "PRICE_PROXY_OUTBOX_CAPACITY",
                    defaults.subscriptions.outbox_capacity,
                ),
            )?,
            resync_interval: Duration::from_secs(non_zero(
                "PRICE_PROXY_RESYNC_INTERVAL_SECS",
                parse_or(
                    &lookup,
                    "PRICE_PROXY_RESYNC_INTERVAL_SECS",
                    defaults.subscriptions.resync_interval.as_secs(),
                ),
            )?),
        };

        Ok(Self {
            upstream,
            server,
            subscriptions,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable parsed but is not usable.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Parse `key` from the lookup, falling back to `default` when the value is
/// absent or unparsable.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_zero<T>(key: &str, value: T) -> Result<T, ConfigError>
where
    T: Default + PartialEq,
{
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
