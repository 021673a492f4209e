//! Service configuration.

use std::time::Duration;

use config::{Config, ConfigError, Environment, Source};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::{BROKER_PORT, DEFAULT_HTTP_PORT, DEFAULT_RECONNECT_BACKOFF_SECS};

/// Upper bound for `SCAN_INTERVAL_HOURS` (one year).
const MAX_SCAN_INTERVAL_HOURS: u64 = 24 * 366;

/// Upper bound for `RECONNECT_BACKOFF_SECS` (one hour).
const MAX_RECONNECT_BACKOFF_SECS: u64 = 60 * 60;

/// Global relay configuration.
///
/// Every field maps to the upper-cased environment variable of the same name,
/// e.g. `rabbitmq_host` <- `RABBITMQ_HOST`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Broker host name
    pub rabbitmq_host: String,

    /// Broker user
    pub rabbitmq_user: String,

    /// Broker password
    pub rabbitmq_pass: String,

    /// Host of the user verification gRPC service
    pub auth_service_host: String,

    /// Port of the user verification gRPC service
    pub auth_service_grpc_port: u16,

    /// Verify users over gRPC before charging
    pub auth_service_enabled: bool,

    /// HTTP listen port
    pub port: u16,

    /// Seconds the worker waits before reconnecting
    pub reconnect_backoff_secs: u64,

    /// Stripe secret key; the simulated gateway is used when unset
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Stripe API base URL
    pub stripe_api_base: String,

    /// Base URL called by the subscription scan
    pub payment_endpoint_url: String,

    /// Hours between subscription scans
    pub scan_interval_hours: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            rabbitmq_host: "localhost".to_string(),
            rabbitmq_user: "user".to_string(),
            rabbitmq_pass: "password".to_string(),
            auth_service_host: "auth-service".to_string(),
            auth_service_grpc_port: 50051,
            auth_service_enabled: false,
            port: DEFAULT_HTTP_PORT,
            reconnect_backoff_secs: DEFAULT_RECONNECT_BACKOFF_SECS,
            stripe_secret_key: None,
            stripe_api_base: "https://api.stripe.com".to_string(),
            payment_endpoint_url: "https://dummy-payment-endpoint.com".to_string(),
            scan_interval_hours: 24,
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_source(Environment::default().try_parsing(true))
    }

    /// Layer `source` over the defaults.
    pub fn from_source<S>(source: S) -> Result<Self>
    where
        S: Source + Send + Sync + 'static,
    {
        let config: Self = Config::builder()
            .add_source(Config::try_from(&RelayConfig::default())?)
            .add_source(source)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the background tasks.
    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(1..=MAX_SCAN_INTERVAL_HOURS).contains(&self.scan_interval_hours) {
            return Err(ConfigError::Message(format!(
                "SCAN_INTERVAL_HOURS must be between 1 and {}, got {}",
                MAX_SCAN_INTERVAL_HOURS, self.scan_interval_hours
            )));
        }
        if !(1..=MAX_RECONNECT_BACKOFF_SECS).contains(&self.reconnect_backoff_secs) {
            return Err(ConfigError::Message(format!(
                "RECONNECT_BACKOFF_SECS must be between 1 and {}, got {}",
                MAX_RECONNECT_BACKOFF_SECS, self.reconnect_backoff_secs
            )));
        }
        Ok(())
    }

    /// AMQP URI of the broker (default vhost).
    ///
    /// Built field by field so credentials are never parsed as URI syntax.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.rabbitmq_user.clone(),
                    password: self.rabbitmq_pass.clone(),
                },
                host: self.rabbitmq_host.clone(),
                port: BROKER_PORT,
            },
            vhost: "/".to_string(),
            ..Default::default()
        }
    }

    /// URI of the user verification service.
    pub fn auth_service_uri(&self) -> String {
        format!("http://{}:{}", self.auth_service_host, self.auth_service_grpc_port)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs.clamp(1, MAX_RECONNECT_BACKOFF_SECS))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_hours.clamp(1, MAX_SCAN_INTERVAL_HOURS) * 60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().try_parsing(true).source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::from_source(env(&[])).unwrap();

        assert_eq!(config.rabbitmq_host, "localhost");
        assert_eq!(config.rabbitmq_user, "user");
        assert_eq!(config.rabbitmq_pass, "password");
        assert_eq!(config.auth_service_host, "auth-service");
        assert_eq!(config.auth_service_grpc_port, 50051);
        assert!(!config.auth_service_enabled);
        assert!(config.stripe_secret_key.is_none());
        assert_eq!(config.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(config.scan_interval(), Duration::from_secs(24 * 60 * 60));

        let uri = config.amqp_uri();
        assert_eq!(uri.authority.host, "localhost");
        assert_eq!(uri.authority.port, 5672);
        assert_eq!(uri.authority.userinfo.username, "user");
        assert_eq!(uri.vhost, "/");
    }

    #[test]
    fn test_environment_overrides() {
        let config = RelayConfig::from_source(env(&[
            ("RABBITMQ_HOST", "rabbit"),
            ("RABBITMQ_USER", "billing"),
            ("AUTH_SERVICE_GRPC_PORT", "6000"),
            ("AUTH_SERVICE_ENABLED", "true"),
            ("RECONNECT_BACKOFF_SECS", "1"),
            ("STRIPE_SECRET_KEY", "sk_test_123"),
        ]))
        .unwrap();

        let uri = config.amqp_uri();
        assert_eq!(uri.authority.host, "rabbit");
        assert_eq!(uri.authority.userinfo.username, "billing");
        assert_eq!(config.auth_service_uri(), "http://auth-service:6000");
        assert!(config.auth_service_enabled);
        assert_eq!(config.reconnect_backoff(), Duration::from_secs(1));
        assert_eq!(config.stripe_secret_key.as_deref(), Some("sk_test_123"));
    }

    #[test]
    fn test_reserved_characters_in_credentials() {
        let config = RelayConfig::from_source(env(&[
            ("RABBITMQ_USER", "ops:billing"),
            ("RABBITMQ_PASS", "p@ss/w#rd?%2f"),
        ]))
        .unwrap();

        let uri = config.amqp_uri();
        assert_eq!(uri.authority.host, "localhost");
        assert_eq!(uri.authority.port, 5672);
        assert_eq!(uri.authority.userinfo.username, "ops:billing");
        assert_eq!(uri.authority.userinfo.password, "p@ss/w#rd?%2f");
        assert_eq!(uri.vhost, "/");
    }

    #[test]
    fn test_out_of_range_intervals_are_rejected() {
        for vars in [
            [("SCAN_INTERVAL_HOURS", "0")],
            [("SCAN_INTERVAL_HOURS", "18446744073709551615")],
            [("RECONNECT_BACKOFF_SECS", "0")],
            [("RECONNECT_BACKOFF_SECS", "86400")],
        ] {
            let result = RelayConfig::from_source(env(&vars));
            assert!(
                matches!(result, Err(RelayError::Config(_))),
                "{:?} should be rejected",
                vars
            );
        }

        let config = RelayConfig::from_source(env(&[("SCAN_INTERVAL_HOURS", "1")])).unwrap();
        assert_eq!(config.scan_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_hand_built_config_never_yields_zero_durations() {
        let config = RelayConfig {
            scan_interval_hours: 0,
            reconnect_backoff_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.scan_interval(), Duration::from_secs(3600));
        assert_eq!(config.reconnect_backoff(), Duration::from_secs(1));

        let huge = RelayConfig {
            scan_interval_hours: u64::MAX,
            ..Default::default()
        };
        assert_eq!(huge.scan_interval(), Duration::from_secs(MAX_SCAN_INTERVAL_HOURS * 3600));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let result = RelayConfig::from_source(env(&[("AUTH_SERVICE_GRPC_PORT", "not-a-port")]));
        assert!(result.is_err());
    }
}
