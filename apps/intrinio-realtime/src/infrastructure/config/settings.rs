//! Client Configuration Settings
//!
//! Configuration types for the feed client, loaded from environment variables.
//!
//! Loading goes through a lookup function so the same parsing runs against
//! the process environment in the binary and against a map in tests.

use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::infrastructure::intrinio::reconnect::{BackoffSequence, DEFAULT_BACKOFF_MS};

// =============================================================================
// Credentials
// =============================================================================

/// Feed account credentials, sent as HTTP Basic auth.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Get the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// Feed host and transport security.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Feed host name.
    pub host: String,
    /// Feed port, shared by the auth endpoint and the socket.
    pub port: u16,
    /// Use `https`/`wss` when true, `http`/`ws` otherwise.
    pub tls: bool,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "realtime.intrinio.com".to_string(),
            port: 443,
            tls: true,
        }
    }
}

impl Endpoint {
    const fn http_scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }

    const fn ws_scheme(&self) -> &'static str {
        if self.tls { "wss" } else { "ws" }
    }

    /// URL of the token endpoint.
    #[must_use]
    pub fn auth_url(&self) -> String {
        format!("{}://{}:{}/auth", self.http_scheme(), self.host, self.port)
    }

    /// URL of the Phoenix socket, with the token URL-encoded in the query.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the host does not form a valid
    /// URL.
    pub fn socket_url(&self, token: &str) -> Result<Url, ConfigError> {
        let base = format!(
            "{}://{}:{}/socket/websocket",
            self.ws_scheme(),
            self.host,
            self.port
        );
        Url::parse_with_params(&base, &[("vsn", "1.0.0"), ("token", token)]).map_err(|e| {
            ConfigError::InvalidValue {
                key: "INTRINIO_HOST".to_string(),
                value: self.host.clone(),
                reason: e.to_string(),
            }
        })
    }
}

// =============================================================================
// Client Config
// =============================================================================

/// Settings for a single feed connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Account credentials.
    pub credentials: Credentials,
    /// Feed endpoint.
    pub endpoint: Endpoint,
    /// Period between heartbeats while connected.
    pub heartbeat_interval: Duration,
    /// Period between forced token renewals.
    pub token_renewal_interval: Duration,
    /// Self-heal delays, consumed front to back.
    pub self_heal_backoff: Vec<Duration>,
    /// Maximum outbound frame size in bytes.
    pub max_chunk_size: usize,
    /// Timeout for the auth HTTP request.
    pub http_timeout: Duration,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Capacity of the quote broadcast channel.
    pub quote_capacity: usize,
    /// Capacity of the error broadcast channel.
    pub error_capacity: usize,
}

impl ClientConfig {
    /// Default heartbeat period.
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
    /// Default token renewal period (7 days).
    pub const DEFAULT_TOKEN_RENEWAL_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
    /// Default outbound frame size.
    pub const DEFAULT_MAX_CHUNK_SIZE: usize = 255;
    /// Default auth request timeout.
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default WebSocket handshake timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default quote channel capacity.
    pub const DEFAULT_QUOTE_CAPACITY: usize = 10_000;
    /// Default error channel capacity.
    pub const DEFAULT_ERROR_CAPACITY: usize = 256;

    /// Create a configuration with default settings for `credentials`.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            endpoint: Endpoint::default(),
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            token_renewal_interval: Self::DEFAULT_TOKEN_RENEWAL_INTERVAL,
            self_heal_backoff: DEFAULT_BACKOFF_MS
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
            max_chunk_size: Self::DEFAULT_MAX_CHUNK_SIZE,
            http_timeout: Self::DEFAULT_HTTP_TIMEOUT,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            quote_capacity: Self::DEFAULT_QUOTE_CAPACITY,
            error_capacity: Self::DEFAULT_ERROR_CAPACITY,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or a value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = required(&lookup, "INTRINIO_USERNAME")?;
        let password = required(&lookup, "INTRINIO_PASSWORD")?;
        let defaults = Self::new(Credentials::new(username, password));

        let endpoint = Endpoint {
            host: optional(&lookup, "INTRINIO_HOST").unwrap_or(defaults.endpoint.host),
            port: parse_env(&lookup, "INTRINIO_PORT", defaults.endpoint.port)?,
            tls: parse_env_bool(&lookup, "INTRINIO_TLS", defaults.endpoint.tls)?,
        };

        let config = Self {
            endpoint,
            heartbeat_interval: parse_env_duration_secs(
                &lookup,
                "INTRINIO_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            )?,
            token_renewal_interval: parse_env_duration_secs(
                &lookup,
                "INTRINIO_TOKEN_RENEWAL_INTERVAL_SECS",
                defaults.token_renewal_interval,
            )?,
            self_heal_backoff: parse_env_millis_list(
                &lookup,
                "INTRINIO_SELF_HEAL_BACKOFF_MS",
                defaults.self_heal_backoff.clone(),
            )?,
            max_chunk_size: parse_env(
                &lookup,
                "INTRINIO_MAX_CHUNK_SIZE",
                defaults.max_chunk_size,
            )?,
            http_timeout: parse_env_duration_secs(
                &lookup,
                "INTRINIO_HTTP_TIMEOUT_SECS",
                defaults.http_timeout,
            )?,
            connect_timeout: parse_env_duration_secs(
                &lookup,
                "INTRINIO_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            )?,
            quote_capacity: parse_env(
                &lookup,
                "INTRINIO_QUOTE_CAPACITY",
                defaults.quote_capacity,
            )?,
            error_capacity: parse_env(
                &lookup,
                "INTRINIO_ERROR_CAPACITY",
                defaults.error_capacity,
            )?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the client unusable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyValue`] for blank credentials and
    /// [`ConfigError::InvalidValue`] for zero periods, sizes or capacities.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.username().trim().is_empty() {
            return Err(ConfigError::EmptyValue("INTRINIO_USERNAME".to_string()));
        }
        if self.credentials.password().trim().is_empty() {
            return Err(ConfigError::EmptyValue("INTRINIO_PASSWORD".to_string()));
        }

        ensure_nonzero(
            "INTRINIO_HEARTBEAT_INTERVAL_SECS",
            self.heartbeat_interval.is_zero(),
        )?;
        ensure_nonzero(
            "INTRINIO_TOKEN_RENEWAL_INTERVAL_SECS",
            self.token_renewal_interval.is_zero(),
        )?;
        ensure_nonzero("INTRINIO_HTTP_TIMEOUT_SECS", self.http_timeout.is_zero())?;
        ensure_nonzero(
            "INTRINIO_CONNECT_TIMEOUT_SECS",
            self.connect_timeout.is_zero(),
        )?;
        ensure_nonzero("INTRINIO_MAX_CHUNK_SIZE", self.max_chunk_size == 0)?;
        ensure_nonzero("INTRINIO_QUOTE_CAPACITY", self.quote_capacity == 0)?;
        ensure_nonzero("INTRINIO_ERROR_CAPACITY", self.error_capacity == 0)?;

        self.backoff()?;

        self.endpoint.socket_url("")?;
        Ok(())
    }

    /// Build the self-heal backoff sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the list is empty or its
    /// final delay is zero.
    pub fn backoff(&self) -> Result<BackoffSequence, ConfigError> {
        BackoffSequence::new(self.self_heal_backoff.clone()).map_err(|e| {
            let millis: Vec<String> = self
                .self_heal_backoff
                .iter()
                .map(|d| d.as_millis().to_string())
                .collect();
            invalid("INTRINIO_SELF_HEAL_BACKOFF_MS", &millis.join(","), e)
        })
    }
}

// =============================================================================
// App Config
// =============================================================================

/// Settings for the binary: the client plus what to do with it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Feed client settings.
    pub client: ClientConfig,
    /// Channels joined at startup.
    pub channels: Vec<String>,
    /// Prometheus exporter port (0 disables the exporter).
    pub metrics_port: u16,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or a
    /// value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or a value is
    /// invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client = ClientConfig::from_lookup(&lookup)?;

        let channels = lookup("INTRINIO_CHANNELS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            client,
            channels,
            metrics_port: parse_env(&lookup, "INTRINIO_METRICS_PORT", 0)?,
        })
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed or is out of range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

// =============================================================================
// Parsing Helpers
// =============================================================================

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

/// Look up a trimmed, non-blank value. Blank counts as unset.
fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn invalid(key: &str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn ensure_nonzero(key: &str, is_zero: bool) -> Result<(), ConfigError> {
    if is_zero {
        return Err(invalid(key, "0", "must be greater than zero"));
    }
    Ok(())
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional(lookup, key).map_or(Ok(default), |v| {
        v.parse().map_err(|e| invalid(key, &v, e))
    })
}

fn parse_env_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key).map_or(Ok(default), |v| match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, &v, "expected true or false")),
    })
}

fn parse_env_duration_secs<F>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_env(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn parse_env_millis_list<F>(
    lookup: &F,
    key: &str,
    default: Vec<Duration>,
) -> Result<Vec<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = optional(lookup, key) else {
        return Ok(default);
    };

    raw.split(',')
        .map(str::trim)
        .map(|part| {
            part.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| invalid(key, &raw, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const CREDS: [(&str, &str); 2] = [
        ("INTRINIO_USERNAME", "user"),
        ("INTRINIO_PASSWORD", "pass"),
    ];

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("user123".to_string(), "secret456".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("user123"));
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn defaults_with_only_credentials() {
        let config = ClientConfig::from_lookup(lookup_from(&CREDS)).unwrap();

        assert_eq!(config.endpoint, Endpoint::default());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(
            config.token_renewal_interval,
            Duration::from_secs(604_800)
        );
        assert_eq!(config.self_heal_backoff.len(), 6);
        assert_eq!(config.self_heal_backoff[5], Duration::from_secs(5));
        assert_eq!(config.max_chunk_size, 255);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.quote_capacity, 10_000);
        assert_eq!(config.error_capacity, 256);
    }

    #[test]
    fn missing_username() {
        let err =
            ClientConfig::from_lookup(lookup_from(&[("INTRINIO_PASSWORD", "p")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingEnvVar("INTRINIO_USERNAME".to_string())
        );
    }

    #[test]
    fn empty_password() {
        let err = ClientConfig::from_lookup(lookup_from(&[
            ("INTRINIO_USERNAME", "u"),
            ("INTRINIO_PASSWORD", "  "),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::EmptyValue("INTRINIO_PASSWORD".to_string()));
    }

    #[test]
    fn overrides_are_applied() {
        let mut pairs = CREDS.to_vec();
        pairs.extend([
            ("INTRINIO_HOST", "localhost"),
            ("INTRINIO_PORT", "4000"),
            ("INTRINIO_TLS", "false"),
            ("INTRINIO_HEARTBEAT_INTERVAL_SECS", "5"),
            ("INTRINIO_SELF_HEAL_BACKOFF_MS", "10, 20,30"),
            ("INTRINIO_MAX_CHUNK_SIZE", "64"),
        ]);
        let config = ClientConfig::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.endpoint.auth_url(), "http://localhost:4000/auth");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(
            config.self_heal_backoff,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(30)
            ]
        );
        assert_eq!(config.max_chunk_size, 64);
    }

    #[test_case("INTRINIO_PORT", "not-a-port" ; "port")]
    #[test_case("INTRINIO_TLS", "maybe" ; "tls flag")]
    #[test_case("INTRINIO_SELF_HEAL_BACKOFF_MS", "0,abc" ; "backoff list")]
    #[test_case("INTRINIO_SELF_HEAL_BACKOFF_MS", "0" ; "only zero backoff")]
    #[test_case("INTRINIO_SELF_HEAL_BACKOFF_MS", "100,0" ; "zero final backoff")]
    #[test_case("INTRINIO_HEARTBEAT_INTERVAL_SECS", "0" ; "zero heartbeat")]
    #[test_case("INTRINIO_CONNECT_TIMEOUT_SECS", "0" ; "zero connect timeout")]
    #[test_case("INTRINIO_QUOTE_CAPACITY", "0" ; "zero capacity")]
    fn invalid_values_rejected(key: &str, value: &str) {
        let mut pairs = CREDS.to_vec();
        pairs.push((key, value));
        let err = ClientConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: k, .. } if k == key));
    }

    #[test]
    fn socket_url_encodes_token() {
        let endpoint = Endpoint::default();
        let url = endpoint.socket_url("a+b/c=").unwrap();

        assert_eq!(
            url.as_str(),
            "wss://realtime.intrinio.com/socket/websocket?vsn=1.0.0&token=a%2Bb%2Fc%3D"
        );
    }

    #[test]
    fn app_config_channels() {
        let mut pairs = CREDS.to_vec();
        pairs.push(("INTRINIO_CHANNELS", "AAPL, MSFT,,$lobby "));
        let config = AppConfig::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.channels, vec!["AAPL", "MSFT", "$lobby"]);
        assert_eq!(config.metrics_port, 0);
    }
}
