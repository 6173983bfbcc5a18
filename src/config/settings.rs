use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Groups the broker endpoint, the connect-retry policy and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub retry: RetrySettings,
    pub log: LogSettings,
}

/// Broker endpoint and routing settings.
///
/// Credentials are passed to the broker as-is and never logged.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    pub heartbeat_secs: u16,
    /// Exchange shared by telemetry and control traffic.
    pub exchange: String,
    /// Unacknowledged deliveries the broker may push per consumer.
    pub prefetch: u16,
}

impl BrokerSettings {
    /// `host:port`, used in diagnostics.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connect-retry policy. Disabled by default: one-shot tools fail fast.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetrySettings {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional; missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub retry: Option<PartialRetrySettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub vhost: Option<String>,
    pub heartbeat_secs: Option<u16>,
    pub exchange: Option<String>,
    pub prefetch: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRetrySettings {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fill every missing value from `defaults`.
    pub fn merge_over(self, defaults: Settings) -> Settings {
        let broker = self.broker.unwrap_or_default();
        let retry = self.retry.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                host: broker.host.unwrap_or(defaults.broker.host),
                port: broker.port.unwrap_or(defaults.broker.port),
                username: broker.username.unwrap_or(defaults.broker.username),
                password: broker.password.unwrap_or(defaults.broker.password),
                vhost: broker.vhost.unwrap_or(defaults.broker.vhost),
                heartbeat_secs: broker
                    .heartbeat_secs
                    .unwrap_or(defaults.broker.heartbeat_secs),
                exchange: broker.exchange.unwrap_or(defaults.broker.exchange),
                prefetch: broker.prefetch.unwrap_or(defaults.broker.prefetch),
            },
            retry: RetrySettings {
                enabled: retry.enabled.unwrap_or(defaults.retry.enabled),
                max_attempts: retry.max_attempts.unwrap_or(defaults.retry.max_attempts),
                initial_backoff_ms: retry
                    .initial_backoff_ms
                    .unwrap_or(defaults.retry.initial_backoff_ms),
                max_backoff_ms: retry
                    .max_backoff_ms
                    .unwrap_or(defaults.retry.max_backoff_ms),
            },
            log: LogSettings {
                level: log.level.unwrap_or(defaults.log.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// A local RabbitMQ with the stock guest account and the vehicle exchange.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                host: "127.0.0.1".to_string(),
                port: 5672,
                username: "guest".to_string(),
                password: "guest".to_string(),
                vhost: "/".to_string(),
                heartbeat_secs: 60,
                exchange: "vehicle.exchange".to_string(),
                prefetch: 16,
            },
            retry: RetrySettings {
                enabled: false,
                max_attempts: 5,
                initial_backoff_ms: 500,
                max_backoff_ms: 30_000,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
