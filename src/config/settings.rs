use serde::Deserialize;

/// Top-level configuration for the router.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub keepalive: KeepaliveSettings,
    pub mapper: MapperSettings,
    pub logging: LoggingSettings,
}

/// Where the device listener binds.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Coordinator settings.
///
/// `request_queue_capacity` bounds the shared request channel; connections
/// wait for room instead of dropping requests.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub request_queue_capacity: usize,
}

/// Keepalive timing, in whole seconds.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct KeepaliveSettings {
    pub ping_interval_secs: u64,
    pub pong_grace_secs: u64,
}

/// Route mapper settings.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MapperSettings {
    pub enabled: bool,
    pub setup_url: String,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Settings as read from files or the environment, before defaults apply.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub keepalive: Option<PartialKeepaliveSettings>,
    pub mapper: Option<PartialMapperSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub request_queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialKeepaliveSettings {
    pub ping_interval_secs: Option<u64>,
    pub pong_grace_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialMapperSettings {
    pub enabled: Option<bool>,
    pub setup_url: Option<String>,
    pub retry_backoff_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 42069,
            },
            broker: BrokerSettings {
                request_queue_capacity: 1024,
            },
            keepalive: KeepaliveSettings {
                ping_interval_secs: 30,
                pong_grace_secs: 10,
            },
            mapper: MapperSettings {
                enabled: true,
                setup_url: "http://localhost:8000/v1/mapping".to_string(),
                retry_backoff_ms: 1000,
                request_timeout_secs: 5,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from [`Settings::default`].
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let keepalive = self.keepalive.unwrap_or_default();
        let mapper = self.mapper.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            broker: BrokerSettings {
                request_queue_capacity: broker
                    .request_queue_capacity
                    .unwrap_or(default.broker.request_queue_capacity),
            },
            keepalive: KeepaliveSettings {
                ping_interval_secs: keepalive
                    .ping_interval_secs
                    .unwrap_or(default.keepalive.ping_interval_secs),
                pong_grace_secs: keepalive
                    .pong_grace_secs
                    .unwrap_or(default.keepalive.pong_grace_secs),
            },
            mapper: MapperSettings {
                enabled: mapper.enabled.unwrap_or(default.mapper.enabled),
                setup_url: mapper.setup_url.unwrap_or(default.mapper.setup_url),
                retry_backoff_ms: mapper
                    .retry_backoff_ms
                    .unwrap_or(default.mapper.retry_backoff_ms),
                request_timeout_secs: mapper
                    .request_timeout_secs
                    .unwrap_or(default.mapper.request_timeout_secs),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}
