//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// WebSocket configuration
    pub websocket: WebSocketSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Heartbeat client configuration
    pub client: ClientSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Maximum frame size in bytes (default: 16KB)
    pub max_frame_size: usize,

    /// Close a session after this long without a ping (default: 90000)
    pub idle_timeout_ms: u64,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// Reconnect delay growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `retry_delay_ms * attempt`
    Linear,
    /// `retry_delay_ms * 2^(attempt - 1)`
    Exponential,
}

/// Heartbeat client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    /// Presence endpoint, e.g. ws://localhost:8080/ws
    pub url: String,

    /// Identity sent as the `userId` query parameter
    pub user_id: String,

    /// Identity sent as the `username` query parameter
    pub username: String,

    /// Heartbeat period
    pub ping_interval_ms: u64,

    /// How long a probe may stay unanswered
    pub pong_timeout_ms: u64,

    /// Reconnect attempts before giving up
    pub max_retries: u32,

    /// Base reconnect delay
    pub retry_delay_ms: u64,

    /// Cap on any single reconnect delay
    pub max_retry_delay_ms: u64,

    /// Delay growth between attempts
    pub backoff: Backoff,

    /// RTT below this is `Excellent`
    pub excellent_rtt_ms: u64,

    /// RTT below this is `Good`, otherwise `Poor`
    pub good_rtt_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".into(),
            user_id: String::new(),
            username: String::new(),
            ping_interval_ms: 30_000,
            pong_timeout_ms: 10_000,
            max_retries: 5,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            backoff: Backoff::Linear,
            excellent_rtt_ms: 100,
            good_rtt_ms: 300,
        }
    }
}

impl ClientSettings {
    /// Check invariants the state machine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval_ms == 0 {
            return Err(ConfigError::Message(
                "client.ping_interval_ms must be greater than zero".into(),
            ));
        }
        if self.pong_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "client.pong_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.excellent_rtt_ms > self.good_rtt_ms {
            return Err(ConfigError::Message(format!(
                "client.excellent_rtt_ms ({}) must not exceed client.good_rtt_ms ({})",
                self.excellent_rtt_ms, self.good_rtt_ms
            )));
        }
        Ok(())
    }
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the heartbeat settings are inconsistent.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());
        let client = ClientSettings::default();

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("cors.allowed_origins", vec!["http://localhost:8080"])?
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.max_frame_size", 16384_i64)? // 16KB
            .set_default("websocket.idle_timeout_ms", 90000_i64)?
            .set_default("client.url", client.url)?
            .set_default("client.user_id", client.user_id)?
            .set_default("client.username", client.username)?
            .set_default("client.ping_interval_ms", client.ping_interval_ms as i64)?
            .set_default("client.pong_timeout_ms", client.pong_timeout_ms as i64)?
            .set_default("client.max_retries", client.max_retries as i64)?
            .set_default("client.retry_delay_ms", client.retry_delay_ms as i64)?
            .set_default("client.max_retry_delay_ms", client.max_retry_delay_ms as i64)?
            .set_default("client.backoff", "linear")?
            .set_default("client.excellent_rtt_ms", client.excellent_rtt_ms as i64)?
            .set_default("client.good_rtt_ms", client.good_rtt_ms as i64)?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SERVER__PORT=8080 -> server.port = 8080
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("client.url", std::env::var("PRESENCE_URL").ok())?
            .set_override_option("client.user_id", std::env::var("PRESENCE_USER_ID").ok())?
            .set_override_option("client.username", std::env::var("PRESENCE_USERNAME").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                if settings.websocket.idle_timeout_ms == 0 {
                    return Err(ConfigError::Message(
                        "websocket.idle_timeout_ms must be greater than zero".into(),
                    ));
                }
                settings.client.validate()?;
                Ok(settings)
            })
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
