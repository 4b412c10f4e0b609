use serde::Deserialize;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "parlor.toml";

/// Top-level server configuration, loaded from `parlor.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
    pub protocol: ProtocolConfig,
    pub history: HistoryConfig,
    /// Accounts created at startup.
    pub users: Vec<SeedUser>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthFileConfig::default(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
            protocol: ProtocolConfig::default(),
            history: HistoryConfig::default(),
            users: Vec::new(),
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Maximum concurrent WebSocket connections per IP address.
    pub max_ws_per_ip: usize,
    /// Inbound envelopes per second per connection (token bucket refill).
    pub ws_rate_limit_per_sec: f64,
    /// Outbound queue depth per connection; a full queue drops deliveries.
    pub outbound_buffer: usize,
    /// Authentication attempts: burst per IP.
    pub auth_attempts_burst: usize,
    /// Authentication attempts: refill rate per IP per second.
    pub auth_attempts_per_sec: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 1000,
            max_ws_per_ip: 20,
            ws_rate_limit_per_sec: 50.0,
            outbound_buffer: 256,
            auth_attempts_burst: 10,
            auth_attempts_per_sec: 0.5,
        }
    }
}

/// Room behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Deliver a room broadcast back to its sender as well.
    pub echo_to_sender: bool,
    /// Rooms created at startup.
    pub initial: Vec<String>,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
            initial: Vec::new(),
        }
    }
}

/// Wire-protocol options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Echo an `error` envelope to the sender when an operation is rejected.
    pub error_replies: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            error_replies: true,
        }
    }
}

/// Message history retained by the in-process message log.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_messages_per_room: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages_per_room: 500,
        }
    }
}

/// Auth section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// Bearer token for the admin REST API. None = admin auth disabled.
    pub admin_token: Option<String>,
}

/// An account provisioned at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub username: String,
    pub password: String,
}

impl ServerConfig {
    /// Check the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr {:?} is not a valid socket address",
                self.listen_addr
            ));
        }
        if self.limits.max_ws_connections == 0 {
            return Err("limits.max_ws_connections must be > 0".to_string());
        }
        if self.limits.max_ws_per_ip == 0 {
            return Err("limits.max_ws_per_ip must be > 0".to_string());
        }
        let ws_rate = self.limits.ws_rate_limit_per_sec;
        if !ws_rate.is_finite() || ws_rate <= 0.0 {
            return Err("limits.ws_rate_limit_per_sec must be a finite number > 0".to_string());
        }
        if self.limits.outbound_buffer == 0 {
            return Err("limits.outbound_buffer must be > 0".to_string());
        }
        if self.limits.auth_attempts_burst == 0 {
            return Err("limits.auth_attempts_burst must be > 0".to_string());
        }
        let auth_rate = self.limits.auth_attempts_per_sec;
        if !auth_rate.is_finite() || auth_rate < 0.0 {
            return Err("limits.auth_attempts_per_sec must be a finite number >= 0".to_string());
        }
        if self.history.max_messages_per_room == 0 {
            return Err("history.max_messages_per_room must be > 0".to_string());
        }
        if let Some(name) = self.rooms.initial.iter().find(|r| r.is_empty()) {
            return Err(format!("rooms.initial contains an invalid name {name:?}"));
        }

        if self.auth.admin_token.is_some() {
            tracing::warn!(
                "admin_token is set in config file; use PARLOR_ADMIN_TOKEN env var in production"
            );
        }
        if !self.users.is_empty() {
            tracing::warn!(
                count = self.users.len(),
                "Seed users with plaintext passwords configured"
            );
        }
        Ok(())
    }

    /// Load config from `PARLOR_CONFIG` (or `parlor.toml`) if it exists, then
    /// apply environment overrides.
    pub fn load() -> Self {
        let path =
            std::env::var("PARLOR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_file(&path);
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn load_file(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path, "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(path, "Failed to parse config: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path, "No config file found, using defaults");
                ServerConfig::default()
            },
        }
    }

    /// Apply `PARLOR_*` overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("PARLOR_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Some(token) = lookup("PARLOR_ADMIN_TOKEN")
            && !token.is_empty()
        {
            self.auth.admin_token = Some(token);
        }
        if let Some(n) = lookup("PARLOR_MAX_WS_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.limits.max_ws_connections = n;
        }
        if let Some(n) = lookup("PARLOR_WS_RATE_LIMIT").and_then(|v| v.parse().ok()) {
            self.limits.ws_rate_limit_per_sec = n;
        }
        if let Some(b) = lookup("PARLOR_ERROR_REPLIES").and_then(|v| v.parse().ok()) {
            self.protocol.error_replies = b;
        }
        if let Some(b) = lookup("PARLOR_ECHO_TO_SENDER").and_then(|v| v.parse().ok()) {
            self.rooms.echo_to_sender = b;
        }
    }
}
