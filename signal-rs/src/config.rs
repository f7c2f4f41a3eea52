use crate::error::{Result, SignalError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// The only identity allowed to publish signals
    pub sender_username: String,
    /// Bearer token for /admin endpoints; empty disables them
    #[serde(default)]
    pub admin_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
    #[serde(default = "default_max_age")]
    pub default_max_age_minutes: u32,
    #[serde(default = "default_max_max_age")]
    pub max_max_age_minutes: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

fn default_limit() -> u32 {
    100
}

fn default_max_limit() -> u32 {
    500
}

fn default_max_age() -> u32 {
    3
}

fn default_max_max_age() -> u32 {
    60
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            default_max_age_minutes: default_max_age(),
            max_max_age_minutes: default_max_max_age(),
        }
    }
}

impl DeliveryConfig {
    /// Clamp a requested page size into `1..=max_limit`
    pub fn clamp_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }

    /// Clamp a requested fetch window into `1..=max_max_age_minutes`
    pub fn clamp_max_age(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_max_age_minutes)
            .clamp(1, self.max_max_age_minutes.max(1))
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SignalError::Config(e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| SignalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DATABASE_URL`, `ADMIN_TOKEN`, `SENDER_USERNAME` and `LISTEN_ADDR`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            self.auth.admin_token = token;
        }
        if let Ok(sender) = std::env::var("SENDER_USERNAME") {
            self.auth.sender_username = sender;
        }
        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.sender_username.trim().is_empty() {
            return Err(SignalError::Config(
                "auth.sender_username must not be empty".to_string(),
            ));
        }
        if self.delivery.max_limit == 0 || self.delivery.max_max_age_minutes == 0 {
            return Err(SignalError::Config(
                "delivery limits must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "0.0.0.0:8080".to_string(),
            },
            auth: AuthConfig {
                sender_username: "farm_robot".to_string(),
                admin_token: String::new(),
            },
            storage: StorageConfig {
                database_url: "sqlite://signals.db".to_string(),
            },
            delivery: DeliveryConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_toml() {
        let config = Config::from_toml(
            r#"
            [server]
            listen_addr = "127.0.0.1:9000"

            [auth]
            sender_username = "farm_robot"

            [storage]
            database_url = "sqlite::memory:"

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert!(config.auth.admin_token.is_empty());
        assert_eq!(config.delivery.default_limit, 100);
        assert_eq!(config.delivery.max_limit, 500);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_empty_sender_rejected() {
        let result = Config::from_toml(
            r#"
            [server]
            listen_addr = "127.0.0.1:9000"
            [auth]
            sender_username = "  "
            [storage]
            database_url = "sqlite::memory:"
            [logging]
            level = "info"
            format = "pretty"
            "#,
        );
        assert!(matches!(result, Err(SignalError::Config(_))));
    }

    #[test]
    fn test_clamp_limit_and_window() {
        let delivery = DeliveryConfig::default();
        assert_eq!(delivery.clamp_limit(None), 100);
        assert_eq!(delivery.clamp_limit(Some(0)), 1);
        assert_eq!(delivery.clamp_limit(Some(10_000)), 500);
        assert_eq!(delivery.clamp_max_age(None), 3);
        assert_eq!(delivery.clamp_max_age(Some(600)), 60);
    }
}
