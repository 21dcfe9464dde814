use std::{path::Path, time::Duration};

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{ApiError, ApiResult, consts};

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub listen: String,
    pub token: Option<String>,
    #[serde(default)]
    pub metrics: bool,
    #[serde(default)]
    pub hub: HubConfig,
}

/// `[hub]` table. Every key falls back to the reference value.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    pub queue_capacity: usize,
    pub inbox_capacity: usize,
    pub max_message_size: usize,
    pub pong_wait_secs: u64,
    pub write_wait_secs: u64,
    pub heartbeat_secs: u64,
    pub max_sessions: Option<usize>,
    pub max_topics_per_session: Option<usize>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: consts::QUEUE_CAPACITY,
            inbox_capacity: consts::INBOX_CAPACITY,
            max_message_size: consts::MAX_MESSAGE_SIZE,
            pong_wait_secs: consts::PONG_WAIT.as_secs(),
            write_wait_secs: consts::WRITE_WAIT.as_secs(),
            heartbeat_secs: consts::HEARTBEAT_INTERVAL.as_secs(),
            max_sessions: None,
            max_topics_per_session: None,
        }
    }
}

/// Runtime form of [`HubConfig`].
#[derive(Clone, Debug, PartialEq)]
pub struct HubSettings {
    pub queue_capacity: usize,
    pub inbox_capacity: usize,
    pub max_message_size: usize,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub heartbeat: Duration,
    pub max_sessions: Option<usize>,
    pub max_topics_per_session: Option<usize>,
}

impl HubSettings {
    pub fn ping_period(&self) -> Duration {
        consts::ping_period(self.pong_wait)
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        (&HubConfig::default()).into()
    }
}

impl From<&HubConfig> for HubSettings {
    fn from(value: &HubConfig) -> Self {
        Self {
            queue_capacity: value.queue_capacity,
            inbox_capacity: value.inbox_capacity,
            max_message_size: value.max_message_size,
            pong_wait: Duration::from_secs(value.pong_wait_secs),
            write_wait: Duration::from_secs(value.write_wait_secs),
            heartbeat: Duration::from_secs(value.heartbeat_secs),
            max_sessions: value.max_sessions,
            max_topics_per_session: value.max_topics_per_session,
        }
    }
}

impl Config {
    pub fn parse(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("can't read config file {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(data: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(data)?;
        config.hub.validate()?;
        Ok(config)
    }

    pub fn verify_token(&self, suspicious: &str) -> ApiResult<()> {
        match &self.token {
            Some(token) => {
                if constant_time_eq(token.as_bytes(), suspicious.as_bytes()) {
                    debug!("Publisher token passed!");
                    Ok(())
                } else {
                    warn!("Unknown tried to publish, but used wrong token!");
                    Err(ApiError::Unauthorized)
                }
            },
            None => {
                warn!("Unknown tried to publish, but token is not defined!");
                Err(ApiError::BadRequest)
            },
        }
    }
}

/// Compares tokens without returning early on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b.iter()) {
        diff |= left ^ right;
    }
    diff == 0
}

impl HubConfig {
    fn validate(&self) -> anyhow::Result<()> {
        let required = [
            ("queueCapacity", self.queue_capacity as u64),
            ("inboxCapacity", self.inbox_capacity as u64),
            ("maxMessageSize", self.max_message_size as u64),
            ("pongWaitSecs", self.pong_wait_secs),
            ("writeWaitSecs", self.write_wait_secs),
            ("heartbeatSecs", self.heartbeat_secs),
        ];
        for (key, value) in required {
            if value == 0 {
                bail!("hub.{key} must be greater than zero");
            }
        }
        if self.max_sessions == Some(0) {
            bail!("hub.maxSessions must be greater than zero when set");
        }
        if self.max_topics_per_session == Some(0) {
            bail!("hub.maxTopicsPerSession must be greater than zero when set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_table_is_optional() {
        let config = Config::from_toml(r#"listen = "0.0.0.0:8080""#).unwrap();
        assert_eq!(config.hub, HubConfig::default());
        assert!(!config.metrics);
        assert!(config.token.is_none());

        let settings = HubSettings::from(&config.hub);
        assert_eq!(settings.queue_capacity, 256);
        assert_eq!(settings.max_message_size, 512);
        assert_eq!(settings.pong_wait, Duration::from_secs(60));
        assert_eq!(settings.ping_period(), Duration::from_secs(54));
        assert_eq!(settings.write_wait, Duration::from_secs(10));
        assert_eq!(settings.heartbeat, Duration::from_secs(30));
    }

    #[test]
    fn partial_hub_table_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            listen = "127.0.0.1:3000"
            token = "secret"
            metrics = true

            [hub]
            heartbeatSecs = 5
            maxSessions = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.hub.heartbeat_secs, 5);
        assert_eq!(config.hub.max_sessions, Some(100));
        assert_eq!(config.hub.queue_capacity, 256);
        assert_eq!(config.hub.max_topics_per_session, None);
        assert!(config.metrics);
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = Config::from_toml(
            r#"
            listen = "127.0.0.1:3000"
            [hub]
            queueCapacity = 0
            "#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "hub.queueCapacity must be greater than zero");

        let err = Config::from_toml(
            r#"
            listen = "127.0.0.1:3000"
            [hub]
            maxTopicsPerSession = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("maxTopicsPerSession"));
    }

    #[test]
    fn token_verification() {
        let mut config = Config::from_toml(r#"listen = "127.0.0.1:3000""#).unwrap();
        assert!(matches!(config.verify_token("x"), Err(ApiError::BadRequest)));

        config.token = Some("secret".into());
        assert!(config.verify_token("secret").is_ok());
        assert!(matches!(config.verify_token("nope"), Err(ApiError::Unauthorized)));
        assert!(matches!(config.verify_token("secrex"), Err(ApiError::Unauthorized)));
        assert!(matches!(config.verify_token("secret "), Err(ApiError::Unauthorized)));
        assert!(matches!(config.verify_token(""), Err(ApiError::Unauthorized)));
    }

    #[test]
    fn token_comparison() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(constant_time_eq(b"", b""));
    }
}
