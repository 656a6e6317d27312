use crate::runs::PollPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What `send_message` does while a reply is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Refuse the new message with `ChatError::Busy`.
    #[default]
    Reject,
    /// Abandon the in-flight run and dispatch the new message.
    Supersede,
}

/// Engine settings.
///
/// Example `~/.parley/config.json` or `.parley.json`:
/// ```json
/// {
///   "base_url": "https://example.com",
///   "user_id": "u-123",
///   "poll_interval_ms": 1000,
///   "max_poll_attempts": 60,
///   "busy_policy": "supersede"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_dispatch_path")]
    pub dispatch_path: String,
    #[serde(default = "default_status_path")]
    pub status_path: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_personality")]
    pub default_personality: String,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Delay between status checks after the first, immediate one.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Status checks before giving up with a timeout.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_typing_tick_ms")]
    pub typing_tick_ms: u64,
    #[serde(default = "default_typing_chars_per_tick")]
    pub typing_chars_per_tick: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub busy_policy: BusyPolicy,
    /// Save the thread after every completed reply.
    #[serde(default = "default_auto_save")]
    pub auto_save: bool,
}

fn default_base_url() -> String {
    std::env::var("PARLEY_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

fn default_dispatch_path() -> String {
    "/api/assistant".to_string()
}

fn default_status_path() -> String {
    "/api/assistant/status".to_string()
}

fn default_user_id() -> String {
    std::env::var("PARLEY_USER_ID").unwrap_or_else(|_| "local".to_string())
}

fn default_personality() -> String {
    "mentor".to_string()
}

fn default_db_path() -> PathBuf {
    ParleyConfig::resolve_path("parley.db")
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_poll_attempts() -> u32 {
    60
}

fn default_typing_tick_ms() -> u64 {
    15
}

fn default_typing_chars_per_tick() -> usize {
    1
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_auto_save() -> bool {
    true
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            dispatch_path: default_dispatch_path(),
            status_path: default_status_path(),
            api_key: std::env::var("PARLEY_API_KEY").unwrap_or_default(),
            user_id: default_user_id(),
            default_personality: default_personality(),
            db_path: default_db_path(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            typing_tick_ms: default_typing_tick_ms(),
            typing_chars_per_tick: default_typing_chars_per_tick(),
            request_timeout_secs: default_request_timeout_secs(),
            busy_policy: BusyPolicy::default(),
            auto_save: default_auto_save(),
        }
    }
}

impl ParleyConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::resolve_path("config.json");

        let mut config = if config_path.exists() {
            let data = std::fs::read_to_string(&config_path)?;
            serde_json::from_str::<ParleyConfig>(&data)?
        } else {
            ParleyConfig::default()
        };

        if config.api_key.is_empty() {
            config.api_key = std::env::var("PARLEY_API_KEY").unwrap_or_default();
        }

        let local_path = std::env::current_dir()
            .ok()
            .map(|d| d.join(".parley.json"))
            .filter(|p| p.exists());

        if let Some(local) = local_path {
            let data = std::fs::read_to_string(local)?;
            config = config.merged_with(serde_json::from_str(&data)?)?;
        }

        Ok(config)
    }

    /// Shallow-merge top-level keys of `overrides` onto this config.
    pub fn merged_with(self, overrides: serde_json::Value) -> Result<Self> {
        let mut base = serde_json::to_value(&self)?;
        if let (Some(base_obj), Some(over_obj)) = (base.as_object_mut(), overrides.as_object()) {
            for (k, v) in over_obj {
                base_obj.insert(k.clone(), v.clone());
            }
        }
        Ok(serde_json::from_value(base)?)
    }

    pub fn resolve_path(relative: &str) -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".parley")
            .join(relative)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            self.max_poll_attempts,
        )
    }

    pub fn typing_tick(&self) -> Duration {
        Duration::from_millis(self.typing_tick_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_json_uses_defaults() {
        let config: ParleyConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.max_poll_attempts, 60);
        assert_eq!(config.busy_policy, BusyPolicy::Reject);
        assert!(config.auto_save);
        assert_eq!(config.dispatch_path, "/api/assistant");
    }

    #[test]
    fn overrides_replace_top_level_keys() {
        let config = ParleyConfig::default()
            .merged_with(json!({ "busy_policy": "supersede", "max_poll_attempts": 5 }))
            .unwrap();
        assert_eq!(config.busy_policy, BusyPolicy::Supersede);
        assert_eq!(config.max_poll_attempts, 5);
        assert_eq!(config.poll_policy().max_attempts(), 5);
    }

    #[test]
    fn resolve_path_is_under_dot_parley() {
        let path = ParleyConfig::resolve_path("config.json");
        assert!(path.ends_with(".parley/config.json"));
    }
}
