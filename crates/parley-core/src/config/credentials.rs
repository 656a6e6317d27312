use crate::config::ParleyConfig;
use crate::runs::HttpTransport;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Who we are and where the assistant lives. Written by first-run setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub base_url: String,
    pub user_id: String,
    #[serde(default)]
    pub api_key: String,
}

impl Credentials {
    pub fn path() -> PathBuf {
        ParleyConfig::resolve_path("credentials.json")
    }

    pub fn load() -> Result<Option<Self>> {
        let path = Self::path();
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        let creds: Credentials = serde_json::from_str(&data)?;
        Ok(Some(creds))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, data)?;
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.user_id.is_empty()
    }

    /// Layer these credentials over `config`.
    pub fn apply_to(&self, config: &mut ParleyConfig) {
        config.base_url = self.base_url.clone();
        config.user_id = self.user_id.clone();
        if !self.api_key.is_empty() {
            config.api_key = self.api_key.clone();
        }
    }

    pub fn build_transport(&self, config: &ParleyConfig) -> Result<HttpTransport> {
        let mut config = config.clone();
        self.apply_to(&mut config);
        HttpTransport::from_config(&config)
    }
}
