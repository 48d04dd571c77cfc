use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::session::SessionSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/client.json";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

pub const ENV_SERVER_URL: &str = "CHAT_SERVER_URL";
pub const ENV_USER_ID: &str = "CHAT_USER_ID";
pub const ENV_ACCESS_TOKEN: &str = "CHAT_ACCESS_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub history_poll_ms: u64,
    pub roster_poll_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            user_id: String::new(),
            access_token: None,
            history_poll_ms: 1000,
            roster_poll_ms: 10_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    /// Override fields from `CHAT_*` variables as returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = non_empty(ENV_SERVER_URL) {
            self.server_url = url;
        }
        if let Some(user_id) = non_empty(ENV_USER_ID) {
            self.user_id = user_id;
        }
        if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
            self.access_token = Some(token);
        }
    }

    /// Check the config and return the parsed server URL.
    pub fn validate(&self) -> Result<Url, ClientError> {
        if self.user_id.trim().is_empty() {
            return Err(ClientError::Config(format!(
                "user id is required (set `user_id`, {ENV_USER_ID} or --user-id)"
            )));
        }
        for (name, value) in [
            ("history_poll_ms", self.history_poll_ms),
            ("roster_poll_ms", self.roster_poll_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ClientError::Config(format!("`{name}` must be positive")));
            }
        }
        server_base(&self.server_url)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            history_interval: Duration::from_millis(self.history_poll_ms),
            roster_interval: Duration::from_millis(self.roster_poll_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Parse the server URL as a base that relative endpoint paths join onto.
fn server_base(raw: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(raw.trim()).map_err(|err| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ClientError::InvalidUrl {
            url: raw.to_string(),
            reason: "expected an http or https URL".to_string(),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub fn load_config(path: &str) -> ClientConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<ClientConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                ClientConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            ClientConfig::default()
        }
    }
}
