use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::session::RoomOptions;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_IDENTITY_PATH: &str = "chat-app-user.json";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
const DEFAULT_BANNER_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    pub gateway_url: String,
    pub identity_path: PathBuf,
    pub reconnect_delay: Duration,
    /// How long a "joined" banner stays up.
    pub banner_ttl: Duration,
    pub display_name: Option<String>,
    /// Load the participant roster and listen for joins.
    pub roster: bool,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server_url = lookup("FLURRY_SERVER_URL")
            .unwrap_or_else(|| DEFAULT_SERVER_URL.into())
            .trim_end_matches('/')
            .to_string();

        let gateway_url = match lookup("FLURRY_GATEWAY_URL") {
            Some(url) => url,
            None => gateway_url_for(&server_url)?,
        };

        let identity_path = lookup("FLURRY_IDENTITY_PATH")
            .unwrap_or_else(|| DEFAULT_IDENTITY_PATH.into())
            .into();

        let reconnect_delay = millis(&lookup, "FLURRY_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)?;
        let banner_ttl = millis(&lookup, "FLURRY_BANNER_MS", DEFAULT_BANNER_MS)?;

        let display_name = lookup("FLURRY_NAME")
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let roster = match lookup("FLURRY_ROSTER") {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "FLURRY_ROSTER",
                        value: raw,
                    });
                }
            },
            None => true,
        };

        Ok(Self {
            server_url,
            gateway_url,
            identity_path,
            reconnect_delay,
            banner_ttl,
            display_name,
            roster,
        })
    }

    pub fn room_options(&self) -> RoomOptions {
        RoomOptions {
            roster: self.roster,
            reconnect_delay: self.reconnect_delay,
            banner_ttl: self.banner_ttl,
            ..RoomOptions::default()
        }
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(Duration::from_millis(default)),
    }
}

/// `http://host:port` -> `ws://host:port/gateway`.
pub fn gateway_url_for(server_url: &str) -> Result<String, ConfigError> {
    let base = server_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(ConfigError::Invalid {
            key: "FLURRY_SERVER_URL",
            value: server_url.to_string(),
        });
    };
    Ok(format!("{}/gateway", ws))
}
