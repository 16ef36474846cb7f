//! Configuration file support for storyboard
//!
//! Reads from .storyboard/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Listening address for `storyboard serve`
    #[serde(default)]
    pub server: ServerConfig,

    /// How requests are tied to users
    #[serde(default)]
    pub auth: AuthConfig,

    /// Dashboard settings
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Authentication is done by a fronting proxy which passes the user name in
/// a request header.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AuthConfig {
    /// Header carrying the authenticated user name
    /// Default: "X-Remote-User"
    #[serde(default = "default_user_header")]
    pub user_header: String,

    /// Where unauthenticated POSTs are sent; `?next=<path>` is appended
    #[serde(default = "default_login_url")]
    pub login_url: String,

    /// Create a user row the first time an unknown user name shows up
    /// Default: true
    #[serde(default = "default_true")]
    pub create_users: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DashboardConfig {
    /// Number of recent bugs and of recent features listed
    #[serde(default = "default_recent_limit")]
    pub recent_limit: i64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_user_header() -> String {
    "X-Remote-User".to_string()
}

fn default_login_url() -> String {
    "/login".to_string()
}

fn default_true() -> bool {
    true
}

fn default_recent_limit() -> i64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_header: default_user_header(),
            login_url: default_login_url(),
            create_users: true,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
        }
    }
}

impl Config {
    /// Load config from .storyboard/config.toml
    /// Returns default config if file doesn't exist
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("ignoring {}: {}", path.display(), e),
                },
                Err(e) => tracing::warn!("cannot read {}: {}", path.display(), e),
            }
        }
        Self::default()
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".storyboard").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Default config file contents written by `storyboard init`
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
