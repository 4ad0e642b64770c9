//! Agent configuration store.
//!
//! A TOML file with restrictive permissions:
//! - Linux: `~/.config/claude-mobile/agent.toml`
//! - Windows: `%APPDATA%/claude-mobile/agent.toml`
//!
//! Five environment variables override their store fields, so the daemon
//! runs even when the store is unavailable (containers, CI):
//! `CLAUDE_MOBILE_AGENT_ID`, `CLAUDE_MOBILE_RELAY_URL`,
//! `CLAUDE_MOBILE_GITHUB_TOKEN`, `CLAUDE_MOBILE_AUTH_MODE`,
//! `CLAUDE_MOBILE_API_KEY`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Stable identity presented to the relay. Generated on first run.
    #[serde(default)]
    pub agent_id: String,

    /// Relay WebSocket URL.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Forge access token (cloning, pushing, PR creation, listing).
    #[serde(default)]
    pub github_token: String,

    /// How the code tool authenticates: `subscription` uses the tool's
    /// own login, `api-key` passes the provider key through.
    #[serde(default = "default_auth_mode")]
    pub auth_mode: String,

    /// Optional provider API key, used when `auth_mode` is `api-key`.
    #[serde(default)]
    pub api_key: String,

    /// Directory that holds one working copy per repository.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    /// The code-generation CLI to drive.
    #[serde(default = "default_tool_binary")]
    pub tool_binary: String,
}

fn default_relay_url() -> String {
    "wss://relay.claude-mobile.dev/ws".into()
}

fn default_auth_mode() -> String {
    "subscription".into()
}

fn default_workspace_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    format!("{home}/.claude-mobile/workspaces")
}

fn default_tool_binary() -> String {
    "claude".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            relay_url: default_relay_url(),
            github_token: String::new(),
            auth_mode: default_auth_mode(),
            api_key: String::new(),
            workspace_root: default_workspace_root(),
            tool_binary: default_tool_binary(),
        }
    }
}

impl Config {
    /// Loads configuration: store, then environment overrides, then a
    /// generated identity on first run (persisted when possible).
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|name| std::env::var(name).ok());

        if config.agent_id.is_empty() {
            config.agent_id = uuid::Uuid::new_v4().to_string();
            if let Err(e) = config.save_to(&path) {
                tracing::warn!("could not persist generated agent identity: {e}");
            } else {
                tracing::info!(agent = %config.agent_id, "generated agent identity");
            }
        }

        Ok(config)
    }

    /// Reads the store at `path`, or defaults when it does not exist.
    pub fn load_from(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Config::default())
        }
    }

    /// Saves the configuration to the default store path.
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Saves the configuration to `path` with owner-only permissions.
    pub fn save_to(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // The store carries the forge token; keep it owner-only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies the documented environment overrides through `get`.
    pub fn apply_overrides<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields: [(&str, &mut String); 5] = [
            ("CLAUDE_MOBILE_AGENT_ID", &mut self.agent_id),
            ("CLAUDE_MOBILE_RELAY_URL", &mut self.relay_url),
            ("CLAUDE_MOBILE_GITHUB_TOKEN", &mut self.github_token),
            ("CLAUDE_MOBILE_AUTH_MODE", &mut self.auth_mode),
            ("CLAUDE_MOBILE_API_KEY", &mut self.api_key),
        ];
        for (name, field) in fields {
            if let Some(value) = get(name)
                && !value.is_empty()
            {
                *field = value;
            }
        }
    }

    /// Whether the daemon can start with this configuration.
    pub fn is_complete(&self) -> bool {
        !self.relay_url.is_empty() && !self.github_token.is_empty()
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| anyhow::anyhow!("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("claude-mobile")
            .join("agent.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("claude-mobile")
            .join("agent.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.agent_id.is_empty());
        assert!(!config.relay_url.is_empty());
        assert_eq!(config.auth_mode, "subscription");
        assert_eq!(config.tool_binary, "claude");
        assert!(!config.is_complete());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            agent_id: "a-1".into(),
            relay_url: "wss://relay.example/ws".into(),
            github_token: "ghp_x".into(),
            auth_mode: "api-key".into(),
            api_key: "sk-x".into(),
            workspace_root: "/srv/work".into(),
            tool_binary: "/usr/local/bin/claude".into(),
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.agent_id, "a-1");
        assert_eq!(parsed.github_token, "ghp_x");
        assert_eq!(parsed.workspace_root, "/srv/work");
        assert!(parsed.is_complete());
    }

    #[test]
    fn config_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(r#"github_token = "ghp_y""#).unwrap();
        assert_eq!(config.github_token, "ghp_y");
        assert_eq!(config.tool_binary, "claude");
        assert!(config.is_complete());
    }

    #[test]
    fn env_overrides_win_over_store() {
        let mut config = Config {
            relay_url: "wss://stored.example/ws".into(),
            github_token: "stored-token".into(),
            ..Config::default()
        };
        config.apply_overrides(|name| match name {
            "CLAUDE_MOBILE_RELAY_URL" => Some("wss://env.example/ws".into()),
            "CLAUDE_MOBILE_GITHUB_TOKEN" => Some("env-token".into()),
            _ => None,
        });
        assert_eq!(config.relay_url, "wss://env.example/ws");
        assert_eq!(config.github_token, "env-token");
    }

    #[test]
    fn empty_env_values_do_not_override() {
        let mut config = Config {
            github_token: "stored-token".into(),
            ..Config::default()
        };
        config.apply_overrides(|_| Some(String::new()));
        assert_eq!(config.github_token, "stored-token");
    }

    #[test]
    fn save_and_load_from_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.toml");

        let config = Config {
            agent_id: "persisted".into(),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.agent_id, "persisted");
    }

    #[test]
    fn load_from_missing_path_is_default() {
        let path = PathBuf::from("/nonexistent/claude-mobile-test/agent.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(config.agent_id.is_empty());
    }
}
