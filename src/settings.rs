use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use toolgate_mcp::LaunchSpec;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "invalid backend name '{name}': '_' is the tool id separator, use [A-Za-z0-9-]+"
    )]
    BackendName { name: String },
}

/// Process configuration from environment variables with defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub servers_path: PathBuf,
    pub embedding_dim: usize,
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
    pub close_grace: Duration,
    pub shutdown_timeout: Duration,
    pub max_tools: usize,
    pub max_tokens: u32,
}

impl Settings {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnv` for unparseable overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: std::env::var("TOOLGATE_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env_parse("TOOLGATE_PORT", 8000)?,
            servers_path: PathBuf::from(
                std::env::var("TOOLGATE_SERVERS_PATH")
                    .unwrap_or_else(|_| "mcp-servers.json".into()),
            ),
            embedding_dim: env_parse("TOOLGATE_EMBEDDING_DIM", toolgate_embed::DEFAULT_DIMENSION)?,
            handshake_timeout: Duration::from_secs(env_parse("TOOLGATE_HANDSHAKE_TIMEOUT", 10)?),
            call_timeout: Duration::from_secs(env_parse("TOOLGATE_CALL_TIMEOUT", 30)?),
            close_grace: Duration::from_secs(env_parse("TOOLGATE_CLOSE_GRACE", 5)?),
            shutdown_timeout: Duration::from_secs(env_parse("TOOLGATE_SHUTDOWN_TIMEOUT", 10)?),
            max_tools: env_parse("TOOLGATE_MAX_TOOLS", 10)?,
            max_tokens: env_parse("TOOLGATE_MAX_TOKENS", 2000)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.into(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: HashMap<String, LaunchSpec>,
}

/// Parse the backend config document: `{"servers": {"<name>": {command, args, env}}}`.
///
/// # Errors
///
/// Returns `ConfigError::BackendName` for names outside the id grammar.
pub fn parse_servers(path: &str, content: &str) -> Result<HashMap<String, LaunchSpec>, ConfigError> {
    let file: ServersFile = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.into(),
        source: e,
    })?;
    for name in file.servers.keys() {
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(ConfigError::BackendName { name: name.clone() });
        }
    }
    Ok(file.servers)
}

/// Load backend launch specs; a missing file means no preconfigured backends.
///
/// # Errors
///
/// Returns read, parse, or name-grammar errors.
pub fn load_servers(path: &Path) -> Result<HashMap<String, LaunchSpec>, ConfigError> {
    if !path.exists() {
        tracing::info!("no server config at {}, starting empty", path.display());
        return Ok(HashMap::new());
    }
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: display.clone(),
        source: e,
    })?;
    parse_servers(&display, &content)
}
