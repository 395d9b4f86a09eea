//! Application configuration for docchat.
//!
//! User config lives at `~/.docchat/docchat.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DocChatError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docchat.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docchat";

// ---------------------------------------------------------------------------
// Config structs (matching docchat.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Collaborator service endpoints.
    #[serde(default)]
    pub services: ServicesConfig,

    /// HTTP client settings.
    #[serde(default)]
    pub client: ClientSettings,

    /// Document cache policy.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// `[services]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Conversion service (`POST`, multipart `file`).
    #[serde(default = "default_convert_url")]
    pub convert_url: String,

    /// Storage service (`POST`, JSON `{ markdown }`).
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Question-answering webhook (`POST`, JSON `{ docId, pergunta, conteudo }`).
    #[serde(default = "default_qa_url")]
    pub qa_url: String,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            convert_url: default_convert_url(),
            store_url: default_store_url(),
            qa_url: default_qa_url(),
        }
    }
}

fn default_convert_url() -> String {
    "http://localhost:8000/convert".into()
}
fn default_store_url() -> String {
    "http://localhost:8000/store".into()
}
fn default_qa_url() -> String {
    "http://localhost:5678/webhook/docchat".into()
}

/// `[client]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Upper bound for a whole request/response round-trip.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Upper bound for establishing a connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    10
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached documents; `0` disables the bound.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    64
}

// ---------------------------------------------------------------------------
// Runtime client config (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Resolved endpoint URLs for the three collaborator services.
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    pub convert: Url,
    pub store: Url,
    pub qa: Url,
}

/// Runtime configuration for the remote call client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoints: ServiceEndpoints,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl TryFrom<&AppConfig> for ClientConfig {
    type Error = DocChatError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        validate_config(config)?;
        Ok(Self {
            endpoints: ServiceEndpoints {
                convert: parse_endpoint("convert_url", &config.services.convert_url)?,
                store: parse_endpoint("store_url", &config.services.store_url)?,
                qa: parse_endpoint("qa_url", &config.services.qa_url)?,
            },
            timeout: Duration::from_secs(config.client.timeout_secs),
            connect_timeout: Duration::from_secs(config.client.connect_timeout_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docchat/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocChatError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docchat/docchat.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocChatError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocChatError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocChatError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocChatError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocChatError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that every endpoint is an http(s) URL and the client timeouts are usable.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    parse_endpoint("convert_url", &config.services.convert_url)?;
    parse_endpoint("store_url", &config.services.store_url)?;
    parse_endpoint("qa_url", &config.services.qa_url)?;

    if config.client.timeout_secs == 0 {
        return Err(DocChatError::config("client.timeout_secs must be greater than 0"));
    }
    if config.client.connect_timeout_secs == 0 {
        return Err(DocChatError::config(
            "client.connect_timeout_secs must be greater than 0",
        ));
    }
    Ok(())
}

fn parse_endpoint(key: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| DocChatError::config(format!("services.{key} '{raw}' is not a URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(DocChatError::config(format!(
            "services.{key} must use http or https, got '{other}'"
        ))),
    }
}
