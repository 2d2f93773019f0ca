//! Server configuration
//!
//! Layered: built-in defaults, then a YAML file, then `ENGRAM_`-prefixed
//! environment variables (double underscore as the section separator,
//! e.g. `ENGRAM_EMBEDDING__URL`).

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use engram_core::EngineConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Database path; `None` uses the platform data directory
    pub db_path: Option<PathBuf>,
    /// Emit JSON-formatted logs
    pub log_json: bool,
    /// Maximum concurrently served requests
    pub max_concurrency: usize,
    pub embedding: EmbeddingProviderConfig,
    pub classifier: Option<ProviderEndpoint>,
    pub validator: Option<ProviderEndpoint>,
    /// Engine tunables, passed straight through
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7171".to_string(),
            db_path: None,
            log_json: false,
            max_concurrency: 256,
            embedding: EmbeddingProviderConfig::default(),
            classifier: None,
            validator: None,
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct EmbeddingProviderConfig {
    /// Embedding endpoint; text in, fixed-dimension vector out
    pub url: String,
    /// Expected vector dimension
    pub dimensions: usize,
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8089/embed".to_string(),
            dimensions: 768,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderEndpoint {
    pub url: String,
}

impl ServerConfig {
    /// Load defaults, then the optional YAML file, then the environment
    pub fn load(config_path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: ServerConfig = figment
            .merge(Env::prefixed("ENGRAM_").split("__"))
            .extract()?;
        Ok(config)
    }
}
