use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// Legacy consolidated-zip transfer; accepted for compatibility and
    /// executed as `lease`.
    Zip,
    Lease,
    Direct,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_mode")]
    pub download_mode: DownloadMode,
    pub splitter_base_url: String,
    #[serde(default)]
    pub splitter_api_key: Option<String>,
    #[serde(default = "default_ttl")]
    pub lease_ttl_seconds: u64,
    #[serde(default = "default_limit")]
    pub pull_limit: usize,
    #[serde(default = "default_verify")]
    pub verify_sha256: bool,
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub agente_input_dir: Option<PathBuf>,
    #[serde(default)]
    pub agente_output_dir: Option<PathBuf>,
}

fn default_mode() -> DownloadMode {
    DownloadMode::Lease
}

fn default_ttl() -> u64 {
    900
}

fn default_limit() -> usize {
    200
}

fn default_verify() -> bool {
    true
}

impl AgentConfig {
    /// Reads the configuration from the environment. This is the only
    /// environment read in the agent; everything downstream receives the
    /// config explicitly.
    pub fn from_env() -> Result<Self, ConfigError> {
        envy::from_env::<Self>().map_err(ConfigError::from)
    }

    /// Where downloaded children land: the explicit output dir, or
    /// `recebidos/` under the base dir.
    pub fn received_dir(&self) -> PathBuf {
        if let Some(dir) = &self.agente_output_dir {
            return dir.clone();
        }
        self.base_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("recebidos")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Error deserializing config from env: {0}")]
    ConfigDeserializationError(#[from] envy::Error),
    #[error("Error reading env file: {0}")]
    EnvFileError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AgentConfig {
        serde_json::from_value(serde_json::json!({
            "splitter_base_url": "http://localhost:8080"
        }))
        .unwrap()
    }

    #[test]
    fn defaults_match_the_protocol() {
        let config = minimal();
        assert_eq!(config.download_mode, DownloadMode::Lease);
        assert_eq!(config.lease_ttl_seconds, 900);
        assert_eq!(config.pull_limit, 200);
        assert!(config.verify_sha256);
    }

    #[test]
    fn received_dir_prefers_the_explicit_output() {
        let mut config = minimal();
        config.base_dir = Some(PathBuf::from("/srv/agente"));
        assert_eq!(config.received_dir(), PathBuf::from("/srv/agente/recebidos"));
        config.agente_output_dir = Some(PathBuf::from("/dados/saida"));
        assert_eq!(config.received_dir(), PathBuf::from("/dados/saida"));
    }

    #[test]
    fn mode_names_deserialize_lowercase() {
        let config: AgentConfig = serde_json::from_value(serde_json::json!({
            "splitter_base_url": "http://x",
            "download_mode": "direct"
        }))
        .unwrap();
        assert_eq!(config.download_mode, DownloadMode::Direct);
    }
}
