use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server rejected the request ({status}): {msg}")]
    Server { status: u16, msg: String },
    #[error("Integrity check failed for {name}: {reason}")]
    Integrity { name: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
