//! Pull agent: leases processed children from the central pull service,
//! streams them to the local `recebidos/` tree with size and digest
//! verification, and confirms the outcome so the server can retire or
//! re-offer each file.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod puller;

pub use config::{AgentConfig, ConfigError, DownloadMode};
pub use error::AgentError;
pub use puller::{run_cycle, run_cycle_with, PullRequest, PullSummary};
