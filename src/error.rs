use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GistError>;

#[derive(Debug, Error)]
pub enum GistError {
    #[error("config error: {0}")]
    Config(String),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("provision error: {0}")]
    Provision(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("cleanup error: failed to remove {}: {source}", path.display())]
    Cleanup { path: PathBuf, source: io::Error },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("prompt error: cannot handle interrupts: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("fetch error: malformed gist response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("fetch error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("user lookup error: {0}")]
    UserLookup(#[from] nix::Error),
}
