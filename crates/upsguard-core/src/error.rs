use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpsguardError {
    #[error("host filesystem not mounted at {0}")]
    HostRootMissing(PathBuf),

    #[error("no kubeconfig found (searched: {})", display_paths(.searched))]
    CredentialNotFound { searched: Vec<PathBuf> },

    #[error("node identity not found: no override, host hostname file, or process hostname")]
    IdentityNotFound,

    #[error("control-plane client not found: {0}")]
    ClientNotFound(String),

    #[error("all shutdown mechanisms failed (attempted: {})", .attempted.join(", "))]
    AllMechanismsFailed { attempted: Vec<String> },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown shutdown mechanism: {0}")]
    UnknownMechanism(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, UpsguardError>;
