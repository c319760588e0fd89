use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackopperError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    #[error("invalid app name '{0}': must be alphanumeric with '.', '_' or '-'")]
    InvalidAppName(String),

    #[error("failed to fetch desired state for '{environment}': {message}")]
    Fetch {
        environment: String,
        message: String,
    },

    #[error("malformed desired state for '{environment}': {message} (body: {body})")]
    Parse {
        environment: String,
        message: String,
        body: String,
    },

    #[error("schedule store is locked by another run: {0}")]
    StoreBusy(String),

    /// Several entries share one tag. Healed in place and logged, never
    /// returned from a reconciliation.
    #[error("store inconsistency: {found} entries tagged '{name}', keeping one")]
    StoreInconsistency { name: String, found: usize },

    #[error("schedule store write failed: {0}")]
    StoreWrite(String),

    #[error("dump failed for '{app}': {message}")]
    Dump { app: String, message: String },

    #[error("completion report for '{app}' rejected: HTTP {status}: {body}")]
    Report {
        app: String,
        status: u16,
        body: String,
    },

    #[error("credentials for '{app}' incomplete: missing {key}")]
    Credentials { app: String, key: String },

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("remote command failed on {host}: {message}")]
    Remote { host: String, message: String },

    #[error("required program not found: {0}")]
    ProgramNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, BackopperError>;
