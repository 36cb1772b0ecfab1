use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Backup mismatch: {0}")]
    BackupMismatch(String),

    #[error("Invalid transition: {0}")]
    Transition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors caused by bad input or stale state rather than an
    /// internal failure. The CLI maps these to a distinct exit code.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Verification(_)
                | Error::BackupMismatch(_)
                | Error::Transition(_)
                | Error::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
