use thiserror::Error;

/// Invalid or unreadable tracker configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors surfaced when setting up a tag host
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Tag UID must not be empty")]
    MissingUid,
}

pub type TrackerResult<T> = Result<T, TrackerError>;
