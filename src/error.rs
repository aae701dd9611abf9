// Central error type for soundings
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SoundingsError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid pipeline: {message}")]
    InvalidPipeline { message: String, stage: Option<usize> },
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, SoundingsError>;

// Helper conversions
impl From<rusqlite::Error> for SoundingsError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}

impl From<serde_json::Error> for SoundingsError {
    fn from(e: serde_json::Error) -> Self { Self::Serialization(e.to_string()) }
}

impl From<config::ConfigError> for SoundingsError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}

impl From<tokio::task::JoinError> for SoundingsError {
    fn from(e: tokio::task::JoinError) -> Self { Self::Execution(e.to_string()) }
}

impl From<std::io::Error> for SoundingsError {
    fn from(e: std::io::Error) -> Self { Self::Io(e.to_string()) }
}

impl<T> From<std::sync::PoisonError<T>> for SoundingsError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}

impl SoundingsError {
    pub fn invalid_pipeline(message: impl Into<String>, stage: Option<usize>) -> Self {
        Self::InvalidPipeline { message: message.into(), stage }
    }
}
