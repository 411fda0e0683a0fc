use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Format {format} failed: {message}")]
    Format { format: String, message: String },

    #[error("Hash algorithm {algorithm} failed: {message}")]
    Hash { algorithm: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Option file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Stream does not support seeking backwards")]
    UnsupportedSeek,

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Encrypted entry: {0}")]
    Encrypted(String),
}

impl ArchiverError {
    pub fn format(format: &str, message: impl Into<String>) -> Self {
        Self::Format {
            format: format.to_string(),
            message: message.into(),
        }
    }

    pub fn hash(algorithm: &str, message: impl Into<String>) -> Self {
        Self::Hash {
            algorithm: algorithm.to_string(),
            message: message.into(),
        }
    }
}

impl From<tokio::task::JoinError> for ArchiverError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArchiverError>;
