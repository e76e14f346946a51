use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Allocation error: {0}")]
    AllocError(#[from] cualloc::Error),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl From<serde_json::error::Error> for HubError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for HubError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

pub fn config_error<T>(message: String) -> crate::Result<T> {
    Err(HubError::ConfigError(message))
}
