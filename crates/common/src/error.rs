use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixgateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type MixgateResult<T> = Result<T, MixgateError>;
