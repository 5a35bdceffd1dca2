use thiserror::Error;

pub type Result<T> = std::result::Result<T, FaultlineError>;

#[derive(Error, Debug)]
pub enum FaultlineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Classification error: {message}")]
    Classification { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Pipeline error: {message}")]
    Pipeline { message: String },
}
