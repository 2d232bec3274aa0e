use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid auth token")]
    InvalidAuth,

    #[error("Bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
