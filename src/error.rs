use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Distillation error: {0}")]
    Distillation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FleetError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn completion(msg: impl Into<String>) -> Self {
        Self::Completion(msg.into())
    }

    pub fn distillation(msg: impl Into<String>) -> Self {
        Self::Distillation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
