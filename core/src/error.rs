/// Error types for the GoalLeader core
use crate::ai::AiError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GoalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("AI error: {0}")]
    Ai(#[from] AiError),

    #[error("HTTP error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, GoalError>;
