// File: src/error.rs
use thiserror::Error;

/// Everything that can go wrong inside the recommendation core.
///
/// `InsufficientHistory` is recoverable: the engine swallows it when a
/// retraining window opens before enough orders exist.
#[derive(Debug, Error)]
pub enum RecommenderError {
    #[error("engine used before initialization")]
    NotInitialized,

    #[error("no pending recommendation for \"{0}\"")]
    NoPendingRecommendation(String),

    #[error("unknown main dish \"{0}\"")]
    UnknownMainDish(String),

    #[error("unknown {category} item \"{item}\"")]
    UnknownItem { category: &'static str, item: String },

    #[error("only {have} orders recorded, {need} needed for retraining")]
    InsufficientHistory { have: usize, need: usize },

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for RecommenderError {
    fn from(e: std::io::Error) -> Self {
        RecommenderError::Persistence(e.to_string())
    }
}

impl From<bincode::Error> for RecommenderError {
    fn from(e: bincode::Error) -> Self {
        RecommenderError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for RecommenderError {
    fn from(e: serde_json::Error) -> Self {
        RecommenderError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecommenderError>;
