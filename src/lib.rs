// src/lib.rs

pub mod core;
pub mod error;
pub mod learning;
pub mod persistence;

pub use crate::core::engine::{RecommendationEngine, RecommendationView};
pub use crate::core::types::MealChoice;
pub use crate::error::RecommenderError;
