// src/core/mod.rs

pub mod catalog;
pub mod engine;
pub mod predictor;
pub mod types;
