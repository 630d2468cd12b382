#![forbid(unsafe_code)]

pub mod audit;
pub mod config;
pub mod cost_model;
pub mod errors;
pub mod estimator;
pub mod handshake;
pub mod models;
pub mod orchestrator;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
