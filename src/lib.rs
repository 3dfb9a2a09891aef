#![forbid(unsafe_code)]

pub mod app;
pub mod commands;
pub mod config;
pub mod driver;
pub mod errors;
pub mod health;
pub mod integrations;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod slack;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
