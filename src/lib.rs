pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod secrets;
pub mod web;

pub use bootstrap::{BootstrapGate, RuntimeSecrets};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
