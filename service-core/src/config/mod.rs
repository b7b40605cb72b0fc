//! Base settings every service binary needs before its own configuration
//! layer takes over.

use crate::error::AppError;
use config::{Config as Loader, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Load from an optional `service.toml` in the working directory,
    /// overridden by `SERVICE__`-prefixed environment variables
    /// (`SERVICE__PORT=8081`). A `.env` file is read first so local
    /// development does not need exported variables.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Loader::builder()
            .add_source(File::with_name("service").required(false))
            .add_source(config::Environment::with_prefix("SERVICE").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
