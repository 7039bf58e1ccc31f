use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::{info, warn};

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

pub struct Config {
    /// Shared HS256 secret of the identity service.
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("COURIER_JWT_SECRET").unwrap_or_else(|_| {
            warn!("COURIER_JWT_SECRET not set, using the development secret");
            DEV_JWT_SECRET.to_string()
        });

        Ok(Self {
            jwt_secret,
            db_path: try_load("COURIER_DB_PATH", "courier.db")?,
            host: try_load("COURIER_HOST", "0.0.0.0")?,
            port: try_load("COURIER_PORT", "3000")?,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid {key} value '{raw}': {e}"))
}
