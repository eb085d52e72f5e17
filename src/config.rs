use std::{env, fmt::Display, net::SocketAddr, str::FromStr};

use log::{info, warn};

use crate::{
    constants::DEFAULT_PAGE_SIZE,
    error::{Error, ErrorKind},
};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub page_size: i64,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set, using the development secret");
            String::from("secret")
        });

        Ok(Self {
            database_url: env::var("DATABASE_URL").map_err(|_| {
                ErrorKind::InternalServerError.new("DATABASE_URL must be set")
            })?,
            redis_url: env::var("REDIS_URL").ok(),
            bind_addr: try_load("BIND_ADDR", "0.0.0.0:8000")?,
            jwt_secret,
            page_size: try_load("PAGE_SIZE", &DEFAULT_PAGE_SIZE.to_string())?,
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, Error>
where
    T::Err: Display,
{
    env::var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            ErrorKind::InternalServerError.new(&format!("Environment misconfigured: {key}"))
        })
}
