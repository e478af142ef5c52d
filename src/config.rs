use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use super::error::{Error, Result};
use super::reconciler::ReconcilerConfig;

pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_LISTEN_IP: &str = "127.0.0.1";
pub const DEFAULT_POOL_SIZE: u32 = 3;

/// Server settings, read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub pool_size: u32,
    /// Fill an empty drink catalog with the starter set on boot.
    pub seed_drinks: bool,
    pub reconciler: ReconcilerConfig,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Read the port on which to listen.
        let port = parse_or(&lookup, "PORT", DEFAULT_PORT)?;

        // Read the IP address on which to listen
        let ip = match lookup("LISTEN_IP") {
            Some(ip) => IpAddr::from_str(ip.trim())
                .map_err(|_| Error::Config(format!("Failed to parse $LISTEN_IP `{}`", ip)))?,
            None => IpAddr::from_str(DEFAULT_LISTEN_IP)
                .map_err(|e| Error::Config(e.to_string()))?,
        };

        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::Config("DATABASE_URL must be set!".into()))?;

        let pool_size = parse_or(&lookup, "DATABASE_POOL_SIZE", DEFAULT_POOL_SIZE)?;
        if pool_size == 0 {
            return Err(Error::Config("DATABASE_POOL_SIZE must be at least 1".into()));
        }

        let seed_drinks = parse_or(&lookup, "SEED_DRINKS", false)?;

        let defaults = ReconcilerConfig::default();
        let results_delay = parse_or(
            &lookup,
            "RESULTS_DELAY_MS",
            defaults.results_delay.as_millis() as u64,
        )?;

        Ok(Config {
            listen_addr: SocketAddr::new(ip, port),
            database_url,
            pool_size,
            seed_drinks,
            reconciler: ReconcilerConfig {
                results_delay: Duration::from_millis(results_delay),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Failed to parse ${} `{}`", key, raw))),
        None => Ok(default),
    }
}
