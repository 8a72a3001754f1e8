use std::{env, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo { uri: String, database: String },
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub redis_url: Option<String>,
    pub cache_ttl_secs: u64,
    pub cache_timeout: Duration,
    pub lookup_timeout: Duration,
    pub store_timeout: Duration,
    pub max_insert_attempts: usize,
    pub static_dir: String,
    pub views_dir: String,
}

/// Loads `.env` and then `sample.env` from `dir`, skipping missing files.
///
/// Variables that are already set are never overwritten, so the process
/// environment wins over `.env`, which wins over `sample.env`.
pub fn load_env_files(dir: &Path) {
    for name in [".env", "sample.env"] {
        dotenvy::from_path(dir.join(name)).ok();
    }
}

impl Config {
    /// Reads the process environment. Call [`load_env_files`] first to pick
    /// up env files.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let store = match var("STORE_BACKEND").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("mongo" | "mongodb") => StoreBackend::Mongo {
                uri: var("MONGO_URI").context("MONGO_URI must be set for the mongo backend")?,
                database: var("MONGO_DATABASE").unwrap_or_else(|| "urlshortener".to_owned()),
            },
            Some("memory") => StoreBackend::Memory,
            Some(other) => bail!("unknown STORE_BACKEND {other:?}"),
        };

        let max_insert_attempts = parse_or(&var, "MAX_INSERT_ATTEMPTS", 5)?;
        if max_insert_attempts == 0 {
            bail!("MAX_INSERT_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_or(&var, "PORT", 3000)?,
            store,
            redis_url: var("REDIS_URL").filter(|url| !url.is_empty()),
            cache_ttl_secs: parse_or(&var, "CACHE_TTL_SECS", 3600)?,
            cache_timeout: Duration::from_millis(parse_or(&var, "CACHE_TIMEOUT_MS", 250)?),
            lookup_timeout: Duration::from_millis(parse_or(&var, "LOOKUP_TIMEOUT_MS", 5000)?),
            store_timeout: Duration::from_millis(parse_or(&var, "STORE_TIMEOUT_MS", 5000)?),
            max_insert_attempts,
            static_dir: var("STATIC_DIR").unwrap_or_else(|| "public".to_owned()),
            views_dir: var("VIEWS_DIR").unwrap_or_else(|| "views".to_owned()),
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value {raw:?}")),
        None => Ok(default),
    }
}
