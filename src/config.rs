use anyhow::{bail, Context, Result};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage: StorageBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub max_body_bytes: usize,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage = match get("LEARNHUB_STORAGE").as_deref().map(str::trim) {
            None | Some("") | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => bail!("LEARNHUB_STORAGE must be `postgres` or `memory`, got `{other}`"),
        };
        let database_url = get("DATABASE_URL").filter(|s| !s.trim().is_empty());
        if storage == StorageBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL not set");
        }

        Ok(Self {
            port: parse_or(&get, "PORT", 8081)?,
            storage,
            database_url,
            db_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            max_body_bytes: parse_or(&get, "MAX_BODY_BYTES", 10 * 1024 * 1024)?,
            cors_origins: get("CORS_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            log_filter: get("RUST_LOG").unwrap_or_else(|| "learnhub=info,tower_http=info".into()),
        })
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {key}: `{raw}`")),
        None => Ok(default),
    }
}
