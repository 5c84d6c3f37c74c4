use std::env;

use serde::{Deserialize, Serialize};

use crate::errors::DbError;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Memory,
}

/// Service configuration, read from `COLDEF_*` environment variables and
/// `DATABASE_URL`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub backend: Backend,
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub max_connections: u32,
    /// Database schemas whose tables are registered at startup.
    pub schemas: Vec<String>,
    pub page_limit: i64,
    pub max_page_limit: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Postgres,
            database_url: None,
            bind_addr: "127.0.0.1:8000".to_string(),
            max_connections: 5,
            schemas: vec!["public".to_string()],
            page_limit: 50,
            max_page_limit: 500,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, DbError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DbError> {
        let mut config = Config::default();

        if let Some(backend) = lookup("COLDEF_BACKEND") {
            config.backend = match backend.to_ascii_lowercase().as_str() {
                "postgres" | "postgresql" => Backend::Postgres,
                "memory" => Backend::Memory,
                other => {
                    return Err(DbError::Config(format!("unknown backend {:?}", other)));
                }
            };
        }
        config.database_url = lookup("DATABASE_URL");
        if let Some(addr) = lookup("COLDEF_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(max) = lookup("COLDEF_MAX_CONNECTIONS") {
            config.max_connections = parse("COLDEF_MAX_CONNECTIONS", &max)?;
        }
        if let Some(schemas) = lookup("COLDEF_SCHEMAS") {
            config.schemas = schemas
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(limit) = lookup("COLDEF_PAGE_LIMIT") {
            config.page_limit = parse("COLDEF_PAGE_LIMIT", &limit)?;
        }
        if let Some(limit) = lookup("COLDEF_MAX_PAGE_LIMIT") {
            config.max_page_limit = parse("COLDEF_MAX_PAGE_LIMIT", &limit)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DbError> {
        if self.backend == Backend::Postgres && self.database_url.is_none() {
            return Err(DbError::Config("DATABASE_URL must be set".to_string()));
        }
        if self.max_connections == 0 {
            return Err(DbError::Config(
                "COLDEF_MAX_CONNECTIONS must be positive".to_string(),
            ));
        }
        if self.schemas.is_empty() {
            return Err(DbError::Config("COLDEF_SCHEMAS is empty".to_string()));
        }
        if self.page_limit <= 0 || self.page_limit > self.max_page_limit {
            return Err(DbError::Config(format!(
                "page limit {} must be between 1 and {}",
                self.page_limit, self.max_page_limit
            )));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DbError> {
    value
        .trim()
        .parse()
        .map_err(|_| DbError::Config(format!("{} has invalid value {:?}", key, value)))
}
