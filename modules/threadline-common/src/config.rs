use std::env;

use tracing::info;

use crate::ThreadlineError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub neo4j_database: Option<String>,

    // Pool tuning
    pub fetch_size: usize,
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "test".to_string(),
            neo4j_database: None,
            fetch_size: 500,
            max_connections: 10,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// local development defaults for anything unset.
    pub fn from_env() -> Result<Self, ThreadlineError> {
        let defaults = Self::default();
        Ok(Self {
            neo4j_uri: env::var("NEO4J_URI").unwrap_or(defaults.neo4j_uri),
            neo4j_user: env::var("NEO4J_USER").unwrap_or(defaults.neo4j_user),
            neo4j_password: env::var("NEO4J_PASSWORD").unwrap_or(defaults.neo4j_password),
            neo4j_database: env::var("NEO4J_DATABASE").ok().filter(|db| !db.is_empty()),
            fetch_size: parse_env("NEO4J_FETCH_SIZE", defaults.fetch_size)?,
            max_connections: parse_env("NEO4J_MAX_CONNECTIONS", defaults.max_connections)?,
        })
    }

    /// Log the effective configuration with credentials masked.
    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = self.neo4j_uri.as_str(),
            neo4j_user = self.neo4j_user.as_str(),
            neo4j_password = redact(&self.neo4j_password),
            neo4j_database = self.neo4j_database.as_deref().unwrap_or("(default)"),
            fetch_size = self.fetch_size,
            max_connections = self.max_connections,
            "Configuration loaded"
        );
    }
}

fn parse_env(key: &str, default: usize) -> Result<usize, ThreadlineError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ThreadlineError::Config(format!("{key} must be a number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "(empty)"
    } else {
        "********"
    }
}
