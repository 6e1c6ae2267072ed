//! API server configuration.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Direct (non-pooler) URL used for migrations, when different.
    pub database_direct_url: Option<String>,
    pub bind_address: String,
    pub jwt_secret: String,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let database_direct_url = std::env::var("DATABASE_DIRECT_URL").ok();
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET not set")?;
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url,
            database_direct_url,
            bind_address,
            jwt_secret,
            allowed_origins,
        })
    }
}
