use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub billing: BillingConfig,
    /// Enable debug logging for upstream requests (set via CLI)
    pub debug_requests: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()?,
            },
            billing: BillingConfig {
                api_url: env::var("BILLING_API_URL")
                    .unwrap_or_else(|_| "https://api.moonclerk.com".to_string()),
                api_key: env::var("BILLING_API_KEY")
                    .context("BILLING_API_KEY is required")?,
            },
            debug_requests: false, // Set by CLI args in main.rs
        })
    }
}
