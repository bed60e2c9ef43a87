use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CHAT_CHANNEL_CAPACITY: usize = 32;

/// Application configuration loaded from environment variables.
///
/// Only `PORT` and `CHAT_CHANNEL_CAPACITY` can fail to load (when set to
/// something unparseable). Without `DATABASE_URL` threads live in memory;
/// without `ANTHROPIC_API_KEY` every turn ends with an error frame; without
/// `RESUME_TOOLS_URL` the coach is offered no tools.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    /// Base URL of the résumé service that executes coach tools.
    pub resume_tools_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    /// Frames buffered between the agent task and the HTTP body.
    pub chat_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: None,
            anthropic_api_key: None,
            resume_tools_url: None,
            port: DEFAULT_PORT,
            rust_log: "info".to_string(),
            chat_channel_capacity: DEFAULT_CHAT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Config {
            database_url: optional("DATABASE_URL"),
            anthropic_api_key: optional("ANTHROPIC_API_KEY"),
            resume_tools_url: optional("RESUME_TOOLS_URL"),
            port: match optional("PORT") {
                Some(port) => port
                    .parse::<u16>()
                    .context("PORT must be a valid port number")?,
                None => defaults.port,
            },
            rust_log: optional("RUST_LOG").unwrap_or(defaults.rust_log),
            chat_channel_capacity: match optional("CHAT_CHANNEL_CAPACITY") {
                Some(capacity) => capacity
                    .parse::<usize>()
                    .ok()
                    .filter(|c| *c > 0)
                    .with_context(|| {
                        format!("CHAT_CHANNEL_CAPACITY must be a positive integer, got '{capacity}'")
                    })?,
                None => defaults.chat_channel_capacity,
            },
        })
    }
}
