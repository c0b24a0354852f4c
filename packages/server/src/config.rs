use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub pbdb_base_url: String,
    pub neotoma_base_url: String,
    /// Whole-composite deadline; zero disables it.
    pub composite_timeout: Duration,
    /// Transport-failure retry budget per subquery.
    pub composite_retries: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::warn_about_defaults();

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            pbdb_base_url: env::var("PBDB_BASE_URL")
                .unwrap_or_else(|_| "https://paleobiodb.org/data1.2".to_string()),
            neotoma_base_url: env::var("NEOTOMA_BASE_URL")
                .unwrap_or_else(|_| "https://api.neotomadb.org/v2.0".to_string()),
            composite_timeout: Duration::from_secs(
                env::var("COMPOSITE_TIMEOUT")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()
                    .context("COMPOSITE_TIMEOUT must be a number of seconds")?,
            ),
            composite_retries: env::var("COMPOSITE_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("COMPOSITE_RETRIES must be a non-negative integer")?,
        })
    }

    /// Print a note for every knob left at its default
    fn warn_about_defaults() {
        let optional_vars = [
            ("PORT", "8080"),
            ("PBDB_BASE_URL", "https://paleobiodb.org/data1.2"),
            ("NEOTOMA_BASE_URL", "https://api.neotomadb.org/v2.0"),
            ("COMPOSITE_TIMEOUT", "120"),
            ("COMPOSITE_RETRIES", "2"),
        ];
        for (var, default) in optional_vars {
            if env::var(var).is_err() {
                tracing::debug!("{} not set (default: {})", var, default);
            }
        }
    }
}
