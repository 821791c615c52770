use mirror_common::error::{MirrorError, MirrorResult};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("invalid LOG_FORMAT: {other}")),
        }
    }
}

/// Process-level settings read from the environment. Everything about the
/// source and the synced entities lives in the YAML file at `config_path`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub config_path: PathBuf,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> MirrorResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            config_path: PathBuf::from(get_var_or("MIRROR_CONFIG", "mirror.yaml")),
            log_level: get_var_or("LOG_LEVEL", "info"),
            log_format: get_var_or("LOG_FORMAT", "text")
                .parse()
                .map_err(MirrorError::Config)?,
        })
    }
}

fn get_var(key: &str) -> MirrorResult<String> {
    env::var(key).map_err(|_| MirrorError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}
