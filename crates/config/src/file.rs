//! YAML sync configuration: the source endpoint, retry and lock settings, and
//! the ordered list of entities to mirror.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use mirror_common::error::{MirrorError, MirrorResult};
use mirror_common::Domain;
use serde::Deserialize;

/// Env var consulted when `source.password` is absent from the file.
pub const PASSWORD_ENV: &str = "MIRROR_SOURCE_PASSWORD";

/// Advisory lock key used when `lock.key` is not configured.
pub const DEFAULT_LOCK_KEY: i64 = 0x6d69_7272_6f72;

const MAX_RETRIES_LIMIT: u32 = 20;
/// One year.
const MAX_OVERLAP_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub lock: LockConfig,
    pub entities: Vec<EntityConfig>,
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl SourceConfig {
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStrategy {
    /// Session-scoped `pg_try_advisory_lock` held for the whole pass.
    #[default]
    Advisory,
    /// No locking, for stores behind transaction-pooling proxies.
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    pub strategy: LockStrategy,
    pub key: i64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            strategy: LockStrategy::Advisory,
            key: DEFAULT_LOCK_KEY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    pub name: String,
    /// Empty means every field the source exposes.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub filter: Option<Domain>,
    #[serde(default = "default_cursor_field")]
    pub cursor_field: String,
    #[serde(default = "default_overlap_secs")]
    pub overlap_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl EntityConfig {
    pub fn overlap(&self) -> Duration {
        Duration::from_secs(self.overlap_secs)
    }
}

fn default_cursor_field() -> String {
    "write_date".to_string()
}

fn default_overlap_secs() -> u64 {
    120
}

fn default_page_size() -> u32 {
    500
}

impl SyncConfig {
    /// Read, parse and validate the YAML file at `path`.
    pub fn load(path: &Path) -> MirrorResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    /// Parse and validate YAML text. A missing `source.password` is taken
    /// from `MIRROR_SOURCE_PASSWORD`.
    pub fn parse(raw: &str) -> MirrorResult<Self> {
        let mut config: SyncConfig = serde_yaml::from_str(raw)
            .map_err(|e| MirrorError::Config(format!("invalid sync config: {e}")))?;

        if config.source.password.is_none() {
            config.source.password = std::env::var(PASSWORD_ENV).ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MirrorResult<()> {
        for (key, value) in [
            ("source.url", &self.source.url),
            ("source.database", &self.source.database),
            ("source.username", &self.source.username),
        ] {
            if value.trim().is_empty() {
                return Err(MirrorError::Config(format!("{key} must not be empty")));
            }
        }
        if self.source.password.as_deref().map_or(true, str::is_empty) {
            return Err(MirrorError::Config(format!(
                "source.password is not set and {PASSWORD_ENV} is empty"
            )));
        }

        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            return Err(MirrorError::Config(format!(
                "retry.max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                self.retry.max_retries
            )));
        }
        if self.retry.timeout_secs == 0 {
            return Err(MirrorError::Config("retry.timeout_secs must be > 0".into()));
        }

        if self.entities.is_empty() {
            return Err(MirrorError::Config("at least one entity must be configured".into()));
        }

        let mut seen = HashSet::new();
        for entity in &self.entities {
            let name = entity.name.trim();
            if name.is_empty() {
                return Err(MirrorError::Config("entity name must not be empty".into()));
            }
            if !seen.insert(name) {
                return Err(MirrorError::Config(format!("duplicate entity: {name}")));
            }
            if entity.page_size == 0 {
                return Err(MirrorError::Config(format!(
                    "entity {name}: page_size must be > 0"
                )));
            }
            if entity.overlap_secs > MAX_OVERLAP_SECS {
                return Err(MirrorError::Config(format!(
                    "entity {name}: overlap_secs must be at most {MAX_OVERLAP_SECS}, got {}",
                    entity.overlap_secs
                )));
            }
            if entity.cursor_field.trim().is_empty() {
                return Err(MirrorError::Config(format!(
                    "entity {name}: cursor_field must not be empty"
                )));
            }
        }

        Ok(())
    }

    /// Entities to sync, in configured order. An empty `only` selects all;
    /// otherwise every requested name must exist.
    pub fn select_entities(&self, only: &[String]) -> MirrorResult<Vec<&EntityConfig>> {
        if only.is_empty() {
            return Ok(self.entities.iter().collect());
        }

        if let Some(unknown) = only
            .iter()
            .find(|name| !self.entities.iter().any(|e| &e.name == *name))
        {
            return Err(MirrorError::Config(format!("unknown entity: {unknown}")));
        }

        Ok(self
            .entities
            .iter()
            .filter(|e| only.contains(&e.name))
            .collect())
    }
}
