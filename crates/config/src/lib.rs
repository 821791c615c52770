pub mod env;
pub mod file;
pub mod tracing_init;

pub use env::{AppConfig, LogFormat};
pub use file::{EntityConfig, LockConfig, LockStrategy, RetryConfig, SourceConfig, SyncConfig};
pub use tracing_init::init_tracing;
