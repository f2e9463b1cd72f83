mod config;
mod kv;
pub mod migrations;
mod repository;
mod sqlite;

pub use config::{Config, RewardsConfig, SafetyConfig, StreaksConfig};
pub use kv::{KeyValueStore, MemoryStore};
pub use repository::{key_segment, Mutation, Repository};
pub use sqlite::SqliteStore;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `HEARTH_DATA_DIR` wins when set. Otherwise `~/.config/hearth[-dev]/`
/// based on `HEARTH_ENV` (set `HEARTH_ENV=dev` for a development directory).
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("HEARTH_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("HEARTH_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("hearth-dev")
            } else {
                base_dir.join("hearth")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
