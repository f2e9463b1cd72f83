use std::error::Error;
use std::sync::Arc;

use hearth_core::storage::data_dir;
use hearth_core::{Config, Engine, EngineBuilder, KeyValueStore, SqliteStore};
use serde::Serialize;

pub mod badge;
pub mod checkin;
pub mod config;
pub mod contact;
pub mod emergency;
pub mod ledger;
pub mod referral;
pub mod rewards;
pub mod streak;
pub mod xp;

pub type CliResult = Result<(), Box<dyn Error>>;

pub fn open_store() -> Result<Arc<dyn KeyValueStore>, Box<dyn Error>> {
    let path = data_dir()?.join("hearth.db");
    Ok(Arc::new(SqliteStore::open(&path)?))
}

/// Engine over the data directory's database and config.
pub fn engine_builder() -> Result<EngineBuilder, Box<dyn Error>> {
    Ok(Engine::builder().store(open_store()?).config(Config::load()?))
}

pub fn open_engine() -> Result<Engine, Box<dyn Error>> {
    Ok(engine_builder()?.build())
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
