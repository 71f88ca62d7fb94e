use anyhow::{Result, anyhow};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub log: Log,
    pub store: Store,
    pub user_store: UserStore,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Deserialize)]
pub struct Store {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub key_prefix: String,
    /// Memory backend only.
    pub enforce_unique_constraints: bool,
    /// Memory backend only; 0 keeps the query index in step with writes.
    pub indexing_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct UserStore {
    pub auto_save_changes: bool,
    pub dispose_session: bool,
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

const ENV_PREFIX: &str = "IDENTITY";

/// Reads the TOML file at `path` (or the build profile's default), then
/// applies `IDENTITY__<SECTION>__<KEY>` environment overrides.
pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .set_default("store.backend", "memory")
        .and_then(|b| b.set_default("store.key_prefix", "identity"))
        .and_then(|b| b.set_default("store.enforce_unique_constraints", true))
        .and_then(|b| b.set_default("store.indexing_delay_ms", 0))
        .and_then(|b| b.set_default("user_store.auto_save_changes", true))
        .and_then(|b| b.set_default("user_store.dispose_session", true))
        .map_err(|e| anyhow!(e))?
        .add_source(File::with_name(path))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
