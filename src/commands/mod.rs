pub mod dump;
pub mod pool;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use nsrecruit::api::NationStatesClient;
use nsrecruit::config::Config;
use nsrecruit::dump::DumpCache;
use nsrecruit::recruitment::{EngineContext, RecruitmentEngine};
use nsrecruit::storage::{create_sqlite_repository, SharedNationRepository};

// Re-export command functions for convenience
pub use dump::import_dump;
pub use pool::{check, members, recruitable, requeue, status};
pub use run::run;

/// Load the configuration file, or the environment when no file is given
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
}

/// Open the candidate store, creating its directory if needed
pub fn open_store(config: &Config) -> Result<SharedNationRepository> {
    let path = &config.database.sqlite_path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
    }
    create_sqlite_repository(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))
}

/// Engine plus the dump cache it reads from
pub struct Runtime {
    pub engine: Arc<RecruitmentEngine>,
    pub dump: Arc<DumpCache>,
}

/// Wire the API client, dump cache and store into an engine
pub fn build_runtime(config: &Config) -> Result<Runtime> {
    let gateway = Arc::new(
        NationStatesClient::new(&config.api, &config.rate_limits)
            .context("Failed to create API client")?,
    );
    let dump = Arc::new(
        DumpCache::new(config.dump.clone(), &config.api.contact)
            .context("Failed to create dump cache")?,
    );
    let store = open_store(config)?;

    let ctx = EngineContext::new(
        config.recruitment.clone(),
        &config.api.region_name,
        store,
        gateway,
        Arc::clone(&dump),
    );

    Ok(Runtime {
        engine: Arc::new(RecruitmentEngine::new(ctx)),
        dump,
    })
}
