//! nsrecruit - NationStates recruitment engine
//!
//! Keeps a pool of recruitment candidates, evaluates them against name
//! heuristics, the daily dumps and the live API, and sends recruitment
//! telegrams within the API's per-category rate limits.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`api`] - Rate-limited NationStates API gateway
//! - [`dump`] - Daily regions/nations dump cache
//! - [`storage`] - Candidate store (SQLite and in-memory)
//! - [`recruitment`] - Engine loops, eligibility pipeline and manual requests
//! - [`control`] - HTTP control API
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//! - [`models`] - Core data structures and types
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nsrecruit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!
//!     let gateway = Arc::new(NationStatesClient::new(&config.api, &config.rate_limits)?);
//!     let dump = Arc::new(DumpCache::new(config.dump.clone(), &config.api.contact)?);
//!     let store = create_sqlite_repository(&config.database.sqlite_path)?;
//!
//!     let engine = RecruitmentEngine::new(EngineContext::new(
//!         config.recruitment.clone(),
//!         &config.api.region_name,
//!         store,
//!         gateway,
//!         dump,
//!     ));
//!     engine.start().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod control;
pub mod dump;
pub mod error;
pub mod metrics;
pub mod models;
pub mod recruitment;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{ActionCategory, Gateway, NationStatesClient, SharedGateway};
    pub use crate::config::Config;
    pub use crate::dump::{DumpCache, Snapshot};
    pub use crate::error::{Error, ErrorCategory, RecruitErrorTrait, Result};
    pub use crate::models::{Nation, NationStatus};
    pub use crate::recruitment::{EngineContext, RecruitmentEngine, StatusSummary};
    pub use crate::storage::{
        create_memory_repository, create_sqlite_repository, NationRepository,
        SharedNationRepository,
    };
}

// Direct re-exports for convenience
pub use models::{Nation, NationStatus};
