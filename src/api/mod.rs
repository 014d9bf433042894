//! NationStates API gateway
//!
//! - [`limiter`] - per-category interval ledger
//! - [`xml`] - response payload extraction and error classification
//! - [`client`] - HTTP client issuing the byte-exact request shapes
//!
//! The recruitment engine only sees the [`Gateway`] trait, so tests can
//! swap in a scripted fake.

pub mod client;
pub mod limiter;
pub mod xml;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::utils::error::ApiError;

pub use client::NationStatesClient;
pub use limiter::RateLimitLedger;

/// API version sent with every query
pub const API_VERSION: u32 = 9;

/// Classes of API operation, each with its own minimum interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCategory {
    /// Any ordinary query (including the can-recruit probe)
    Generic,
    /// Non-recruitment telegram
    Telegram,
    /// Recruitment telegram
    RecruitmentTelegram,
    /// Harvest of newly founded nations
    NewNations,
    /// Harvest of a region's member list
    RegionNations,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 5] = [
        ActionCategory::Generic,
        ActionCategory::Telegram,
        ActionCategory::RecruitmentTelegram,
        ActionCategory::NewNations,
        ActionCategory::RegionNations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::Generic => "generic",
            ActionCategory::Telegram => "telegram",
            ActionCategory::RecruitmentTelegram => "recruitment_telegram",
            ActionCategory::NewNations => "new_nations",
            ActionCategory::RegionNations => "region_nations",
        }
    }

    /// Harvests requested by an operator only wait for the generic interval
    pub fn is_harvest(&self) -> bool {
        matches!(
            self,
            ActionCategory::NewNations | ActionCategory::RegionNations
        )
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations the recruitment engine needs from the API
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Ids of the most recently founded nations
    async fn new_nations(&self, automated: bool) -> Result<Vec<String>, ApiError>;

    /// Ids of all nations residing in `region`
    ///
    /// For operator lookups of a live member list. The engine loops read
    /// region members from the daily dump instead.
    async fn region_nations(&self, region: &str, automated: bool)
        -> Result<Vec<String>, ApiError>;

    /// Whether `nation` would accept a recruitment telegram from the home region
    async fn would_receive(&self, nation: &str) -> Result<bool, ApiError>;

    /// Send the configured recruitment telegram; `Ok` means it was queued
    async fn send_recruitment_telegram(&self, nation: &str) -> Result<(), ApiError>;

    /// Wait until `category` is open without claiming it
    async fn wait_until_ready(&self, category: ActionCategory, automated: bool);

    /// Record an execution that happened before this process started
    fn seed_last_execution(&self, category: ActionCategory, at: DateTime<Utc>);
}

/// Thread-safe shared gateway
pub type SharedGateway = Arc<dyn Gateway>;
