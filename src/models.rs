//! Core data structures for recruitment candidates
//!
//! A [`Nation`] is one candidate row. Its [`NationStatus`] is a closed set of
//! tags; the string forms are the persisted representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Nation Status
// ============================================================================

/// Lifecycle tag of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NationStatus {
    /// Eligible and untouched
    Pending,
    /// Claimed by the automated send loop
    ReservedApi,
    /// Claimed by an operator for manual recruiting
    ReservedManual,
    /// Telegram queued successfully
    Send,
    /// Rejected by the eligibility checks
    Skipped,
    /// The API reported an error for this candidate
    Failed,
    /// Resident of a tracked region (qualifier holds the region id)
    Member,
}

impl NationStatus {
    pub const ALL: [NationStatus; 7] = [
        NationStatus::Pending,
        NationStatus::ReservedApi,
        NationStatus::ReservedManual,
        NationStatus::Send,
        NationStatus::Skipped,
        NationStatus::Failed,
        NationStatus::Member,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            NationStatus::Pending => "pending",
            NationStatus::ReservedApi => "reserved_api",
            NationStatus::ReservedManual => "reserved_manual",
            NationStatus::Send => "send",
            NationStatus::Skipped => "skipped",
            NationStatus::Failed => "failed",
            NationStatus::Member => "member",
        }
    }

    /// `send`, `skipped` and `failed` never change without an explicit re-queue
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NationStatus::Send | NationStatus::Skipped | NationStatus::Failed
        )
    }

    pub fn is_reserved(&self) -> bool {
        matches!(self, NationStatus::ReservedApi | NationStatus::ReservedManual)
    }
}

impl fmt::Display for NationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status tag read from storage or input
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown nation status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for NationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ============================================================================
// Nation
// ============================================================================

/// A recruitment candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nation {
    /// Canonical id (see [`crate::utils::to_id`])
    pub name: String,

    pub status: NationStatus,

    /// When `status` was last set
    pub status_time: DateTime<Utc>,

    /// Region id for `member` rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
}

impl Nation {
    /// Create a candidate with a normalized name, stamped now
    pub fn new(name: &str, status: NationStatus) -> Self {
        Self {
            name: crate::utils::to_id(name),
            status,
            status_time: Utc::now(),
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn with_status_time(mut self, at: DateTime<Utc>) -> Self {
        self.status_time = at;
        self
    }
}
