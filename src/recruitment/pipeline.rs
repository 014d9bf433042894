//! Claim, probe and commit
//!
//! Every candidate goes through the same evaluation before it is reserved
//! and again before a telegram is sent:
//!
//! ```text
//! criteria ──► dump snapshot ──► live can-recruit probe
//!    │              │                    │
//!  reject         absent           no / API error / transport error
//! ```
//!
//! The mapping from an evaluation or send outcome to the next status is kept
//! in pure functions so the state machine can be tested without I/O.

use std::fmt;

use super::criteria::{Criteria, Rejection};
use crate::api::Gateway;
use crate::dump::{DumpCache, NationCheck};
use crate::models::{Nation, NationStatus};
use crate::utils::error::ApiError;

/// Why a candidate is not worth a telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IneligibleReason {
    Criteria(Rejection),
    /// Missing from a snapshot newer than the candidate (likely ceased to exist)
    NotInDump,
    /// The API says the nation would not receive the telegram
    CannotReceive,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::Criteria(rejection) => write!(f, "criteria: {rejection}"),
            IneligibleReason::NotInDump => f.write_str("not in dump"),
            IneligibleReason::CannotReceive => f.write_str("would not receive telegram"),
        }
    }
}

/// Result of evaluating one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Recruitable,
    Ineligible(IneligibleReason),
    /// The API answered with an error about this candidate
    Failed(String),
    /// A transport error left the question open
    Inconclusive(String),
}

impl Verdict {
    pub fn is_recruitable(&self) -> bool {
        matches!(self, Verdict::Recruitable)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Recruitable => f.write_str("recruitable"),
            Verdict::Ineligible(reason) => write!(f, "ineligible ({reason})"),
            Verdict::Failed(reason) => write!(f, "failed ({reason})"),
            Verdict::Inconclusive(reason) => write!(f, "inconclusive ({reason})"),
        }
    }
}

/// Result of one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The API answered, but did not queue the telegram
    Rejected(String),
    /// Nothing is known about whether the telegram went out
    Transport(String),
}

impl From<Result<(), ApiError>> for SendOutcome {
    fn from(result: Result<(), ApiError>) -> Self {
        match result {
            Ok(()) => SendOutcome::Queued,
            Err(e) if e.is_transport() => SendOutcome::Transport(e.to_string()),
            Err(e) => SendOutcome::Rejected(e.to_string()),
        }
    }
}

/// Status a candidate moves to after evaluation
///
/// `target` is the reservation the caller wants (`reserved_api` or
/// `reserved_manual`). `None` leaves the candidate where it is.
pub fn next_status_after_evaluation(
    verdict: &Verdict,
    target: NationStatus,
) -> Option<NationStatus> {
    match verdict {
        Verdict::Recruitable => Some(target),
        Verdict::Ineligible(_) => Some(NationStatus::Skipped),
        Verdict::Failed(_) => Some(NationStatus::Failed),
        Verdict::Inconclusive(_) => None,
    }
}

/// Status a reserved candidate moves to after a send attempt
pub fn next_status_after_send(outcome: &SendOutcome) -> Option<NationStatus> {
    match outcome {
        SendOutcome::Queued => Some(NationStatus::Send),
        SendOutcome::Rejected(_) => Some(NationStatus::Failed),
        SendOutcome::Transport(_) => None,
    }
}

/// Run the full eligibility pipeline for one candidate
pub async fn evaluate(
    criteria: &Criteria,
    dump: &DumpCache,
    gateway: &dyn Gateway,
    nation: &Nation,
) -> Verdict {
    if let Err(rejection) = criteria.check(&nation.name) {
        return Verdict::Ineligible(IneligibleReason::Criteria(rejection));
    }

    if dump.check_nation(&nation.name, nation.status_time).await == NationCheck::Absent {
        return Verdict::Ineligible(IneligibleReason::NotInDump);
    }

    match gateway.would_receive(&nation.name).await {
        Ok(true) => Verdict::Recruitable,
        Ok(false) => Verdict::Ineligible(IneligibleReason::CannotReceive),
        Err(e) if e.is_transport() => Verdict::Inconclusive(e.to_string()),
        Err(e) => Verdict::Failed(e.to_string()),
    }
}
