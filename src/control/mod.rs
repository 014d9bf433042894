//! Control API for a running recruiter
//!
//! A small HTTP surface over the [`RecruitmentEngine`](crate::recruitment::RecruitmentEngine):
//!
//! ```text
//! GET  /api/health              liveness and uptime
//! GET  /api/status              counts, ratios and loop status
//! POST /api/recruitment/start   start the engine loops
//! POST /api/recruitment/stop    stop the engine loops
//! POST /api/recruitable         reserve candidates for manual telegrams
//! GET  /api/nations/{name}      evaluate one nation without reserving it
//! GET  /metrics                 Prometheus text format
//! ```

pub mod api;
pub mod server;

pub use api::{ApiResponse, HealthResponse, RecruitableRequest, RecruitableResponse};
pub use server::{AppState, ControlServer, ServerError};
