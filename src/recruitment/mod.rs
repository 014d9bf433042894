//! Recruitment engine
//!
//! Three cooperating loops share one [`EngineContext`]:
//!
//! - [`ingest`] - harvests newly founded nations into the `pending` pool
//! - [`replenish`] - requeues stale reservations and tops the pool up with
//!   random members of allow-listed regions
//! - [`send`] - drains the pool through a small working set, one
//!   recruitment telegram per interval
//!
//! The loops only coordinate through the candidate store and the API
//! ledger. A candidate is claimed with a `pending -> reserved_*` transition
//! that only succeeds for one caller, so the loops and manual requests can
//! race freely.

pub mod criteria;
pub mod ingest;
pub mod pipeline;
pub mod replenish;
pub mod send;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Serialize, Serializer};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::api::{ActionCategory, SharedGateway};
use crate::config::RecruitmentConfig;
use crate::dump::DumpCache;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{Nation, NationStatus};
use crate::storage::{SharedNationRepository, StoreStats};
use crate::utils::to_id;

use criteria::Criteria;
use pipeline::{evaluate, next_status_after_evaluation, Verdict};

// ============================================================================
// Status Types
// ============================================================================

/// What the send loop is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecruitmentStatus {
    #[default]
    NotRunning,
    Started,
    Stopped,
    /// Loops run but telegrams are switched off
    Disabled,
    FullyOperational,
    Throttled,
}

impl fmt::Display for RecruitmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecruitmentStatus::NotRunning => "Not Running",
            RecruitmentStatus::Started => "Started",
            RecruitmentStatus::Stopped => "Stopped",
            RecruitmentStatus::Disabled => "Disabled",
            RecruitmentStatus::FullyOperational => "Fully operational",
            RecruitmentStatus::Throttled => "Throttled: lack of nations",
        })
    }
}

impl Serialize for RecruitmentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where new pool entries currently come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolStatus {
    #[default]
    WaitingForNewNations,
    FillingWithNewNations,
    FillingWithRandomNations,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PoolStatus::WaitingForNewNations => "Waiting for new nations",
            PoolStatus::FillingWithNewNations => "Filling up with new nations",
            PoolStatus::FillingWithRandomNations => "Filling up with random nations",
        })
    }
}

impl Serialize for PoolStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Progress of the last manual recruitable request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManualRequestProgress {
    pub requested: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub finished: bool,
}

/// Mutable engine state shown in the status summary
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub recruitment: RecruitmentStatus,
    pub pool: PoolStatus,
    pub manual_request: Option<ManualRequestProgress>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Everything reported by `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub recruitment_status: RecruitmentStatus,
    pub pool_status: PoolStatus,
    pub counts: StoreStats,
    pub api_recruited: usize,
    pub api_ratio: f64,
    pub manual_reserved: usize,
    pub manual_recruited: usize,
    pub manual_ratio: f64,
    pub dump_available: bool,
    pub dump_updating: bool,
    pub dump_updated_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_request: Option<ManualRequestProgress>,
}

/// `part / whole` as a percentage with two decimals, 0 for an empty whole
pub fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 100.0 / whole as f64 * 100.0).round() / 100.0
}

// ============================================================================
// Engine Context
// ============================================================================

/// Shared dependencies of all engine loops
pub struct EngineContext {
    pub config: RecruitmentConfig,
    /// Canonical id of the region recruiting
    pub home_region: String,
    pub store: SharedNationRepository,
    pub gateway: SharedGateway,
    pub dump: Arc<DumpCache>,
    pub criteria: Criteria,
    state: RwLock<EngineState>,
}

impl EngineContext {
    pub fn new(
        config: RecruitmentConfig,
        home_region: &str,
        store: SharedNationRepository,
        gateway: SharedGateway,
        dump: Arc<DumpCache>,
    ) -> Self {
        Self {
            criteria: Criteria::new(config.criteria_check),
            config,
            home_region: to_id(home_region),
            store,
            gateway,
            dump,
            state: RwLock::new(EngineState::default()),
        }
    }

    pub async fn state(&self) -> EngineState {
        self.state.read().await.clone()
    }

    pub async fn set_recruitment_status(&self, status: RecruitmentStatus) {
        let mut state = self.state.write().await;
        if state.recruitment != status {
            tracing::info!(status = %status, "Recruitment status changed");
            state.recruitment = status;
        }
    }

    pub async fn set_pool_status(&self, status: PoolStatus) {
        self.state.write().await.pool = status;
    }

    async fn update_manual_request(&self, progress: ManualRequestProgress) {
        self.state.write().await.manual_request = Some(progress);
    }
}

// ============================================================================
// Shared Loop Helpers
// ============================================================================

/// Sleep for `duration` unless shutdown is signalled first
///
/// Returns `false` when the caller should stop.
pub(crate) async fn pause(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown_rx.changed() => false,
    }
}

/// Result of trying to claim the newest pending candidate
#[derive(Debug)]
pub(crate) enum ClaimStep {
    /// Reserved with the requested status
    Claimed(Nation),
    /// Evaluated and moved to `skipped` or `failed`
    Rejected { name: String, status: NationStatus },
    /// Another caller changed the row first
    Lost,
    /// No pending candidates left
    Exhausted,
    /// Evaluation was inconclusive; the candidate stays pending
    Stalled(String),
}

/// Evaluate the newest pending candidate and move it out of `pending`
pub(crate) async fn claim_next(ctx: &EngineContext, target: NationStatus) -> Result<ClaimStep> {
    let Some(nation) = ctx.store.next_pending()? else {
        return Ok(ClaimStep::Exhausted);
    };

    let verdict = evaluate(&ctx.criteria, &ctx.dump, ctx.gateway.as_ref(), &nation).await;
    let Some(status) = next_status_after_evaluation(&verdict, target) else {
        let reason = match verdict {
            Verdict::Inconclusive(reason) => reason,
            other => format!("{other:?}"),
        };
        tracing::warn!(nation = %nation.name, reason = %reason, "Candidate evaluation inconclusive");
        return Ok(ClaimStep::Stalled(reason));
    };

    if !ctx
        .store
        .transition(&nation.name, status, NationStatus::Pending, None)?
    {
        tracing::debug!(nation = %nation.name, "Candidate claimed elsewhere");
        return Ok(ClaimStep::Lost);
    }
    metrics::record_transition(status);

    if status == target {
        tracing::debug!(nation = %nation.name, status = %status, "Candidate reserved");
        Ok(ClaimStep::Claimed(Nation {
            status,
            status_time: Utc::now(),
            ..nation
        }))
    } else {
        tracing::debug!(nation = %nation.name, status = %status, verdict = ?verdict, "Candidate rejected");
        Ok(ClaimStep::Rejected {
            name: nation.name,
            status,
        })
    }
}

// ============================================================================
// Engine
// ============================================================================

/// A spawned engine loop
struct EngineTask {
    name: &'static str,
    handle: JoinHandle<()>,
    /// Joined without a deadline; the send loop only exits between sends
    drain: bool,
}

impl EngineTask {
    fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self {
            name,
            handle,
            drain: false,
        }
    }

    fn drained(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self {
            name,
            handle,
            drain: true,
        }
    }

    /// Wait for the loop to exit, aborting it after `timeout` unless drained
    async fn join(mut self, timeout: Duration) {
        let joined = if self.drain {
            Ok((&mut self.handle).await)
        } else {
            tokio::time::timeout(timeout, &mut self.handle).await
        };

        match joined {
            Ok(Ok(())) => tracing::debug!(task = self.name, "Engine loop stopped"),
            Ok(Err(e)) => tracing::error!(task = self.name, error = %e, "Engine loop failed"),
            Err(_) => {
                tracing::warn!(task = self.name, "Engine loop did not stop in time, aborting");
                self.handle.abort();
            }
        }
    }
}

/// Handle to the running loops
struct EngineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<EngineTask>,
}

/// Start/stop control around the engine loops
pub struct RecruitmentEngine {
    ctx: Arc<EngineContext>,
    running: Mutex<Option<EngineHandle>>,
}

impl RecruitmentEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self::from_context(Arc::new(ctx))
    }

    pub fn from_context(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            running: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Whether the loops are running; a stop still draining counts as running
    pub async fn is_running(&self) -> bool {
        match self.running.try_lock() {
            Ok(running) => running.is_some(),
            Err(_) => true,
        }
    }

    /// Start the loops
    ///
    /// Waits for the dump snapshot first. Fails if the engine is already
    /// running or no snapshot becomes available within the startup timeout.
    pub async fn start(&self) -> Result<()> {
        if self.is_running().await {
            return Err(Error::engine("recruitment is already running"));
        }

        let timeout = self.ctx.config.startup_timeout();
        tracing::info!(timeout_secs = timeout.as_secs(), "Waiting for dump data");
        self.ctx.dump.wait_for_snapshot(timeout).await?;

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Error::engine("recruitment is already running"));
        }

        if let Some(last_sent) = self.ctx.store.last_status_time(NationStatus::Send)? {
            self.ctx
                .gateway
                .seed_last_execution(ActionCategory::RecruitmentTelegram, last_sent);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = vec![
            EngineTask::new(
                "ingestion",
                ingest::spawn(Arc::clone(&self.ctx), shutdown_rx.clone()),
            ),
            EngineTask::new(
                "replenishment",
                replenish::spawn(Arc::clone(&self.ctx), shutdown_rx.clone()),
            ),
        ];

        if self.ctx.config.enabled {
            tasks.push(EngineTask::drained(
                "send",
                send::spawn(Arc::clone(&self.ctx), shutdown_rx),
            ));
            self.ctx
                .set_recruitment_status(RecruitmentStatus::Started)
                .await;
        } else {
            tracing::warn!("Recruitment telegrams are disabled; only the pool is maintained");
            self.ctx
                .set_recruitment_status(RecruitmentStatus::Disabled)
                .await;
        }

        self.ctx.state.write().await.started_at = Some(Utc::now());
        *running = Some(EngineHandle { shutdown, tasks });
        tracing::info!(home_region = %self.ctx.home_region, "Recruitment started");
        Ok(())
    }

    /// Signal the loops to stop and wait for them
    ///
    /// A telegram already being sent is committed before the send loop
    /// exits, however long that takes. The other loops are aborted if they
    /// do not finish within the shutdown timeout. The engine cannot be
    /// started again until every loop has been joined.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        let handle = running
            .take()
            .ok_or_else(|| Error::engine("recruitment is not running"))?;

        // Fails only if every loop already exited
        let _ = handle.shutdown.send(true);

        let timeout = self.ctx.config.shutdown_timeout();
        for task in handle.tasks {
            task.join(timeout).await;
        }

        self.ctx
            .set_recruitment_status(RecruitmentStatus::Stopped)
            .await;
        tracing::info!("Recruitment stopped");
        Ok(())
    }

    /// Counts, ratios and loop status
    pub async fn status_summary(&self) -> Result<StatusSummary> {
        let ctx = &self.ctx;
        let counts = ctx.store.stats()?;
        metrics::update_pool_sizes(&counts);

        let state = ctx.state().await;
        let snapshot = ctx.dump.snapshot().await;
        let home: HashSet<&str> = snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.region(&ctx.home_region))
            .map(|region| region.nations.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let recruited_among = |status: NationStatus| -> Result<usize> {
            Ok(ctx
                .store
                .list_by_status(status, None)?
                .iter()
                .filter(|nation| home.contains(nation.name.as_str()))
                .count())
        };

        let api_recruited = recruited_among(NationStatus::Send)?;
        let manual_recruited = recruited_among(NationStatus::ReservedManual)?;

        Ok(StatusSummary {
            recruitment_status: state.recruitment,
            pool_status: state.pool,
            api_recruited,
            api_ratio: ratio(api_recruited, counts.send + counts.failed),
            manual_reserved: counts.reserved_manual,
            manual_recruited,
            manual_ratio: ratio(manual_recruited, counts.reserved_manual),
            counts,
            dump_available: ctx.dump.is_available(),
            dump_updating: ctx.dump.is_refreshing(),
            dump_updated_at: snapshot.as_ref().map(|snapshot| snapshot.updated_at()),
            started_at: state.started_at,
            manual_request: state.manual_request,
        })
    }

    /// Evaluate one nation without changing the store
    pub async fn evaluate_nation(&self, name: &str) -> Result<Verdict> {
        let nation = self
            .ctx
            .store
            .get(name)?
            .unwrap_or_else(|| Nation::new(name, NationStatus::Pending));
        Ok(evaluate(
            &self.ctx.criteria,
            &self.ctx.dump,
            self.ctx.gateway.as_ref(),
            &nation,
        )
        .await)
    }

    /// Lazily reserve up to `count` recruitable candidates
    ///
    /// Operator requests reserve as `reserved_manual`, automated ones as
    /// `reserved_api`. The count is capped by the pending pool size when
    /// the stream is first polled. A transport error ends the stream with
    /// an `Err` item. Dropping the stream cancels the request.
    pub fn recruitable_nations(
        &self,
        count: usize,
        automated: bool,
    ) -> BoxStream<'static, Result<Nation>> {
        let target = if automated {
            NationStatus::ReservedApi
        } else {
            NationStatus::ReservedManual
        };

        let state = RecruitableStream {
            ctx: Arc::clone(&self.ctx),
            requested: count,
            remaining: None,
            progress: ManualRequestProgress::default(),
            done: false,
        };

        stream::unfold(state, move |mut state| async move {
            let item = state.next(target).await?;
            Some((item, state))
        })
        .boxed()
    }
}

struct RecruitableStream {
    ctx: Arc<EngineContext>,
    requested: usize,
    remaining: Option<usize>,
    progress: ManualRequestProgress,
    done: bool,
}

impl RecruitableStream {
    async fn next(&mut self, target: NationStatus) -> Option<Result<Nation>> {
        if self.done {
            return None;
        }

        let remaining = match self.remaining {
            Some(remaining) => remaining,
            None => match self.ctx.store.count_by_status(NationStatus::Pending) {
                Ok(pending) => {
                    let capped = self.requested.min(pending);
                    if capped < self.requested {
                        tracing::info!(
                            requested = self.requested,
                            pending,
                            "Recruitable request capped by pool size"
                        );
                    }
                    self.progress.requested = capped;
                    self.remaining = Some(capped);
                    self.publish().await;
                    capped
                }
                Err(e) => return Some(Err(self.fail(e.into()).await)),
            },
        };

        if remaining == 0 {
            return self.finish().await;
        }

        loop {
            match claim_next(&self.ctx, target).await {
                Ok(ClaimStep::Claimed(nation)) => {
                    self.remaining = Some(remaining - 1);
                    self.progress.delivered += 1;
                    self.publish().await;
                    return Some(Ok(nation));
                }
                Ok(ClaimStep::Rejected { .. }) => {
                    self.progress.skipped += 1;
                    self.publish().await;
                }
                Ok(ClaimStep::Lost) => {}
                Ok(ClaimStep::Exhausted) => return self.finish().await,
                Ok(ClaimStep::Stalled(reason)) => {
                    let err = Error::engine(format!("candidate evaluation stalled: {reason}"));
                    return Some(Err(self.fail(err).await));
                }
                Err(e) => return Some(Err(self.fail(e).await)),
            }
            tokio::task::yield_now().await;
        }
    }

    async fn publish(&self) {
        self.ctx.update_manual_request(self.progress.clone()).await;
    }

    async fn finish(&mut self) -> Option<Result<Nation>> {
        self.done = true;
        self.progress.finished = true;
        self.publish().await;
        None
    }

    async fn fail(&mut self, err: Error) -> Error {
        self.done = true;
        self.progress.finished = true;
        self.publish().await;
        err
    }
}

// ============================================================================
// Tests
// ============================================================================
