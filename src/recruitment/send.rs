//! Telegram send loop
//!
//! Keeps a FIFO working set of up to `batch_size` reserved candidates and
//! sends one recruitment telegram each time the category opens. Before each
//! send the candidate is re-validated, so a nation that became ineligible
//! while waiting does not burn a telegram slot.
//!
//! Waiting is cancellable. Once a candidate has been re-validated, the send
//! and the status commit run to completion even if shutdown is signalled.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::pipeline::{
    evaluate, next_status_after_evaluation, next_status_after_send, SendOutcome, Verdict,
};
use super::{claim_next, pause, ClaimStep, EngineContext, RecruitmentStatus};
use crate::api::ActionCategory;
use crate::error::Result;
use crate::metrics;
use crate::models::{Nation, NationStatus};

/// What happened to the candidate taken from the working set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStep {
    /// Telegram attempted
    Sent { nation: String, outcome: SendOutcome },
    /// Dropped during re-validation
    Dropped { nation: String, verdict: Verdict },
    /// The store no longer holds it as `reserved_api`
    Stale { nation: String },
}

/// The send loop and its working set
pub struct SendLoop {
    ctx: Arc<EngineContext>,
    working_set: VecDeque<Nation>,
}

impl SendLoop {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            working_set: VecDeque::new(),
        }
    }

    pub fn working_set(&self) -> impl Iterator<Item = &str> {
        self.working_set.iter().map(|nation| nation.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.working_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working_set.is_empty()
    }

    fn batch_size(&self) -> usize {
        self.ctx.config.batch_size.max(1)
    }

    fn contains(&self, name: &str) -> bool {
        self.working_set.iter().any(|nation| nation.name == name)
    }

    /// Fill the working set up to the batch size
    ///
    /// Existing `reserved_api` rows are adopted first, oldest first; the
    /// rest is claimed from `pending`. Returns the number of candidates
    /// added.
    pub async fn refill(&mut self) -> Result<usize> {
        let batch = self.batch_size();
        let mut added = 0;

        let reserved = self
            .ctx
            .store
            .list_by_status(NationStatus::ReservedApi, None)?;
        for nation in reserved.into_iter().rev() {
            if self.working_set.len() >= batch {
                break;
            }
            if !self.contains(&nation.name) {
                tracing::debug!(nation = %nation.name, "Adopted reserved candidate");
                self.working_set.push_back(nation);
                added += 1;
            }
        }

        while self.working_set.len() < batch {
            match claim_next(&self.ctx, NationStatus::ReservedApi).await? {
                ClaimStep::Claimed(nation) => {
                    self.working_set.push_back(nation);
                    added += 1;
                }
                ClaimStep::Rejected { .. } | ClaimStep::Lost => {}
                ClaimStep::Exhausted => break,
                ClaimStep::Stalled(reason) => {
                    tracing::warn!(reason = %reason, "Working set fill interrupted");
                    break;
                }
            }
            tokio::task::yield_now().await;
        }

        if added > 0 {
            tracing::info!(added, size = self.working_set.len(), "Working set filled");
        }
        Ok(added)
    }

    /// Re-validate and send to the front candidate
    ///
    /// The candidate leaves the working set whatever happens. After a
    /// transport error it stays `reserved_api` in the store and is adopted
    /// again by a later refill.
    pub async fn send_next(&mut self) -> Result<Option<SendStep>> {
        let Some(nation) = self.working_set.pop_front() else {
            return Ok(None);
        };
        let ctx = &self.ctx;

        let current = ctx.store.get(&nation.name)?;
        if current.as_ref().map(|n| n.status) != Some(NationStatus::ReservedApi) {
            tracing::debug!(nation = %nation.name, "Candidate no longer reserved, dropping");
            return Ok(Some(SendStep::Stale {
                nation: nation.name,
            }));
        }

        let verdict = evaluate(&ctx.criteria, &ctx.dump, ctx.gateway.as_ref(), &nation).await;
        if !verdict.is_recruitable() {
            if let Some(status) = next_status_after_evaluation(&verdict, NationStatus::ReservedApi)
            {
                if ctx
                    .store
                    .transition(&nation.name, status, NationStatus::ReservedApi, None)?
                {
                    metrics::record_transition(status);
                }
            }
            tracing::info!(nation = %nation.name, verdict = ?verdict, "Candidate dropped before send");
            return Ok(Some(SendStep::Dropped {
                nation: nation.name,
                verdict,
            }));
        }

        let outcome = SendOutcome::from(ctx.gateway.send_recruitment_telegram(&nation.name).await);
        match &outcome {
            SendOutcome::Queued => {
                metrics::record_telegram("queued");
                tracing::info!(nation = %nation.name, "Recruitment telegram queued");
            }
            SendOutcome::Rejected(reason) => {
                metrics::record_telegram("rejected");
                tracing::warn!(nation = %nation.name, reason = %reason, "Recruitment telegram rejected");
            }
            SendOutcome::Transport(error) => {
                metrics::record_telegram("transport");
                tracing::warn!(nation = %nation.name, error = %error, "Recruitment telegram not confirmed");
            }
        }

        if let Some(status) = next_status_after_send(&outcome) {
            if ctx
                .store
                .transition(&nation.name, status, NationStatus::ReservedApi, None)?
            {
                metrics::record_transition(status);
            } else {
                tracing::warn!(nation = %nation.name, status = %status, "Send result not recorded, candidate changed meanwhile");
            }
        }

        Ok(Some(SendStep::Sent {
            nation: nation.name,
            outcome,
        }))
    }

    /// Run until shutdown is signalled
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let config = self.ctx.config.clone();
        tracing::info!(batch_size = self.batch_size(), "Send loop started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if self.working_set.is_empty() {
                match self.pool_is_empty() {
                    Ok(true) => {
                        self.ctx
                            .set_recruitment_status(RecruitmentStatus::Throttled)
                            .await;
                        if !pause(config.throttle_backoff(), &mut shutdown_rx).await {
                            break;
                        }
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read pool size");
                        if !pause(config.idle_retry(), &mut shutdown_rx).await {
                            break;
                        }
                        continue;
                    }
                }

                let filled = tokio::select! {
                    result = self.refill() => result,
                    _ = shutdown_rx.changed() => break,
                };
                if let Err(e) = filled {
                    tracing::warn!(error = %e, "Working set refill failed");
                }
                if self.working_set.is_empty() {
                    if !pause(config.idle_retry(), &mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }

                let status = if self.working_set.len() < self.batch_size() {
                    tracing::warn!(
                        filled = self.working_set.len(),
                        batch_size = self.batch_size(),
                        "Not enough recruitable nations for a full batch"
                    );
                    RecruitmentStatus::Throttled
                } else {
                    RecruitmentStatus::FullyOperational
                };
                self.ctx.set_recruitment_status(status).await;
            }

            tokio::select! {
                _ = self.ctx.gateway.wait_until_ready(ActionCategory::RecruitmentTelegram, true) => {}
                _ = shutdown_rx.changed() => break,
            }

            // Not raced against shutdown: a started send is always committed
            if let Err(e) = self.send_next().await {
                tracing::warn!(error = %e, "Send step failed");
            }
        }

        tracing::info!(
            unsent = self.working_set.len(),
            "Send loop stopped"
        );
    }

    fn pool_is_empty(&self) -> Result<bool> {
        let store = &self.ctx.store;
        Ok(store.count_by_status(NationStatus::Pending)? == 0
            && store.count_by_status(NationStatus::ReservedApi)? == 0)
    }
}

/// Spawn the send loop
pub fn spawn(ctx: Arc<EngineContext>, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(SendLoop::new(ctx).run(shutdown_rx))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_refill_adopts_then_claims() {
        let harness = Harness::new(test_config()).await;
        harness.insert_aged("adopted_old", NationStatus::ReservedApi, 120);
        harness.insert_aged("adopted_new", NationStatus::ReservedApi, 60);
        harness.pending(&["fresh_one", "fresh_two"]);

        let mut send_loop = SendLoop::new(Arc::clone(&harness.ctx));
        assert_eq!(send_loop.refill().await.unwrap(), 3);

        let names: Vec<&str> = send_loop.working_set().collect();
        assert_eq!(names[..2], ["adopted_old", "adopted_new"]);
        assert_eq!(harness.ctx.store.count_by_status(NationStatus::ReservedApi).unwrap(), 3);
        assert_eq!(harness.ctx.store.count_by_status(NationStatus::Pending).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refill_records_rejections() {
        let harness = Harness::new(test_config()).await;
        harness.gateway.probe("no_thanks", Probe::No);
        harness.pending(&["no_thanks", "digits_42", "welcome"]);

        let mut send_loop = SendLoop::new(Arc::clone(&harness.ctx));
        assert_eq!(send_loop.refill().await.unwrap(), 1);
        assert_eq!(harness.status("no_thanks"), Some(NationStatus::Skipped));
        assert_eq!(harness.status("digits_42"), Some(NationStatus::Skipped));
        assert_eq!(harness.status("welcome"), Some(NationStatus::ReservedApi));
    }

    #[tokio::test]
    async fn test_send_scenario() {
        let harness = Harness::new(test_config()).await;
        harness.pending(&["accepting", "erroring"]);
        harness.gateway.send_result("erroring", Probe::Application);

        let mut send_loop = SendLoop::new(Arc::clone(&harness.ctx));
        send_loop.refill().await.unwrap();
        assert_eq!(send_loop.len(), 2);

        while send_loop.send_next().await.unwrap().is_some() {}

        assert!(send_loop.is_empty());
        assert_eq!(harness.status("accepting"), Some(NationStatus::Send));
        assert_eq!(harness.status("erroring"), Some(NationStatus::Failed));
    }

    #[tokio::test]
    async fn test_transport_error_keeps_reservation() {
        let harness = Harness::new(test_config()).await;
        harness.pending(&["unlucky"]);
        harness.gateway.send_result("unlucky", Probe::Transport);

        let mut send_loop = SendLoop::new(Arc::clone(&harness.ctx));
        send_loop.refill().await.unwrap();
        let step = send_loop.send_next().await.unwrap().unwrap();

        assert!(matches!(
            step,
            SendStep::Sent { outcome: SendOutcome::Transport(_), .. }
        ));
        assert!(send_loop.is_empty());
        assert_eq!(harness.status("unlucky"), Some(NationStatus::ReservedApi));

        // Re-adopted by the next refill
        assert_eq!(send_loop.refill().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_revalidation_drops_ineligible() {
        let harness = Harness::new(test_config()).await;
        harness.pending(&["changed_mind"]);

        let mut send_loop = SendLoop::new(Arc::clone(&harness.ctx));
        send_loop.refill().await.unwrap();
        harness.gateway.probe("changed_mind", Probe::No);

        let step = send_loop.send_next().await.unwrap().unwrap();
        assert!(matches!(step, SendStep::Dropped { .. }));
        assert!(harness.gateway.sent().is_empty());
        assert_eq!(harness.status("changed_mind"), Some(NationStatus::Skipped));
    }

    #[tokio::test]
    async fn test_stale_candidate_not_sent() {
        let harness = Harness::new(test_config()).await;
        harness.pending(&["taken"]);

        let mut send_loop = SendLoop::new(Arc::clone(&harness.ctx));
        send_loop.refill().await.unwrap();
        harness
            .ctx
            .store
            .transition("taken", NationStatus::ReservedManual, NationStatus::ReservedApi, None)
            .unwrap();

        let step = send_loop.send_next().await.unwrap().unwrap();
        assert_eq!(step, SendStep::Stale { nation: "taken".into() });
        assert!(harness.gateway.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttles_without_candidates() {
        let harness = Harness::new(test_config()).await;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = spawn(Arc::clone(&harness.ctx), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            harness.ctx.state().await.recruitment,
            RecruitmentStatus::Throttled
        );

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_batch_is_throttled() {
        let harness = Harness::new(test_config()).await;
        harness.pending(&["only_one"]);
        harness.gateway.set_send_delay(Duration::from_secs(10));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = spawn(Arc::clone(&harness.ctx), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            harness.ctx.state().await.recruitment,
            RecruitmentStatus::Throttled
        );

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_is_fully_operational() {
        let harness = Harness::new(test_config()).await;
        harness.pending(&["land_one", "land_two", "land_three"]);
        harness.gateway.set_send_delay(Duration::from_secs(10));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = spawn(Arc::clone(&harness.ctx), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            harness.ctx.state().await.recruitment,
            RecruitmentStatus::FullyOperational
        );

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_drains_pool() {
        let harness = Harness::new(test_config()).await;
        harness.pending(&["first_land", "second_land"]);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = spawn(Arc::clone(&harness.ctx), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.gateway.sent().len(), 2);
        assert_eq!(
            harness.ctx.store.count_by_status(NationStatus::Send).unwrap(),
            2
        );

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_send_commits() {
        let harness = Harness::new(test_config()).await;
        harness.pending(&["in_flight"]);
        harness.gateway.set_send_delay(Duration::from_secs(10));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = spawn(Arc::clone(&harness.ctx), shutdown_rx);

        // Let the loop reach the send call, then stop it mid-send
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(harness.status("in_flight"), Some(NationStatus::ReservedApi));
        shutdown.send(true).unwrap();

        handle.await.unwrap();
        assert_eq!(harness.gateway.sent(), vec!["in_flight"]);
        assert_eq!(harness.status("in_flight"), Some(NationStatus::Send));
    }
}
