//! Pool replenishment loop
//!
//! Each cycle:
//! 1. requeues `reserved_api` rows older than the grace period (a crash or
//!    abort between reserve and send leaves them behind);
//! 2. syncs the home region's members whenever a new dump was installed;
//! 3. while the pool is below its minimum, evaluates random untried members
//!    of the allow-listed regions and adds the recruitable ones.
//!
//! A run of consecutive transport errors during evaluation ends the cycle
//! early; the next cycle tries again.

use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::pipeline::{evaluate, Verdict};
use super::{pause, EngineContext, PoolStatus};
use crate::error::Result;
use crate::metrics;
use crate::models::{Nation, NationStatus};
use crate::storage::MemberSync;

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplenishReport {
    /// Stale reservations returned to the pool
    pub requeued: usize,
    /// Home region member changes, when a new dump was synced
    pub members: Option<MemberSync>,
    /// Candidates added to the pool
    pub added: usize,
    /// Candidates evaluated and recorded as skipped or failed
    pub rejected: usize,
    /// Every member of every allow-listed region was tried
    pub exhausted: bool,
    /// Stopped after too many consecutive transport errors
    pub aborted: bool,
}

/// Replenishment state carried between cycles
pub struct Replenisher {
    ctx: Arc<EngineContext>,
    synced_generation: u64,
    rng: StdRng,
}

impl Replenisher {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            synced_generation: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fixed random source for reproducible picks
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub async fn run_cycle(&mut self) -> Result<ReplenishReport> {
        let mut report = ReplenishReport {
            requeued: self.recover_stale()?,
            members: self.sync_home_region().await?,
            ..ReplenishReport::default()
        };

        let ctx = Arc::clone(&self.ctx);
        let minimum = ctx.config.min_pool_size;
        let mut pending = ctx.store.count_by_status(NationStatus::Pending)?;
        if pending >= minimum {
            return Ok(report);
        }

        let mut regions = self.resolve_regions().await;
        if regions.is_empty() {
            tracing::debug!("No allow-listed regions available for replenishment");
            return Ok(report);
        }

        tracing::info!("Filling up pending pool now from {} to {}", pending, minimum);
        ctx.set_pool_status(PoolStatus::FillingWithRandomNations).await;

        let max_errors = ctx.config.max_consecutive_transport_errors.max(1);
        let mut transport_errors = 0;

        while pending < minimum {
            tokio::task::yield_now().await;

            let Some(name) = self.pick(&mut regions) else {
                report.exhausted = true;
                break;
            };

            let existing = ctx.store.get(&name)?;
            if existing
                .as_ref()
                .is_some_and(|nation| nation.status != NationStatus::Member)
            {
                continue;
            }

            let candidate = existing
                .clone()
                .unwrap_or_else(|| Nation::new(&name, NationStatus::Pending));
            let verdict =
                evaluate(&ctx.criteria, &ctx.dump, ctx.gateway.as_ref(), &candidate).await;

            match verdict {
                Verdict::Recruitable => {
                    transport_errors = 0;
                    let added = if existing.is_some() {
                        ctx.store.transition(
                            &name,
                            NationStatus::Pending,
                            NationStatus::Member,
                            None,
                        )?
                    } else {
                        ctx.store
                            .insert(&Nation::new(&name, NationStatus::Pending))?
                    };
                    if added {
                        metrics::record_transition(NationStatus::Pending);
                        report.added += 1;
                        pending += 1;
                    }
                }
                Verdict::Ineligible(reason) => {
                    transport_errors = 0;
                    tracing::debug!(nation = %name, reason = %reason, "Random candidate skipped");
                    if self.record_rejection(&name, existing.is_some(), NationStatus::Skipped)? {
                        report.rejected += 1;
                    }
                }
                Verdict::Failed(error) => {
                    transport_errors = 0;
                    tracing::debug!(nation = %name, error = %error, "Random candidate failed");
                    if self.record_rejection(&name, existing.is_some(), NationStatus::Failed)? {
                        report.rejected += 1;
                    }
                }
                Verdict::Inconclusive(error) => {
                    transport_errors += 1;
                    tracing::warn!(
                        nation = %name,
                        error = %error,
                        consecutive = transport_errors,
                        "Replenishment probe failed"
                    );
                    if transport_errors >= max_errors {
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        tracing::info!(
            added = report.added,
            rejected = report.rejected,
            exhausted = report.exhausted,
            aborted = report.aborted,
            "Replenishment finished"
        );
        metrics::update_pool_sizes(&ctx.store.stats()?);

        Ok(report)
    }

    fn recover_stale(&self) -> Result<usize> {
        let cutoff = chrono::Duration::from_std(self.ctx.config.reservation_grace())
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace));
        let Some(cutoff) = cutoff else {
            tracing::debug!("Reservation grace period exceeds the clock range; nothing is stale");
            return Ok(0);
        };
        let requeued = self.ctx.store.requeue_stale_reserved(cutoff)?;
        if requeued > 0 {
            tracing::info!(requeued, "Requeued stale reservations");
        }
        Ok(requeued)
    }

    async fn sync_home_region(&mut self) -> Result<Option<MemberSync>> {
        let generation = self.ctx.dump.generation();
        if generation == self.synced_generation {
            return Ok(None);
        }

        let Some(region) = self.ctx.dump.get_region(&self.ctx.home_region).await else {
            tracing::warn!(region = %self.ctx.home_region, "Home region not found in dump");
            self.synced_generation = generation;
            return Ok(None);
        };

        let sync = self
            .ctx
            .store
            .sync_region_members(&region.id, &region.nations)?;
        self.synced_generation = generation;
        tracing::info!(
            region = %region.id,
            joined = sync.joined,
            left = sync.left,
            "Home region members synced"
        );
        Ok(Some(sync))
    }

    /// Member lists of the allow-listed regions found in the dump
    async fn resolve_regions(&self) -> Vec<Vec<String>> {
        let mut resolved = Vec::new();
        for name in &self.ctx.config.regions_to_recruit_from {
            match self.ctx.dump.get_region(name).await {
                Some(region) if !region.nations.is_empty() => resolved.push(region.nations),
                Some(_) => {}
                None => {
                    tracing::warn!(region = %name, "Region for name couldn't be found in dumps")
                }
            }
        }
        resolved
    }

    /// Remove and return a random untried member of a random region
    fn pick(&mut self, regions: &mut Vec<Vec<String>>) -> Option<String> {
        while !regions.is_empty() {
            let r = self.rng.gen_range(0..regions.len());
            if regions[r].is_empty() {
                regions.swap_remove(r);
                continue;
            }
            let m = self.rng.gen_range(0..regions[r].len());
            return Some(regions[r].swap_remove(m));
        }
        None
    }

    /// Record a rejected random candidate; members keep their record
    fn record_rejection(&self, name: &str, known: bool, status: NationStatus) -> Result<bool> {
        if known {
            return Ok(false);
        }
        let recorded = self.ctx.store.insert(&Nation::new(name, status))?;
        if recorded {
            metrics::record_transition(status);
        }
        Ok(recorded)
    }
}

/// Spawn the replenishment loop
pub fn spawn(ctx: Arc<EngineContext>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
    let period = ctx.config.replenish_period();

    tokio::spawn(async move {
        tracing::info!(period_secs = period.as_secs(), "Replenishment loop started");
        let mut replenisher = Replenisher::new(ctx);

        loop {
            tokio::select! {
                result = replenisher.run_cycle() => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Replenishment cycle failed");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }

            if !pause(period, &mut shutdown_rx).await {
                break;
            }
        }

        tracing::info!("Replenishment loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn config_with_regions(min_pool_size: usize, regions: &[&str]) -> crate::config::RecruitmentConfig {
        let mut config = test_config();
        config.min_pool_size = min_pool_size;
        config.regions_to_recruit_from = regions.iter().map(|r| r.to_string()).collect();
        config
    }

    #[tokio::test]
    async fn test_fills_pool_from_region() {
        let harness = Harness::new(config_with_regions(5, &["R"])).await;
        harness
            .install_regions(&[("R", &["member_one", "member_two", "member_three"])])
            .await;
        harness.pending(&["p_one", "p_two"]);

        let report = Replenisher::new(Arc::clone(&harness.ctx))
            .with_seed(7)
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.added, 3);
        assert_eq!(
            harness.ctx.store.count_by_status(NationStatus::Pending).unwrap(),
            5
        );
        assert_eq!(
            harness.ctx.state().await.pool,
            PoolStatus::FillingWithRandomNations
        );
    }

    #[tokio::test]
    async fn test_stops_at_minimum() {
        let harness = Harness::new(config_with_regions(3, &["R"])).await;
        harness
            .install_regions(&[("R", &["m_a", "m_b", "m_c", "m_d", "m_e"])])
            .await;
        harness.pending(&["p_one"]);

        let report = Replenisher::new(Arc::clone(&harness.ctx))
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.added, 2);
        assert!(!report.exhausted);
        assert_eq!(harness.gateway.probed().len(), 2);
    }

    #[tokio::test]
    async fn test_known_candidates_not_retried() {
        let harness = Harness::new(config_with_regions(10, &["R"])).await;
        harness
            .install_regions(&[("R", &["sent_one", "skipped_one", "fresh", "bad_probe"])])
            .await;
        harness.insert("sent_one", NationStatus::Send);
        harness.insert("skipped_one", NationStatus::Skipped);
        harness.gateway.probe("bad_probe", Probe::No);

        let report = Replenisher::new(Arc::clone(&harness.ctx))
            .run_cycle()
            .await
            .unwrap();

        assert!(report.exhausted);
        assert_eq!(report.added, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(harness.status("sent_one"), Some(NationStatus::Send));
        assert_eq!(harness.status("fresh"), Some(NationStatus::Pending));
        assert_eq!(harness.status("bad_probe"), Some(NationStatus::Skipped));

        let mut probed = harness.gateway.probed();
        probed.sort();
        assert_eq!(probed, vec!["bad_probe", "fresh"]);
    }

    #[tokio::test]
    async fn test_criteria_rejections_recorded() {
        let harness = Harness::new(config_with_regions(10, &["R"])).await;
        harness
            .install_regions(&[("R", &["puppet_farm", "bbbbbb"])])
            .await;

        let report = Replenisher::new(Arc::clone(&harness.ctx))
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.rejected, 2);
        assert!(harness.gateway.probed().is_empty());
        assert_eq!(harness.status("puppet_farm"), Some(NationStatus::Skipped));
    }

    #[tokio::test]
    async fn test_aborts_after_consecutive_transport_errors() {
        let harness = Harness::new(config_with_regions(10, &["R"])).await;
        let members = ["t_a", "t_b", "t_c", "t_d", "t_e"];
        harness.install_regions(&[("R", &members[..])]).await;
        for member in members {
            harness.gateway.probe(member, Probe::Transport);
        }

        let report = Replenisher::new(Arc::clone(&harness.ctx))
            .run_cycle()
            .await
            .unwrap();

        assert!(report.aborted);
        assert_eq!(harness.gateway.probed().len(), 3);
        // Nothing about these candidates is known, so nothing is written
        assert_eq!(harness.ctx.store.stats().unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_yields_while_skipping_known_members() {
        let harness = Harness::new(config_with_regions(5, &["R"])).await;
        let members: Vec<String> = (0..1_000).map(|i| format!("known_{i}")).collect();
        let member_refs: Vec<&str> = members.iter().map(String::as_str).collect();
        harness.install_regions(&[("R", &member_refs[..])]).await;
        for member in &members {
            harness.insert(member, NationStatus::Skipped);
        }

        // Only makes progress while the cycle gives up the worker
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = Arc::clone(&ticks);
            async move {
                loop {
                    ticks.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            }
        });

        let report = Replenisher::new(Arc::clone(&harness.ctx))
            .run_cycle()
            .await
            .unwrap();
        ticker.abort();

        assert!(report.exhausted);
        assert_eq!(report.added, 0);
        assert!(harness.gateway.probed().is_empty());
        assert!(ticks.load(std::sync::atomic::Ordering::Relaxed) >= 500);
    }

    #[tokio::test]
    async fn test_huge_grace_period_requeues_nothing() {
        let mut config = test_config();
        // Ten million years, past the range of a timestamp
        config.reservation_grace_secs = 10_000_000 * 365 * 86_400;
        let harness = Harness::new(config).await;
        harness.insert_aged("reserved_long_ago", NationStatus::ReservedApi, 30 * 86_400);

        let report = Replenisher::new(Arc::clone(&harness.ctx))
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.requeued, 0);
        assert_eq!(harness.status("reserved_long_ago"), Some(NationStatus::ReservedApi));
    }

    #[tokio::test]
    async fn test_recovers_stale_reservations() {
        let harness = Harness::new(test_config()).await;
        harness.insert_aged("stuck", NationStatus::ReservedApi, 2 * 3_600);
        harness.insert("in_flight", NationStatus::ReservedApi);

        let report = Replenisher::new(Arc::clone(&harness.ctx))
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.requeued, 1);
        assert_eq!(harness.status("stuck"), Some(NationStatus::Pending));
        assert_eq!(harness.status("in_flight"), Some(NationStatus::ReservedApi));
    }

    #[tokio::test]
    async fn test_member_recruited_back_into_pool() {
        let harness = Harness::new(config_with_regions(1, &["R"])).await;
        harness.install_regions(&[("R", &["returning"])]).await;
        harness
            .ctx
            .store
            .insert(&Nation::new("returning", NationStatus::Member).with_qualifier("home"))
            .unwrap();

        let report = Replenisher::new(Arc::clone(&harness.ctx))
            .run_cycle()
            .await
            .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(harness.status("returning"), Some(NationStatus::Pending));
    }

    #[tokio::test]
    async fn test_syncs_home_members_once_per_snapshot() {
        let harness = Harness::new(test_config()).await;
        harness.install_home_members(&["citizen_a", "citizen_b"]).await;

        let mut replenisher = Replenisher::new(Arc::clone(&harness.ctx));
        let first = replenisher.run_cycle().await.unwrap();
        assert_eq!(first.members, Some(MemberSync { joined: 2, left: 0 }));
        assert_eq!(harness.status("citizen_a"), Some(NationStatus::Member));

        let second = replenisher.run_cycle().await.unwrap();
        assert_eq!(second.members, None);

        harness.install_home_members(&["citizen_b"]).await;
        let third = replenisher.run_cycle().await.unwrap();
        assert_eq!(third.members, Some(MemberSync { joined: 0, left: 1 }));
        assert_eq!(harness.status("citizen_a"), None);
    }
}
