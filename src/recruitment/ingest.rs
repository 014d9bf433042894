//! Pool ingestion loop
//!
//! Periodically harvests the newest nations and adds the ones passing the
//! name criteria as `pending`. Names the store already knows, under any
//! status, are left alone.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{pause, EngineContext, PoolStatus};
use crate::error::Result;
use crate::metrics;

/// One harvest; returns the number of candidates added
pub async fn run_cycle(ctx: &EngineContext) -> Result<usize> {
    let harvested = ctx.gateway.new_nations(true).await?;

    let eligible: Vec<String> = harvested
        .iter()
        .filter(|name| match ctx.criteria.check(name) {
            Ok(()) => true,
            Err(rejection) => {
                tracing::debug!(nation = %name, reason = %rejection, "New nation rejected");
                false
            }
        })
        .cloned()
        .collect();

    let added = ctx.store.add_unknown_as_pending(&eligible)?;

    let pool = if added > 0 {
        PoolStatus::FillingWithNewNations
    } else {
        PoolStatus::WaitingForNewNations
    };
    ctx.set_pool_status(pool).await;

    tracing::info!(
        harvested = harvested.len(),
        eligible = eligible.len(),
        added,
        "New nations ingested"
    );
    metrics::update_pool_sizes(&ctx.store.stats()?);

    Ok(added)
}

/// Spawn the ingestion loop
pub fn spawn(ctx: Arc<EngineContext>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
    let period = ctx.config.ingestion_period();

    tokio::spawn(async move {
        tracing::info!(period_secs = period.as_secs(), "Ingestion loop started");

        loop {
            tokio::select! {
                result = run_cycle(&ctx) => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Ingestion cycle failed");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }

            if !pause(period, &mut shutdown_rx).await {
                break;
            }
        }

        tracing::info!("Ingestion loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::models::NationStatus;

    #[tokio::test]
    async fn test_cycle_adds_eligible_unknowns() {
        let harness = Harness::new(test_config()).await;
        harness.insert("already_sent", NationStatus::Send);
        harness
            .gateway
            .set_new_nations(&["north_dakota", "aaaaaaa", "founder_bob", "already_sent", "new_land"]);

        let added = run_cycle(&harness.ctx).await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(harness.status("north_dakota"), Some(NationStatus::Pending));
        assert_eq!(harness.status("new_land"), Some(NationStatus::Pending));
        assert_eq!(harness.status("aaaaaaa"), None);
        assert_eq!(harness.status("already_sent"), Some(NationStatus::Send));
        assert_eq!(
            harness.ctx.state().await.pool,
            PoolStatus::FillingWithNewNations
        );

        // Same harvest again adds nothing
        assert_eq!(run_cycle(&harness.ctx).await.unwrap(), 0);
        assert_eq!(
            harness.ctx.state().await.pool,
            PoolStatus::WaitingForNewNations
        );
    }

    #[tokio::test]
    async fn test_cycle_without_criteria() {
        let mut config = test_config();
        config.criteria_check = false;
        let harness = Harness::new(config).await;
        harness.gateway.set_new_nations(&["aaaaaaa", "nation_99"]);

        assert_eq!(run_cycle(&harness.ctx).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let harness = Harness::new(test_config()).await;
        harness.gateway.set_new_nations(&["north_dakota"]);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = spawn(Arc::clone(&harness.ctx), shutdown_rx);

        // First cycle runs immediately
        while harness.status("north_dakota").is_none() {
            tokio::task::yield_now().await;
        }

        shutdown.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
