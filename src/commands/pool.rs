use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;

use nsrecruit::api::{Gateway, NationStatesClient};
use nsrecruit::config::Config;
use nsrecruit::dump::DumpCache;
use nsrecruit::models::NationStatus;
use nsrecruit::recruitment::criteria::Criteria;
use nsrecruit::recruitment::pipeline::evaluate;
use nsrecruit::Nation;

use super::{build_runtime, open_store};

/// Print candidate counts per status
pub fn status(config: &Config) -> Result<()> {
    let path = &config.database.sqlite_path;
    if !path.exists() {
        println!("Database not found: {}", path.display());
        println!("Run the recruiter first to create the database.");
        return Ok(());
    }

    let store = open_store(config)?;
    let stats = store.stats()?;
    let total = stats.total();

    println!("Candidate Pool");
    println!("==============");
    println!("Database: {}", path.display());
    println!();
    println!("Total records: {total}");
    for status in NationStatus::ALL {
        let count = stats.get(status);
        println!(
            "  {:<16} {:>8} ({:.1}%)",
            status.as_str(),
            count,
            if total > 0 {
                count as f64 / total as f64 * 100.0
            } else {
                0.0
            }
        );
    }

    if let Some(last) = store.last_status_time(NationStatus::Send)? {
        println!();
        println!("Last telegram: {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

/// Evaluate one nation without touching the store
pub async fn check(config: &Config, nation: &str) -> Result<()> {
    let gateway = NationStatesClient::new(&config.api, &config.rate_limits)
        .context("Failed to create API client")?;
    let dump = DumpCache::new(config.dump.clone(), &config.api.contact)
        .context("Failed to create dump cache")?;
    let criteria = Criteria::new(config.recruitment.criteria_check);

    let candidate = Nation::new(nation, NationStatus::Pending);
    let verdict = evaluate(&criteria, &dump, &gateway, &candidate).await;

    println!("Nation: {}", candidate.name);
    println!("Verdict: {verdict}");
    match gateway.nation_info(nation).await {
        Ok(info) => {
            println!("Region: {}", info.region.as_deref().unwrap_or("unknown"));
            if let Some(founded) = info.founded {
                println!("Founded: {founded}");
            }
            if let Some(activity) = info.last_activity {
                println!("Last activity: {activity}");
            }
        }
        Err(e) => tracing::warn!(nation = %nation, error = %e, "Nation details unavailable"),
    }
    Ok(())
}

/// List a region's current members from the live API
///
/// Members already in the store are shown with their status.
pub async fn members(config: &Config, region: &str) -> Result<()> {
    let gateway = NationStatesClient::new(&config.api, &config.rate_limits)
        .context("Failed to create API client")?;
    let members = gateway
        .region_nations(region, false)
        .await
        .with_context(|| format!("Failed to fetch members of {region}"))?;

    let store = if config.database.sqlite_path.exists() {
        Some(open_store(config)?)
    } else {
        None
    };

    println!("Region: {region}");
    println!("Members: {}", members.len());
    for name in &members {
        let known = match &store {
            Some(store) => store.get(name)?.map(|nation| nation.status),
            None => None,
        };
        match known {
            Some(status) => println!("  {name:<40} {status}"),
            None => println!("  {name}"),
        }
    }
    Ok(())
}

/// Move skipped nations back to `pending`
pub fn requeue(config: &Config, names: &[String]) -> Result<()> {
    let store = open_store(config)?;
    let requeued = store.requeue_skipped(names)?;
    tracing::info!(requeued, "Skipped nations requeued");

    if names.is_empty() {
        println!("Requeued {requeued} skipped nations.");
    } else {
        println!("Requeued {requeued} of {} nations.", names.len());
    }
    Ok(())
}

/// Reserve nations for manual recruiting
///
/// Uses the live API only; nations missing from the daily dump are not
/// filtered out because no snapshot is loaded for a one-off request.
pub async fn recruitable(config: &Config, count: usize) -> Result<()> {
    let runtime = build_runtime(config)?;
    let engine = Arc::clone(&runtime.engine);

    let mut stream = engine.recruitable_nations(count, false);
    let mut reserved = 0;
    while let Some(item) = stream.next().await {
        match item {
            Ok(nation) => {
                println!("{}", nation.name);
                reserved += 1;
            }
            Err(e) => {
                eprintln!("Request ended early: {e}");
                break;
            }
        }
    }

    tracing::info!(requested = count, reserved, "Manual request finished");
    if reserved < count {
        eprintln!("Reserved {reserved} of {count} requested nations.");
    }
    Ok(())
}
