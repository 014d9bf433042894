use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use nsrecruit::config::Config;
use nsrecruit::control::ControlServer;
use nsrecruit::metrics;

use super::build_runtime;

/// Run the dump refresher, the engine and the control API until Ctrl+C
pub async fn run(config: Config, with_server: bool) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    let runtime = build_runtime(&config)?;
    let (shutdown, shutdown_rx) = watch::channel(false);

    println!("nsrecruit");
    println!("{:-<40}", "");
    println!("  Region: {}", config.api.region_name);
    println!(
        "  Telegrams: {}",
        if config.recruitment.enabled { "enabled" } else { "disabled" }
    );
    println!("  Database: {}", config.database.sqlite_path.display());
    println!("  Minimum pool size: {}", config.recruitment.min_pool_size);
    if !config.recruitment.regions_to_recruit_from.is_empty() {
        println!(
            "  Random recruits from: {}",
            config.recruitment.regions_to_recruit_from.join(", ")
        );
    }
    println!();

    let refresher = Arc::clone(&runtime.dump).spawn_refresher(shutdown_rx.clone());

    let server = if with_server && config.server.enabled {
        let server = ControlServer::new(config.server.clone(), Arc::clone(&runtime.engine));
        println!("Control API listening on http://{}", server.bind_address());
        let mut server_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            server
                .start_with_shutdown(async move {
                    let _ = server_shutdown.changed().await;
                })
                .await
        }))
    } else {
        None
    };

    match runtime.engine.start().await {
        Ok(()) => println!("Recruitment started."),
        Err(e) if server.is_some() => {
            tracing::error!(error = %e, "Recruitment did not start; retry through the control API");
        }
        Err(e) => {
            let _ = shutdown.send(true);
            let _ = refresher.await;
            return Err(e).context("Failed to start recruitment");
        }
    }
    println!("Press Ctrl+C to stop.\n");

    match tokio::signal::ctrl_c().await {
        Ok(()) => println!("\nShutdown signal received, stopping..."),
        Err(e) => tracing::error!("Failed to wait for Ctrl+C: {}", e),
    }

    if runtime.engine.is_running().await {
        runtime.engine.stop().await?;
    }

    // Fails only if every receiver is gone
    let _ = shutdown.send(true);
    if let Err(e) = refresher.await {
        tracing::warn!(error = %e, "Dump refresher ended abnormally");
    }
    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Control API failed"),
            Err(e) => tracing::error!(error = %e, "Control API task panicked"),
        }
    }

    println!("nsrecruit stopped.");
    Ok(())
}
