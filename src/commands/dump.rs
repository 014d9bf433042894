use std::path::Path;

use anyhow::{Context, Result};

use nsrecruit::config::Config;
use nsrecruit::dump::DumpCache;
use nsrecruit::utils::truncate_text;

/// Load local dump files and print a short report
pub async fn import_dump(config: &Config, regions: &Path, nations: &Path, top: usize) -> Result<()> {
    let cache = DumpCache::new(config.dump.clone(), &config.api.contact)
        .context("Failed to create dump cache")?;
    let snapshot = cache
        .load_files(regions, nations)
        .await
        .context("Failed to load dump files")?;

    println!("Dump Snapshot");
    println!("=============");
    println!("Data time: {}", snapshot.updated_at().format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Regions: {}", snapshot.region_count());
    println!("Nations: {}", snapshot.nation_count());

    if !config.api.region_name.is_empty() {
        match snapshot.region(&config.api.region_name) {
            Some(home) => println!("Home region {}: {} nations", home.name, home.nations.len()),
            None => println!("Home region {} not found in dump", config.api.region_name),
        }
    }

    for region in &config.recruitment.regions_to_recruit_from {
        match snapshot.region(region) {
            Some(found) => println!("Recruit source {}: {} nations", found.name, found.nations.len()),
            None => println!("Recruit source {region} not found in dump"),
        }
    }

    if top > 0 {
        println!();
        println!("Largest regions:");
        for (rank, region) in snapshot.largest_regions().into_iter().take(top).enumerate() {
            println!(
                "  {:>3}. {:<40} {:>7}",
                rank + 1,
                truncate_text(&region.name, 40),
                region.nations.len()
            );
        }
    }

    Ok(())
}
