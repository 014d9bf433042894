//! Daily dump cache
//!
//! NationStates publishes gzip'd XML dumps of every region and every nation
//! once a day. The cache downloads both, parses them on a blocking worker
//! and swaps the resulting [`Snapshot`] in atomically. Readers always see
//! either the old or the new snapshot, never a mix.
//!
//! A failed refresh keeps the previous snapshot. Answers derived from it
//! are only trusted for candidates whose status predates the snapshot, see
//! [`DumpCache::check_nation`].

pub mod parser;

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use reqwest::header::LAST_MODIFIED;
use reqwest::Client;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub use parser::{DumpNation, Region};

use crate::config::DumpConfig;
use crate::error::RecruitErrorTrait;
use crate::metrics;
use crate::utils::error::DumpError;
use crate::utils::retry::{retry_with_backoff, RetryConfig};
use crate::utils::to_id;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable index built from one pair of dumps
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Nation id to region id
    nations: HashMap<String, String>,
    /// Region id to region
    regions: HashMap<String, Region>,
    /// When the dump data was generated
    updated_at: DateTime<Utc>,
}

impl Snapshot {
    /// Build the index
    ///
    /// Region member lists also count as nations, so a nation present in
    /// only one of the two dumps is still known.
    pub fn from_parts(
        regions: Vec<Region>,
        nations: Vec<DumpNation>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let mut by_name: HashMap<String, String> = nations
            .into_iter()
            .map(|nation| (nation.name, nation.region))
            .collect();

        for region in &regions {
            for member in &region.nations {
                by_name
                    .entry(member.clone())
                    .or_insert_with(|| region.id.clone());
            }
        }

        Self {
            nations: by_name,
            regions: regions.into_iter().map(|r| (r.id.clone(), r)).collect(),
            updated_at,
        }
    }

    pub fn contains(&self, nation: &str) -> bool {
        self.nations.contains_key(&to_id(nation))
    }

    pub fn region(&self, region: &str) -> Option<&Region> {
        self.regions.get(&to_id(region))
    }

    /// Regions ordered by member count, largest first
    pub fn largest_regions(&self) -> Vec<&Region> {
        let mut regions: Vec<&Region> = self.regions.values().collect();
        regions.sort_by(|a, b| {
            b.nations
                .len()
                .cmp(&a.nations.len())
                .then_with(|| a.id.cmp(&b.id))
        });
        regions
    }

    /// Region id the nation resides in
    pub fn region_of(&self, nation: &str) -> Option<&str> {
        self.nations.get(&to_id(nation)).map(String::as_str)
    }

    pub fn nation_count(&self) -> usize {
        self.nations.len()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Existence answer qualified by snapshot freshness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NationCheck {
    /// Listed in the snapshot
    Present,
    /// Not listed, and the snapshot is newer than the candidate's status
    Absent,
    /// No snapshot, or it is too old to say anything about this candidate
    Inconclusive,
}

// ============================================================================
// Decoding
// ============================================================================

/// Wrap `input` in a gunzip stage when it starts with the gzip magic
fn open_reader<R: Read + 'static>(input: R) -> std::io::Result<Box<dyn BufRead>> {
    let mut input = BufReader::new(input);
    if input.fill_buf()?.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(BufReader::new(GzDecoder::new(input))))
    } else {
        Ok(Box::new(input))
    }
}

fn build_snapshot<R, N>(
    regions: R,
    nations: N,
    updated_at: DateTime<Utc>,
) -> Result<Snapshot, DumpError>
where
    R: Read + 'static,
    N: Read + 'static,
{
    let regions = parser::parse_regions(open_reader(regions)?)?;
    let nations = parser::parse_nations(open_reader(nations)?)?;
    Ok(Snapshot::from_parts(regions, nations, updated_at))
}

/// Earliest of the known timestamps, `now` when none is known
fn oldest(times: &[Option<DateTime<Utc>>]) -> DateTime<Utc> {
    times.iter().flatten().min().copied().unwrap_or_else(Utc::now)
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(|at: SystemTime| DateTime::<Utc>::from(at))
}

struct Download {
    body: Vec<u8>,
    last_modified: Option<DateTime<Utc>>,
}

// ============================================================================
// Cache
// ============================================================================

/// Resets the refreshing flag when a refresh ends, however it ends
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// In-memory dump index with background refresh
pub struct DumpCache {
    client: Client,
    config: DumpConfig,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    refreshing: AtomicBool,
    /// Bumped on every installed snapshot
    generation: watch::Sender<u64>,
}

impl DumpCache {
    /// Create an empty cache
    ///
    /// # Errors
    ///
    /// Returns `DumpError::Download` if the HTTP client cannot be created
    pub fn new(config: DumpConfig, contact: &str) -> Result<Self, DumpError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!(
                "nsrecruit/{} (contact: {})",
                env!("CARGO_PKG_VERSION"),
                contact.trim()
            ))
            .build()
            .map_err(|e| DumpError::Download(e.to_string()))?;

        let (generation, _) = watch::channel(0);

        Ok(Self {
            client,
            config,
            snapshot: RwLock::new(None),
            refreshing: AtomicBool::new(false),
            generation,
        })
    }

    /// Current snapshot, if one was ever installed
    pub async fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Replace the current snapshot
    pub async fn install(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().await = Some(Arc::clone(&snapshot));
        self.generation.send_modify(|g| *g += 1);
        snapshot
    }

    /// Download both dumps and install a fresh snapshot
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, DumpError> {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return Err(DumpError::Download("refresh already in progress".into()));
        }
        let _guard = RefreshGuard(&self.refreshing);

        tracing::info!("Refreshing daily dumps");
        match self.download_snapshot().await {
            Ok(snapshot) => {
                let snapshot = self.install(snapshot).await;
                metrics::record_dump_refresh(
                    true,
                    snapshot.nation_count(),
                    snapshot.region_count(),
                );
                tracing::info!(
                    nations = snapshot.nation_count(),
                    regions = snapshot.region_count(),
                    updated_at = %snapshot.updated_at(),
                    "Dump snapshot installed"
                );
                Ok(snapshot)
            }
            Err(e) => {
                metrics::record_dump_refresh(false, 0, 0);
                tracing::warn!(error = %e, "Dump refresh failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    async fn download_snapshot(&self) -> Result<Snapshot, DumpError> {
        let (regions, nations) = tokio::try_join!(
            self.download(&self.config.regions_url),
            self.download(&self.config.nations_url)
        )?;

        let updated_at = oldest(&[regions.last_modified, nations.last_modified]);

        tokio::task::spawn_blocking(move || {
            build_snapshot(Cursor::new(regions.body), Cursor::new(nations.body), updated_at)
        })
        .await
        .map_err(|e| DumpError::Worker(e.to_string()))?
    }

    async fn download(&self, url: &str) -> Result<Download, DumpError> {
        let retry = RetryConfig {
            max_retries: self.config.max_retries,
            ..RetryConfig::default()
        };

        retry_with_backoff(
            &retry,
            || async {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| DumpError::Download(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(DumpError::Status(status.as_u16()));
                }

                let last_modified = response
                    .headers()
                    .get(LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                    .map(|dt| dt.with_timezone(&Utc));

                let body = response
                    .bytes()
                    .await
                    .map_err(|e| DumpError::Download(e.to_string()))?;

                tracing::debug!(url, bytes = body.len(), "Dump downloaded");
                Ok::<_, DumpError>(Download {
                    body: body.to_vec(),
                    last_modified,
                })
            },
            |e: &DumpError| e.is_recoverable(),
        )
        .await
    }

    /// Build and install a snapshot from local dump files (gzip'd or plain)
    ///
    /// The snapshot is dated by the older of the two file modification times.
    pub async fn load_files(
        &self,
        regions: impl AsRef<Path>,
        nations: impl AsRef<Path>,
    ) -> Result<Arc<Snapshot>, DumpError> {
        let regions: PathBuf = regions.as_ref().to_path_buf();
        let nations: PathBuf = nations.as_ref().to_path_buf();

        let snapshot = tokio::task::spawn_blocking(move || {
            let updated_at = oldest(&[modified_time(&regions), modified_time(&nations)]);
            build_snapshot(
                std::fs::File::open(&regions)?,
                std::fs::File::open(&nations)?,
                updated_at,
            )
        })
        .await
        .map_err(|e| DumpError::Worker(e.to_string()))??;

        let snapshot = self.install(snapshot).await;
        tracing::info!(
            nations = snapshot.nation_count(),
            regions = snapshot.region_count(),
            "Dump snapshot loaded from files"
        );
        Ok(snapshot)
    }

    pub async fn exists(&self, nation: &str) -> bool {
        self.snapshot()
            .await
            .is_some_and(|snapshot| snapshot.contains(nation))
    }

    pub async fn get_region(&self, region: &str) -> Option<Region> {
        self.snapshot()
            .await
            .and_then(|snapshot| snapshot.region(region).cloned())
    }

    pub async fn region_of(&self, nation: &str) -> Option<String> {
        self.snapshot()
            .await
            .and_then(|snapshot| snapshot.region_of(nation).map(String::from))
    }

    /// Check a candidate against the snapshot
    ///
    /// Absence only counts when the snapshot was taken after the candidate's
    /// status was set; a nation founded after the dump is simply not in it.
    pub async fn check_nation(&self, nation: &str, status_time: DateTime<Utc>) -> NationCheck {
        let Some(snapshot) = self.snapshot().await else {
            return NationCheck::Inconclusive;
        };

        if snapshot.contains(nation) {
            NationCheck::Present
        } else if status_time < snapshot.updated_at() {
            NationCheck::Absent
        } else {
            NationCheck::Inconclusive
        }
    }

    /// Wait until a snapshot has been installed
    pub async fn wait_until_available(&self) {
        let mut rx = self.generation.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|generation| *generation > 0).await;
    }

    /// Wait for a snapshot, giving up after `timeout`
    pub async fn wait_for_snapshot(&self, timeout: Duration) -> Result<Arc<Snapshot>, DumpError> {
        tokio::time::timeout(timeout, self.wait_until_available())
            .await
            .map_err(|_| DumpError::Unavailable(timeout.as_secs()))?;

        self.snapshot()
            .await
            .ok_or(DumpError::Unavailable(timeout.as_secs()))
    }

    /// Data time of the current snapshot
    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.snapshot().await.map(|snapshot| snapshot.updated_at())
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    pub fn is_available(&self) -> bool {
        *self.generation.borrow() > 0
    }

    /// Number of snapshots installed so far
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Spawn the periodic refresher
    ///
    /// The first refresh runs immediately. A refresh in progress is
    /// abandoned on shutdown.
    pub fn spawn_refresher(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.config.refresh_interval();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tokio::select! {
                            // Errors are logged inside refresh
                            _ = self.refresh() => {}
                            _ = shutdown_rx.changed() => {
                                tracing::info!("Dump refresher shutting down mid-refresh");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Dump refresher shutting down");
                        break;
                    }
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
