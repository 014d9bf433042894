//! Scripted collaborators for engine unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{EngineContext, RecruitmentEngine};
use crate::api::{ActionCategory, Gateway, SharedGateway};
use crate::config::{DumpConfig, RecruitmentConfig};
use crate::dump::{DumpCache, Region, Snapshot};
use crate::models::{Nation, NationStatus};
use crate::storage::create_memory_repository;
use crate::utils::error::ApiError;
use crate::utils::to_id;

/// Scripted answer for a probe or a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    Yes,
    No,
    Application,
    Transport,
}

impl Probe {
    fn error(self) -> ApiError {
        match self {
            Probe::Transport => ApiError::Timeout,
            _ => ApiError::Application("Unknown nation".into()),
        }
    }
}

/// Gateway answering from scripted tables; unknown names answer `Yes`
#[derive(Default)]
pub(crate) struct ScriptedGateway {
    new_nations: Mutex<Vec<String>>,
    regions: Mutex<HashMap<String, Vec<String>>>,
    probes: Mutex<HashMap<String, Probe>>,
    sends: Mutex<HashMap<String, Probe>>,
    send_delay: Mutex<Duration>,
    probed: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
    seeded: Mutex<Vec<(ActionCategory, DateTime<Utc>)>>,
}

impl ScriptedGateway {
    pub fn set_new_nations(&self, names: &[&str]) {
        *self.new_nations.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
    }

    pub fn probe(&self, name: &str, answer: Probe) {
        self.probes.lock().unwrap().insert(to_id(name), answer);
    }

    pub fn send_result(&self, name: &str, answer: Probe) {
        self.sends.lock().unwrap().insert(to_id(name), answer);
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    /// Nations whose send call completed, in order
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn seeded(&self) -> Vec<(ActionCategory, DateTime<Utc>)> {
        self.seeded.lock().unwrap().clone()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn new_nations(&self, _automated: bool) -> Result<Vec<String>, ApiError> {
        Ok(self.new_nations.lock().unwrap().clone())
    }

    async fn region_nations(
        &self,
        region: &str,
        _automated: bool,
    ) -> Result<Vec<String>, ApiError> {
        Ok(self
            .regions
            .lock()
            .unwrap()
            .get(&to_id(region))
            .cloned()
            .unwrap_or_default())
    }

    async fn would_receive(&self, nation: &str) -> Result<bool, ApiError> {
        let id = to_id(nation);
        self.probed.lock().unwrap().push(id.clone());
        let answer = self.probes.lock().unwrap().get(&id).copied();
        match answer.unwrap_or(Probe::Yes) {
            Probe::Yes => Ok(true),
            Probe::No => Ok(false),
            other => Err(other.error()),
        }
    }

    async fn send_recruitment_telegram(&self, nation: &str) -> Result<(), ApiError> {
        let delay = *self.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let id = to_id(nation);
        self.sent.lock().unwrap().push(id.clone());
        let answer = self.sends.lock().unwrap().get(&id).copied();
        match answer.unwrap_or(Probe::Yes) {
            Probe::Yes => Ok(()),
            Probe::No => Err(ApiError::Application("Telegram not queued".into())),
            other => Err(other.error()),
        }
    }

    async fn wait_until_ready(&self, _category: ActionCategory, _automated: bool) {}

    fn seed_last_execution(&self, category: ActionCategory, at: DateTime<Utc>) {
        self.seeded.lock().unwrap().push((category, at));
    }
}

pub(crate) fn test_config() -> RecruitmentConfig {
    RecruitmentConfig {
        enabled: true,
        criteria_check: true,
        min_pool_size: 5,
        regions_to_recruit_from: Vec::new(),
        batch_size: 3,
        ingestion_period_secs: 3_600,
        replenish_period_secs: 3_600,
        throttle_backoff_secs: 3_600,
        idle_retry_secs: 3_600,
        reservation_grace_secs: 3_600,
        max_consecutive_transport_errors: 3,
        startup_timeout_secs: 1,
        shutdown_timeout_secs: 5,
    }
}

/// Engine context over a memory store, a scripted gateway and a dump
/// cache dated one day back
pub(crate) struct Harness {
    pub ctx: Arc<EngineContext>,
    pub gateway: Arc<ScriptedGateway>,
}

impl Harness {
    pub async fn new(config: RecruitmentConfig) -> Self {
        let harness = Self::without_snapshot(config);
        harness.install_regions(&[]).await;
        harness
    }

    pub fn without_snapshot(config: RecruitmentConfig) -> Self {
        let gateway = Arc::new(ScriptedGateway::default());
        let dump = Arc::new(DumpCache::new(DumpConfig::default(), "tests@example.org").unwrap());
        let ctx = EngineContext::new(
            config,
            "Home",
            create_memory_repository(),
            Arc::clone(&gateway) as SharedGateway,
            dump,
        );
        Self {
            ctx: Arc::new(ctx),
            gateway,
        }
    }

    pub fn engine(&self) -> RecruitmentEngine {
        RecruitmentEngine::from_context(Arc::clone(&self.ctx))
    }

    pub fn pending(&self, names: &[&str]) {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        self.ctx.store.add_unknown_as_pending(&names).unwrap();
    }

    pub fn insert(&self, name: &str, status: NationStatus) {
        assert!(self.ctx.store.insert(&Nation::new(name, status)).unwrap());
    }

    pub fn insert_aged(&self, name: &str, status: NationStatus, secs_ago: i64) {
        let at = Utc::now() - chrono::Duration::seconds(secs_ago);
        let nation = Nation::new(name, status).with_status_time(at);
        assert!(self.ctx.store.insert(&nation).unwrap());
    }

    pub fn status(&self, name: &str) -> Option<NationStatus> {
        self.ctx.store.get(name).unwrap().map(|n| n.status)
    }

    pub async fn install_regions(&self, regions: &[(&str, &[&str])]) {
        let regions = regions
            .iter()
            .map(|(name, members)| Region {
                id: to_id(name),
                name: name.to_string(),
                nations: members.iter().map(|m| to_id(m)).collect(),
            })
            .collect();
        let dumped_at = Utc::now() - chrono::Duration::days(1);
        self.ctx
            .dump
            .install(Snapshot::from_parts(regions, Vec::new(), dumped_at))
            .await;
    }

    pub async fn install_home_members(&self, members: &[&str]) {
        self.install_regions(&[("Home", members)]).await;
    }
}
