use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::breaker::BreakerParams;
use crate::error::{FleetError, Result};
use crate::llm::CompletionProvider;
use crate::reaction::ReactionOptions;
use crate::roundtable::RoundtableOptions;
use crate::store::{DriftBounds, MemoryLimits};
use crate::trigger::TriggerOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FleetConfig {
    pub api: ApiConfig,
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub heartbeat: HeartbeatConfig,
    pub trigger: TriggerConfig,
    pub reaction: ReactionConfig,
    pub breaker: BreakerConfig,
    pub roundtable: RoundtableConfig,
    pub memory: MemoryConfig,
    pub relationship: RelationshipConfig,
    pub voice: VoiceConfig,
    pub llm: LlmConfig,
    /// Seed for the injected random sources. Unset means OS entropy.
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    /// Requests must carry this value in `x-api-key`. Unset disables auth.
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("opsfleet.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub agent_id: String,
    pub poll_interval_secs: u64,
    pub roundtable_poll_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            agent_id: "ava".to_string(),
            poll_interval_secs: 5,
            roundtable_poll_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TriggerConfig {
    pub budget_secs: u64,
    pub default_agent: String,
    pub proactive_skip_probability: f64,
    pub lookback_minutes: i64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        let o = TriggerOptions::default();
        Self {
            budget_secs: o.budget.as_secs(),
            default_agent: o.default_agent,
            proactive_skip_probability: o.proactive_skip_probability,
            lookback_minutes: o.lookback_minutes,
        }
    }
}

impl TriggerConfig {
    pub fn options(&self) -> TriggerOptions {
        TriggerOptions {
            budget: Duration::from_secs(self.budget_secs),
            default_agent: self.default_agent.clone(),
            proactive_skip_probability: self.proactive_skip_probability,
            lookback_minutes: self.lookback_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReactionConfig {
    pub lookback_minutes: i64,
    pub scan_limit: usize,
    pub drain_budget_secs: u64,
    pub drain_batch: usize,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        let o = ReactionOptions::default();
        Self {
            lookback_minutes: o.lookback_minutes,
            scan_limit: o.scan_limit,
            drain_budget_secs: o.drain_budget.as_secs(),
            drain_batch: o.drain_batch,
        }
    }
}

impl ReactionConfig {
    pub fn options(&self) -> ReactionOptions {
        ReactionOptions {
            lookback_minutes: self.lookback_minutes,
            scan_limit: self.scan_limit,
            drain_budget: Duration::from_secs(self.drain_budget_secs),
            drain_batch: self.drain_batch,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_minutes: i64,
    pub half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        let p = BreakerParams::default();
        Self {
            failure_threshold: p.failure_threshold,
            reset_timeout_minutes: p.reset_timeout_minutes,
            half_open_requests: p.half_open_requests,
        }
    }
}

impl BreakerConfig {
    pub fn params(&self) -> BreakerParams {
        BreakerParams {
            failure_threshold: self.failure_threshold,
            reset_timeout_minutes: self.reset_timeout_minutes,
            half_open_requests: self.half_open_requests,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RoundtableConfig {
    pub max_turn_chars: usize,
    pub max_action_items: usize,
}

impl Default for RoundtableConfig {
    fn default() -> Self {
        let o = RoundtableOptions::default();
        Self {
            max_turn_chars: o.max_turn_chars,
            max_action_items: o.max_action_items,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MemoryConfig {
    pub min_confidence: f64,
    pub max_active: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let l = MemoryLimits::default();
        Self {
            min_confidence: l.min_confidence,
            max_active: l.max_active,
        }
    }
}

impl MemoryConfig {
    pub fn limits(&self) -> MemoryLimits {
        MemoryLimits {
            min_confidence: self.min_confidence,
            max_active: self.max_active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RelationshipConfig {
    pub max_delta: f64,
    pub floor: f64,
    pub ceiling: f64,
    pub log_entries: usize,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        let b = DriftBounds::default();
        Self {
            max_delta: b.max_delta,
            floor: b.floor,
            ceiling: b.ceiling,
            log_entries: b.log_entries,
        }
    }
}

impl RelationshipConfig {
    pub fn bounds(&self) -> DriftBounds {
        DriftBounds {
            max_delta: self.max_delta,
            floor: self.floor,
            ceiling: self.ceiling,
            log_entries: self.log_entries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct VoiceConfig {
    pub cache_ttl_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: CompletionProvider,
    /// Canned response used by the mock provider.
    pub mock_response: Option<String>,
}

impl FleetConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let config: Self = if path.exists() {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content).map_err(|e| FleetError::config(e.to_string()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content =
            toml::to_string_pretty(self).map_err(|e| FleetError::config(e.to_string()))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.api.bind.is_empty() {
            errors.push("api.bind must not be empty");
        }
        if self.worker.worker_id.is_empty() {
            errors.push("worker.worker_id must not be empty");
        }
        if self.worker.agent_id.is_empty() {
            errors.push("worker.agent_id must not be empty");
        }
        if self.worker.poll_interval_secs == 0 {
            errors.push("worker.poll_interval_secs must be greater than 0");
        }
        if self.heartbeat.interval_secs == 0 {
            errors.push("heartbeat.interval_secs must be greater than 0");
        }
        if self.trigger.budget_secs == 0 {
            errors.push("trigger.budget_secs must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.trigger.proactive_skip_probability) {
            errors.push("trigger.proactive_skip_probability must be between 0.0 and 1.0");
        }
        if self.reaction.drain_batch == 0 {
            errors.push("reaction.drain_batch must be greater than 0");
        }
        if self.breaker.failure_threshold == 0 {
            errors.push("breaker.failure_threshold must be greater than 0");
        }
        if self.breaker.half_open_requests == 0 {
            errors.push("breaker.half_open_requests must be greater than 0");
        }
        if self.roundtable.max_turn_chars == 0 {
            errors.push("roundtable.max_turn_chars must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.memory.min_confidence) {
            errors.push("memory.min_confidence must be between 0.0 and 1.0");
        }
        if self.memory.max_active == 0 {
            errors.push("memory.max_active must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.relationship.max_delta) {
            errors.push("relationship.max_delta must be between 0.0 and 1.0");
        }
        if self.relationship.floor >= self.relationship.ceiling {
            errors.push("relationship.floor must be less than relationship.ceiling");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FleetError::config(errors.join("; ")))
        }
    }

    pub fn roundtable_options(&self) -> RoundtableOptions {
        RoundtableOptions {
            max_turn_chars: self.roundtable.max_turn_chars,
            max_action_items: self.roundtable.max_action_items,
            memory_limits: self.memory.limits(),
            drift_bounds: self.relationship.bounds(),
        }
    }

    pub fn voice_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.voice.cache_ttl_secs)
    }
}
