//! Configuration types and loading.

mod settings;

pub use settings::{
    ApiConfig, BreakerConfig, FleetConfig, HeartbeatConfig, LlmConfig, MemoryConfig,
    ReactionConfig, RelationshipConfig, RoundtableConfig, StoreConfig, TriggerConfig, VoiceConfig,
    WorkerConfig,
};
