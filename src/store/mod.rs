//! SQLite-backed record store.
//!
//! The persistent store is treated as an opaque collection of named record
//! sets reachable only through the typed sub-APIs below. All exactly-once
//! semantics (step claiming, trace-id dedup) are enforced here with
//! conditional updates and uniqueness constraints, never with an external
//! lock manager.

mod breakers;
mod events;
mod memory;
mod missions;
mod policy;
mod proposals;
mod reactions;
mod relationships;
mod roundtable;
mod steps;
mod triggers;
mod tweets;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::Result;

pub use breakers::{BreakerRow, BreakerState, Breakers};
pub use events::{AgentEvent, Events, NewEvent};
pub use memory::{
    AgentMemory, Memories, MemoryInsert, MemoryLimits, MemoryQuery, MemoryStats, MemoryType,
    MemoryWrite, EVICTED_MARKER,
};
pub use missions::Missions;
pub use policy::{Policies, Policy};
pub use proposals::{NewProposal, ProposalFilter, Proposals};
pub use reactions::{NewReaction, Reaction, ReactionStatus, Reactions};
pub use relationships::{AgentRelationship, DriftBounds, DriftEntry, DriftResult, Relationships};
pub use roundtable::{
    Conversation, ConversationStatus, ConversationTurn, Roundtable, ScheduleRequest,
};
pub use steps::Steps;
pub use triggers::{NewTriggerRule, TriggerRule, TriggerRuleUpdate, Triggers};
pub use tweets::{TweetPerformance, Tweets};

/// Handle to the record store. Cheap to clone; all access is serialized
/// through a single connection guarded by a mutex.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn policies(&self) -> Policies<'_> {
        Policies(self)
    }

    pub fn proposals(&self) -> Proposals<'_> {
        Proposals(self)
    }

    pub fn missions(&self) -> Missions<'_> {
        Missions(self)
    }

    pub fn steps(&self) -> Steps<'_> {
        Steps(self)
    }

    pub fn breakers(&self) -> Breakers<'_> {
        Breakers(self)
    }

    pub fn triggers(&self) -> Triggers<'_> {
        Triggers(self)
    }

    pub fn reactions(&self) -> Reactions<'_> {
        Reactions(self)
    }

    pub fn memories(&self) -> Memories<'_> {
        Memories(self)
    }

    pub fn relationships(&self) -> Relationships<'_> {
        Relationships(self)
    }

    pub fn roundtable(&self) -> Roundtable<'_> {
        Roundtable(self)
    }

    pub fn events(&self) -> Events<'_> {
        Events(self)
    }

    pub fn tweets(&self) -> Tweets<'_> {
        Tweets(self)
    }

    pub(crate) fn with<R>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> Result<R> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS policies (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                description TEXT,
                version     INTEGER NOT NULL DEFAULT 1,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mission_proposals (
                id               TEXT PRIMARY KEY,
                agent_id         TEXT NOT NULL,
                title            TEXT NOT NULL,
                description      TEXT,
                proposed_steps   TEXT NOT NULL,
                source           TEXT NOT NULL,
                source_trace_id  TEXT UNIQUE,
                status           TEXT NOT NULL DEFAULT 'pending',
                rejection_reason TEXT,
                created_at       TEXT NOT NULL,
                reviewed_at      TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_proposals_agent_created
                ON mission_proposals (agent_id, created_at);

            CREATE TABLE IF NOT EXISTS missions (
                id           TEXT PRIMARY KEY,
                title        TEXT NOT NULL,
                description  TEXT,
                created_by   TEXT NOT NULL,
                proposal_id  TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'approved',
                created_at   TEXT NOT NULL,
                started_at   TEXT,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_missions_status
                ON missions (status, completed_at);

            CREATE TABLE IF NOT EXISTS mission_steps (
                id             TEXT PRIMARY KEY,
                mission_id     TEXT NOT NULL,
                seq            INTEGER NOT NULL,
                kind           TEXT NOT NULL,
                payload        TEXT NOT NULL,
                status         TEXT NOT NULL DEFAULT 'queued',
                result         TEXT,
                failure_reason TEXT,
                worker_id      TEXT,
                executor_agent TEXT,
                created_at     TEXT NOT NULL,
                started_at     TEXT,
                completed_at   TEXT,
                UNIQUE (mission_id, seq)
            );
            CREATE INDEX IF NOT EXISTS idx_steps_status_created
                ON mission_steps (status, created_at);

            CREATE TABLE IF NOT EXISTS circuit_breakers (
                service             TEXT PRIMARY KEY,
                state               TEXT NOT NULL DEFAULT 'closed',
                failure_count       INTEGER NOT NULL DEFAULT 0,
                half_open_successes INTEGER NOT NULL DEFAULT 0,
                updated_at          TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trigger_rules (
                id               TEXT PRIMARY KEY,
                name             TEXT NOT NULL,
                trigger_event    TEXT NOT NULL,
                conditions       TEXT NOT NULL,
                action_config    TEXT NOT NULL,
                cooldown_minutes INTEGER NOT NULL DEFAULT 60,
                enabled          INTEGER NOT NULL DEFAULT 1,
                last_fired_at    TEXT,
                fire_count       INTEGER NOT NULL DEFAULT 0,
                created_at       TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reactions (
                id              TEXT PRIMARY KEY,
                source_event_id TEXT NOT NULL,
                target_agent    TEXT NOT NULL,
                reaction_type   TEXT NOT NULL,
                metadata        TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending',
                created_at      TEXT NOT NULL,
                processed_at    TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_reactions_status_created
                ON reactions (status, created_at);

            CREATE TABLE IF NOT EXISTS agent_memories (
                id              TEXT PRIMARY KEY,
                agent_id        TEXT NOT NULL,
                type            TEXT NOT NULL,
                content         TEXT NOT NULL,
                confidence      REAL NOT NULL,
                tags            TEXT NOT NULL,
                source_trace_id TEXT UNIQUE,
                superseded_by   TEXT,
                created_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_agent_active
                ON agent_memories (agent_id, superseded_by, created_at);

            CREATE TABLE IF NOT EXISTS agent_relationships (
                agent_a            TEXT NOT NULL,
                agent_b            TEXT NOT NULL,
                affinity           REAL NOT NULL,
                drift_log          TEXT NOT NULL,
                total_interactions INTEGER NOT NULL DEFAULT 0,
                updated_at         TEXT NOT NULL,
                PRIMARY KEY (agent_a, agent_b)
            );

            CREATE TABLE IF NOT EXISTS roundtable_conversations (
                id                 TEXT PRIMARY KEY,
                format             TEXT NOT NULL,
                topic              TEXT NOT NULL,
                participants       TEXT NOT NULL,
                status             TEXT NOT NULL DEFAULT 'pending',
                history            TEXT NOT NULL DEFAULT '[]',
                memories_extracted TEXT,
                action_items       TEXT,
                created_at         TEXT NOT NULL,
                started_at         TEXT,
                completed_at       TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_status_created
                ON roundtable_conversations (status, created_at);

            CREATE TABLE IF NOT EXISTS agent_events (
                id         TEXT PRIMARY KEY,
                agent_id   TEXT NOT NULL,
                kind       TEXT NOT NULL,
                title      TEXT NOT NULL,
                summary    TEXT,
                tags       TEXT NOT NULL,
                metadata   TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_kind_created
                ON agent_events (kind, created_at);
            CREATE INDEX IF NOT EXISTS idx_events_created
                ON agent_events (created_at);

            CREATE TABLE IF NOT EXISTS tweet_performance (
                tweet_id        TEXT PRIMARY KEY,
                engagement_rate REAL NOT NULL,
                posted_at       TEXT NOT NULL,
                reviewed        INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

/// Map a column-decoding failure into a rusqlite error so row mappers can
/// use `?` uniformly.
pub(crate) fn col_err(idx: usize, e: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        e.to_string().into(),
    )
}

pub(crate) fn parse_json(s: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Start of the current UTC day, used by every "since start of UTC day" gate
/// window.
pub(crate) fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}
