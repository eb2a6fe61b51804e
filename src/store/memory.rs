use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{new_id, parse_ts, to_ts, Store};
use crate::error::Result;

/// Sentinel stored in `superseded_by` when a record is dropped for
/// capacity rather than replaced by a successor.
pub const EVICTED_MARKER: &str = "evicted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Insight,
    Pattern,
    Strategy,
    Preference,
    Lesson,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insight => "insight",
            Self::Pattern => "pattern",
            Self::Strategy => "strategy",
            Self::Preference => "preference",
            Self::Lesson => "lesson",
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "insight" => Ok(Self::Insight),
            "pattern" => Ok(Self::Pattern),
            "strategy" => Ok(Self::Strategy),
            "preference" => Ok(Self::Preference),
            "lesson" => Ok(Self::Lesson),
            other => Err(format!("Invalid memory type: {}", other)),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentMemory {
    pub id: String,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub source_trace_id: Option<String>,
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryInsert {
    pub agent_id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source_trace_id: Option<String>,
}

/// Admission and capacity bounds for the living memory set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryLimits {
    pub min_confidence: f64,
    pub max_active: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            min_confidence: 0.55,
            max_active: 200,
        }
    }
}

/// Outcome of an admission-checked insert.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryWrite {
    Inserted { id: String, evicted: usize },
    /// A record with this trace id already exists; nothing was written.
    Duplicate { existing_id: String },
    /// Confidence below the admission floor; nothing was written.
    BelowConfidence,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub agent_id: String,
    pub memory_type: Option<MemoryType>,
    pub tag: Option<String>,
    pub min_confidence: Option<f64>,
    pub include_superseded: bool,
    pub limit: usize,
}

/// Aggregate shape of an agent's active memories, consumed by voice
/// derivation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub total_active: u64,
    pub insights: u64,
    pub patterns: u64,
    pub strategies: u64,
    pub preferences: u64,
    pub lessons: u64,
    pub avg_confidence: f64,
    pub top_tag: Option<String>,
}

pub struct Memories<'a>(pub(crate) &'a Store);

impl Memories<'_> {
    /// Admission-checked insert: records below `min_confidence` are skipped,
    /// a known `source_trace_id` returns the prior record's id, and pushing
    /// the active set past `max_active` supersedes the oldest entries with
    /// the eviction marker.
    pub fn insert(&self, mem: MemoryInsert, limits: MemoryLimits) -> Result<MemoryWrite> {
        if mem.confidence < limits.min_confidence {
            return Ok(MemoryWrite::BelowConfidence);
        }
        if let Some(trace) = mem.source_trace_id.as_deref() {
            if let Some(existing_id) = self.find_by_trace(trace)? {
                return Ok(MemoryWrite::Duplicate { existing_id });
            }
        }

        let id = new_id();
        let now = to_ts(Utc::now());
        let tags = serde_json::to_string(&mem.tags)?;
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO agent_memories
                     (id, agent_id, type, content, confidence, tags, source_trace_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    mem.agent_id,
                    mem.memory_type.as_str(),
                    mem.content,
                    mem.confidence,
                    tags,
                    mem.source_trace_id,
                    now
                ],
            )
        })?;

        let evicted = self.evict_overflow(&mem.agent_id, limits.max_active)?;
        Ok(MemoryWrite::Inserted { id, evicted })
    }

    fn find_by_trace(&self, trace: &str) -> Result<Option<String>> {
        self.0.with(|conn| {
            conn.query_row(
                "SELECT id FROM agent_memories WHERE source_trace_id = ?1",
                params![trace],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Supersede the oldest active entries until the agent is back within
    /// the cap. Returns the number evicted.
    fn evict_overflow(&self, agent_id: &str, max_active: usize) -> Result<usize> {
        let evicted = self.0.with(|conn| {
            conn.execute(
                "UPDATE agent_memories SET superseded_by = ?3
                 WHERE id IN (
                     SELECT id FROM agent_memories
                     WHERE agent_id = ?1 AND superseded_by IS NULL
                     ORDER BY created_at DESC
                     LIMIT -1 OFFSET ?2
                 )",
                params![agent_id, max_active as i64, EVICTED_MARKER],
            )
        })?;
        Ok(evicted)
    }

    pub fn get(&self, id: &str) -> Result<Option<AgentMemory>> {
        self.0.with(|conn| {
            conn.query_row(&format!("{} WHERE id = ?1", SELECT), params![id], row_to_memory)
                .optional()
        })
    }

    pub fn query(&self, q: &MemoryQuery) -> Result<Vec<AgentMemory>> {
        let mut sql = format!("{} WHERE agent_id = ?1", SELECT);
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(q.agent_id.clone())];
        if !q.include_superseded {
            sql.push_str(" AND superseded_by IS NULL");
        }
        if let Some(t) = q.memory_type {
            args.push(Box::new(t.as_str().to_string()));
            sql.push_str(&format!(" AND type = ?{}", args.len()));
        }
        if let Some(c) = q.min_confidence {
            args.push(Box::new(c));
            sql.push_str(&format!(" AND confidence >= ?{}", args.len()));
        }
        let limit = if q.limit == 0 { 100 } else { q.limit };
        sql.push_str(" ORDER BY created_at DESC");

        let mut rows = self.0.with(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_memory,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        // Tag matching stays in process; tags are a JSON array column.
        if let Some(tag) = q.tag.as_deref() {
            rows.retain(|m| m.tags.iter().any(|t| t == tag));
        }
        rows.truncate(limit);
        Ok(rows)
    }

    /// Active insights at or above the confidence bar, across all agents,
    /// oldest first. Feeds insight promotion.
    pub fn promotable_insights(&self, min_confidence: f64, limit: usize) -> Result<Vec<AgentMemory>> {
        self.0.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE type = 'insight' AND superseded_by IS NULL AND confidence >= ?1
                 ORDER BY created_at ASC LIMIT ?2",
                SELECT
            ))?;
            let rows = stmt.query_map(params![min_confidence, limit as i64], row_to_memory)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    /// Soft-delete: point the record at its successor (or the eviction
    /// marker). Already-superseded records are left untouched.
    pub fn supersede(&self, id: &str, replaced_by: &str) -> Result<bool> {
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE agent_memories SET superseded_by = ?2
                 WHERE id = ?1 AND superseded_by IS NULL",
                params![id, replaced_by],
            )
        })?;
        Ok(changed == 1)
    }

    pub fn count_active(&self, agent_id: &str) -> Result<u64> {
        self.0.with(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM agent_memories
                 WHERE agent_id = ?1 AND superseded_by IS NULL",
                params![agent_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
    }

    pub fn stats(&self, agent_id: &str) -> Result<MemoryStats> {
        let active = self.query(&MemoryQuery {
            agent_id: agent_id.to_string(),
            limit: usize::MAX,
            ..Default::default()
        })?;

        let mut stats = MemoryStats {
            total_active: active.len() as u64,
            ..Default::default()
        };
        let mut tag_counts: std::collections::HashMap<&str, u64> =
            std::collections::HashMap::new();
        let mut confidence_sum = 0.0;
        for mem in &active {
            match mem.memory_type {
                MemoryType::Insight => stats.insights += 1,
                MemoryType::Pattern => stats.patterns += 1,
                MemoryType::Strategy => stats.strategies += 1,
                MemoryType::Preference => stats.preferences += 1,
                MemoryType::Lesson => stats.lessons += 1,
            }
            confidence_sum += mem.confidence;
            for tag in &mem.tags {
                *tag_counts.entry(tag.as_str()).or_default() += 1;
            }
        }
        if !active.is_empty() {
            stats.avg_confidence = confidence_sum / active.len() as f64;
        }
        stats.top_tag = tag_counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
            .map(|(tag, _)| tag.to_string());
        Ok(stats)
    }
}

const SELECT: &str = "SELECT id, agent_id, type, content, confidence, tags, source_trace_id, \
                      superseded_by, created_at \
                      FROM agent_memories";

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentMemory> {
    let tags: Vec<String> = serde_json::from_str(&row.get::<_, String>(5)?)
        .map_err(|e| super::col_err(5, e))?;
    Ok(AgentMemory {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        memory_type: row
            .get::<_, String>(2)?
            .parse()
            .map_err(|e| super::col_err(2, e))?,
        content: row.get(3)?,
        confidence: row.get(4)?,
        tags,
        source_trace_id: row.get(6)?,
        superseded_by: row.get(7)?,
        created_at: parse_ts(&row.get::<_, String>(8)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(agent: &str, confidence: f64, trace: Option<&str>) -> MemoryInsert {
        MemoryInsert {
            agent_id: agent.to_string(),
            memory_type: MemoryType::Insight,
            content: "short prompts work better".to_string(),
            confidence,
            tags: vec!["prompting".to_string()],
            source_trace_id: trace.map(str::to_string),
        }
    }

    #[test]
    fn test_below_confidence_is_skipped() {
        let store = Store::open_in_memory().unwrap();
        let out = store
            .memories()
            .insert(mem("ava", 0.4, None), MemoryLimits::default())
            .unwrap();
        assert_eq!(out, MemoryWrite::BelowConfidence);
        assert_eq!(store.memories().count_active("ava").unwrap(), 0);
    }

    #[test]
    fn test_trace_dedup_returns_existing() {
        let store = Store::open_in_memory().unwrap();
        let limits = MemoryLimits::default();
        let first = store
            .memories()
            .insert(mem("ava", 0.8, Some("conv:1:0")), limits)
            .unwrap();
        let MemoryWrite::Inserted { id, .. } = first else {
            panic!("expected insert");
        };

        let second = store
            .memories()
            .insert(mem("ava", 0.9, Some("conv:1:0")), limits)
            .unwrap();
        assert_eq!(second, MemoryWrite::Duplicate { existing_id: id });
        assert_eq!(store.memories().count_active("ava").unwrap(), 1);
    }

    #[test]
    fn test_cap_evicts_oldest_with_marker() {
        let store = Store::open_in_memory().unwrap();
        let limits = MemoryLimits {
            min_confidence: 0.55,
            max_active: 3,
        };
        let mut ids = Vec::new();
        for i in 0..4 {
            let out = store
                .memories()
                .insert(mem("ava", 0.7 + 0.01 * i as f64, None), limits)
                .unwrap();
            let MemoryWrite::Inserted { id, evicted } = out else {
                panic!("expected insert");
            };
            if i < 3 {
                assert_eq!(evicted, 0);
            } else {
                assert_eq!(evicted, 1);
            }
            ids.push(id);
        }

        assert_eq!(store.memories().count_active("ava").unwrap(), 3);
        let oldest = store.memories().get(&ids[0]).unwrap().unwrap();
        assert_eq!(oldest.superseded_by.as_deref(), Some(EVICTED_MARKER));
    }

    #[test]
    fn test_query_filters_type_and_tag() {
        let store = Store::open_in_memory().unwrap();
        let limits = MemoryLimits::default();
        store.memories().insert(mem("ava", 0.8, None), limits).unwrap();
        store
            .memories()
            .insert(
                MemoryInsert {
                    memory_type: MemoryType::Strategy,
                    tags: vec!["cadence".to_string()],
                    ..mem("ava", 0.9, None)
                },
                limits,
            )
            .unwrap();

        let strategies = store
            .memories()
            .query(&MemoryQuery {
                agent_id: "ava".to_string(),
                memory_type: Some(MemoryType::Strategy),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(strategies.len(), 1);

        let tagged = store
            .memories()
            .query(&MemoryQuery {
                agent_id: "ava".to_string(),
                tag: Some("prompting".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].memory_type, MemoryType::Insight);
    }

    #[test]
    fn test_stats_aggregates_active_set() {
        let store = Store::open_in_memory().unwrap();
        let limits = MemoryLimits::default();
        store.memories().insert(mem("ava", 0.6, None), limits).unwrap();
        store
            .memories()
            .insert(
                MemoryInsert {
                    memory_type: MemoryType::Lesson,
                    ..mem("ava", 0.8, None)
                },
                limits,
            )
            .unwrap();

        let stats = store.memories().stats("ava").unwrap();
        assert_eq!(stats.total_active, 2);
        assert_eq!(stats.insights, 1);
        assert_eq!(stats.lessons, 1);
        assert!((stats.avg_confidence - 0.7).abs() < 1e-9);
        assert_eq!(stats.top_tag.as_deref(), Some("prompting"));
    }
}
