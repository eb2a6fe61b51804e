use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{parse_ts, to_ts, Store};
use crate::error::Result;

/// Clamp bounds for pairwise affinity drift.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriftBounds {
    pub max_delta: f64,
    pub floor: f64,
    pub ceiling: f64,
    pub log_entries: usize,
}

impl Default for DriftBounds {
    fn default() -> Self {
        Self {
            max_delta: 0.03,
            floor: 0.10,
            ceiling: 0.95,
            log_entries: 16,
        }
    }
}

/// One recorded affinity adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEntry {
    pub delta: f64,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRelationship {
    pub agent_a: String,
    pub agent_b: String,
    pub affinity: f64,
    pub drift_log: Vec<DriftEntry>,
    pub total_interactions: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftResult {
    pub relationship: AgentRelationship,
    /// The delta actually applied after both clamps.
    pub applied_delta: f64,
}

const DEFAULT_AFFINITY: f64 = 0.5;

pub struct Relationships<'a>(pub(crate) &'a Store);

impl Relationships<'_> {
    /// Read a pair's relationship. Order of the two names does not matter;
    /// unknown pairs read as the default affinity without being written.
    pub fn get(&self, a: &str, b: &str) -> Result<AgentRelationship> {
        let (a, b) = canonical(a, b);
        let existing = self.0.with(|conn| {
            conn.query_row(
                &format!("{} WHERE agent_a = ?1 AND agent_b = ?2", SELECT),
                params![a, b],
                row_to_relationship,
            )
            .optional()
        })?;
        Ok(existing.unwrap_or_else(|| AgentRelationship {
            agent_a: a,
            agent_b: b,
            affinity: DEFAULT_AFFINITY,
            drift_log: Vec::new(),
            total_interactions: 0,
            updated_at: Utc::now(),
        }))
    }

    pub fn all(&self) -> Result<Vec<AgentRelationship>> {
        self.0.with(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY agent_a, agent_b", SELECT))?;
            let rows = stmt.query_map([], row_to_relationship)?;
            rows.collect()
        })
    }

    /// Apply a signed drift: the requested delta is clamped to
    /// `±max_delta`, the resulting affinity to `[floor, ceiling]`, and the
    /// adjustment is pushed onto a bounded log ring.
    pub fn apply_drift(
        &self,
        a: &str,
        b: &str,
        requested_delta: f64,
        reason: &str,
        bounds: DriftBounds,
    ) -> Result<DriftResult> {
        let mut rel = self.get(a, b)?;

        let clamped = requested_delta.clamp(-bounds.max_delta, bounds.max_delta);
        let next = (rel.affinity + clamped).clamp(bounds.floor, bounds.ceiling);
        let applied = next - rel.affinity;

        rel.affinity = next;
        rel.total_interactions += 1;
        rel.updated_at = Utc::now();
        rel.drift_log.push(DriftEntry {
            delta: applied,
            reason: reason.to_string(),
            at: rel.updated_at,
        });
        if rel.drift_log.len() > bounds.log_entries {
            let excess = rel.drift_log.len() - bounds.log_entries;
            rel.drift_log.drain(..excess);
        }

        let log = serde_json::to_string(&rel.drift_log)?;
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO agent_relationships
                     (agent_a, agent_b, affinity, drift_log, total_interactions, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (agent_a, agent_b) DO UPDATE SET
                     affinity = excluded.affinity,
                     drift_log = excluded.drift_log,
                     total_interactions = excluded.total_interactions,
                     updated_at = excluded.updated_at",
                params![
                    rel.agent_a,
                    rel.agent_b,
                    rel.affinity,
                    log,
                    rel.total_interactions as i64,
                    to_ts(rel.updated_at)
                ],
            )
        })?;

        Ok(DriftResult {
            relationship: rel,
            applied_delta: applied,
        })
    }
}

fn canonical(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

const SELECT: &str = "SELECT agent_a, agent_b, affinity, drift_log, total_interactions, \
                      updated_at FROM agent_relationships";

fn row_to_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRelationship> {
    let drift_log: Vec<DriftEntry> = serde_json::from_str(&row.get::<_, String>(3)?)
        .map_err(|e| super::col_err(3, e))?;
    Ok(AgentRelationship {
        agent_a: row.get(0)?,
        agent_b: row.get(1)?,
        affinity: row.get(2)?,
        drift_log,
        total_interactions: row.get::<_, i64>(4)? as u64,
        updated_at: parse_ts(&row.get::<_, String>(5)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_order_is_canonical() {
        let store = Store::open_in_memory().unwrap();
        store
            .relationships()
            .apply_drift("kai", "ava", 0.02, "pairing", DriftBounds::default())
            .unwrap();

        let rel = store.relationships().get("ava", "kai").unwrap();
        assert_eq!(rel.agent_a, "ava");
        assert_eq!(rel.agent_b, "kai");
        assert!((rel.affinity - 0.52).abs() < 1e-9);
        assert_eq!(store.relationships().all().unwrap().len(), 1);
    }

    #[test]
    fn test_delta_and_affinity_are_clamped() {
        let store = Store::open_in_memory().unwrap();
        let bounds = DriftBounds::default();

        // Oversized request is clamped to max_delta.
        let out = store
            .relationships()
            .apply_drift("ava", "kai", 0.5, "spike", bounds)
            .unwrap();
        assert!((out.applied_delta - 0.03).abs() < 1e-9);

        // Affinity never leaves [floor, ceiling].
        for _ in 0..40 {
            store
                .relationships()
                .apply_drift("ava", "kai", 0.03, "ratchet", bounds)
                .unwrap();
        }
        let rel = store.relationships().get("ava", "kai").unwrap();
        assert!((rel.affinity - bounds.ceiling).abs() < 1e-9);

        for _ in 0..60 {
            store
                .relationships()
                .apply_drift("ava", "kai", -0.03, "fallout", bounds)
                .unwrap();
        }
        let rel = store.relationships().get("ava", "kai").unwrap();
        assert!((rel.affinity - bounds.floor).abs() < 1e-9);
    }

    #[test]
    fn test_drift_log_is_a_bounded_ring() {
        let store = Store::open_in_memory().unwrap();
        let bounds = DriftBounds {
            log_entries: 4,
            ..Default::default()
        };
        for i in 0..6 {
            store
                .relationships()
                .apply_drift("ava", "kai", 0.001, &format!("r{}", i), bounds)
                .unwrap();
        }

        let rel = store.relationships().get("ava", "kai").unwrap();
        assert_eq!(rel.drift_log.len(), 4);
        assert_eq!(rel.drift_log[0].reason, "r2");
        assert_eq!(rel.drift_log[3].reason, "r5");
        assert_eq!(rel.total_interactions, 6);
    }
}
