use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{new_id, parse_json, parse_opt_ts, parse_ts, to_ts, Store};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionStatus {
    Pending,
    Processed,
    Discarded,
}

impl ReactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Discarded => "discarded",
        }
    }
}

impl std::str::FromStr for ReactionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "discarded" => Ok(Self::Discarded),
            other => Err(format!("Invalid reaction status: {}", other)),
        }
    }
}

/// A matched event waiting to be turned into a proposal by the drain pass.
#[derive(Debug, Clone, Serialize)]
pub struct Reaction {
    pub id: String,
    pub source_event_id: String,
    pub target_agent: String,
    pub reaction_type: String,
    pub metadata: Value,
    pub status: ReactionStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewReaction {
    pub source_event_id: String,
    pub target_agent: String,
    pub reaction_type: String,
    pub metadata: Value,
}

pub struct Reactions<'a>(pub(crate) &'a Store);

impl Reactions<'_> {
    pub fn insert(&self, reaction: NewReaction) -> Result<String> {
        let id = new_id();
        let now = to_ts(Utc::now());
        let metadata = if reaction.metadata.is_null() {
            "{}".to_string()
        } else {
            reaction.metadata.to_string()
        };
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO reactions
                     (id, source_event_id, target_agent, reaction_type, metadata, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
                params![
                    id,
                    reaction.source_event_id,
                    reaction.target_agent,
                    reaction.reaction_type,
                    metadata,
                    now
                ],
            )
        })?;
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Option<Reaction>> {
        self.0.with(|conn| {
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT),
                params![id],
                row_to_reaction,
            )
            .optional()
        })
    }

    /// Oldest pending reactions, up to `limit`. The drain pass processes
    /// these in order.
    pub fn pending_batch(&self, limit: usize) -> Result<Vec<Reaction>> {
        self.0.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?1",
                SELECT
            ))?;
            let rows = stmt.query_map(params![limit as i64], row_to_reaction)?;
            rows.collect()
        })
    }

    pub fn mark(&self, id: &str, status: ReactionStatus) -> Result<bool> {
        let now = to_ts(Utc::now());
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE reactions SET status = ?2, processed_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![id, status.as_str(), now],
            )
        })?;
        Ok(changed == 1)
    }

    /// Per-pair cooldown check: is there any reaction of this type for this
    /// agent created at or after `cutoff`?
    pub fn exists_since(
        &self,
        target_agent: &str,
        reaction_type: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let count = self.0.with(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM reactions
                 WHERE target_agent = ?1 AND reaction_type = ?2 AND created_at >= ?3",
                params![target_agent, reaction_type, to_ts(cutoff)],
                |row| row.get::<_, i64>(0),
            )
        })?;
        Ok(count > 0)
    }
}

const SELECT: &str = "SELECT id, source_event_id, target_agent, reaction_type, metadata, \
                      status, created_at, processed_at \
                      FROM reactions";

fn row_to_reaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        id: row.get(0)?,
        source_event_id: row.get(1)?,
        target_agent: row.get(2)?,
        reaction_type: row.get(3)?,
        metadata: parse_json(&row.get::<_, String>(4)?)?,
        status: row
            .get::<_, String>(5)?
            .parse()
            .map_err(|e| super::col_err(5, e))?,
        created_at: parse_ts(&row.get::<_, String>(6)?)?,
        processed_at: parse_opt_ts(row.get(7)?)?,
    })
}
