use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{new_id, parse_json, parse_ts, to_ts, Store};
use crate::error::Result;

/// Observed fact emitted by the system. Events feed the reaction engine's
/// pattern scan and the quota gates' daily counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: String,
    pub agent_id: String,
    pub kind: String,
    pub title: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub agent_id: String,
    pub kind: String,
    pub title: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Option<Value>,
}

impl NewEvent {
    pub fn new(
        agent_id: impl Into<String>,
        kind: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            kind: kind.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub struct Events<'a>(pub(crate) &'a Store);

impl Events<'_> {
    pub fn emit(&self, event: NewEvent) -> Result<String> {
        let id = new_id();
        let now = to_ts(Utc::now());
        let tags = serde_json::to_string(&event.tags)?;
        let metadata = event.metadata.as_ref().map(|m| m.to_string());
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO agent_events (id, agent_id, kind, title, summary, tags, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    event.agent_id,
                    event.kind,
                    event.title,
                    event.summary,
                    tags,
                    metadata,
                    now
                ],
            )
        })?;
        Ok(id)
    }

    /// Events emitted at or after `since`, newest first, bounded by `limit`.
    pub fn recent(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<AgentEvent>> {
        self.0.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, agent_id, kind, title, summary, tags, metadata, created_at
                 FROM agent_events
                 WHERE created_at >= ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![to_ts(since), limit as i64], row_to_event)?;
            rows.collect()
        })
    }

    /// Count of events of `kind` emitted at or after `since`. Gate windows
    /// are computed from this.
    pub fn count_kind_since(&self, kind: &str, since: DateTime<Utc>) -> Result<u64> {
        self.0.with(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM agent_events WHERE kind = ?1 AND created_at >= ?2",
                params![kind, to_ts(since)],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
    }

    pub fn last_of_kind(&self, kind: &str) -> Result<Option<AgentEvent>> {
        use rusqlite::OptionalExtension;
        self.0.with(|conn| {
            conn.query_row(
                "SELECT id, agent_id, kind, title, summary, tags, metadata, created_at
                 FROM agent_events
                 WHERE kind = ?1
                 ORDER BY created_at DESC
                 LIMIT 1",
                params![kind],
                row_to_event,
            )
            .optional()
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentEvent> {
    let tags: Vec<String> = serde_json::from_str(&row.get::<_, String>(5)?).unwrap_or_default();
    let metadata = row
        .get::<_, Option<String>>(6)?
        .as_deref()
        .map(parse_json)
        .transpose()?;
    Ok(AgentEvent {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        tags,
        metadata,
        created_at: parse_ts(&row.get::<_, String>(7)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_emit_and_count() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..3 {
            store
                .events()
                .emit(
                    NewEvent::new("ava", "tweet_posted", format!("tweet {}", i))
                        .with_tags(vec!["tweet".into()]),
                )
                .unwrap();
        }
        let since = Utc::now() - Duration::minutes(1);
        assert_eq!(store.events().count_kind_since("tweet_posted", since).unwrap(), 3);
        assert_eq!(store.events().count_kind_since("step_failed", since).unwrap(), 0);

        let recent = store.events().recent(since, 10).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].tags, vec!["tweet".to_string()]);
    }
}
