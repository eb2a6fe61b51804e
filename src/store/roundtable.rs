use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{new_id, parse_opt_ts, parse_ts, to_ts, Store};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Invalid conversation status: {}", other)),
        }
    }
}

/// One spoken turn in a conversation's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: String,
    pub dialogue: String,
    pub turn: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub format: String,
    pub topic: String,
    pub participants: Vec<String>,
    pub status: ConversationStatus,
    pub history: Vec<ConversationTurn>,
    pub memories_extracted: Option<Value>,
    pub action_items: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub format: String,
    pub topic: String,
    pub participants: Vec<String>,
}

pub struct Roundtable<'a>(pub(crate) &'a Store);

impl Roundtable<'_> {
    /// Insert a `pending` conversation. Participant bounds per format are
    /// validated by the orchestrator before this is called.
    pub fn schedule(&self, req: &ScheduleRequest) -> Result<Conversation> {
        let id = new_id();
        let now = to_ts(Utc::now());
        let participants = serde_json::to_string(&req.participants)?;
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO roundtable_conversations
                     (id, format, topic, participants, status, history, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', '[]', ?5)",
                params![id, req.format, req.topic, participants, now],
            )
        })?;
        self.get(&id)?
            .ok_or_else(|| crate::error::FleetError::not_found(format!("conversation {}", id)))
    }

    pub fn get(&self, id: &str) -> Result<Option<Conversation>> {
        self.0.with(|conn| {
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT),
                params![id],
                row_to_conversation,
            )
            .optional()
        })
    }

    pub fn list(&self, status: Option<ConversationStatus>, limit: usize) -> Result<Vec<Conversation>> {
        let limit = if limit == 0 { 50 } else { limit };
        self.0.with(|conn| match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2",
                    SELECT
                ))?;
                let rows = stmt
                    .query_map(params![status.as_str(), limit as i64], row_to_conversation)?;
                rows.collect()
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("{} ORDER BY created_at DESC LIMIT ?1", SELECT))?;
                let rows = stmt.query_map(params![limit as i64], row_to_conversation)?;
                rows.collect()
            }
        })
    }

    /// Atomically claim the oldest pending conversation, moving it to
    /// `running`. Concurrent orchestrators race on the conditional update;
    /// losers see `None`.
    pub fn claim_pending(&self) -> Result<Option<Conversation>> {
        let now = to_ts(Utc::now());
        self.0.with(|conn| {
            conn.query_row(
                &format!(
                    "UPDATE roundtable_conversations
                     SET status = 'running', started_at = ?1
                     WHERE id = (
                         SELECT id FROM roundtable_conversations
                         WHERE status = 'pending'
                         ORDER BY created_at ASC
                         LIMIT 1
                     ) AND status = 'pending'
                     RETURNING {}",
                    COLUMNS
                ),
                params![now],
                row_to_conversation,
            )
            .optional()
        })
    }

    pub fn append_turn(&self, id: &str, turn: &ConversationTurn) -> Result<()> {
        let Some(mut convo) = self.get(id)? else {
            return Err(crate::error::FleetError::not_found(format!(
                "conversation {}",
                id
            )));
        };
        convo.history.push(turn.clone());
        let history = serde_json::to_string(&convo.history)?;
        self.0.with(|conn| {
            conn.execute(
                "UPDATE roundtable_conversations SET history = ?2 WHERE id = ?1",
                params![id, history],
            )
        })?;
        Ok(())
    }

    /// Finalize a running conversation with its distilled artifacts.
    pub fn complete(
        &self,
        id: &str,
        status: ConversationStatus,
        memories_extracted: Option<&Value>,
        action_items: Option<&Value>,
    ) -> Result<bool> {
        let now = to_ts(Utc::now());
        let memories = memories_extracted.map(|v| v.to_string());
        let items = action_items.map(|v| v.to_string());
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE roundtable_conversations
                 SET status = ?2, memories_extracted = ?3, action_items = ?4, completed_at = ?5
                 WHERE id = ?1 AND status = 'running'",
                params![id, status.as_str(), memories, items, now],
            )
        })?;
        Ok(changed == 1)
    }

    /// Force-fail running conversations whose `started_at` is older than
    /// `cutoff`. Returns the number recovered.
    pub fn fail_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let now = to_ts(Utc::now());
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE roundtable_conversations
                 SET status = 'failed', completed_at = ?1
                 WHERE status = 'running' AND started_at < ?2",
                params![now, to_ts(cutoff)],
            )
        })?;
        Ok(changed)
    }

    /// Conversations created at or after `since`; the daily cap gate and
    /// the hourly scheduler both count this way.
    pub fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64> {
        self.0.with(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM roundtable_conversations WHERE created_at >= ?1",
                params![to_ts(since)],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
    }

    /// Any conversation of `format` created at or after `since`, existing
    /// in any status. The scheduler uses this for one-per-slot-per-day.
    pub fn exists_for_slot(&self, format: &str, since: DateTime<Utc>) -> Result<bool> {
        let count = self.0.with(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM roundtable_conversations
                 WHERE format = ?1 AND created_at >= ?2",
                params![format, to_ts(since)],
                |row| row.get::<_, i64>(0),
            )
        })?;
        Ok(count > 0)
    }
}

const COLUMNS: &str = "id, format, topic, participants, status, history, memories_extracted, \
                       action_items, created_at, started_at, completed_at";

const SELECT: &str = "SELECT id, format, topic, participants, status, history, \
                      memories_extracted, action_items, created_at, started_at, completed_at \
                      FROM roundtable_conversations";

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let participants: Vec<String> = serde_json::from_str(&row.get::<_, String>(3)?)
        .map_err(|e| super::col_err(3, e))?;
    let history: Vec<ConversationTurn> = serde_json::from_str(&row.get::<_, String>(5)?)
        .map_err(|e| super::col_err(5, e))?;
    let memories_extracted = row
        .get::<_, Option<String>>(6)?
        .as_deref()
        .map(super::parse_json)
        .transpose()?;
    let action_items = row
        .get::<_, Option<String>>(7)?
        .as_deref()
        .map(super::parse_json)
        .transpose()?;
    Ok(Conversation {
        id: row.get(0)?,
        format: row.get(1)?,
        topic: row.get(2)?,
        participants,
        status: row
            .get::<_, String>(4)?
            .parse()
            .map_err(|e| super::col_err(4, e))?,
        history,
        memories_extracted,
        action_items,
        created_at: parse_ts(&row.get::<_, String>(8)?)?,
        started_at: parse_opt_ts(row.get(9)?)?,
        completed_at: parse_opt_ts(row.get(10)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(format: &str) -> ScheduleRequest {
        ScheduleRequest {
            format: format.to_string(),
            topic: "release readiness".to_string(),
            participants: vec!["ava".to_string(), "kai".to_string()],
        }
    }

    #[test]
    fn test_claim_moves_pending_to_running_once() {
        let store = Store::open_in_memory().unwrap();
        let convo = store.roundtable().schedule(&request("standup")).unwrap();
        assert_eq!(convo.status, ConversationStatus::Pending);

        let claimed = store.roundtable().claim_pending().unwrap().unwrap();
        assert_eq!(claimed.id, convo.id);
        assert_eq!(claimed.status, ConversationStatus::Running);
        assert!(claimed.started_at.is_some());

        assert!(store.roundtable().claim_pending().unwrap().is_none());
    }

    #[test]
    fn test_append_and_complete_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let convo = store.roundtable().schedule(&request("debate")).unwrap();
        store.roundtable().claim_pending().unwrap().unwrap();

        let turn = ConversationTurn {
            speaker: "ava".to_string(),
            dialogue: "I think we ship on Friday.".to_string(),
            turn: 1,
            timestamp: Utc::now(),
        };
        store.roundtable().append_turn(&convo.id, &turn).unwrap();

        let done = store
            .roundtable()
            .complete(
                &convo.id,
                ConversationStatus::Completed,
                Some(&json!([{"type": "insight"}])),
                None,
            )
            .unwrap();
        assert!(done);

        let read = store.roundtable().get(&convo.id).unwrap().unwrap();
        assert_eq!(read.status, ConversationStatus::Completed);
        assert_eq!(read.history.len(), 1);
        assert_eq!(read.history[0].speaker, "ava");
        assert!(read.memories_extracted.is_some());

        // Completing twice is a no-op.
        assert!(!store
            .roundtable()
            .complete(&convo.id, ConversationStatus::Failed, None, None)
            .unwrap());
    }

    #[test]
    fn test_fail_stale_recovers_only_old_running() {
        let store = Store::open_in_memory().unwrap();
        store.roundtable().schedule(&request("standup")).unwrap();
        let convo = store.roundtable().claim_pending().unwrap().unwrap();
        store.roundtable().schedule(&request("debate")).unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.roundtable().fail_stale(past).unwrap(), 0);

        let future = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.roundtable().fail_stale(future).unwrap(), 1);

        let read = store.roundtable().get(&convo.id).unwrap().unwrap();
        assert_eq!(read.status, ConversationStatus::Failed);
    }

    #[test]
    fn test_slot_existence_is_format_scoped() {
        let store = Store::open_in_memory().unwrap();
        store.roundtable().schedule(&request("standup")).unwrap();

        let day_start = Utc::now() - chrono::Duration::minutes(5);
        assert!(store.roundtable().exists_for_slot("standup", day_start).unwrap());
        assert!(!store.roundtable().exists_for_slot("debate", day_start).unwrap());
        assert_eq!(store.roundtable().count_created_since(day_start).unwrap(), 1);
    }
}
