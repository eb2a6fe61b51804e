use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{new_id, parse_opt_ts, parse_ts, to_ts, Store};
use crate::error::{FleetError, Result};
use crate::mission::{Mission, MissionStatus};

pub struct Missions<'a>(pub(crate) &'a Store);

impl Missions<'_> {
    /// Create a mission from an accepted proposal. Missions are never
    /// created any other way.
    pub fn insert(
        &self,
        title: &str,
        description: Option<&str>,
        created_by: &str,
        proposal_id: &str,
    ) -> Result<Mission> {
        let id = new_id();
        let now = to_ts(Utc::now());
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO missions (id, title, description, created_by, proposal_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'approved', ?6)",
                params![id, title, description, created_by, proposal_id, now],
            )
        })?;
        self.get(&id)?
            .ok_or_else(|| FleetError::not_found(format!("mission {}", id)))
    }

    pub fn get(&self, id: &str) -> Result<Option<Mission>> {
        self.0.with(|conn| {
            conn.query_row(&format!("{} WHERE id = ?1", SELECT), params![id], row_to_mission)
                .optional()
        })
    }

    pub fn find_by_proposal(&self, proposal_id: &str) -> Result<Option<Mission>> {
        self.0.with(|conn| {
            conn.query_row(
                &format!("{} WHERE proposal_id = ?1", SELECT),
                params![proposal_id],
                row_to_mission,
            )
            .optional()
        })
    }

    pub fn list(&self, status: Option<MissionStatus>, limit: usize) -> Result<Vec<Mission>> {
        let limit = if limit == 0 { 50 } else { limit };
        self.0.with(|conn| {
            match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "{} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2",
                        SELECT
                    ))?;
                    let rows =
                        stmt.query_map(params![status.as_str(), limit as i64], row_to_mission)?;
                    rows.collect()
                }
                None => {
                    let mut stmt = conn
                        .prepare(&format!("{} ORDER BY created_at DESC LIMIT ?1", SELECT))?;
                    let rows = stmt.query_map(params![limit as i64], row_to_mission)?;
                    rows.collect()
                }
            }
        })
    }

    /// Missions that finished as `failed` at or after `since`. The
    /// mission_failed trigger checker scans these.
    pub fn recent_failed(
        &self,
        since: chrono::DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Mission>> {
        self.0.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE status = 'failed' AND completed_at >= ?1
                 ORDER BY completed_at DESC LIMIT ?2",
                SELECT
            ))?;
            let rows = stmt.query_map(params![to_ts(since), limit as i64], row_to_mission)?;
            rows.collect()
        })
    }

    /// Conditional approved -> running transition, applied when the first
    /// child step is claimed. Losing the race is fine: someone else already
    /// flipped it.
    pub fn mark_running_if_approved(&self, id: &str) -> Result<bool> {
        let now = to_ts(Utc::now());
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE missions SET status = 'running', started_at = ?2
                 WHERE id = ?1 AND status = 'approved'",
                params![id, now],
            )
        })?;
        Ok(changed == 1)
    }

    /// Terminal roll-up once every child step is terminal.
    pub fn finalize(&self, id: &str, status: MissionStatus) -> Result<bool> {
        debug_assert!(status.is_terminal());
        let now = to_ts(Utc::now());
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE missions SET status = ?2, completed_at = ?3
                 WHERE id = ?1 AND status IN ('approved', 'running')",
                params![id, status.as_str(), now],
            )
        })?;
        Ok(changed == 1)
    }

    /// Pull a finished mission back to `running` after one of its steps is
    /// manually requeued. Cancelled missions stay cancelled.
    pub fn reopen(&self, id: &str) -> Result<bool> {
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE missions SET status = 'running', completed_at = NULL
                 WHERE id = ?1 AND status IN ('succeeded', 'failed')",
                params![id],
            )
        })?;
        Ok(changed == 1)
    }
}

const SELECT: &str = "SELECT id, title, description, created_by, proposal_id, status, \
                      created_at, started_at, completed_at FROM missions";

fn row_to_mission(row: &rusqlite::Row<'_>) -> rusqlite::Result<Mission> {
    let status: MissionStatus = row
        .get::<_, String>(5)?
        .parse()
        .map_err(|e| super::col_err(5, e))?;
    Ok(Mission {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        proposal_id: row.get(4)?,
        status,
        created_at: parse_ts(&row.get::<_, String>(6)?)?,
        started_at: parse_opt_ts(row.get(7)?)?,
        completed_at: parse_opt_ts(row.get(8)?)?,
    })
}
