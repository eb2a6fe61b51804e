use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use super::{new_id, parse_json, parse_opt_ts, parse_ts, to_ts, Store};
use crate::error::Result;
use crate::mission::{MissionStep, ProposedStep, StepKind, StepStatus};

pub struct Steps<'a>(pub(crate) &'a Store);

impl Steps<'_> {
    /// Insert a mission's steps in submission order, sequence-numbered
    /// from 1.
    pub fn insert_batch(&self, mission_id: &str, steps: &[ProposedStep]) -> Result<Vec<String>> {
        let now = to_ts(Utc::now());
        let mut ids = Vec::with_capacity(steps.len());
        self.0.with(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO mission_steps (id, mission_id, seq, kind, payload, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6)",
            )?;
            for (i, step) in steps.iter().enumerate() {
                let id = new_id();
                let payload = if step.payload.is_null() {
                    "{}".to_string()
                } else {
                    step.payload.to_string()
                };
                stmt.execute(params![
                    id,
                    mission_id,
                    (i + 1) as i64,
                    step.kind.as_str(),
                    payload,
                    now
                ])?;
                ids.push(id);
            }
            Ok(())
        })?;
        Ok(ids)
    }

    /// Atomically claim the oldest queued step, optionally filtered by
    /// allowed kinds. The update is conditioned on the row still being
    /// `queued`; when concurrent workers race, exactly one sees the row and
    /// the rest get `None`.
    pub fn claim_next(
        &self,
        worker_id: &str,
        executor_agent: &str,
        allowed_kinds: Option<&[StepKind]>,
    ) -> Result<Option<MissionStep>> {
        let now = to_ts(Utc::now());
        let mut kind_filter = String::new();
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(now),
            Box::new(worker_id.to_string()),
            Box::new(executor_agent.to_string()),
        ];
        if let Some(kinds) = allowed_kinds {
            if !kinds.is_empty() {
                let placeholders: Vec<String> = (0..kinds.len())
                    .map(|i| format!("?{}", i + 4))
                    .collect();
                kind_filter = format!(" AND kind IN ({})", placeholders.join(", "));
                for kind in kinds {
                    args.push(Box::new(kind.as_str().to_string()));
                }
            }
        }

        let sql = format!(
            "UPDATE mission_steps
             SET status = 'running', started_at = ?1, worker_id = ?2, executor_agent = ?3
             WHERE id = (
                 SELECT id FROM mission_steps
                 WHERE status = 'queued'{}
                 ORDER BY created_at ASC, seq ASC
                 LIMIT 1
             ) AND status = 'queued'
             RETURNING {}",
            kind_filter, COLUMNS
        );

        self.0.with(|conn| {
            conn.query_row(
                &sql,
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_step,
            )
            .optional()
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<MissionStep>> {
        self.0.with(|conn| {
            conn.query_row(&format!("{} WHERE id = ?1", SELECT), params![id], row_to_step)
                .optional()
        })
    }

    /// Write the terminal outcome of a running step.
    pub fn complete(
        &self,
        id: &str,
        status: StepStatus,
        result: Option<&Value>,
        failure_reason: Option<&str>,
    ) -> Result<bool> {
        debug_assert!(status.is_terminal());
        let now = to_ts(Utc::now());
        let result_text = result.map(|r| r.to_string());
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE mission_steps
                 SET status = ?2, result = ?3, failure_reason = ?4, completed_at = ?5
                 WHERE id = ?1",
                params![id, status.as_str(), result_text, failure_reason, now],
            )
        })?;
        Ok(changed == 1)
    }

    /// Manual retry: reset a terminal step back to `queued`, clearing its
    /// outcome fields. Returns false when the step is not terminal.
    pub fn retry(&self, id: &str) -> Result<bool> {
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE mission_steps
                 SET status = 'queued', result = NULL, failure_reason = NULL,
                     worker_id = NULL, executor_agent = NULL,
                     started_at = NULL, completed_at = NULL
                 WHERE id = ?1 AND status IN ('succeeded', 'failed', 'skipped')",
                params![id],
            )
        })?;
        Ok(changed == 1)
    }

    pub fn for_mission(&self, mission_id: &str) -> Result<Vec<MissionStep>> {
        self.0.with(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} WHERE mission_id = ?1 ORDER BY seq ASC", SELECT))?;
            let rows = stmt.query_map(params![mission_id], row_to_step)?;
            rows.collect()
        })
    }

    pub fn sibling_statuses(&self, mission_id: &str) -> Result<Vec<StepStatus>> {
        self.0.with(|conn| {
            let mut stmt =
                conn.prepare("SELECT status FROM mission_steps WHERE mission_id = ?1")?;
            let rows = stmt.query_map(params![mission_id], |row| {
                row.get::<_, String>(0)?
                    .parse::<StepStatus>()
                    .map_err(|e| super::col_err(0, e))
            })?;
            rows.collect()
        })
    }

    /// Steps of `kind` created at or after `since`; the content quota gate
    /// counts drafts this way.
    pub fn count_kind_since(&self, kind: &StepKind, since: DateTime<Utc>) -> Result<u64> {
        self.0.with(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM mission_steps WHERE kind = ?1 AND created_at >= ?2",
                params![kind.as_str(), to_ts(since)],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
    }

    /// Force-fail running steps whose `started_at` is older than `cutoff`.
    /// Returns the affected step rows so the caller can roll up missions.
    pub fn fail_stale(&self, cutoff: DateTime<Utc>, reason: &str) -> Result<Vec<MissionStep>> {
        let now = to_ts(Utc::now());
        self.0.with(|conn| {
            let mut stmt = conn.prepare(&format!(
                "UPDATE mission_steps
                 SET status = 'failed', failure_reason = ?1, completed_at = ?2
                 WHERE status = 'running' AND started_at < ?3
                 RETURNING {}",
                COLUMNS
            ))?;
            let rows = stmt.query_map(params![reason, now, to_ts(cutoff)], row_to_step)?;
            rows.collect()
        })
    }
}

const COLUMNS: &str = "id, mission_id, seq, kind, payload, status, result, failure_reason, \
                       worker_id, executor_agent, created_at, started_at, completed_at";

const SELECT: &str = "SELECT id, mission_id, seq, kind, payload, status, result, failure_reason, \
                      worker_id, executor_agent, created_at, started_at, completed_at \
                      FROM mission_steps";

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<MissionStep> {
    let status: StepStatus = row
        .get::<_, String>(5)?
        .parse()
        .map_err(|e| super::col_err(5, e))?;
    let result = row
        .get::<_, Option<String>>(6)?
        .as_deref()
        .map(parse_json)
        .transpose()?;
    Ok(MissionStep {
        id: row.get(0)?,
        mission_id: row.get(1)?,
        seq: row.get::<_, i64>(2)? as u32,
        kind: StepKind::from(row.get::<_, String>(3)?),
        payload: parse_json(&row.get::<_, String>(4)?)?,
        status,
        result,
        failure_reason: row.get(7)?,
        worker_id: row.get(8)?,
        executor_agent: row.get(9)?,
        created_at: parse_ts(&row.get::<_, String>(10)?)?,
        started_at: parse_opt_ts(row.get(11)?)?,
        completed_at: parse_opt_ts(row.get(12)?)?,
    })
}
