use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{new_id, parse_opt_ts, parse_ts, to_ts, utc_day_start, Store};
use crate::error::{FleetError, Result};
use crate::mission::{MissionProposal, ProposalSource, ProposalStatus, ProposedStep};

#[derive(Debug, Clone)]
pub struct NewProposal {
    pub agent_id: String,
    pub title: String,
    pub description: Option<String>,
    pub proposed_steps: Vec<ProposedStep>,
    pub source: ProposalSource,
    pub source_trace_id: Option<String>,
    pub status: ProposalStatus,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProposalFilter {
    pub status: Option<ProposalStatus>,
    pub agent_id: Option<String>,
    pub limit: usize,
}

pub struct Proposals<'a>(pub(crate) &'a Store);

impl Proposals<'_> {
    pub fn insert(&self, new: NewProposal) -> Result<MissionProposal> {
        let id = new_id();
        let now = Utc::now();
        let steps = serde_json::to_string(&new.proposed_steps)?;
        let reviewed_at = new.status.is_terminal().then(|| to_ts(now));
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO mission_proposals
                     (id, agent_id, title, description, proposed_steps, source,
                      source_trace_id, status, rejection_reason, created_at, reviewed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id,
                    new.agent_id,
                    new.title,
                    new.description,
                    steps,
                    new.source.as_str(),
                    new.source_trace_id,
                    new.status.as_str(),
                    new.rejection_reason,
                    to_ts(now),
                    reviewed_at,
                ],
            )
        })?;
        self.get(&id)?
            .ok_or_else(|| FleetError::not_found(format!("proposal {}", id)))
    }

    pub fn get(&self, id: &str) -> Result<Option<MissionProposal>> {
        self.0.with(|conn| {
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT),
                params![id],
                row_to_proposal,
            )
            .optional()
        })
    }

    /// Idempotency lookup: the prior proposal for a trace id, if any.
    pub fn find_by_trace(&self, trace_id: &str) -> Result<Option<MissionProposal>> {
        self.0.with(|conn| {
            conn.query_row(
                &format!("{} WHERE source_trace_id = ?1", SELECT),
                params![trace_id],
                row_to_proposal,
            )
            .optional()
        })
    }

    pub fn list(&self, filter: ProposalFilter) -> Result<Vec<MissionProposal>> {
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        self.0.with(|conn| {
            let mut sql = format!("{} WHERE 1=1", SELECT);
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            if let Some(status) = filter.status {
                sql.push_str(" AND status = ?");
                args.push(Box::new(status.as_str().to_string()));
            }
            if let Some(agent_id) = &filter.agent_id {
                sql.push_str(" AND agent_id = ?");
                args.push(Box::new(agent_id.clone()));
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ?");
            args.push(Box::new(limit as i64));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_proposal,
            )?;
            rows.collect()
        })
    }

    /// Terminal transition, applied only while the proposal is still
    /// pending. Returns false when the proposal was already reviewed.
    pub fn set_status(
        &self,
        id: &str,
        status: ProposalStatus,
        rejection_reason: Option<&str>,
    ) -> Result<bool> {
        let now = to_ts(Utc::now());
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE mission_proposals
                 SET status = ?2, rejection_reason = ?3, reviewed_at = ?4
                 WHERE id = ?1 AND status = 'pending'",
                params![id, status.as_str(), rejection_reason, now],
            )
        })?;
        Ok(changed == 1)
    }

    /// Proposals created by `agent_id` since the start of the current UTC
    /// day. Feeds the per-agent daily ceiling.
    pub fn count_for_agent_today(&self, agent_id: &str) -> Result<u64> {
        let since = to_ts(utc_day_start(Utc::now()));
        self.0.with(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM mission_proposals
                 WHERE agent_id = ?1 AND created_at >= ?2",
                params![agent_id, since],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
    }
}

const SELECT: &str = "SELECT id, agent_id, title, description, proposed_steps, source, \
                      source_trace_id, status, rejection_reason, created_at, reviewed_at \
                      FROM mission_proposals";

fn row_to_proposal(row: &rusqlite::Row<'_>) -> rusqlite::Result<MissionProposal> {
    let steps: Vec<ProposedStep> =
        serde_json::from_str(&row.get::<_, String>(4)?).map_err(|e| super::col_err(4, e))?;
    let source: ProposalSource = row
        .get::<_, String>(5)?
        .parse()
        .map_err(|e| super::col_err(5, e))?;
    let status: ProposalStatus = row
        .get::<_, String>(7)?
        .parse()
        .map_err(|e| super::col_err(7, e))?;
    Ok(MissionProposal {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        proposed_steps: steps,
        source,
        source_trace_id: row.get(6)?,
        status,
        rejection_reason: row.get(8)?,
        created_at: parse_ts(&row.get::<_, String>(9)?)?,
        reviewed_at: parse_opt_ts(row.get(10)?)?,
    })
}
