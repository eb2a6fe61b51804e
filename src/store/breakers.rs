use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{parse_ts, to_ts, Store};
use crate::error::Result;

/// Persisted circuit breaker position for one external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::str::FromStr for BreakerState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            other => Err(format!("Invalid breaker state: {}", other)),
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerRow {
    pub service: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub half_open_successes: u32,
    pub updated_at: DateTime<Utc>,
}

pub struct Breakers<'a>(pub(crate) &'a Store);

impl Breakers<'_> {
    /// Current row for a service. An unknown service reads as a fresh
    /// closed breaker stamped `now`; nothing is written until the first
    /// recorded outcome.
    pub fn get_or_default(&self, service: &str) -> Result<BreakerRow> {
        let existing = self.0.with(|conn| {
            conn.query_row(
                "SELECT service, state, failure_count, half_open_successes, updated_at
                 FROM circuit_breakers WHERE service = ?1",
                params![service],
                row_to_breaker,
            )
            .optional()
        })?;
        Ok(existing.unwrap_or_else(|| BreakerRow {
            service: service.to_string(),
            state: BreakerState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            updated_at: Utc::now(),
        }))
    }

    pub fn put(&self, row: &BreakerRow) -> Result<()> {
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO circuit_breakers (service, state, failure_count, half_open_successes, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (service) DO UPDATE SET
                     state = excluded.state,
                     failure_count = excluded.failure_count,
                     half_open_successes = excluded.half_open_successes,
                     updated_at = excluded.updated_at",
                params![
                    row.service,
                    row.state.as_str(),
                    row.failure_count,
                    row.half_open_successes,
                    to_ts(row.updated_at)
                ],
            )
        })?;
        Ok(())
    }

    /// Operator reset: force the breaker closed and clear its counters.
    pub fn reset(&self, service: &str) -> Result<BreakerRow> {
        let row = BreakerRow {
            service: service.to_string(),
            state: BreakerState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            updated_at: Utc::now(),
        };
        self.put(&row)?;
        Ok(row)
    }

    pub fn all(&self) -> Result<Vec<BreakerRow>> {
        self.0.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT service, state, failure_count, half_open_successes, updated_at
                 FROM circuit_breakers ORDER BY service",
            )?;
            let rows = stmt.query_map([], row_to_breaker)?;
            rows.collect()
        })
    }
}

fn row_to_breaker(row: &rusqlite::Row<'_>) -> rusqlite::Result<BreakerRow> {
    Ok(BreakerRow {
        service: row.get(0)?,
        state: row
            .get::<_, String>(1)?
            .parse()
            .map_err(|e| super::col_err(1, e))?,
        failure_count: row.get::<_, i64>(2)? as u32,
        half_open_successes: row.get::<_, i64>(3)? as u32,
        updated_at: parse_ts(&row.get::<_, String>(4)?)?,
    })
}
