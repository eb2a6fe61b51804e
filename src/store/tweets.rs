use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use super::{parse_ts, to_ts, Store};
use crate::error::Result;

/// Engagement snapshot for one outbound tweet. Written by the post-tweet
/// executor, consumed by the high-engagement trigger checker.
#[derive(Debug, Clone, Serialize)]
pub struct TweetPerformance {
    pub tweet_id: String,
    pub engagement_rate: f64,
    pub posted_at: DateTime<Utc>,
    pub reviewed: bool,
}

pub struct Tweets<'a>(pub(crate) &'a Store);

impl Tweets<'_> {
    pub fn record(&self, tweet_id: &str, engagement_rate: f64) -> Result<()> {
        let now = to_ts(Utc::now());
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO tweet_performance (tweet_id, engagement_rate, posted_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (tweet_id) DO UPDATE SET
                     engagement_rate = excluded.engagement_rate",
                params![tweet_id, engagement_rate, now],
            )
        })?;
        Ok(())
    }

    /// Unreviewed tweets at or above the engagement threshold, best first.
    pub fn unreviewed_above(&self, threshold: f64, limit: usize) -> Result<Vec<TweetPerformance>> {
        self.0.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tweet_id, engagement_rate, posted_at, reviewed
                 FROM tweet_performance
                 WHERE reviewed = 0 AND engagement_rate >= ?1
                 ORDER BY engagement_rate DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![threshold, limit as i64], row_to_tweet)?;
            rows.collect()
        })
    }

    pub fn mark_reviewed(&self, tweet_id: &str) -> Result<bool> {
        let changed = self.0.with(|conn| {
            conn.execute(
                "UPDATE tweet_performance SET reviewed = 1 WHERE tweet_id = ?1",
                params![tweet_id],
            )
        })?;
        Ok(changed == 1)
    }
}

fn row_to_tweet(row: &rusqlite::Row<'_>) -> rusqlite::Result<TweetPerformance> {
    Ok(TweetPerformance {
        tweet_id: row.get(0)?,
        engagement_rate: row.get(1)?,
        posted_at: parse_ts(&row.get::<_, String>(2)?)?,
        reviewed: row.get::<_, i64>(3)? != 0,
    })
}
