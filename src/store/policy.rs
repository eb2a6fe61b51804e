use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{to_ts, Store};
use crate::error::Result;

/// Operator-editable configuration record. Read by every cap gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub key: String,
    pub value: Value,
    pub description: Option<String>,
    pub version: u32,
}

pub struct Policies<'a>(pub(crate) &'a Store);

impl Policies<'_> {
    pub fn get(&self, key: &str) -> Result<Option<Policy>> {
        self.0.with(|conn| {
            conn.query_row(
                "SELECT key, value, description, version FROM policies WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Policy {
                        key: row.get(0)?,
                        value: super::parse_json(&row.get::<_, String>(1)?)?,
                        description: row.get(2)?,
                        version: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Deserialize a policy value into a typed shape, falling back to the
    /// provided default when the key is absent or malformed.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key)? {
            Some(policy) => Ok(serde_json::from_value(policy.value).unwrap_or(default)),
            None => Ok(default),
        }
    }

    /// Versioned upsert: inserting an existing key bumps its version.
    pub fn upsert(&self, key: &str, value: &Value, description: Option<&str>) -> Result<Policy> {
        let now = to_ts(Utc::now());
        let text = value.to_string();
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO policies (key, value, description, version, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT (key) DO UPDATE SET
                     value = excluded.value,
                     description = COALESCE(excluded.description, policies.description),
                     version = policies.version + 1,
                     updated_at = excluded.updated_at",
                params![key, text, description, now],
            )?;
            conn.query_row(
                "SELECT key, value, description, version FROM policies WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Policy {
                        key: row.get(0)?,
                        value: super::parse_json(&row.get::<_, String>(1)?)?,
                        description: row.get(2)?,
                        version: row.get(3)?,
                    })
                },
            )
        })
    }

    pub fn list(&self) -> Result<Vec<Policy>> {
        self.0.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, description, version FROM policies ORDER BY key",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(Policy {
                    key: row.get(0)?,
                    value: super::parse_json(&row.get::<_, String>(1)?)?,
                    description: row.get(2)?,
                    version: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::store::Store;
    use serde_json::json;

    #[test]
    fn test_upsert_bumps_version() {
        let store = Store::open_in_memory().unwrap();
        let p1 = store
            .policies()
            .upsert("auto_approve", &json!({"enabled": false}), None)
            .unwrap();
        assert_eq!(p1.version, 1);

        let p2 = store
            .policies()
            .upsert("auto_approve", &json!({"enabled": true}), Some("ops toggle"))
            .unwrap();
        assert_eq!(p2.version, 2);
        assert_eq!(p2.value["enabled"], true);
        assert_eq!(p2.description.as_deref(), Some("ops toggle"));
    }

    #[test]
    fn test_get_or_defaults_on_missing_key() {
        let store = Store::open_in_memory().unwrap();
        let limit: u32 = store.policies().get_or("missing", 8).unwrap();
        assert_eq!(limit, 8);
    }
}
