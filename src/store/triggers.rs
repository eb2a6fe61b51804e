use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{new_id, parse_json, parse_opt_ts, parse_ts, to_ts, Store};
use crate::error::{FleetError, Result};

/// Operator-authored rule evaluated by the trigger engine on every
/// heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: String,
    pub name: String,
    pub trigger_event: String,
    pub conditions: Value,
    pub action_config: Value,
    pub cooldown_minutes: u32,
    pub enabled: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub fire_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTriggerRule {
    pub name: String,
    pub trigger_event: String,
    #[serde(default)]
    pub conditions: Value,
    #[serde(default)]
    pub action_config: Value,
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_cooldown() -> u32 {
    60
}

fn default_enabled() -> bool {
    true
}

/// Partial update for a rule; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerRuleUpdate {
    pub name: Option<String>,
    pub conditions: Option<Value>,
    pub action_config: Option<Value>,
    pub cooldown_minutes: Option<u32>,
    pub enabled: Option<bool>,
}

pub struct Triggers<'a>(pub(crate) &'a Store);

impl Triggers<'_> {
    pub fn insert(&self, rule: NewTriggerRule) -> Result<TriggerRule> {
        let id = new_id();
        let now = to_ts(Utc::now());
        let conditions = normalize(rule.conditions);
        let action_config = normalize(rule.action_config);
        self.0.with(|conn| {
            conn.execute(
                "INSERT INTO trigger_rules
                     (id, name, trigger_event, conditions, action_config,
                      cooldown_minutes, enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    rule.name,
                    rule.trigger_event,
                    conditions,
                    action_config,
                    rule.cooldown_minutes,
                    rule.enabled as i64,
                    now
                ],
            )
        })?;
        self.get(&id)?
            .ok_or_else(|| FleetError::not_found(format!("trigger rule {}", id)))
    }

    pub fn get(&self, id: &str) -> Result<Option<TriggerRule>> {
        self.0.with(|conn| {
            conn.query_row(&format!("{} WHERE id = ?1", SELECT), params![id], row_to_rule)
                .optional()
        })
    }

    pub fn list(&self) -> Result<Vec<TriggerRule>> {
        self.0.with(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY created_at ASC", SELECT))?;
            let rows = stmt.query_map([], row_to_rule)?;
            rows.collect()
        })
    }

    pub fn list_enabled(&self) -> Result<Vec<TriggerRule>> {
        self.0.with(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} WHERE enabled = 1 ORDER BY created_at ASC", SELECT))?;
            let rows = stmt.query_map([], row_to_rule)?;
            rows.collect()
        })
    }

    pub fn update(&self, id: &str, update: TriggerRuleUpdate) -> Result<Option<TriggerRule>> {
        let Some(mut rule) = self.get(id)? else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            rule.name = name;
        }
        if let Some(conditions) = update.conditions {
            rule.conditions = conditions;
        }
        if let Some(action_config) = update.action_config {
            rule.action_config = action_config;
        }
        if let Some(cooldown) = update.cooldown_minutes {
            rule.cooldown_minutes = cooldown;
        }
        if let Some(enabled) = update.enabled {
            rule.enabled = enabled;
        }
        self.0.with(|conn| {
            conn.execute(
                "UPDATE trigger_rules
                 SET name = ?2, conditions = ?3, action_config = ?4,
                     cooldown_minutes = ?5, enabled = ?6
                 WHERE id = ?1",
                params![
                    id,
                    rule.name,
                    rule.conditions.to_string(),
                    rule.action_config.to_string(),
                    rule.cooldown_minutes,
                    rule.enabled as i64
                ],
            )
        })?;
        Ok(Some(rule))
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let changed = self
            .0
            .with(|conn| conn.execute("DELETE FROM trigger_rules WHERE id = ?1", params![id]))?;
        Ok(changed == 1)
    }

    /// Stamp a firing: bumps `fire_count` and moves the cooldown window.
    pub fn mark_fired(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.0.with(|conn| {
            conn.execute(
                "UPDATE trigger_rules
                 SET last_fired_at = ?2, fire_count = fire_count + 1
                 WHERE id = ?1",
                params![id, to_ts(at)],
            )
        })?;
        Ok(())
    }
}

fn normalize(value: Value) -> String {
    if value.is_null() {
        "{}".to_string()
    } else {
        value.to_string()
    }
}

const SELECT: &str = "SELECT id, name, trigger_event, conditions, action_config, \
                      cooldown_minutes, enabled, last_fired_at, fire_count, created_at \
                      FROM trigger_rules";

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<TriggerRule> {
    Ok(TriggerRule {
        id: row.get(0)?,
        name: row.get(1)?,
        trigger_event: row.get(2)?,
        conditions: parse_json(&row.get::<_, String>(3)?)?,
        action_config: parse_json(&row.get::<_, String>(4)?)?,
        cooldown_minutes: row.get::<_, i64>(5)? as u32,
        enabled: row.get::<_, i64>(6)? != 0,
        last_fired_at: parse_opt_ts(row.get(7)?)?,
        fire_count: row.get::<_, i64>(8)? as u64,
        created_at: parse_ts(&row.get::<_, String>(9)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(name: &str, event: &str) -> NewTriggerRule {
        NewTriggerRule {
            name: name.to_string(),
            trigger_event: event.to_string(),
            conditions: json!({"threshold": 2}),
            action_config: json!({"agent_id": "ava"}),
            cooldown_minutes: 30,
            enabled: true,
        }
    }

    #[test]
    fn test_insert_list_and_fire() {
        let store = Store::open_in_memory().unwrap();
        let created = store
            .triggers()
            .insert(rule("failures", "mission_failed"))
            .unwrap();
        assert_eq!(created.fire_count, 0);
        assert!(created.last_fired_at.is_none());

        let fired_at = Utc::now();
        store.triggers().mark_fired(&created.id, fired_at).unwrap();
        let read = store.triggers().get(&created.id).unwrap().unwrap();
        assert_eq!(read.fire_count, 1);
        assert_eq!(read.last_fired_at.unwrap(), fired_at);
    }

    #[test]
    fn test_list_enabled_excludes_disabled() {
        let store = Store::open_in_memory().unwrap();
        let a = store.triggers().insert(rule("a", "mission_failed")).unwrap();
        store
            .triggers()
            .insert(rule("b", "proactive_crawl"))
            .unwrap();

        store
            .triggers()
            .update(
                &a.id,
                TriggerRuleUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        let enabled = store.triggers().list_enabled().unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "b");
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let store = Store::open_in_memory().unwrap();
        let created = store.triggers().insert(rule("a", "mission_failed")).unwrap();

        let updated = store
            .triggers()
            .update(
                &created.id,
                TriggerRuleUpdate {
                    cooldown_minutes: Some(5),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.cooldown_minutes, 5);
        assert_eq!(updated.name, "a");
        assert_eq!(updated.conditions["threshold"], 2);
    }
}
