use crate::error::{FleetError, Result};

/// Conversation format parameters. Turn counts are drawn uniformly from
/// the min/max range; only some formats may emit action items.
#[derive(Debug, Clone, Copy)]
pub struct Format {
    pub name: &'static str,
    pub min_turns: u32,
    pub max_turns: u32,
    pub min_participants: usize,
    pub max_participants: usize,
    pub temperature: f64,
    pub allows_action_items: bool,
}

pub const FORMATS: &[Format] = &[
    Format {
        name: "standup",
        min_turns: 4,
        max_turns: 8,
        min_participants: 2,
        max_participants: 5,
        temperature: 0.6,
        allows_action_items: true,
    },
    Format {
        name: "debate",
        min_turns: 6,
        max_turns: 12,
        min_participants: 2,
        max_participants: 4,
        temperature: 0.8,
        allows_action_items: false,
    },
    Format {
        name: "brainstorm",
        min_turns: 6,
        max_turns: 10,
        min_participants: 3,
        max_participants: 5,
        temperature: 0.9,
        allows_action_items: true,
    },
    Format {
        name: "watercooler",
        min_turns: 3,
        max_turns: 6,
        min_participants: 2,
        max_participants: 4,
        temperature: 0.9,
        allows_action_items: false,
    },
    Format {
        name: "planning",
        min_turns: 5,
        max_turns: 10,
        min_participants: 2,
        max_participants: 5,
        temperature: 0.6,
        allows_action_items: true,
    },
    Format {
        name: "retrospective",
        min_turns: 5,
        max_turns: 9,
        min_participants: 2,
        max_participants: 5,
        temperature: 0.7,
        allows_action_items: false,
    },
];

pub fn lookup(name: &str) -> Result<&'static Format> {
    FORMATS
        .iter()
        .find(|f| f.name == name)
        .ok_or_else(|| FleetError::validation(format!("unknown conversation format '{}'", name)))
}

/// Validate participant bounds for a format.
pub fn validate_participants(format: &Format, participants: &[String]) -> Result<()> {
    let mut unique: Vec<&String> = participants.iter().collect();
    unique.sort();
    unique.dedup();
    if unique.len() != participants.len() {
        return Err(FleetError::validation("participants must be distinct"));
    }
    if participants.len() < format.min_participants
        || participants.len() > format.max_participants
    {
        return Err(FleetError::validation(format!(
            "{} takes {}..={} participants, got {}",
            format.name,
            format.min_participants,
            format.max_participants,
            participants.len()
        )));
    }
    Ok(())
}
