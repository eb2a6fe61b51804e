use std::fmt;

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use serde_json::Value;

/// Closed set of step kinds with statically registered gates and executors.
/// Unregistered kinds travel through `Other` and pass cap gates
/// unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepKind {
    Crawl,
    Research,
    Analyze,
    WriteContent,
    DraftTweet,
    PostTweet,
    Diagnose,
    Review,
    Other(String),
}

impl StepKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Crawl => "crawl",
            Self::Research => "research",
            Self::Analyze => "analyze",
            Self::WriteContent => "write_content",
            Self::DraftTweet => "draft_tweet",
            Self::PostTweet => "post_tweet",
            Self::Diagnose => "diagnose",
            Self::Review => "review",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn is_registered(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Validate a step payload at the boundary. Registered kinds have a
    /// known shape; `Other` payloads are accepted as-is.
    pub fn validate_payload(&self, payload: &Value) -> Result<(), String> {
        fn require_str(payload: &Value, field: &str, kind: &str) -> Result<(), String> {
            match payload.get(field) {
                Some(Value::String(s)) if !s.is_empty() => Ok(()),
                _ => Err(format!("{} step requires a non-empty '{}' field", kind, field)),
            }
        }

        match self {
            Self::Crawl => {
                if payload.get("url").is_some() || payload.get("topic").is_some() {
                    Ok(())
                } else {
                    Err("crawl step requires 'url' or 'topic'".to_string())
                }
            }
            Self::Research | Self::Analyze | Self::WriteContent | Self::DraftTweet => {
                require_str(payload, "topic", self.as_str())
            }
            Self::PostTweet => require_str(payload, "content", "post_tweet"),
            Self::Diagnose => {
                if payload.get("mission_id").is_some() || payload.get("failed_missions").is_some()
                {
                    Ok(())
                } else {
                    Err("diagnose step requires 'mission_id' or 'failed_missions'".to_string())
                }
            }
            Self::Review => require_str(payload, "content_id", "review"),
            Self::Other(_) => Ok(()),
        }
    }
}

impl From<&str> for StepKind {
    fn from(s: &str) -> Self {
        match s {
            "crawl" => Self::Crawl,
            "research" => Self::Research,
            "analyze" => Self::Analyze,
            "write_content" => Self::WriteContent,
            "draft_tweet" => Self::DraftTweet,
            "post_tweet" => Self::PostTweet,
            "diagnose" => Self::Diagnose,
            "review" => Self::Review,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for StepKind {
    fn from(s: String) -> Self {
        StepKind::from(s.as_str())
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for StepKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StepKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(StepKind::from(s))
    }
}
