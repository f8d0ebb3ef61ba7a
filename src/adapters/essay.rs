//! Reflective essay writing: draft, peer review, revision.

use async_trait::async_trait;
use tracing::debug;

use crate::{
    config::RefinementConfig,
    controller::{Evaluator, Executor, Producer},
    error::Result,
    llm::{LlmClient, LlmConfig, Message},
    models::{Execution, IterationRecord},
};

use super::CallSite;

/// Essay call site backed by three clients, one per role.
///
/// Execution is an identity step: an essay always "runs", and the artifact is
/// just its word count.
#[derive(Debug, Clone)]
pub struct EssayWriter {
    drafter: LlmClient,
    reviewer: LlmClient,
    reviser: LlmClient,
    config: RefinementConfig,
}

impl EssayWriter {
    pub fn new(drafter: LlmClient, reviewer: LlmClient, reviser: LlmClient) -> Self {
        Self {
            drafter,
            reviewer,
            reviser,
            config: RefinementConfig::essay(),
        }
    }

    /// One client for every role.
    pub fn with_client(client: LlmClient) -> Self {
        Self::new(client.clone(), client.clone(), client)
    }

    /// A small drafting model, a stronger reviewer, and a cooler reviser.
    pub fn from_env() -> Result<Self> {
        let drafter = LlmClient::from_config(
            LlmConfig::from_env("openai:gpt-4o-mini")?.with_temperature(1.0),
        )?;
        let reviewer =
            LlmClient::from_config(LlmConfig::from_env("openai:gpt-4o")?.with_temperature(1.0))?;
        let reviser =
            LlmClient::from_config(LlmConfig::from_env("openai:gpt-4o")?.with_temperature(0.7))?;
        Ok(Self::new(drafter, reviewer, reviser))
    }

    pub fn with_config(mut self, config: RefinementConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl Producer for EssayWriter {
    async fn produce(
        &self,
        task: &str,
        prior_candidate: Option<&str>,
        feedback: Option<&str>,
    ) -> Result<String> {
        match prior_candidate {
            None => {
                self.drafter
                    .complete(&[Message::user(draft_prompt(task))])
                    .await
            }
            Some(draft) => {
                self.reviser
                    .complete(&[Message::user(revision_prompt(
                        draft,
                        feedback.unwrap_or_default(),
                    ))])
                    .await
            }
        }
    }
}

#[async_trait]
impl Executor for EssayWriter {
    async fn execute(&self, candidate: &str) -> Execution {
        let words = word_count(candidate);
        debug!(words, "Essay draft measured");
        if words == 0 {
            return Execution::failure("draft is empty");
        }
        Execution::success(format!("{words} words"))
    }
}

#[async_trait]
impl Evaluator for EssayWriter {
    async fn evaluate(&self, _task: &str, latest: &IterationRecord) -> Result<String> {
        self.reviewer
            .complete(&[Message::user(review_prompt(&latest.candidate))])
            .await
    }
}

impl CallSite for EssayWriter {
    fn name(&self) -> &str {
        "essay"
    }

    fn config(&self) -> RefinementConfig {
        self.config.clone()
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn draft_prompt(topic: &str) -> String {
    format!(
        "Write a well-structured essay on the topic below.\n\n\
         TOPIC: {topic}\n\n\
         Requirements:\n\
         - Introduction with a clear thesis, body paragraphs, and a conclusion.\n\
         - Support claims with reasoning and examples.\n\
         - Academic tone, roughly 500-800 words, with smooth transitions.\n\n\
         Output only the essay text."
    )
}

fn review_prompt(draft: &str) -> String {
    format!(
        "You are a careful peer reviewer. Critique the essay below without rewriting it.\n\n\
         ESSAY\n------\n{draft}\n------\n\n\
         Cover, under these headers:\n\
         1) Verdict (one sentence)\n\
         2) Strengths\n\
         3) Structure\n\
         4) Clarity\n\
         5) Argument quality (thesis, evidence, counterarguments)\n\
         6) Style and tone\n\
         7) Top fixes, prioritized: problem, why it matters, concrete fix\n\
         8) Rubric, 1-5 each: structure, clarity, argument, style, overall\n\n\
         Keep example rewrites to a sentence or two. Flag unsupported claims."
    )
}

fn revision_prompt(draft: &str, feedback: &str) -> String {
    format!(
        "Revise the essay using the reviewer feedback. Keep its core ideas and facts.\n\n\
         ORIGINAL DRAFT\n--------------\n{draft}\n\n\
         FEEDBACK\n--------\n{feedback}\n\n\
         Address each point raised, tighten transitions and weak evidence, and do not \
         invent citations. Output only the revised essay."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::run_site;
    use crate::llm::MockRequest;
    use crate::models::StopReason;

    fn writer() -> EssayWriter {
        let drafter = LlmClient::mock(|req: MockRequest| {
            assert!(req.last_text().contains("TOPIC: tidal power"));
            Ok("Tidal power is predictable.".to_string())
        });
        let reviewer = LlmClient::mock(|req: MockRequest| {
            assert!(req.last_text().contains("Tidal power is predictable."));
            Ok("Verdict: too short. Add evidence.".to_string())
        });
        let reviser = LlmClient::mock(|req: MockRequest| {
            assert!(req.last_text().contains("Add evidence."));
            Ok("Tidal power is predictable, as tide tables show decades ahead.".to_string())
        });
        EssayWriter::new(drafter, reviewer, reviser)
    }

    #[tokio::test]
    async fn draft_then_revision() {
        let result = run_site(&writer(), "tidal power").await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.stop_reason, StopReason::MaxIterationsReached);
        assert_eq!(result.best_index, 1);
        assert!(result.final_candidate().contains("tide tables"));
        assert_eq!(result.history[1].feedback.as_deref(), Some("Verdict: too short. Add evidence."));
        assert_eq!(result.history[0].artifact_ref.as_deref(), Some("4 words"));
    }

    #[tokio::test]
    async fn blank_draft_fails_execution() {
        let execution = writer().execute("   ").await;
        assert!(!execution.succeeded);
    }
}
