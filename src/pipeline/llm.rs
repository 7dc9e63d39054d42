//! Transformation client: send one batch to the service, with retries.
//!
//! This module turns a sealed [`Batch`] into exactly one
//! [`TransformationResult`]. Prompt wording lives in [`crate::prompts`] and
//! the wait schedule in [`super::retry`], so the loop here only sequences
//! attempts and logs them.
//!
//! ## Retry Strategy
//!
//! Each failed attempt is classified by the service adapter. Fatal answers
//! return immediately; transient ones wait on a growing, capped backoff;
//! unclassified ones wait a short fixed pause. With the defaults (2 s
//! initial, doubling, 6 attempts) a batch that never succeeds waits
//! 2 s → 4 s → 8 s → 16 s → 32 s before being given up as unmodified.
//!
//! Attempts are strictly sequential. The service's rate limit is shared,
//! so firing more requests while one is backing off only lengthens the wait.

use crate::config::{RewriteConfig, ToneProfile, TransformMode};
use crate::pipeline::chunk::Batch;
use crate::pipeline::retry::{RetryDecision, RetryPolicy};
use crate::prompts::PromptParts;
use crate::service::TransformationService;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

/// One batch plus everything needed to phrase the instruction for it.
#[derive(Debug, Clone, Copy)]
pub struct TransformationRequest<'a> {
    pub mode: TransformMode,
    pub batch: &'a Batch,
    pub tone: &'a ToneProfile,
    pub temperature: f32,
    pub house_rules: Option<&'a str>,
    pub call_to_action: &'a str,
}

impl<'a> TransformationRequest<'a> {
    pub fn from_config(batch: &'a Batch, config: &'a RewriteConfig) -> Self {
        Self {
            mode: config.mode,
            batch,
            tone: &config.tone,
            temperature: config.effective_temperature(),
            house_rules: config.house_rules.as_deref(),
            call_to_action: &config.call_to_action,
        }
    }

    /// The user prompt sent for this request.
    pub fn prompt(&self) -> String {
        PromptParts {
            mode: self.mode,
            tone: self.tone,
            house_rules: self.house_rules,
            call_to_action: self.call_to_action,
        }
        .render(&self.batch.text, self.batch.segment_count())
    }
}

/// Outcome of [`TransformationClient::execute`], one per sealed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformationResult {
    Success {
        text: String,
        attempts: u32,
        input_tokens: usize,
        output_tokens: usize,
    },
    /// Every attempt failed with a retryable (or unclassified) error.
    TransientFailure { reason: String, attempts: u32 },
    /// The service gave a non-retryable answer.
    FatalFailure { reason: String, attempts: u32 },
}

impl TransformationResult {
    pub fn attempts(&self) -> u32 {
        match self {
            TransformationResult::Success { attempts, .. }
            | TransformationResult::TransientFailure { attempts, .. }
            | TransformationResult::FatalFailure { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransformationResult::Success { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, TransformationResult::FatalFailure { .. })
    }
}

/// Executes requests against a [`TransformationService`] under a [`RetryPolicy`].
#[derive(Clone)]
pub struct TransformationClient {
    service: Arc<dyn TransformationService>,
    policy: RetryPolicy,
}

impl TransformationClient {
    pub fn new(service: Arc<dyn TransformationService>, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one request to completion.
    ///
    /// Never returns early without a result and never makes more than
    /// `policy.max_attempts()` calls.
    pub async fn execute(&self, request: &TransformationRequest<'_>) -> TransformationResult {
        let prompt = request.prompt();
        let sequence = request.batch.sequence;
        let max = self.policy.max_attempts();
        let mut attempt = 0u32;
        let mut transient_retries = 0u32;

        loop {
            attempt += 1;
            match self.service.generate(&prompt, request.temperature).await {
                Ok(generation) => {
                    debug!(
                        "Batch {}: {} input tokens, {} output tokens, attempt {}",
                        sequence, generation.input_tokens, generation.output_tokens, attempt
                    );
                    return TransformationResult::Success {
                        text: generation.text,
                        attempts: attempt,
                        input_tokens: generation.input_tokens,
                        output_tokens: generation.output_tokens,
                    };
                }
                Err(err) => {
                    warn!(
                        "Batch {}: attempt {}/{} via {} failed: {}",
                        sequence,
                        attempt,
                        max,
                        self.service.name(),
                        err
                    );
                    match self.policy.decide(attempt, transient_retries, &err) {
                        RetryDecision::GiveUp if err.is_fatal() => {
                            return TransformationResult::FatalFailure {
                                reason: err.message().to_string(),
                                attempts: attempt,
                            };
                        }
                        RetryDecision::GiveUp => {
                            return TransformationResult::TransientFailure {
                                reason: err.message().to_string(),
                                attempts: attempt,
                            };
                        }
                        RetryDecision::RetryAfter(wait) => {
                            if matches!(err, crate::error::ServiceError::Transient(_)) {
                                transient_retries += 1;
                            }
                            warn!(
                                "Batch {}: retry {}/{} after {}ms",
                                sequence,
                                attempt,
                                max - 1,
                                wait.as_millis()
                            );
                            sleep(wait).await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Paragraph, StyleTag};
    use crate::error::ServiceError;
    use crate::pipeline::chunk::SealReason;
    use crate::service::Generation;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted answers; repeats the last one once the script runs out.
    struct Scripted {
        answers: Mutex<VecDeque<Result<Generation, ServiceError>>>,
        last: Result<Generation, ServiceError>,
        calls: AtomicU32,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<Generation, ServiceError>>) -> Arc<Self> {
            let last = answers
                .last()
                .cloned()
                .unwrap_or_else(|| Ok(Generation::new("")));
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                last,
                calls: AtomicU32::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransformationService for Scripted {
        async fn generate(&self, prompt: &str, _t: f32) -> Result<Generation, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            let next = self.answers.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.last.clone())
        }
    }

    fn fast_policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(max)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(4))
            .unknown_pause(Duration::from_millis(1))
    }

    fn batch() -> Batch {
        Batch {
            sequence: 7,
            members: vec![
                Paragraph::new(0, "First paragraph.", StyleTag::Normal),
                Paragraph::new(1, "Second paragraph.", StyleTag::Normal),
            ],
            text: "First paragraph.\n\nSecond paragraph.".into(),
            sealed_by: SealReason::EndOfInput,
        }
    }

    async fn run(service: Arc<Scripted>, max: u32) -> TransformationResult {
        let config = RewriteConfig::default();
        let batch = batch();
        let client = TransformationClient::new(service, fast_policy(max));
        client
            .execute(&TransformationRequest::from_config(&batch, &config))
            .await
    }

    #[tokio::test]
    async fn always_transient_stops_at_max_attempts() {
        let service = Scripted::new(vec![Err(ServiceError::Transient("429".into()))]);
        let result = run(service.clone(), 5).await;
        assert_eq!(
            result,
            TransformationResult::TransientFailure {
                reason: "429".into(),
                attempts: 5
            }
        );
        assert_eq!(service.calls(), 5);
    }

    #[tokio::test]
    async fn fatal_short_circuits_after_one_attempt() {
        let service = Scripted::new(vec![Err(ServiceError::Fatal("404 not found".into()))]);
        let result = run(service.clone(), 5).await;
        assert!(result.is_fatal());
        assert_eq!(result.attempts(), 1);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_errors() {
        let service = Scripted::new(vec![
            Err(ServiceError::Transient("503".into())),
            Err(ServiceError::Unknown("odd".into())),
            Ok(Generation::new("A.\n\nB.")),
        ]);
        match run(service.clone(), 6).await {
            TransformationResult::Success { text, attempts, .. } => {
                assert_eq!(text, "A.\n\nB.");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_errors_end_as_transient_failure() {
        let service = Scripted::new(vec![Err(ServiceError::Unknown("??".into()))]);
        let result = run(service.clone(), 3).await;
        assert!(matches!(
            result,
            TransformationResult::TransientFailure { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn fatal_after_transient_stops_immediately() {
        let service = Scripted::new(vec![
            Err(ServiceError::Transient("429".into())),
            Err(ServiceError::Fatal("400 bad request".into())),
            Ok(Generation::new("never")),
        ]);
        let result = run(service.clone(), 6).await;
        assert!(result.is_fatal());
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn prompt_carries_batch_text_unchanged() {
        let service = Scripted::new(vec![Ok(Generation::new("ok"))]);
        run(service.clone(), 1).await;
        let prompts = service.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("First paragraph.\n\nSecond paragraph."));
        assert!(prompts[0].contains("exactly 2 paragraph(s)"));
    }
}
