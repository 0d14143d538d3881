//! Healing Loop
//!
//! Bounded generate → sanitize → execute → classify cycle. Every collaborator
//! call races the caller's cancellation token and the optional request
//! deadline; attempts are strictly sequential.

use crate::config::CopilotConfig;
use crate::context_builder::{ContextBuilder, FailedAttempt};
use crate::conversation::ConversationTurn;
use crate::error::Result;
use crate::execution::{RowSet, StatementExecutor};
use crate::execution_loop::error_classifier::{ErrorClass, ErrorClassifier, ErrorKind};
use crate::execution_loop::error_recovery::ErrorRecovery;
use crate::generator::{CandidateStatement, StatementGenerator};
use crate::llm::TextGenerator;
use crate::reference_resolver::{
    extract_literal_identifiers, EntityVocabulary, MarkerPatterns, ReferenceResolution,
    ReferenceResolver,
};
use crate::sanitizer::{SanitizeInputs, Sanitizer};
use crate::schema::SchemaProvider;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealingOutcome {
    Succeeded,
    Fatal,
    Exhausted,
    Ambiguous,
    Impossible,
    Cancelled,
}

/// Result of executing one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub succeeded: bool,
    pub rows: Option<RowSet>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionOutcome {
    pub fn success(rows: RowSet) -> Self {
        Self {
            succeeded: true,
            rows: Some(rows),
            error_message: None,
            error_kind: None,
        }
    }

    pub fn failure(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            succeeded: false,
            rows: None,
            error_message: Some(message.into()),
            error_kind: Some(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealingAttempt {
    pub attempt_number: u32,
    pub statement: String,
    pub outcome: ExecutionOutcome,
}

/// What one request produced, with the full attempt trail.
#[derive(Debug, Clone, PartialEq)]
pub struct HealingReport {
    pub request_id: Uuid,
    pub outcome: HealingOutcome,
    pub final_statement: Option<String>,
    pub rows: Option<RowSet>,
    pub attempts: Vec<HealingAttempt>,
    pub clarification: Option<String>,
    /// Impossibility reason or the last error message.
    pub reason: Option<String>,
    pub target_entity_type: Option<String>,
}

impl HealingReport {
    fn new(
        request_id: Uuid,
        outcome: HealingOutcome,
        attempts: Vec<HealingAttempt>,
        target_entity_type: Option<String>,
    ) -> Self {
        Self {
            request_id,
            outcome,
            final_statement: None,
            rows: None,
            attempts,
            clarification: None,
            reason: None,
            target_entity_type,
        }
    }

    fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == HealingOutcome::Succeeded
    }
}

/// Why a guarded call did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

const NO_IDENTIFIERS_REASON: &str =
    "The statement needs record identifiers, but none are known in this conversation.";

pub struct HealingLoop {
    executor: Arc<dyn StatementExecutor>,
    schema: Arc<dyn SchemaProvider>,
    max_attempts: u32,
    request_timeout: Option<Duration>,
    entity_types: Vec<String>,
    resolver: ReferenceResolver,
    context_builder: ContextBuilder,
    generator: StatementGenerator,
    sanitizer: Sanitizer,
    classifier: ErrorClassifier,
    recovery: ErrorRecovery,
}

impl HealingLoop {
    pub fn new(
        config: &CopilotConfig,
        generator: Arc<dyn TextGenerator>,
        executor: Arc<dyn StatementExecutor>,
        schema: Arc<dyn SchemaProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let patterns = MarkerPatterns::from_tables(&config.patterns)?;

        Ok(Self {
            resolver: ReferenceResolver::new(
                patterns.clone(),
                EntityVocabulary::new(&config.entity_types)?,
            ),
            context_builder: ContextBuilder::new(Arc::clone(&schema), patterns, config),
            generator: StatementGenerator::new(generator, config),
            sanitizer: Sanitizer::from_config(config)?,
            classifier: ErrorClassifier::from_tables(&config.patterns)?,
            recovery: ErrorRecovery::default(),
            executor,
            schema,
            max_attempts: config.max_attempts,
            request_timeout: config.request_timeout(),
            entity_types: config.entity_types.clone(),
        })
    }

    /// Add the schema catalogue's entity types to the mention vocabulary.
    pub async fn refresh_vocabulary(&mut self) -> Result<usize> {
        let catalogue = self.schema.schema(None).await?;
        for object in catalogue {
            if !self.entity_types.iter().any(|t| t.eq_ignore_ascii_case(&object.name)) {
                self.entity_types.push(object.name);
            }
        }
        let patterns = self.resolver.patterns().clone();
        self.resolver = ReferenceResolver::new(patterns, EntityVocabulary::new(&self.entity_types)?);
        Ok(self.entity_types.len())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Turn `question` into an executed statement, repairing it from its own
    /// errors. Only a text-generation transport failure is returned as `Err`.
    pub async fn generate_and_heal(
        &self,
        question: &str,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<HealingReport> {
        let request_id = Uuid::new_v4();
        let span = info_span!("generate_and_heal", request_id = %request_id);
        self.heal(request_id, question, history, cancel)
            .instrument(span)
            .await
    }

    async fn heal(
        &self,
        request_id: Uuid,
        question: &str,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<HealingReport> {
        let deadline = self.request_timeout.map(|t| Instant::now() + t);
        let resolution = self.resolver.resolve(question, history);
        let target = self.context_builder.resolve_target(&resolution, history);
        info!(
            "Question resolved: continuation={:?}, target={:?}, {} literal ids",
            resolution.continuation_kind,
            target,
            resolution.literal_identifiers.len()
        );

        let previous_target = history.last().and_then(|t| t.target_entity_type.as_deref());
        let excerpt = match guarded(
            self.context_builder.schema_excerpt(target.as_deref(), previous_target),
            cancel,
            deadline,
        )
        .await
        {
            Ok(excerpt) => excerpt,
            Err(interrupt) => {
                return Ok(cancelled(request_id, interrupt, Vec::new(), target));
            }
        };

        let mut attempts: Vec<HealingAttempt> = Vec::new();
        let mut failures: Vec<FailedAttempt> = Vec::new();
        let mut correction_hints: Vec<String> = Vec::new();
        let mut reresolved: Option<Vec<String>> = None;
        let mut attempt_number: u32 = 1;

        loop {
            let mut context = self.context_builder.build(
                question,
                &resolution,
                history,
                target.clone(),
                excerpt.clone(),
            );
            context.error_history = failures.clone();
            context.correction_hints = correction_hints.clone();
            if let Some(ids) = &reresolved {
                context.carried_identifiers = ids.clone();
            }

            debug!("Generating attempt {}", attempt_number);
            let candidate = match guarded(self.generator.generate(&context), cancel, deadline).await {
                Ok(candidate) => candidate?,
                Err(interrupt) => return Ok(cancelled(request_id, interrupt, attempts, target)),
            };

            let raw_statement = match candidate {
                CandidateStatement::Ambiguous { clarification } => {
                    info!("Question is ambiguous: {}", clarification);
                    let mut report =
                        HealingReport::new(request_id, HealingOutcome::Ambiguous, attempts, target);
                    report.clarification = Some(clarification);
                    return Ok(report);
                }
                CandidateStatement::Impossible { reason } => {
                    info!("Question cannot be answered: {}", reason);
                    return Ok(
                        HealingReport::new(request_id, HealingOutcome::Impossible, attempts, target)
                            .with_reason(reason),
                    );
                }
                CandidateStatement::Statement(text) => text,
            };

            let statement = self
                .sanitizer
                .sanitize(&raw_statement, &SanitizeInputs::from_context(&context));
            if attempts.iter().any(|a| a.statement == statement) {
                warn!("Attempt {} repeats an earlier statement", attempt_number);
            }

            info!(
                "Executing attempt {} of {} on {}: {}",
                attempt_number,
                self.max_attempts,
                self.executor.name(),
                statement
            );
            let result = match guarded(self.executor.execute(&statement), cancel, deadline).await {
                Ok(result) => result,
                Err(interrupt) => return Ok(cancelled(request_id, interrupt, attempts, target)),
            };

            let error = match result {
                Ok(rows) => {
                    info!("Attempt {} succeeded with {} rows", attempt_number, rows.len());
                    attempts.push(HealingAttempt {
                        attempt_number,
                        statement: statement.clone(),
                        outcome: ExecutionOutcome::success(rows.clone()),
                    });
                    let mut report =
                        HealingReport::new(request_id, HealingOutcome::Succeeded, attempts, target);
                    report.final_statement = Some(statement);
                    report.rows = Some(rows);
                    return Ok(report);
                }
                Err(error) => error,
            };

            let class = self.classifier.classify(&error.message);
            warn!("Attempt {} failed ({}): {}", attempt_number, class, error.message);
            attempts.push(HealingAttempt {
                attempt_number,
                statement: statement.clone(),
                outcome: ExecutionOutcome::failure(error.message.clone(), class.kind()),
            });

            if class == ErrorClass::Fatal {
                return Ok(
                    HealingReport::new(request_id, HealingOutcome::Fatal, attempts, target)
                        .with_reason(error.message),
                );
            }

            if class == ErrorClass::Referential {
                let ids = reresolve_identifiers(&resolution, history);
                if ids.is_empty() {
                    info!("No identifiers anywhere in the conversation");
                    return Ok(
                        HealingReport::new(request_id, HealingOutcome::Impossible, attempts, target)
                            .with_reason(NO_IDENTIFIERS_REASON),
                    );
                }
                debug!("Re-resolved {} identifiers from history", ids.len());
                reresolved = Some(ids);
            }

            if attempt_number >= self.max_attempts {
                warn!("Giving up after {} attempts", attempt_number);
                return Ok(
                    HealingReport::new(request_id, HealingOutcome::Exhausted, attempts, target)
                        .with_reason(error.message),
                );
            }

            correction_hints = self.recovery.correction_hints(class, &error.message, &excerpt);
            failures.push(FailedAttempt {
                attempt_number,
                statement,
                error_message: error.message,
                error_class: class,
            });
            attempt_number += 1;
        }
    }
}

/// Identifiers for a referential retry: the most recent turn that returned
/// any, then ids typed in this question, then ids typed in earlier questions.
pub fn reresolve_identifiers(
    resolution: &ReferenceResolution,
    history: &[ConversationTurn],
) -> Vec<String> {
    if let Some(turn) = history.iter().rev().find(|t| !t.result_identifiers.is_empty()) {
        return turn.result_identifiers.clone();
    }
    if !resolution.literal_identifiers.is_empty() {
        return resolution.literal_identifiers.clone();
    }
    history
        .iter()
        .rev()
        .map(|t| extract_literal_identifiers(&t.question))
        .find(|ids| !ids.is_empty())
        .unwrap_or_default()
}

fn cancelled(
    request_id: Uuid,
    interrupt: Interrupt,
    attempts: Vec<HealingAttempt>,
    target: Option<String>,
) -> HealingReport {
    let reason = match interrupt {
        Interrupt::Cancelled => "Request cancelled",
        Interrupt::DeadlineExceeded => "Request deadline exceeded",
    };
    info!("{} after {} attempts", reason, attempts.len());
    HealingReport::new(request_id, HealingOutcome::Cancelled, attempts, target).with_reason(reason)
}

/// Run `fut` unless the token fires or the deadline passes first. A token
/// that is already cancelled always wins.
async fn guarded<F: Future>(
    fut: F,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> std::result::Result<F::Output, Interrupt> {
    let expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = expired => Err(Interrupt::DeadlineExceeded),
        output = fut => Ok(output),
    }
}
