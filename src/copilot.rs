//! Session facade: one healing loop shared by many conversations.

use crate::config::CopilotConfig;
use crate::conversation::{ConversationTurn, SessionRegistry};
use crate::error::{CopilotError, Result};
use crate::execution::StatementExecutor;
use crate::execution_loop::{HealingLoop, HealingOutcome, HealingReport};
use crate::llm::TextGenerator;
use crate::schema::SchemaProvider;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct Copilot {
    healing: HealingLoop,
    sessions: SessionRegistry,
    identifier_field: String,
    max_result_identifiers: usize,
}

impl Copilot {
    pub fn new(
        config: &CopilotConfig,
        generator: Arc<dyn TextGenerator>,
        executor: Arc<dyn StatementExecutor>,
        schema: Arc<dyn SchemaProvider>,
    ) -> Result<Self> {
        Ok(Self {
            healing: HealingLoop::new(config, generator, executor, schema)?,
            sessions: SessionRegistry::new(config.history_turns),
            identifier_field: config.identifier_field.clone(),
            max_result_identifiers: config.max_result_identifiers,
        })
    }

    /// Extend entity-mention detection with the schema catalogue.
    pub async fn refresh_vocabulary(&mut self) -> Result<usize> {
        self.healing.refresh_vocabulary().await
    }

    /// Answer `question` within a session. The session stays locked for the
    /// whole request so its turns are appended in order.
    pub async fn ask(
        &self,
        session_id: &str,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<HealingReport> {
        let session = self.sessions.session(session_id);
        let mut store = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CopilotError::Cancelled),
            store = session.lock() => store,
        };

        debug!("Session {} has {} turns", session_id, store.len());
        let report = self
            .healing
            .generate_and_heal(question, store.turns(), cancel)
            .await?;

        if report.outcome == HealingOutcome::Cancelled {
            return Ok(report);
        }

        store.append(self.turn_from_report(question, &report));
        info!(
            "Session {}: {:?} after {} attempts",
            session_id,
            report.outcome,
            report.attempts.len()
        );
        Ok(report)
    }

    fn turn_from_report(&self, question: &str, report: &HealingReport) -> ConversationTurn {
        let (statement, identifiers, count) = match (&report.outcome, &report.rows) {
            (HealingOutcome::Succeeded, Some(rows)) => (
                report.final_statement.clone(),
                rows.identifiers(&self.identifier_field, self.max_result_identifiers),
                rows.total_count,
            ),
            _ => (None, Vec::new(), 0),
        };
        ConversationTurn::new(
            question,
            statement,
            report.target_entity_type.clone(),
            identifiers,
            count,
        )
    }

    pub async fn history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.sessions.session(session_id).lock().await.turns().to_vec()
    }

    pub fn end_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}
