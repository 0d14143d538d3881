//! Statement Generator
//!
//! Renders the prompt for one attempt, calls the text generator and parses
//! the reply into exactly one candidate outcome.

use crate::config::CopilotConfig;
use crate::context_builder::GenerationContext;
use crate::error::Result;
use crate::llm::TextGenerator;
use crate::reference_resolver::ContinuationKind;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"You write one SOQL statement that answers the user's question.

QUESTION:
{{question}}

SCHEMA:
{{schema}}

HINTS:
{{hints}}

RULES:
{{constraints}}

CONVERSATION:
{{history}}

PREVIOUS ERRORS:
{{errors}}

Reply with the statement only, without explanation or code fences.
If the question could mean several different things, reply with "AMBIGUOUS: " followed by one clarifying question.
If the question cannot be answered with the schema above, reply with "IMPOSSIBLE: " followed by the reason."#;

const GENERIC_IMPOSSIBILITY: &str = "The generator returned no statement.";

/// Parsed generator reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateStatement {
    Statement(String),
    Ambiguous { clarification: String },
    Impossible { reason: String },
}

impl CandidateStatement {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, CandidateStatement::Ambiguous { .. })
    }

    pub fn is_impossible(&self) -> bool {
        matches!(self, CandidateStatement::Impossible { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            CandidateStatement::Statement(text) => Some(text),
            _ => None,
        }
    }

    pub fn clarification_question(&self) -> Option<&str> {
        match self {
            CandidateStatement::Ambiguous { clarification } => Some(clarification),
            _ => None,
        }
    }

    pub fn impossibility_reason(&self) -> Option<&str> {
        match self {
            CandidateStatement::Impossible { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Trim whitespace and code fences, then look for a sentinel prefix.
pub fn parse_response(
    raw: &str,
    ambiguity_sentinel: &str,
    impossibility_sentinel: &str,
) -> CandidateStatement {
    let text = strip_code_fence(raw.trim());

    if text.is_empty() {
        return CandidateStatement::Impossible {
            reason: GENERIC_IMPOSSIBILITY.to_string(),
        };
    }
    if let Some(rest) = strip_prefix_ignore_case(text, ambiguity_sentinel) {
        return CandidateStatement::Ambiguous {
            clarification: rest.trim().to_string(),
        };
    }
    if let Some(rest) = strip_prefix_ignore_case(text, impossibility_sentinel) {
        let reason = rest.trim();
        return CandidateStatement::Impossible {
            reason: if reason.is_empty() {
                GENERIC_IMPOSSIBILITY.to_string()
            } else {
                reason.to_string()
            },
        };
    }
    CandidateStatement::Statement(text.to_string())
}

/// Keep only the first fenced block. Prose before the opening fence or
/// after the closing one is dropped.
fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let rest = &text[open + 3..];
    // Drop an optional language tag on the opening fence line
    let body = match rest.find('\n') {
        Some(newline) if !rest[..newline].trim().contains(' ') => &rest[newline + 1..],
        _ => rest,
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

pub struct StatementGenerator {
    generator: Arc<dyn TextGenerator>,
    template: String,
    ambiguity_sentinel: String,
    impossibility_sentinel: String,
}

impl StatementGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &CopilotConfig) -> Self {
        Self {
            generator,
            template: config
                .prompt_template
                .clone()
                .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string()),
            ambiguity_sentinel: config.patterns.ambiguity_sentinel.clone(),
            impossibility_sentinel: config.patterns.impossibility_sentinel.clone(),
        }
    }

    pub async fn generate(&self, context: &GenerationContext) -> Result<CandidateStatement> {
        let prompt = self.render_prompt(context);
        debug!("Prompt is {} chars", prompt.len());
        let raw = self.generator.complete(&prompt).await?;
        Ok(parse_response(
            &raw,
            &self.ambiguity_sentinel,
            &self.impossibility_sentinel,
        ))
    }

    pub fn render_prompt(&self, context: &GenerationContext) -> String {
        self.template
            .replace("{{question}}", &context.question)
            .replace("{{schema}}", context.schema_excerpt.render().trim_end())
            .replace("{{hints}}", &or_none(render_hints(context)))
            .replace("{{constraints}}", &or_none(render_list(&context.domain_constraints)))
            .replace("{{history}}", &or_none(render_history(context)))
            .replace("{{errors}}", &or_none(render_errors(context)))
    }
}

fn or_none(section: String) -> String {
    if section.trim().is_empty() {
        "(none)".to_string()
    } else {
        section
    }
}

fn render_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_hints(context: &GenerationContext) -> String {
    let mut hints = Vec::new();

    if let Some(target) = &context.target_entity_type {
        hints.push(format!("Query the {} entity type.", target));
    }

    match context.continuation_kind {
        ContinuationKind::SameTopicAddFields => {
            hints.push("The user wants more fields on the previous result set.".to_string());
            if let Some(clauses) = &context.carried_clauses {
                if let Some(filter) = clauses.filter() {
                    hints.push(format!("Keep the previous filter exactly: WHERE {}", filter));
                }
                if let Some(order) = clauses.order_by() {
                    hints.push(format!("Keep the previous sort: ORDER BY {}", order));
                }
                if let Some(limit) = clauses.limit() {
                    hints.push(format!("Keep the previous limit: LIMIT {}", limit));
                }
            }
        }
        ContinuationKind::SameTopicFilter => {
            hints.push("The user is narrowing the previous result set.".to_string());
            if let Some(statement) = context.previous_turn.as_ref().and_then(|t| t.statement.as_deref()) {
                hints.push(format!("Refine this statement: {}", statement));
            }
        }
        ContinuationKind::TopicSwitch => {
            hints.push("The user moved to a different entity type.".to_string());
        }
        ContinuationKind::None => {}
    }

    hints.extend(context.relationship_hints.iter().cloned());

    if !context.carried_identifiers.is_empty() {
        hints.push(format!(
            "Identifiers of the previous result set: {}",
            context.carried_identifiers.join(", ")
        ));
    }
    if !context.literal_identifiers.is_empty() {
        hints.push(format!(
            "Identifiers named in the question: {}",
            context.literal_identifiers.join(", ")
        ));
    }

    render_list(&hints)
}

fn render_history(context: &GenerationContext) -> String {
    let Some(turn) = &context.previous_turn else {
        return String::new();
    };
    let mut out = format!("Previous question: {}", turn.question);
    if let Some(statement) = &turn.statement {
        out.push_str(&format!("\nPrevious statement: {}", statement));
        out.push_str(&format!("\nIt returned {} records.", turn.result_count));
    }
    out
}

fn render_errors(context: &GenerationContext) -> String {
    if context.error_history.is_empty() {
        return String::new();
    }
    let mut parts: Vec<String> = context
        .error_history
        .iter()
        .map(|attempt| {
            format!(
                "Attempt {} ({} error):\n  Statement: {}\n  Error: {}",
                attempt.attempt_number, attempt.error_class, attempt.statement, attempt.error_message
            )
        })
        .collect();
    parts.extend(context.correction_hints.iter().cloned());
    parts.push("Your new statement must differ from every statement above.".to_string());
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_builder::{FailedAttempt, SchemaExcerpt};
    use crate::execution_loop::ErrorClass;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn parse(raw: &str) -> CandidateStatement {
        parse_response(raw, "AMBIGUOUS:", "IMPOSSIBLE:")
    }

    #[test]
    fn test_plain_statement() {
        assert_eq!(
            parse("  SELECT Id FROM Account \n"),
            CandidateStatement::Statement("SELECT Id FROM Account".to_string())
        );
    }

    #[test]
    fn test_code_fences_stripped() {
        assert_eq!(
            parse("```sql\nSELECT Id FROM Account\n```").text(),
            Some("SELECT Id FROM Account")
        );
        assert_eq!(
            parse("```\nSELECT Id FROM Lead\n```").text(),
            Some("SELECT Id FROM Lead")
        );
        assert_eq!(parse("```SELECT Id FROM Case```").text(), Some("SELECT Id FROM Case"));
    }

    #[test]
    fn test_prose_around_fenced_block_dropped() {
        assert_eq!(
            parse("```sql\nSELECT Id FROM Account\n```\nThis returns all accounts.").text(),
            Some("SELECT Id FROM Account")
        );
        assert_eq!(
            parse("Here is the query:\n```sql\nSELECT Id FROM Contact\n```").text(),
            Some("SELECT Id FROM Contact")
        );
        // unterminated fence keeps the body
        assert_eq!(parse("```sql\nSELECT Id FROM Lead").text(), Some("SELECT Id FROM Lead"));
    }

    #[test]
    fn test_sentinels() {
        let ambiguous = parse("AMBIGUOUS: Which owner do you mean?");
        assert!(ambiguous.is_ambiguous());
        assert_eq!(ambiguous.clarification_question(), Some("Which owner do you mean?"));

        let impossible = parse("```\nIMPOSSIBLE: there is no Invoice entity\n```");
        assert!(impossible.is_impossible());
        assert_eq!(impossible.impossibility_reason(), Some("there is no Invoice entity"));
        assert_eq!(impossible.text(), None);
    }

    #[test]
    fn test_empty_reply_is_impossible() {
        let candidate = parse("   \n ");
        assert!(candidate.is_impossible());
        assert_eq!(candidate.impossibility_reason(), Some(GENERIC_IMPOSSIBILITY));
    }

    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("SELECT Id, Name FROM Account".to_string())
        }
    }

    fn context() -> GenerationContext {
        GenerationContext {
            question: "list accounts".to_string(),
            target_entity_type: Some("Account".to_string()),
            schema_excerpt: SchemaExcerpt::default(),
            relationship_hints: Vec::new(),
            previous_turn: None,
            continuation_kind: ContinuationKind::None,
            literal_identifiers: vec!["0015g00000XyZab".to_string()],
            carried_clauses: None,
            carried_identifiers: Vec::new(),
            domain_constraints: vec!["Never select every field.".to_string()],
            error_history: Vec::new(),
            correction_hints: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_prompt_sections_rendered() {
        let recorder = Arc::new(RecordingGenerator {
            prompts: Mutex::new(Vec::new()),
        });
        let generator = StatementGenerator::new(recorder.clone(), &CopilotConfig::default());

        let mut ctx = context();
        ctx.error_history.push(FailedAttempt {
            attempt_number: 1,
            statement: "SELECT Phonee FROM Account".to_string(),
            error_message: "INVALID_FIELD: No such column 'Phonee'".to_string(),
            error_class: ErrorClass::Structural,
        });

        let candidate = generator.generate(&ctx).await.unwrap();
        assert_eq!(candidate.text(), Some("SELECT Id, Name FROM Account"));

        let prompts = recorder.prompts.lock().unwrap();
        let prompt = &prompts[0];
        assert!(prompt.contains("list accounts"));
        assert!(prompt.contains("- Never select every field."));
        assert!(prompt.contains("0015g00000XyZab"));
        assert!(prompt.contains("Attempt 1 (Structural error)"));
        assert!(prompt.contains("must differ from every statement above"));
        assert!(!prompt.contains("{{"));
    }
}
