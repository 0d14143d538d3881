//! Engine Configuration
//!
//! Tunables and pattern tables for the generation and healing pipeline.
//! Every heuristic (continuation markers, placeholder catalog, error taxonomy)
//! lives here as data so it can be extended without touching control flow.

use crate::error::{CopilotError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Hard cap on identifiers remembered per conversation turn.
pub const MAX_RESULT_IDENTIFIERS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CopilotConfig {
    /// Maximum number of executions per request.
    pub max_attempts: u32,

    /// Number of conversation turns kept per session (K).
    pub history_turns: usize,

    /// Identifiers kept from each successful result set.
    pub max_result_identifiers: usize,

    /// Record field holding the canonical identifier.
    pub identifier_field: String,

    /// Related entity types enriched in the schema excerpt.
    pub max_related_objects: usize,

    /// Fields listed per entity type in the schema excerpt.
    pub max_excerpt_fields: usize,

    /// Overall deadline for one request, in seconds.
    pub request_timeout_secs: Option<u64>,

    /// Selection used when a candidate asks for every field.
    pub fallback_fields: Vec<String>,

    /// Rules always passed to the generator.
    pub domain_constraints: Vec<String>,

    /// Known entity type names used for explicit-mention detection.
    pub entity_types: Vec<String>,

    /// Prompt template override (see `generator::DEFAULT_PROMPT_TEMPLATE`).
    pub prompt_template: Option<String>,

    pub patterns: PatternTables,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            history_turns: 10,
            max_result_identifiers: MAX_RESULT_IDENTIFIERS,
            identifier_field: "Id".to_string(),
            max_related_objects: 3,
            max_excerpt_fields: 60,
            request_timeout_secs: None,
            fallback_fields: strings(&["Id", "Name"]),
            domain_constraints: strings(&[
                "Never select every field; name the fields you need.",
                "Use only fields and relationships listed in the schema excerpt.",
                "Use real record identifiers from the conversation; never invent placeholder ids.",
                "Aggregate functions require GROUP BY for every non-aggregated field.",
            ]),
            entity_types: strings(&[
                "Account",
                "Contact",
                "Lead",
                "Opportunity",
                "Case",
                "Task",
                "Event",
                "User",
                "Campaign",
                "Contract",
                "Product2",
                "Order",
            ]),
            prompt_template: None,
            patterns: PatternTables::default(),
        }
    }
}

/// Pattern tables consumed by the resolver, sanitizer, generator and classifier.
///
/// Marker entries are plain phrases matched on word boundaries, case-insensitively.
/// Placeholder and error entries are regular expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternTables {
    pub continuation_markers: Vec<String>,
    pub filter_markers: Vec<String>,
    pub related_markers: Vec<String>,
    pub placeholder_patterns: Vec<String>,
    /// Minimum length for a single-character run (`AAAAAAA`) to count as a dummy token.
    pub repeated_char_min_len: usize,
    pub fatal_errors: Vec<String>,
    pub referential_errors: Vec<String>,
    pub structural_errors: Vec<String>,
    pub ambiguity_sentinel: String,
    pub impossibility_sentinel: String,
}

impl Default for PatternTables {
    fn default() -> Self {
        Self {
            continuation_markers: strings(&[
                "these", "those", "above", "them", "too", "also", "their", "same",
            ]),
            filter_markers: strings(&[
                "what about",
                "only",
                "where",
                "which",
                "whose",
                "with",
                "without",
                "excluding",
                "except",
                "filter",
                "narrow",
            ]),
            related_markers: strings(&[
                "related", "associated", "linked", "belonging", "their", "for these", "for those",
            ]),
            placeholder_patterns: strings(&[
                r"(?i)your_[a-z0-9]*(?:_[a-z0-9]+)*",
                r"(?i)(?:placeholder|dummy|sample|example|fake)_?(?:record_?)?id",
                r"(?i)id_?(?:here|placeholder|goes_here)",
                r"<[A-Za-z_][A-Za-z0-9_ ]*>",
                r"\[[A-Za-z_][A-Za-z0-9_ ]*\]",
                r"\{\{?\s*[A-Za-z_][A-Za-z0-9_ ]*\}?\}",
                r"[0-9A-Za-z]{0,3}[Xx]{5,}[0-9A-Za-z]{0,3}",
            ]),
            repeated_char_min_len: 5,
            fatal_errors: strings(&[
                r"INVALID_SESSION_ID",
                r"session expired or invalid",
                r"INVALID_AUTH_HEADER",
                r"INVALID_LOGIN",
                r"authentication fail",
                r"unauthori[sz]ed",
                r"INSUFFICIENT_ACCESS",
                r"insufficient privileges",
                r"permission denied",
                r"API_DISABLED_FOR_ORG",
                r"API_CURRENTLY_DISABLED",
                r"REQUEST_LIMIT_EXCEEDED",
                r"requested resource does not exist",
                r"ORG_LOCKED",
            ]),
            referential_errors: strings(&[
                r"INVALID_ID_FIELD",
                r"MALFORMED_ID",
                r"invalid id\b",
                r"invalid cross reference id",
                r"INVALID_CROSS_REFERENCE_KEY",
            ]),
            structural_errors: strings(&[
                r"INVALID_FIELD",
                r"no such column",
                r"didn't understand relationship",
                r"MALFORMED_QUERY",
                r"unexpected token",
                r"INVALID_TYPE",
                r"is not supported",
                r"INVALID_QUERY_FILTER_OPERATOR",
                r"compound field",
                r"semi[- ]?join",
                r"nested",
                r"aggregate",
                r"group by",
                r"unknown error parsing query",
                r"expecting",
            ]),
            ambiguity_sentinel: "AMBIGUOUS:".to_string(),
            impossibility_sentinel: "IMPOSSIBLE:".to_string(),
        }
    }
}

impl CopilotConfig {
    /// Load configuration from a JSON file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CopilotConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the environment.
    ///
    /// `COPILOT_CONFIG` points at an optional JSON file; the remaining
    /// `COPILOT_*` variables override individual values.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("COPILOT_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };

        if let Some(v) = env_parse::<u32>("COPILOT_MAX_ATTEMPTS")? {
            config.max_attempts = v;
        }
        if let Some(v) = env_parse::<usize>("COPILOT_HISTORY_TURNS")? {
            config.history_turns = v;
        }
        if let Some(v) = env_parse::<u64>("COPILOT_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = Some(v);
        }
        if let Ok(types) = std::env::var("COPILOT_ENTITY_TYPES") {
            let types: Vec<String> = types
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            if !types.is_empty() {
                config.entity_types = types;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CopilotError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.history_turns == 0 {
            return Err(CopilotError::Config("history_turns must be at least 1".to_string()));
        }
        if self.max_result_identifiers > MAX_RESULT_IDENTIFIERS {
            return Err(CopilotError::Config(format!(
                "max_result_identifiers must not exceed {}",
                MAX_RESULT_IDENTIFIERS
            )));
        }
        if self.fallback_fields.is_empty() {
            return Err(CopilotError::Config("fallback_fields must not be empty".to_string()));
        }
        if self.patterns.ambiguity_sentinel.trim().is_empty()
            || self.patterns.impossibility_sentinel.trim().is_empty()
        {
            return Err(CopilotError::Config("response sentinels must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CopilotError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
