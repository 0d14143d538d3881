//! Reference Resolver
//!
//! Decides whether a question continues the previous turn or starts a new
//! topic, and pulls literal record identifiers out of the question text.
//! All detection is done by named predicates over configured pattern tables.

use crate::config::PatternTables;
use crate::conversation::ConversationTurn;
use crate::error::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// Canonical record identifiers are 15 or 18 alphanumeric characters.
    static ref LITERAL_IDENTIFIER: Regex =
        Regex::new(r"\b(?:[A-Za-z0-9]{18}|[A-Za-z0-9]{15})\b").unwrap();
    static ref CUSTOM_TYPE_TOKEN: Regex = Regex::new(r"\b[A-Za-z][A-Za-z0-9_]*__c\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContinuationKind {
    None,
    SameTopicAddFields,
    SameTopicFilter,
    TopicSwitch,
}

impl ContinuationKind {
    pub fn is_same_topic(&self) -> bool {
        matches!(
            self,
            ContinuationKind::SameTopicAddFields | ContinuationKind::SameTopicFilter
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceResolution {
    pub continuation_kind: ContinuationKind,
    /// Verbatim identifiers in order of first appearance.
    pub literal_identifiers: Vec<String>,
    /// Entity type explicitly named in the question, if any.
    pub mentioned_entity_type: Option<String>,
}

/// Phrase tables compiled into word-boundary, case-insensitive matchers.
#[derive(Debug, Clone)]
pub struct MarkerPatterns {
    continuation: Vec<Regex>,
    filter: Vec<Regex>,
    related: Vec<Regex>,
}

impl MarkerPatterns {
    pub fn from_tables(tables: &PatternTables) -> Result<Self> {
        Ok(Self {
            continuation: compile_phrases(&tables.continuation_markers)?,
            filter: compile_phrases(&tables.filter_markers)?,
            related: compile_phrases(&tables.related_markers)?,
        })
    }
}

fn compile_phrases(phrases: &[String]) -> Result<Vec<Regex>> {
    phrases
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| {
            let words: Vec<String> = p.split_whitespace().map(regex::escape).collect();
            Ok(Regex::new(&format!(r"(?i)\b{}\b", words.join(r"\s+")))?)
        })
        .collect()
}

/// Known entity type names, matched in singular or plural form.
#[derive(Debug, Clone)]
pub struct EntityVocabulary {
    entries: Vec<(String, Regex)>,
}

impl EntityVocabulary {
    pub fn new(names: &[String]) -> Result<Self> {
        let mut entries = Vec::with_capacity(names.len());
        for name in names.iter().filter(|n| !n.trim().is_empty()) {
            entries.push((name.clone(), Regex::new(&entity_pattern(name))?));
        }
        Ok(Self { entries })
    }

    /// The earliest-mentioned known entity type in `text`.
    pub fn first_mention(&self, text: &str) -> Option<&str> {
        self.entries
            .iter()
            .filter_map(|(name, re)| re.find(text).map(|m| (m.start(), name.as_str())))
            .min_by_key(|(start, _)| *start)
            .map(|(_, name)| name)
    }
}

fn entity_pattern(name: &str) -> String {
    let mut forms = vec![regex::escape(name), format!("{}s", regex::escape(name))];
    let lower = name.to_lowercase();
    if lower.ends_with('y') && name.len() > 1 {
        forms.push(format!("{}ies", regex::escape(&name[..name.len() - 1])));
    }
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") {
        forms.push(format!("{}es", regex::escape(name)));
    }
    // Custom types are also referred to without their suffix ("invoices" for Invoice__c)
    if let Some(stem) = name.strip_suffix("__c") {
        let words = stem.replace('_', " ");
        forms.push(format!(r"{}s?", regex::escape(&words).replace(' ', r"\s+")));
    }
    format!(r"(?i)\b(?:{})\b", forms.join("|"))
}

pub fn has_backward_reference(question: &str, patterns: &MarkerPatterns) -> bool {
    patterns.continuation.iter().any(|re| re.is_match(question))
}

pub fn has_filter_intent(question: &str, patterns: &MarkerPatterns) -> bool {
    patterns.filter.iter().any(|re| re.is_match(question))
}

pub fn mentions_related_entities(question: &str, patterns: &MarkerPatterns) -> bool {
    patterns.related.iter().any(|re| re.is_match(question))
}

/// All 15/18-character alphanumeric tokens, case preserved, first occurrence wins.
pub fn extract_literal_identifiers(question: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in LITERAL_IDENTIFIER.find_iter(question) {
        if !found.iter().any(|f| f == m.as_str()) {
            found.push(m.as_str().to_string());
        }
    }
    found
}

/// First custom-type token (`Something__c`) in the question.
pub fn custom_type_token(question: &str) -> Option<&str> {
    CUSTOM_TYPE_TOKEN.find(question).map(|m| m.as_str())
}

pub struct ReferenceResolver {
    patterns: MarkerPatterns,
    vocabulary: EntityVocabulary,
}

impl ReferenceResolver {
    pub fn new(patterns: MarkerPatterns, vocabulary: EntityVocabulary) -> Self {
        Self {
            patterns,
            vocabulary,
        }
    }

    pub fn patterns(&self) -> &MarkerPatterns {
        &self.patterns
    }

    pub fn resolve(&self, question: &str, history: &[ConversationTurn]) -> ReferenceResolution {
        let literal_identifiers = extract_literal_identifiers(question);
        // A `__c` token names a custom type even when it is not in the vocabulary
        let mentioned_entity_type = self
            .vocabulary
            .first_mention(question)
            .or_else(|| custom_type_token(question))
            .map(|s| s.to_string());

        let continuation_kind = match history.last() {
            None => ContinuationKind::None,
            Some(previous) => {
                let switches_topic = match (&mentioned_entity_type, &previous.target_entity_type) {
                    (Some(mentioned), Some(prev)) => !mentioned.eq_ignore_ascii_case(prev),
                    (Some(_), None) => true,
                    _ => false,
                };

                if switches_topic {
                    ContinuationKind::TopicSwitch
                } else if has_backward_reference(question, &self.patterns) {
                    if has_filter_intent(question, &self.patterns) {
                        ContinuationKind::SameTopicFilter
                    } else {
                        ContinuationKind::SameTopicAddFields
                    }
                } else {
                    ContinuationKind::None
                }
            }
        };

        ReferenceResolution {
            continuation_kind,
            literal_identifiers,
            mentioned_entity_type,
        }
    }
}
