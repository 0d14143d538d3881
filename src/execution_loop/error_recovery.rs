//! Error Recovery
//!
//! Builds per-class correction guidance for the next generation attempt.

use crate::context_builder::SchemaExcerpt;
use crate::execution_loop::error_classifier::ErrorClass;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNKNOWN_FIELD: Regex =
        Regex::new(r"(?i)no such column '([^']+)'").unwrap();
    static ref UNKNOWN_RELATIONSHIP: Regex =
        Regex::new(r"(?i)didn't understand relationship '([^']+)'").unwrap();
}

const MIN_SIMILARITY: f64 = 0.75;

/// Correction guidance builder
pub struct ErrorRecovery {
    max_suggestions: usize,
}

impl Default for ErrorRecovery {
    fn default() -> Self {
        Self { max_suggestions: 3 }
    }
}

impl ErrorRecovery {
    pub fn new(max_suggestions: usize) -> Self {
        Self { max_suggestions }
    }

    pub fn correction_hints(
        &self,
        class: ErrorClass,
        error_message: &str,
        excerpt: &SchemaExcerpt,
    ) -> Vec<String> {
        let mut hints = Vec::new();

        match class {
            ErrorClass::Structural => {
                if let Some(field) = unknown_field(error_message) {
                    hints.push(format!("The field '{}' does not exist.", field));
                    let suggestions = self.closest_fields(&field, excerpt);
                    if !suggestions.is_empty() {
                        hints.push(format!("Closest existing fields: {}", suggestions.join(", ")));
                    }
                } else if let Some(relationship) = unknown_relationship(error_message) {
                    hints.push(format!(
                        "The relationship '{}' does not exist; use only the relationships listed in the schema.",
                        relationship
                    ));
                } else {
                    hints.push(
                        "Fix the statement structure: check field names, nesting and grouping."
                            .to_string(),
                    );
                }
            }
            ErrorClass::Referential => {
                hints.push(
                    "An identifier was rejected. Use only the real identifiers listed in the hints."
                        .to_string(),
                );
            }
            ErrorClass::Unknown => {
                hints.push("Review the error above and try a simpler statement.".to_string());
            }
            // Fatal errors end the loop before another attempt is generated
            ErrorClass::Fatal => {}
        }

        hints
    }

    /// Schema fields most similar to `field`, best first.
    pub fn closest_fields(&self, field: &str, excerpt: &SchemaExcerpt) -> Vec<String> {
        let needle = field.rsplit('.').next().unwrap_or(field).to_lowercase();
        let mut scored: Vec<(f64, &str)> = excerpt
            .field_names()
            .into_iter()
            .map(|name| (strsim::jaro_winkler(&needle, &name.to_lowercase()), name))
            .filter(|(score, _)| *score >= MIN_SIMILARITY)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut names: Vec<String> = Vec::new();
        for (_, name) in scored {
            if names.len() >= self.max_suggestions {
                break;
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

fn unknown_field(message: &str) -> Option<String> {
    UNKNOWN_FIELD.captures(message).map(|c| c[1].to_string())
}

fn unknown_relationship(message: &str) -> Option<String> {
    UNKNOWN_RELATIONSHIP.captures(message).map(|c| c[1].to_string())
}
