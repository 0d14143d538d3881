//! Statement Sanitizer
//!
//! Deterministic, network-free clean-up applied to every candidate before it
//! is executed. `sanitize` is idempotent: feeding its output back in returns
//! the same text, so corrected candidates can be re-sanitized safely.

use crate::config::CopilotConfig;
use crate::context_builder::GenerationContext;
use crate::error::Result;
use crate::reference_resolver::ContinuationKind;
use crate::statement::{ClauseKeyword, StatementClauses};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::debug;

lazy_static! {
    /// `SELECT *` and `SELECT FIELDS(ALL|STANDARD|CUSTOM)` at any nesting level.
    static ref UNRESTRICTED_SELECTION: Regex = Regex::new(
        r"(?i)\bSELECT\s+(?:\*|FIELDS\s*\(\s*(?:ALL|STANDARD|CUSTOM)\s*\))\s+FROM\b"
    )
    .unwrap();
    static ref IN_LIST: Regex = Regex::new(r"(?i)\bIN\s*\(([^()]*)\)").unwrap();
    /// Tokens outside string literals that may be placeholders.
    static ref BARE_TOKEN: Regex = Regex::new(
        r"<[A-Za-z_][A-Za-z0-9_ ]*>|\[[A-Za-z_][A-Za-z0-9_ ]*\]|\{\{?\s*[A-Za-z_][A-Za-z0-9_ ]*\}?\}|[A-Za-z0-9_]+"
    )
    .unwrap();
}

/// Identifiers and carried clauses the sanitizer may use.
#[derive(Debug, Clone, Default)]
pub struct SanitizeInputs<'a> {
    /// Previous turn's identifiers carried by a continuation, a traversal or
    /// a referential re-resolution.
    pub result_identifiers: &'a [String],
    /// Identifiers typed in the question.
    pub literal_identifiers: &'a [String],
    /// Previous turn's clauses for a field-addition follow-up.
    pub carried_clauses: Option<&'a StatementClauses>,
}

impl<'a> SanitizeInputs<'a> {
    /// A fresh question gets no identifiers from the previous turn, so its
    /// placeholders stay in place and fail visibly.
    pub fn from_context(context: &'a GenerationContext) -> Self {
        let carried_clauses = match context.continuation_kind {
            ContinuationKind::SameTopicAddFields => context.carried_clauses.as_ref(),
            _ => None,
        };
        Self {
            result_identifiers: &context.carried_identifiers,
            literal_identifiers: &context.literal_identifiers,
            carried_clauses,
        }
    }

    fn identifiers(&self) -> &'a [String] {
        if !self.result_identifiers.is_empty() {
            self.result_identifiers
        } else {
            self.literal_identifiers
        }
    }

    fn is_known_identifier(&self, token: &str) -> bool {
        self.result_identifiers
            .iter()
            .chain(self.literal_identifiers.iter())
            .any(|id| id == token)
    }
}

/// Compiled placeholder catalog.
#[derive(Debug, Clone)]
pub struct PlaceholderCatalog {
    patterns: Vec<Regex>,
    repeated_char_min_len: usize,
}

impl PlaceholderCatalog {
    pub fn new(patterns: &[String], repeated_char_min_len: usize) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Ok(Regex::new(&format!("^(?:{})$", p))?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            repeated_char_min_len: repeated_char_min_len.max(2),
        })
    }

    pub fn is_placeholder(&self, token: &str) -> bool {
        let token = token.trim();
        !token.is_empty()
            && !is_custom_name(token)
            && (self.patterns.iter().any(|re| re.is_match(token))
                || is_repeated_char_token(token, self.repeated_char_min_len))
    }
}

/// Custom field and relationship names (`Your_Region__c`, `Your_Owner__r`).
fn is_custom_name(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    lower.ends_with("__c") || lower.ends_with("__r")
}

/// `AAAAAAAAAAAAAAA`, `000000000000000`: one character repeated.
pub fn is_repeated_char_token(token: &str, min_len: usize) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            token.len() >= min_len && chars.all(|c| c == first)
        }
        _ => false,
    }
}

pub struct Sanitizer {
    fallback_selection: String,
    catalog: PlaceholderCatalog,
}

impl Sanitizer {
    pub fn new(fallback_fields: &[String], catalog: PlaceholderCatalog) -> Self {
        Self {
            fallback_selection: fallback_fields.join(", "),
            catalog,
        }
    }

    pub fn from_config(config: &CopilotConfig) -> Result<Self> {
        let catalog = PlaceholderCatalog::new(
            &config.patterns.placeholder_patterns,
            config.patterns.repeated_char_min_len,
        )?;
        Ok(Self::new(&config.fallback_fields, catalog))
    }

    pub fn sanitize(&self, statement: &str, inputs: &SanitizeInputs<'_>) -> String {
        let mut text = normalize(statement);
        text = self.restrict_selection(&text);
        text = self.substitute_placeholders(&text, inputs);
        if let Some(carried) = inputs.carried_clauses {
            text = carry_forward_clauses(&text, carried);
        }
        let text = normalize(&text);
        if text != statement {
            debug!("Sanitized statement: {}", text);
        }
        text
    }

    /// Rule 1: never request every field.
    pub fn restrict_selection(&self, statement: &str) -> String {
        UNRESTRICTED_SELECTION
            .replace_all(statement, format!("SELECT {} FROM", self.fallback_selection).as_str())
            .into_owned()
    }

    /// Rule 2: swap placeholder tokens for real identifiers. Left untouched
    /// when no identifier is known so execution fails visibly.
    pub fn substitute_placeholders(&self, statement: &str, inputs: &SanitizeInputs<'_>) -> String {
        let identifiers = inputs.identifiers();
        let Some(first) = identifiers.first() else {
            return statement.to_string();
        };

        // IN-lists made only of placeholders get the full identifier list
        let text = IN_LIST.replace_all(statement, |caps: &Captures| {
            let items: Vec<&str> = caps[1].split(',').map(|s| s.trim()).collect();
            let all_placeholders = !items.is_empty()
                && items.iter().all(|item| {
                    let bare = unquote(item);
                    self.catalog.is_placeholder(bare) && !inputs.is_known_identifier(bare)
                });
            if all_placeholders {
                let list = identifiers.iter().map(|id| quote(id)).join(", ");
                let head = &caps[0][..caps[0].find('(').unwrap_or(0)];
                format!("{}({})", head, list)
            } else {
                caps[0].to_string()
            }
        });

        let mut out = String::with_capacity(text.len());
        for segment in split_literals(&text) {
            match segment {
                Segment::Literal(content) => {
                    if self.catalog.is_placeholder(content) && !inputs.is_known_identifier(content) {
                        out.push_str(&quote(first));
                    } else {
                        out.push('\'');
                        out.push_str(content);
                        out.push('\'');
                    }
                }
                Segment::Code(code) => {
                    let replaced = BARE_TOKEN.replace_all(code, |caps: &Captures| {
                        let token = &caps[0];
                        if !is_short_number(token)
                            && self.catalog.is_placeholder(token)
                            && !inputs.is_known_identifier(token)
                        {
                            quote(first)
                        } else {
                            token.to_string()
                        }
                    });
                    out.push_str(&replaced);
                }
            }
        }
        out
    }
}

/// Rule 3: a field-addition follow-up keeps the previous filter and limit.
pub fn carry_forward_clauses(statement: &str, carried: &StatementClauses) -> String {
    let mut clauses = StatementClauses::parse(statement);
    let same_target = match (clauses.from_target(), carried.from_target()) {
        (Some(current), Some(previous)) => current.eq_ignore_ascii_case(previous),
        _ => false,
    };
    if !same_target {
        return statement.to_string();
    }
    if clauses.filter() == carried.filter() && clauses.limit() == carried.limit() {
        return statement.to_string();
    }

    clauses.set(ClauseKeyword::Where, carried.filter().map(|s| s.to_string()));
    clauses.set(ClauseKeyword::Limit, carried.limit().map(|s| s.to_string()));
    clauses.render()
}

/// Collapse whitespace outside string literals, drop trailing semicolons.
pub fn normalize(statement: &str) -> String {
    let mut out = String::with_capacity(statement.len());
    for segment in split_literals(statement) {
        match segment {
            Segment::Literal(content) => {
                out.push('\'');
                out.push_str(content);
                out.push('\'');
            }
            Segment::Code(code) => {
                let mut pending_space = false;
                for c in code.chars() {
                    if c.is_whitespace() {
                        pending_space = true;
                        continue;
                    }
                    if pending_space && !out.is_empty() && !out.ends_with(' ') {
                        out.push(' ');
                    }
                    pending_space = false;
                    out.push(c);
                }
                if pending_space && !out.is_empty() && !out.ends_with(' ') {
                    out.push(' ');
                }
            }
        }
    }

    let mut text = out.trim().to_string();
    while text.ends_with(';') {
        text.pop();
        text = text.trim_end().to_string();
    }
    text
}

enum Segment<'a> {
    Code(&'a str),
    /// Contents of a single-quoted literal, without the quotes.
    Literal(&'a str),
}

/// Split into code and single-quoted literals. An unterminated literal is
/// treated as code so nothing is lost.
fn split_literals(text: &str) -> Vec<Segment<'_>> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\'' {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        let mut closed = false;
        while j < bytes.len() {
            match bytes[j] {
                b'\\' => j += 2,
                b'\'' => {
                    closed = true;
                    break;
                }
                _ => j += 1,
            }
        }
        if !closed {
            break;
        }
        if code_start < i {
            segments.push(Segment::Code(&text[code_start..i]));
        }
        segments.push(Segment::Literal(&text[i + 1..j]));
        i = j + 1;
        code_start = i;
    }

    if code_start < text.len() {
        segments.push(Segment::Code(&text[code_start..]));
    }
    segments
}

/// Bare numbers shorter than an identifier are limits or offsets, never ids.
fn is_short_number(token: &str) -> bool {
    token.len() < 15 && token.chars().all(|c| c.is_ascii_digit())
}

fn unquote(item: &str) -> &str {
    item.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(item)
}

fn quote(id: &str) -> String {
    format!("'{}'", id)
}
