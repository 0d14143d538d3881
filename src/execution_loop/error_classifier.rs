//! Error Classifier
//!
//! Classifies remote execution errors into a taxonomy for recovery.

use crate::config::PatternTables;
use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the healing loop treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Fatal,
    Recoverable,
    Unknown,
}

/// Execution error classification taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Session, permission or service-level failure; the statement is not at fault.
    Fatal,
    /// Bad field, relationship, aggregate or syntax.
    Structural,
    /// An identifier in the statement was rejected.
    Referential,
    Unknown,
}

impl ErrorClass {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorClass::Fatal => ErrorKind::Fatal,
            ErrorClass::Structural | ErrorClass::Referential => ErrorKind::Recoverable,
            ErrorClass::Unknown => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Fatal => write!(f, "Fatal"),
            ErrorClass::Structural => write!(f, "Structural"),
            ErrorClass::Referential => write!(f, "Referential"),
            ErrorClass::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Error classifier
pub struct ErrorClassifier {
    fatal: Vec<Regex>,
    referential: Vec<Regex>,
    structural: Vec<Regex>,
}

impl ErrorClassifier {
    pub fn from_tables(tables: &PatternTables) -> Result<Self> {
        Ok(Self {
            fatal: compile(&tables.fatal_errors)?,
            referential: compile(&tables.referential_errors)?,
            structural: compile(&tables.structural_errors)?,
        })
    }

    /// Classify an error message. Fatal patterns are checked first, then
    /// referential (more specific than structural), then structural.
    pub fn classify(&self, message: &str) -> ErrorClass {
        if matches_any(&self.fatal, message) {
            return ErrorClass::Fatal;
        }
        if matches_any(&self.referential, message) {
            return ErrorClass::Referential;
        }
        if matches_any(&self.structural, message) {
            return ErrorClass::Structural;
        }
        ErrorClass::Unknown
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        // The default tables are static and known to compile
        Self::from_tables(&PatternTables::default()).unwrap_or(Self {
            fatal: Vec::new(),
            referential: Vec::new(),
            structural: Vec::new(),
        })
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Ok(Regex::new(&format!("(?i){}", p))?))
        .collect()
}

fn matches_any(patterns: &[Regex], message: &str) -> bool {
    patterns.iter().any(|re| re.is_match(message))
}
