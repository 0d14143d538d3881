//! Statement Clauses
//!
//! Splits a statement into its top-level clauses (ignoring string literals and
//! parenthesised subqueries) so filter/sort/limit clauses can be carried from
//! one turn to the next and grafted onto a new candidate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClauseKeyword {
    Select,
    From,
    Where,
    With,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Offset,
    For,
}

impl ClauseKeyword {
    const ALL: [ClauseKeyword; 10] = [
        ClauseKeyword::Select,
        ClauseKeyword::From,
        ClauseKeyword::Where,
        ClauseKeyword::With,
        ClauseKeyword::GroupBy,
        ClauseKeyword::Having,
        ClauseKeyword::OrderBy,
        ClauseKeyword::Limit,
        ClauseKeyword::Offset,
        ClauseKeyword::For,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClauseKeyword::Select => "SELECT",
            ClauseKeyword::From => "FROM",
            ClauseKeyword::Where => "WHERE",
            ClauseKeyword::With => "WITH",
            ClauseKeyword::GroupBy => "GROUP BY",
            ClauseKeyword::Having => "HAVING",
            ClauseKeyword::OrderBy => "ORDER BY",
            ClauseKeyword::Limit => "LIMIT",
            ClauseKeyword::Offset => "OFFSET",
            ClauseKeyword::For => "FOR",
        }
    }

    fn words(&self) -> &'static [&'static str] {
        match self {
            ClauseKeyword::Select => &["SELECT"],
            ClauseKeyword::From => &["FROM"],
            ClauseKeyword::Where => &["WHERE"],
            ClauseKeyword::With => &["WITH"],
            ClauseKeyword::GroupBy => &["GROUP", "BY"],
            ClauseKeyword::Having => &["HAVING"],
            ClauseKeyword::OrderBy => &["ORDER", "BY"],
            ClauseKeyword::Limit => &["LIMIT"],
            ClauseKeyword::Offset => &["OFFSET"],
            ClauseKeyword::For => &["FOR"],
        }
    }
}

/// Top-level clauses of one statement, kept in canonical clause order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementClauses {
    segments: Vec<(ClauseKeyword, String)>,
}

impl StatementClauses {
    pub fn parse(statement: &str) -> Self {
        let bytes = statement.as_bytes();
        let mut marks: Vec<(ClauseKeyword, usize, usize)> = Vec::new();
        let mut depth: i32 = 0;
        let mut in_quote = false;
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];
            if in_quote {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == b'\'' {
                    in_quote = false;
                }
                i += 1;
                continue;
            }
            match b {
                b'\'' => in_quote = true,
                b'(' => depth += 1,
                b')' => depth = (depth - 1).max(0),
                _ if depth == 0 && is_word_start(bytes, i) => {
                    if let Some((keyword, end)) = match_keyword(bytes, i) {
                        marks.push((keyword, i, end));
                        i = end;
                        continue;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        let mut segments = Vec::with_capacity(marks.len());
        for (idx, (keyword, _, body_start)) in marks.iter().enumerate() {
            let body_end = marks.get(idx + 1).map(|m| m.1).unwrap_or(statement.len());
            let body = statement[*body_start..body_end].trim().to_string();
            segments.push((*keyword, body));
        }
        segments.sort_by_key(|(keyword, _)| *keyword);

        Self { segments }
    }

    pub fn get(&self, keyword: ClauseKeyword) -> Option<&str> {
        self.segments
            .iter()
            .find(|(k, _)| *k == keyword)
            .map(|(_, body)| body.as_str())
    }

    /// Replace (or remove, with `None`) a clause body.
    pub fn set(&mut self, keyword: ClauseKeyword, body: Option<String>) {
        self.segments.retain(|(k, _)| *k != keyword);
        if let Some(body) = body {
            self.segments.push((keyword, body));
            self.segments.sort_by_key(|(k, _)| *k);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn select_list(&self) -> Option<&str> {
        self.get(ClauseKeyword::Select)
    }

    pub fn filter(&self) -> Option<&str> {
        self.get(ClauseKeyword::Where)
    }

    pub fn order_by(&self) -> Option<&str> {
        self.get(ClauseKeyword::OrderBy)
    }

    pub fn limit(&self) -> Option<&str> {
        self.get(ClauseKeyword::Limit)
    }

    /// The entity type named in the FROM clause.
    pub fn from_target(&self) -> Option<&str> {
        self.get(ClauseKeyword::From)
            .and_then(|body| body.split_whitespace().next())
            .map(|name| name.trim_end_matches(','))
    }

    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(|(keyword, body)| {
                if body.is_empty() {
                    keyword.as_str().to_string()
                } else {
                    format!("{} {}", keyword.as_str(), body)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_word_start(bytes: &[u8], i: usize) -> bool {
    is_word_byte(bytes[i]) && (i == 0 || !is_word_byte(bytes[i - 1]))
}

/// Match a clause keyword starting at `start`; returns the byte offset after it.
fn match_keyword(bytes: &[u8], start: usize) -> Option<(ClauseKeyword, usize)> {
    'keywords: for keyword in ClauseKeyword::ALL {
        let mut pos = start;
        for (n, word) in keyword.words().iter().enumerate() {
            if n > 0 {
                let ws_start = pos;
                while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                    pos += 1;
                }
                if pos == ws_start {
                    continue 'keywords;
                }
            }
            let end = pos + word.len();
            if end > bytes.len() || !bytes[pos..end].eq_ignore_ascii_case(word.as_bytes()) {
                continue 'keywords;
            }
            pos = end;
        }
        if pos < bytes.len() && is_word_byte(bytes[pos]) {
            continue;
        }
        return Some((keyword, pos));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_top_level_clauses() {
        let clauses = StatementClauses::parse(
            "SELECT Id, Name FROM Account WHERE BillingState = 'NY' ORDER BY Name LIMIT 10",
        );
        assert_eq!(clauses.select_list(), Some("Id, Name"));
        assert_eq!(clauses.from_target(), Some("Account"));
        assert_eq!(clauses.filter(), Some("BillingState = 'NY'"));
        assert_eq!(clauses.order_by(), Some("Name"));
        assert_eq!(clauses.limit(), Some("10"));
    }

    #[test]
    fn test_subqueries_and_literals_are_opaque() {
        let clauses = StatementClauses::parse(
            "select Id, (select Id from Contacts where Title = 'VP') from Account where Name like '%limit%'",
        );
        assert_eq!(clauses.select_list(), Some("Id, (select Id from Contacts where Title = 'VP')"));
        assert_eq!(clauses.from_target(), Some("Account"));
        assert_eq!(clauses.filter(), Some("Name like '%limit%'"));
        assert_eq!(clauses.limit(), None);
    }

    #[test]
    fn test_field_names_containing_keywords() {
        let clauses = StatementClauses::parse("SELECT Limit__c, Order_Total__c FROM Quota__c");
        assert_eq!(clauses.select_list(), Some("Limit__c, Order_Total__c"));
        assert_eq!(clauses.from_target(), Some("Quota__c"));
        assert!(clauses.limit().is_none());
    }

    #[test]
    fn test_set_keeps_canonical_order() {
        let mut clauses = StatementClauses::parse("SELECT Id FROM Contact LIMIT 5");
        clauses.set(ClauseKeyword::Where, Some("AccountId = '001000000000001'".to_string()));
        assert_eq!(
            clauses.render(),
            "SELECT Id FROM Contact WHERE AccountId = '001000000000001' LIMIT 5"
        );
        clauses.set(ClauseKeyword::Limit, None);
        assert_eq!(clauses.render(), "SELECT Id FROM Contact WHERE AccountId = '001000000000001'");
    }
}
