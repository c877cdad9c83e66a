//! Subscription expressions.
//!
//! An expression is one or more `key=value` clauses joined by ` and `:
//!
//! ```text
//! topic=studio.update and data.entity_type=Task and source.user.username=ada*
//! ```
//!
//! Keys are dotted paths into the event. Values may contain `*` wildcards.

use regex::Regex;
use serde_json::Value;

use crate::connection::Event;
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct Clause {
    path: Vec<String>,
    pattern: Regex,
}

/// A parsed subscription expression.
#[derive(Debug, Clone)]
pub struct Subscription {
    expression: String,
    clauses: Vec<Clause>,
}

impl Subscription {
    /// Parse an expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Subscription`] for an empty expression, a clause
    /// without `=`, or an empty key.
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(Error::Subscription("empty expression".to_string()));
        }

        let clauses = trimmed
            .split(" and ")
            .map(parse_clause)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            expression: trimmed.to_string(),
            clauses,
        })
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether every clause matches `event`.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.clauses.iter().all(|clause| clause_matches(clause, event))
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_clause(clause: &str) -> Result<Clause> {
    let clause = clause.trim();
    let Some((key, value)) = clause.split_once('=') else {
        return Err(Error::Subscription(format!(
            "clause '{clause}' is not of the form key=value"
        )));
    };

    let key = key.trim();
    if key.is_empty() || key.split('.').any(str::is_empty) {
        return Err(Error::Subscription(format!(
            "clause '{clause}' has an empty key"
        )));
    }

    let pattern = wildcard_regex(value.trim())?;

    Ok(Clause {
        path: key.split('.').map(String::from).collect(),
        pattern,
    })
}

fn wildcard_regex(value: &str) -> Result<Regex> {
    let body = value
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
        .map_err(|e| Error::Subscription(format!("invalid value '{value}': {e}")))
}

fn clause_matches(clause: &Clause, event: &Event) -> bool {
    let Some((head, rest)) = clause.path.split_first() else {
        return false;
    };

    let root = match head.as_str() {
        "topic" if rest.is_empty() => return clause.pattern.is_match(&event.topic),
        "id" if rest.is_empty() => return clause.pattern.is_match(&event.id),
        "data" => &event.data,
        "source" => &event.source,
        _ => return false,
    };

    let mut current = root;
    for segment in rest {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }

    match current {
        Value::Null => false,
        Value::String(s) => clause.pattern.is_match(s),
        other => clause.pattern.is_match(&other.to_string()),
    }
}
