//! Policy store and clause validation.
//!
//! A [`PolicySpec`] is built once from the schema descriptor and never
//! mutated afterwards. Validators receive it explicitly.

use std::collections::{BTreeSet, HashSet};

use thiserror::Error;
use warden_schema::TableSchema;

pub mod clause;
pub mod lexer;

pub use clause::{validate_clause, ClauseValidator, ValidatedClause};

/// Statement terminators, comment markers, mutation verbs, set operators and
/// nested-query markers. Matched as case-insensitive substrings.
pub const DEFAULT_BLOCKED_TOKENS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "EXEC", "UNION", "SELECT", "--",
    "/*", "*/", ";",
];

/// Operators, literals and connectives that are not field references.
pub const DEFAULT_PASSTHROUGH_KEYWORDS: &[&str] = &[
    "AND", "OR", "NOT", "LIKE", "IN", "IS", "NULL", "BETWEEN", "TRUE", "FALSE", "ASC", "DESC",
    "WHERE", "ESCAPE", "GLOB", "EXISTS", "CASE", "WHEN", "THEN", "ELSE", "END",
];

pub const DEFAULT_MAX_CLAUSE_LENGTH: usize = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("field '{field}' contains blocked token '{token}' and could never be referenced")]
    UnqueryableField { field: String, token: String },
    #[error("field '{0}' collides with a passthrough keyword")]
    KeywordCollision(String),
    #[error("policy has no allowed fields")]
    EmptyWhitelist,
}

#[derive(Clone, Debug)]
pub struct PolicySpec {
    allowed_fields: BTreeSet<String>,
    allowed_lower: HashSet<String>,
    blocked_tokens: Vec<String>,
    passthrough_upper: HashSet<String>,
    max_length: usize,
}

impl PolicySpec {
    /// Whitelist with the default blocklist and passthrough keywords.
    pub fn allowlist<I, S>(fields: I, max_length: usize) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(
            fields.into_iter().map(Into::into).collect(),
            DEFAULT_BLOCKED_TOKENS.iter().map(|s| s.to_string()).collect(),
            DEFAULT_PASSTHROUGH_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            max_length,
        )
    }

    pub fn from_table(table: &TableSchema, max_length: usize) -> Result<Self, PolicyError> {
        Self::allowlist(table.field_names(), max_length)
    }

    pub fn build(
        allowed_fields: BTreeSet<String>,
        blocked_tokens: Vec<String>,
        passthrough_keywords: Vec<String>,
        max_length: usize,
    ) -> Result<Self, PolicyError> {
        if allowed_fields.is_empty() {
            return Err(PolicyError::EmptyWhitelist);
        }
        let passthrough_upper: HashSet<String> = passthrough_keywords
            .iter()
            .map(|k| k.to_uppercase())
            .collect();
        for field in &allowed_fields {
            let upper = field.to_uppercase();
            if let Some(token) = blocked_tokens
                .iter()
                .find(|t| upper.contains(&t.to_uppercase()))
            {
                return Err(PolicyError::UnqueryableField {
                    field: field.clone(),
                    token: token.clone(),
                });
            }
            if passthrough_upper.contains(&upper) {
                return Err(PolicyError::KeywordCollision(field.clone()));
            }
        }
        let allowed_lower = allowed_fields.iter().map(|f| f.to_lowercase()).collect();
        Ok(Self {
            allowed_fields,
            allowed_lower,
            blocked_tokens,
            passthrough_upper,
            max_length,
        })
    }

    /// Allowed field names in sorted order.
    pub fn allowed_fields(&self) -> impl Iterator<Item = &str> {
        self.allowed_fields.iter().map(String::as_str)
    }

    pub fn blocked_tokens(&self) -> &[String] {
        &self.blocked_tokens
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn is_allowed_field(&self, name: &str) -> bool {
        self.allowed_lower.contains(&name.to_lowercase())
    }

    pub fn is_passthrough(&self, word: &str) -> bool {
        self.passthrough_upper.contains(&word.to_uppercase())
    }

    /// First blocked token, in list order, found anywhere in `text`.
    pub fn first_blocked_token(&self, text: &str) -> Option<&str> {
        let upper = text.to_uppercase();
        self.blocked_tokens
            .iter()
            .find(|t| upper.contains(&t.to_uppercase()))
            .map(String::as_str)
    }
}
