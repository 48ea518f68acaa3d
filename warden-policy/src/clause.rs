use std::sync::Arc;

use warden_types::{ArtifactKind, ArtifactValidator, Rejection};

use crate::lexer::{words, WordKind};
use crate::PolicySpec;

/// A filter clause that passed every policy check.
///
/// Holds the candidate text unchanged. The only constructor is
/// [`validate_clause`], so storage code can demand this type instead of a
/// raw string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedClause {
    clause: String,
}

impl ValidatedClause {
    pub fn as_str(&self) -> &str {
        &self.clause
    }

    pub fn into_inner(self) -> String {
        self.clause
    }
}

impl AsRef<str> for ValidatedClause {
    fn as_ref(&self) -> &str {
        &self.clause
    }
}

/// Check `candidate` against `policy`, stopping at the first failure.
///
/// Order: emptiness, length, blocked substrings (literals included), then
/// the whitelist over every word outside string literals.
pub fn validate_clause(policy: &PolicySpec, candidate: &str) -> Result<ValidatedClause, Rejection> {
    if candidate.trim().is_empty() {
        return Err(Rejection::EmptyClause);
    }

    let length = candidate.chars().count();
    if length > policy.max_length() {
        return Err(Rejection::LengthExceeded {
            length,
            max: policy.max_length(),
            excess: length - policy.max_length(),
        });
    }

    if let Some(token) = policy.first_blocked_token(candidate) {
        return Err(Rejection::BlockedToken {
            token: token.to_string(),
        });
    }

    for word in words(candidate)? {
        if word.kind == WordKind::Bare && policy.is_passthrough(&word.text) {
            continue;
        }
        if !policy.is_allowed_field(&word.text) {
            return Err(Rejection::UnknownField {
                token: word.text,
                allowed: policy.allowed_fields().map(str::to_string).collect(),
            });
        }
    }

    Ok(ValidatedClause {
        clause: candidate.to_string(),
    })
}

/// [`ArtifactValidator`] for clauses, sharing one policy across sessions.
#[derive(Clone, Debug)]
pub struct ClauseValidator {
    policy: Arc<PolicySpec>,
}

impl ClauseValidator {
    pub fn new(policy: Arc<PolicySpec>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicySpec {
        &self.policy
    }
}

impl ArtifactValidator for ClauseValidator {
    type Artifact = ValidatedClause;

    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Clause
    }

    fn validate(&self, candidate: &str) -> Result<ValidatedClause, Rejection> {
        validate_clause(&self.policy, candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_BLOCKED_TOKENS, DEFAULT_MAX_CLAUSE_LENGTH};

    fn policy() -> PolicySpec {
        PolicySpec::from_table(&warden_schema::audit_logs(), DEFAULT_MAX_CLAUSE_LENGTH).unwrap()
    }

    fn blocked(candidate: &str) -> String {
        match validate_clause(&policy(), candidate) {
            Err(Rejection::BlockedToken { token }) => token,
            other => panic!("expected blocked token, got {other:?}"),
        }
    }

    #[test]
    fn valid_clause_is_returned_unchanged() {
        let clause = "level = 'ERROR' AND module = 'CareFlow'";
        let validated = validate_clause(&policy(), clause).unwrap();
        assert_eq!(validated.as_str(), clause);
    }

    #[test]
    fn every_allowed_field_accepts_a_minimal_clause() {
        let policy = policy();
        for field in policy.allowed_fields() {
            let clause = format!("{field} = 'value'");
            let first = validate_clause(&policy, &clause).unwrap();
            assert_eq!(first.as_str(), clause);
            let again = validate_clause(&policy, first.as_str()).unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn empty_and_whitespace_are_rejected() {
        assert_eq!(validate_clause(&policy(), ""), Err(Rejection::EmptyClause));
        assert_eq!(validate_clause(&policy(), "  \n\t "), Err(Rejection::EmptyClause));
    }

    #[test]
    fn length_boundary() {
        let policy = PolicySpec::allowlist(["level"], 20).unwrap();
        let exact = "level = 'abcdefghij'";
        assert_eq!(exact.chars().count(), 20);
        assert!(validate_clause(&policy, exact).is_ok());

        let over = "level = 'abcdefghijk'";
        assert_eq!(
            validate_clause(&policy, over),
            Err(Rejection::LengthExceeded {
                length: 21,
                max: 20,
                excess: 1
            })
        );
    }

    #[test]
    fn long_repeated_clause_exceeds_default_limit() {
        let clause = "level = 'ERROR' AND ".repeat(100);
        assert!(matches!(
            validate_clause(&policy(), &clause),
            Err(Rejection::LengthExceeded { .. })
        ));
    }

    #[test]
    fn mutation_and_set_keywords_are_blocked() {
        assert_eq!(blocked("id = '1'; INSERT INTO audit_logs VALUES ('x')"), "INSERT");
        assert_eq!(blocked("id = '1' OR 1=1; DROP TABLE audit_logs"), "DROP");
        assert_eq!(blocked("id = '1'; delete from audit_logs"), "DELETE");
        assert_eq!(blocked("id = '1' UNION ALL SELECT * FROM x"), "UNION");
        assert_eq!(blocked("level = 'ERROR' -- trailing"), "--");
        assert_eq!(blocked("level = 'ERROR' /* note */"), "/*");
        assert_eq!(blocked("level = 'ERROR';"), ";");
    }

    #[test]
    fn subquery_is_blocked() {
        assert_eq!(
            blocked("id IN (SELECT id FROM audit_logs WHERE level = 'ERROR')"),
            "SELECT"
        );
    }

    #[test]
    fn blocked_tokens_inside_literals_still_reject() {
        for token in DEFAULT_BLOCKED_TOKENS {
            let clause = format!("input = 'x {} y'", token.to_lowercase());
            assert_eq!(blocked(&clause), *token);
        }
    }

    #[test]
    fn unknown_field_names_token_and_allowed_set() {
        match validate_clause(&policy(), "password = 'hunter2'") {
            Err(Rejection::UnknownField { token, allowed }) => {
                assert_eq!(token, "password");
                assert_eq!(allowed.len(), 11);
                assert_eq!(allowed[0], "cost_usd");
                assert!(allowed.contains(&"level".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn function_calls_are_unknown_fields() {
        assert!(matches!(
            validate_clause(&policy(), "LOWER(level) = 'error'"),
            Err(Rejection::UnknownField { token, .. }) if token == "LOWER"
        ));
    }

    #[test]
    fn literal_contents_are_not_fields() {
        assert!(validate_clause(&policy(), "input LIKE '%password reset%'").is_ok());
        assert!(validate_clause(&policy(), "output = 'it''s fine' AND level IS NOT NULL").is_ok());
    }

    #[test]
    fn quoted_identifier_must_be_whitelisted() {
        assert!(validate_clause(&policy(), "\"level\" = 'WARN'").is_ok());
        assert!(matches!(
            validate_clause(&policy(), "\"secret\" = 'x'"),
            Err(Rejection::UnknownField { token, .. }) if token == "secret"
        ));
    }

    #[test]
    fn quoted_keyword_is_treated_as_field() {
        assert!(matches!(
            validate_clause(&policy(), "\"AND\" = 'x'"),
            Err(Rejection::UnknownField { token, .. }) if token == "AND"
        ));
    }

    #[test]
    fn field_matching_is_case_insensitive() {
        assert!(validate_clause(&policy(), "LEVEL = 'ERROR' and Module = 'core'").is_ok());
    }

    #[test]
    fn unbalanced_quote_is_rejected() {
        assert!(matches!(
            validate_clause(&policy(), "level = 'ERROR"),
            Err(Rejection::UnterminatedLiteral { .. })
        ));
    }

    #[test]
    fn validator_trait_reports_clause_kind() {
        let validator = ClauseValidator::new(Arc::new(policy()));
        assert_eq!(validator.kind(), ArtifactKind::Clause);
        assert!(validator.validate("cost_usd > 0.05").is_ok());
    }
}
