//! SQL security gate.
//!
//! Rejects statements containing configured dangerous keywords before they
//! reach any database. Matching runs on a cleaned copy of the SQL (comments
//! stripped, whitespace collapsed, lowercased) so keywords cannot hide
//! behind comments or casing; the original text is what gets executed when
//! the statement passes.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::config::SqlSecurityConfig;

/// Keywords blocked out of the box. Checked in this order; the first whole-word
/// hit wins.
pub const DEFAULT_DANGEROUS_KEYWORDS: &[&str] = &[
    "update", "delete", "insert", "replace", "drop", "create", "alter", "truncate", "grant",
    "revoke", "shutdown", "restart", "call", "execute", "commit", "rollback",
];

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--[^\r\n]*").expect("line comment pattern"));
// (?s) so block comments spanning newlines are removed; non-greedy so two
// separate comments do not swallow the SQL between them.
static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("ws pattern"));

/// Outcome of validating one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_keyword: Option<String>,
}

impl SqlValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            error_message: None,
            detected_keyword: None,
        }
    }

    fn rejected(message: String, keyword: Option<String>) -> Self {
        Self {
            valid: false,
            error_message: Some(message),
            detected_keyword: keyword,
        }
    }
}

/// Compiled security policy. Built once at startup from the configuration;
/// changing it requires a restart.
#[derive(Debug)]
pub struct SqlSecurityPolicy {
    enabled: bool,
    /// (keyword, word-boundary matcher) pairs in configured order.
    keywords: Vec<(String, Regex)>,
}

impl SqlSecurityPolicy {
    /// Build the policy from configuration. Keywords are lowercased and
    /// compiled into word-boundary matchers up front.
    pub fn from_config(config: &SqlSecurityConfig) -> Self {
        let list: Vec<String> = match &config.dangerous_keywords {
            Some(custom) => custom.iter().map(|k| k.trim().to_lowercase()).collect(),
            None => DEFAULT_DANGEROUS_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        };
        let keywords = list
            .into_iter()
            .filter(|k| !k.is_empty())
            .filter_map(|k| {
                let pattern = format!(r"\b{}\b", regex::escape(&k));
                match Regex::new(&pattern) {
                    Ok(re) => Some((k, re)),
                    Err(e) => {
                        tracing::warn!(keyword = %k, error = %e, "skipping unmatchable keyword");
                        None
                    }
                }
            })
            .collect();
        Self {
            enabled: config.enabled,
            keywords,
        }
    }

    /// Policy with the built-in keyword list, enabled.
    pub fn default_enabled() -> Self {
        Self::from_config(&SqlSecurityConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Keywords in configured order, for introspection.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(|(k, _)| k.as_str())
    }

    /// Validate one statement. Disabled policy accepts everything; blank SQL
    /// is always invalid; otherwise the first configured keyword appearing as
    /// a whole word in the cleaned text rejects the statement.
    pub fn validate(&self, sql: &str) -> SqlValidationResult {
        if !self.enabled {
            return SqlValidationResult::ok();
        }
        if sql.trim().is_empty() {
            return SqlValidationResult::rejected(
                "SQL statement cannot be empty".to_string(),
                None,
            );
        }

        let cleaned = clean_sql(sql);
        for (keyword, matcher) in &self.keywords {
            if matcher.is_match(&cleaned) {
                tracing::warn!(keyword = %keyword, "blocked dangerous SQL statement");
                return SqlValidationResult::rejected(rejection_message(keyword), Some(keyword.clone()));
            }
        }
        SqlValidationResult::ok()
    }

    /// Diagnostic payload returned to the caller in place of execution.
    pub fn diagnostic(&self, result: &SqlValidationResult) -> serde_json::Value {
        serde_json::json!({
            "error": result.error_message,
            "detected_keyword": result.detected_keyword,
            "sql_security_enabled": true,
        })
    }
}

/// Strip comments, collapse whitespace, lowercase. Used only for matching;
/// never executed.
fn clean_sql(sql: &str) -> String {
    let no_line = LINE_COMMENT.replace_all(sql, "");
    let no_block = BLOCK_COMMENT.replace_all(&no_line, "");
    WHITESPACE
        .replace_all(&no_block, " ")
        .trim()
        .to_lowercase()
}

/// Operator-facing message naming the keyword and both remediation paths.
fn rejection_message(keyword: &str) -> String {
    format!(
        "Dangerous SQL operation keyword '{}' detected. This operation has been blocked for data security.\n\
         To execute this type of operation, please configure in the configuration file:\n\
         1) Set sql_security.enabled = false to completely disable SQL security checks, or\n\
         2) Remove the '{}' keyword from the sql_security.dangerous_keywords list.\n\
         Please restart the service after modifying the configuration.",
        keyword.to_uppercase(),
        keyword.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_policy() -> SqlSecurityPolicy {
        SqlSecurityPolicy::default_enabled()
    }

    #[test]
    fn test_select_passes() {
        let result = enabled_policy().validate("SELECT * FROM users WHERE id = 1");
        assert!(result.valid);
        assert!(result.detected_keyword.is_none());
    }

    #[test]
    fn test_drop_rejected_case_insensitive() {
        for sql in ["DROP TABLE users", "drop table users", "DrOp TaBlE users"] {
            let result = enabled_policy().validate(sql);
            assert!(!result.valid, "should reject {sql:?}");
            assert_eq!(result.detected_keyword.as_deref(), Some("drop"));
        }
    }

    #[test]
    fn test_keyword_inside_identifier_passes() {
        // "updates" and "created_at" contain blocked keywords as substrings
        // but not as whole words.
        let result = enabled_policy().validate("SELECT updates, created_at FROM audit_log");
        assert!(result.valid);
    }

    #[test]
    fn test_keyword_hidden_in_line_comment_ignored() {
        let result = enabled_policy().validate("SELECT 1 -- drop table users");
        assert!(result.valid);
    }

    #[test]
    fn test_keyword_hidden_in_block_comment_ignored() {
        let result = enabled_policy().validate("SELECT 1 /* delete\nfrom users */");
        assert!(result.valid);
    }

    #[test]
    fn test_keyword_after_comment_still_detected() {
        let result = enabled_policy().validate("/* harmless */ DELETE FROM users");
        assert!(!result.valid);
        assert_eq!(result.detected_keyword.as_deref(), Some("delete"));
    }

    #[test]
    fn test_two_block_comments_do_not_swallow_sql_between() {
        // A greedy matcher would erase the DROP between the comments.
        let result = enabled_policy().validate("/* a */ DROP TABLE t /* b */");
        assert!(!result.valid);
        assert_eq!(result.detected_keyword.as_deref(), Some("drop"));
    }

    #[test]
    fn test_first_configured_keyword_wins() {
        // "update" precedes "delete" in the default list.
        let result = enabled_policy().validate("DELETE FROM t WHERE x IN (SELECT 1); UPDATE t");
        assert!(!result.valid);
        assert_eq!(result.detected_keyword.as_deref(), Some("update"));
    }

    #[test]
    fn test_blank_sql_invalid_even_when_keywords_absent() {
        for sql in ["", "   ", "\n\t"] {
            let result = enabled_policy().validate(sql);
            assert!(!result.valid);
            assert!(result.detected_keyword.is_none());
        }
    }

    #[test]
    fn test_disabled_policy_accepts_everything() {
        let policy = SqlSecurityPolicy::from_config(&SqlSecurityConfig {
            enabled: false,
            dangerous_keywords: None,
        });
        assert!(policy.validate("DROP TABLE users").valid);
        // Disabled short-circuits before the blank check too.
        assert!(policy.validate("").valid);
    }

    #[test]
    fn test_custom_keyword_list_replaces_default() {
        let policy = SqlSecurityPolicy::from_config(&SqlSecurityConfig {
            enabled: true,
            dangerous_keywords: Some(vec!["merge".to_string()]),
        });
        assert!(policy.validate("DROP TABLE users").valid);
        let result = policy.validate("MERGE INTO t USING s ON 1=1");
        assert!(!result.valid);
        assert_eq!(result.detected_keyword.as_deref(), Some("merge"));
    }

    #[test]
    fn test_rejection_message_names_keyword_and_remediation() {
        let result = enabled_policy().validate("TRUNCATE TABLE t");
        let msg = result.error_message.unwrap();
        assert!(msg.contains("truncate"));
        assert!(msg.contains("sql_security.enabled"));
        assert!(msg.contains("dangerous_keywords"));
    }

    #[test]
    fn test_rejection_message_upcases_first_mention_and_numbers_options() {
        let result = enabled_policy().validate("DROP TABLE t");
        let msg = result.error_message.unwrap();
        assert!(msg.starts_with("Dangerous SQL operation keyword 'DROP' detected"));
        assert!(msg.contains("1) Set sql_security.enabled = false"));
        assert!(msg.contains("2) Remove the 'drop' keyword"));
        assert!(msg.contains("restart the service"));
    }

    #[test]
    fn test_diagnostic_shape() {
        let policy = enabled_policy();
        let result = policy.validate("DROP TABLE t");
        let diag = policy.diagnostic(&result);
        assert_eq!(diag["detected_keyword"], "drop");
        assert_eq!(diag["sql_security_enabled"], true);
        assert!(diag["error"].as_str().unwrap().contains("drop"));
    }

    #[test]
    fn test_whitespace_collapse_does_not_join_tokens() {
        // Newlines between tokens must become separators, not be deleted.
        let result = enabled_policy().validate("DROP\n\tTABLE\n users");
        assert!(!result.valid);
    }
}
