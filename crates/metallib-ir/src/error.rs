use thiserror::Error;

/// Errors returned while parsing or patching decompiled AIR text.
#[derive(Debug, Error)]
pub enum PatchError {
    /// A required rule matched nothing.
    #[error("required rule `{rule_id}` did not match")]
    RuleUnsatisfied {
        /// Identifier of the unsatisfied rule.
        rule_id: String,
    },

    /// The text is not (or is no longer) a well-formed module.
    #[error("malformed IR: {0}")]
    Malformed(String),

    /// A rule definition is unusable (bad regex, conflicting match kinds, overlapping ranges).
    #[error("invalid rule `{rule_id}`: {reason}")]
    InvalidRule {
        /// Identifier of the offending rule.
        rule_id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A rule file is not valid JSON or does not fit the schema.
    #[error("invalid rule file: {0}")]
    RuleFile(#[from] serde_json::Error),
}

impl PatchError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub(crate) fn invalid_rule(rule_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule_id: rule_id.to_owned(),
            reason: reason.into(),
        }
    }
}
