use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PatchError;
use crate::rule::{Action, Pattern, PatchRule};

/// A user rule file.
///
/// ```json
/// {
///   "rules": [
///     { "id": "air-27", "match": "air.version 27", "action": "replace",
///       "text": "air.version 26", "required": true }
///   ],
///   "skip": [
///     { "container": "VFX.framework/Versions/A/Resources/default.metallib",
///       "modules": ["particle_quad_frag"] }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    /// Rules appended after (or used instead of) the built-in set.
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    /// Modules that must not be patched.
    #[serde(default)]
    pub skip: Vec<SkipEntry>,
}

/// One rule as written in a [`RuleFile`]. Exactly one of `match`, `regex` and `line_contains`
/// must be given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleEntry {
    /// Rule identifier.
    pub id: String,
    /// Literal text to match.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
    /// Regular expression to match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    /// Tokens that must all appear on a matched line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_contains: Option<Vec<String>>,
    /// What to do with each match.
    pub action: ActionKind,
    /// Replacement or inserted text; ignored by `delete`.
    #[serde(default)]
    pub text: String,
    /// Whether zero matches fails the module.
    #[serde(default)]
    pub required: bool,
}

/// Actions available to rule files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// See [`Action::Replace`].
    Replace,
    /// See [`Action::InsertBefore`].
    InsertBefore,
    /// See [`Action::InsertAfter`].
    InsertAfter,
    /// See [`Action::Delete`].
    Delete,
}

/// Modules of one container that are known not to survive patching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipEntry {
    /// Path suffix identifying the container.
    pub container: String,
    /// Module names to skip within it.
    pub modules: Vec<String>,
}

impl RuleFile {
    /// Parses a rule file from JSON text.
    pub fn from_json(json: &str) -> Result<Self, PatchError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Compiles every rule entry, keeping file order.
    pub fn compile(&self) -> Result<Vec<PatchRule>, PatchError> {
        self.rules.iter().map(RuleEntry::compile).collect()
    }
}

impl RuleEntry {
    /// Turns the entry into a [`PatchRule`].
    pub fn compile(&self) -> Result<PatchRule, PatchError> {
        let id = self.id.as_str();
        if id.is_empty() {
            return Err(PatchError::invalid_rule(id, "rule id is empty"));
        }

        let pattern = match (&self.literal, &self.regex, &self.line_contains) {
            (Some(literal), None, None) => {
                if literal.is_empty() {
                    return Err(PatchError::invalid_rule(id, "`match` is empty"));
                }
                Pattern::Literal(literal.clone())
            }
            (None, Some(regex), None) => Pattern::Regex(
                Regex::new(regex).map_err(|e| PatchError::invalid_rule(id, e.to_string()))?,
            ),
            (None, None, Some(tokens)) => {
                if tokens.is_empty() || tokens.iter().any(String::is_empty) {
                    return Err(PatchError::invalid_rule(
                        id,
                        "`line_contains` needs non-empty tokens",
                    ));
                }
                Pattern::LineContaining(tokens.clone())
            }
            _ => {
                return Err(PatchError::invalid_rule(
                    id,
                    "exactly one of `match`, `regex` and `line_contains` is required",
                ))
            }
        };

        let action = match self.action {
            ActionKind::Replace => Action::Replace(self.text.clone()),
            ActionKind::InsertBefore => Action::InsertBefore(self.text.clone()),
            ActionKind::InsertAfter => Action::InsertAfter(self.text.clone()),
            ActionKind::Delete => Action::Delete,
        };

        Ok(PatchRule {
            id: self.id.clone(),
            pattern,
            action,
            required: self.required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules_and_skip_list() {
        let file = RuleFile::from_json(
            r#"{
                "rules": [
                    {"id": "a", "match": "x", "action": "replace", "text": "y", "required": true},
                    {"id": "b", "regex": "v[0-9]+", "action": "delete"},
                    {"id": "c", "line_contains": ["@g", "i64"], "action": "insert_after", "text": " ; seen"}
                ],
                "skip": [{"container": "Foo.framework/default.metallib", "modules": ["bad"]}]
            }"#,
        )
        .unwrap();
        assert_eq!(file.skip[0].modules, ["bad"]);

        let rules = file.compile().unwrap();
        assert_eq!(rules.len(), 3);
        assert!(rules[0].required);
        assert!(!rules[1].required);
        assert!(matches!(rules[1].pattern, Pattern::Regex(_)));
        assert!(matches!(rules[2].action, Action::InsertAfter(ref t) if t == " ; seen"));
    }

    #[test]
    fn rejects_ambiguous_or_broken_rules() {
        let entry = |json: &str| -> RuleEntry { serde_json::from_str(json).unwrap() };

        let both = entry(r#"{"id": "a", "match": "x", "regex": "y", "action": "delete"}"#);
        assert!(matches!(both.compile(), Err(PatchError::InvalidRule { .. })));

        let neither = entry(r#"{"id": "a", "action": "delete"}"#);
        assert!(matches!(neither.compile(), Err(PatchError::InvalidRule { .. })));

        let bad_regex = entry(r#"{"id": "a", "regex": "(", "action": "delete"}"#);
        assert!(matches!(bad_regex.compile(), Err(PatchError::InvalidRule { .. })));

        assert!(matches!(
            RuleFile::from_json(r#"{"rules": [], "extra": 1}"#),
            Err(PatchError::RuleFile(_))
        ));
    }
}
