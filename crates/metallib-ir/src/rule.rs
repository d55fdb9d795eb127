use core::fmt;
use core::ops::Range;
use std::sync::Arc;

use regex::Regex;

use crate::module::IrModule;

/// Locates byte ranges in a module by inspecting its structure.
pub type StructuralFn = dyn Fn(&IrModule) -> Vec<Range<usize>> + Send + Sync;

/// Computes the replacement for one matched range.
pub type RewriteFn = dyn Fn(&str) -> String + Send + Sync;

/// What a rule looks for.
#[derive(Clone)]
pub enum Pattern {
    /// Every non-overlapping occurrence of a literal string.
    Literal(String),
    /// Every non-overlapping match of a regular expression.
    Regex(Regex),
    /// Every line containing all of the tokens; the match covers the line without its terminator.
    LineContaining(Vec<String>),
    /// Ranges computed from the module structure.
    Structural(Arc<StructuralFn>),
}

impl Pattern {
    /// Convenience constructor for [`Pattern::Structural`].
    pub fn structural(f: impl Fn(&IrModule) -> Vec<Range<usize>> + Send + Sync + 'static) -> Self {
        Self::Structural(Arc::new(f))
    }

    /// Byte ranges matched in `module`, in whatever order the pattern produces them.
    pub(crate) fn find(&self, module: &IrModule) -> Vec<Range<usize>> {
        let text = module.text();
        match self {
            Self::Literal(needle) if needle.is_empty() => Vec::new(),
            Self::Literal(needle) => text
                .match_indices(needle.as_str())
                .map(|(at, m)| at..at + m.len())
                .collect(),
            Self::Regex(re) => re
                .find_iter(text)
                .filter(|m| !m.is_empty())
                .map(|m| m.range())
                .collect(),
            Self::LineContaining(tokens) => module
                .line_spans()
                .filter(|span| {
                    let line = &text[span.clone()];
                    !tokens.is_empty() && tokens.iter().all(|token| line.contains(token.as_str()))
                })
                .collect(),
            Self::Structural(f) => f(module),
        }
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(needle) => f.debug_tuple("Literal").field(needle).finish(),
            Self::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            Self::LineContaining(tokens) => f.debug_tuple("LineContaining").field(tokens).finish(),
            Self::Structural(_) => f.write_str("Structural(..)"),
        }
    }
}

/// What a rule does with each match.
#[derive(Clone)]
pub enum Action {
    /// Replace the match with the text.
    Replace(String),
    /// Insert the text immediately before the match.
    InsertBefore(String),
    /// Insert the text immediately after the match.
    InsertAfter(String),
    /// Remove the match.
    Delete,
    /// Replace the match with a function of its text.
    Rewrite(Arc<RewriteFn>),
}

impl Action {
    /// Convenience constructor for [`Action::Rewrite`].
    pub fn rewrite(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self::Rewrite(Arc::new(f))
    }

    pub(crate) fn apply(&self, matched: &str) -> String {
        match self {
            Self::Replace(text) => text.clone(),
            Self::InsertBefore(text) => format!("{text}{matched}"),
            Self::InsertAfter(text) => format!("{matched}{text}"),
            Self::Delete => String::new(),
            Self::Rewrite(f) => f(matched),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace(text) => f.debug_tuple("Replace").field(text).finish(),
            Self::InsertBefore(text) => f.debug_tuple("InsertBefore").field(text).finish(),
            Self::InsertAfter(text) => f.debug_tuple("InsertAfter").field(text).finish(),
            Self::Delete => f.write_str("Delete"),
            Self::Rewrite(_) => f.write_str("Rewrite(..)"),
        }
    }
}

/// One match/action rule.
#[derive(Debug, Clone)]
pub struct PatchRule {
    /// Stable identifier used in reports and errors.
    pub id: String,
    /// What to look for.
    pub pattern: Pattern,
    /// What to do with each match.
    pub action: Action,
    /// Whether zero matches fails the module.
    pub required: bool,
}

impl PatchRule {
    /// An optional rule.
    pub fn new(id: impl Into<String>, pattern: Pattern, action: Action) -> Self {
        Self {
            id: id.into(),
            pattern,
            action,
            required: false,
        }
    }

    /// Marks the rule as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// An ordered, immutable list of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<PatchRule>,
}

impl RuleSet {
    /// Wraps `rules`, keeping their order.
    pub fn new(rules: Vec<PatchRule>) -> Self {
        Self { rules }
    }

    /// Returns a new set with `more` appended after the existing rules.
    pub fn with(mut self, more: impl IntoIterator<Item = PatchRule>) -> Self {
        self.rules.extend(more);
        self
    }

    /// Rules in application order.
    pub fn rules(&self) -> &[PatchRule] {
        &self.rules
    }

    /// Rule identifiers in application order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.rules.iter().map(|rule| rule.id.as_str())
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if the set holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<PatchRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = PatchRule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_containing_needs_every_token() {
        let module = IrModule::new("a b c\nb c\r\nc a b d\n");
        let pattern = Pattern::LineContaining(vec!["a".into(), "b".into()]);
        let ranges = pattern.find(&module);
        assert_eq!(ranges, vec![0..5, 11..18]);
        assert_eq!(&module.text()[ranges[1].clone()], "c a b d");

        assert!(Pattern::LineContaining(Vec::new()).find(&module).is_empty());
    }

    #[test]
    fn empty_literal_matches_nothing() {
        let module = IrModule::new("abc");
        assert!(Pattern::Literal(String::new()).find(&module).is_empty());
    }
}
