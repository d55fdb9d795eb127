use core::ops::Range;

use crate::check::check_well_formed;
use crate::error::PatchError;
use crate::module::IrModule;
use crate::rule::{PatchRule, RuleSet};

/// What one rule did to a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleReport {
    /// Rule identifier.
    pub rule_id: String,
    /// Number of ranges the pattern matched.
    pub matches: usize,
    /// Number of matches whose replacement differed from the original text.
    pub changed: usize,
}

/// The result of applying a rule set.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// The patched snapshot.
    pub module: IrModule,
    /// One report per rule, in application order. Optional rules that matched nothing report
    /// zero matches.
    pub applied: Vec<RuleReport>,
}

impl PatchOutcome {
    /// Returns `true` if any rule changed the text.
    pub fn changed(&self) -> bool {
        self.applied.iter().any(|report| report.changed > 0)
    }
}

/// Applies `rules` to `module` in order, then checks the result is still well formed.
///
/// The input snapshot is left untouched.
pub fn apply(module: &IrModule, rules: &RuleSet) -> Result<PatchOutcome, PatchError> {
    let mut current = module.clone();
    let mut applied = Vec::with_capacity(rules.len());

    for rule in rules.rules() {
        let (next, report) = apply_rule(&current, rule)?;
        if report.matches == 0 {
            if rule.required {
                return Err(PatchError::RuleUnsatisfied {
                    rule_id: rule.id.clone(),
                });
            }
            tracing::trace!(rule = %rule.id, "optional rule matched nothing");
        } else {
            tracing::trace!(
                rule = %rule.id,
                matches = report.matches,
                changed = report.changed,
                "rule applied"
            );
        }
        current = next;
        applied.push(report);
    }

    check_well_formed(module, &current)?;

    Ok(PatchOutcome {
        module: current,
        applied,
    })
}

fn apply_rule(module: &IrModule, rule: &PatchRule) -> Result<(IrModule, RuleReport), PatchError> {
    let text = module.text();
    let ranges = normalize(&rule.id, text, rule.pattern.find(module))?;

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    let mut changed = 0usize;
    for range in &ranges {
        let matched = &text[range.clone()];
        let replacement = rule.action.apply(matched);
        if replacement != matched {
            changed += 1;
        }
        out.push_str(&text[cursor..range.start]);
        out.push_str(&replacement);
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);

    let report = RuleReport {
        rule_id: rule.id.clone(),
        matches: ranges.len(),
        changed,
    };
    let next = if changed == 0 {
        module.clone()
    } else {
        IrModule::new(out)
    };
    Ok((next, report))
}

/// Sorts `ranges` and rejects ranges that overlap or do not fall on character boundaries.
fn normalize(
    rule_id: &str,
    text: &str,
    mut ranges: Vec<Range<usize>>,
) -> Result<Vec<Range<usize>>, PatchError> {
    ranges.sort_by_key(|range| (range.start, range.end));
    let mut prev_end = 0usize;
    for range in &ranges {
        if range.start > range.end
            || range.end > text.len()
            || !text.is_char_boundary(range.start)
            || !text.is_char_boundary(range.end)
        {
            return Err(PatchError::invalid_rule(
                rule_id,
                format!("match {range:?} is not a valid range of the module text"),
            ));
        }
        if range.start < prev_end {
            return Err(PatchError::invalid_rule(
                rule_id,
                format!("match {range:?} overlaps the previous match"),
            ));
        }
        prev_end = range.end;
    }
    Ok(ranges)
}
