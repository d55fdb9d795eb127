//! The built-in downgrade rules.
//!
//! Every rule only ever lowers a version: text that is already at or below the target passes
//! through unchanged, so running the set twice is a no-op.

use core::fmt;
use core::ops::Range;

use regex::Regex;

use crate::module::IrModule;
use crate::rule::{Action, Pattern, PatchRule, RuleSet};

/// A `major.minor.patch` version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl Version {
    /// Builds a version triple.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The versions patched modules are lowered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DowngradeTarget {
    /// AIR version (`!air.version`, triple suffix).
    pub air: Version,
    /// Metal language version (`!air.language_version`).
    pub language: Version,
    /// Minimum macOS version in the target triple.
    pub os: Version,
}

impl Default for DowngradeTarget {
    /// AIR 2.6, Metal 3.1, macOS 14.0.0.
    fn default() -> Self {
        Self {
            air: Version::new(2, 6, 0),
            language: Version::new(3, 1, 0),
            os: Version::new(14, 0, 0),
        }
    }
}

/// Identifier of the required `!air.version` rule.
pub const AIR_VERSION_RULE: &str = "air-version";
/// Identifier of the `!air.language_version` rule.
pub const LANGUAGE_VERSION_RULE: &str = "air-language-version";
/// Identifier of the target triple rule.
pub const TARGET_TRIPLE_RULE: &str = "target-triple";
/// Identifier of the sampler state layout rule.
pub const SAMPLER_STATE_RULE: &str = "sampler-state-layout";

impl RuleSet {
    /// The built-in rules lowering a module to `target`, in application order.
    pub fn builtin(target: &DowngradeTarget) -> Self {
        Self::new(vec![
            air_version_rule(target.air),
            language_version_rule(target.language),
            target_triple_rule(target),
            sampler_state_rule(),
        ])
    }
}

fn air_version_rule(target: Version) -> PatchRule {
    PatchRule::new(
        AIR_VERSION_RULE,
        Pattern::structural(|module| {
            version_node(module, "air.version", "")
                .into_iter()
                .collect()
        }),
        Action::rewrite(move |body| {
            let Some(version) = parse_version_list(body) else {
                return body.to_owned();
            };
            if version <= target {
                return body.to_owned();
            }
            format!(
                "i32 {}, i32 {}, i32 {}",
                target.major, target.minor, target.patch
            )
        }),
    )
    .required()
}

const LANGUAGE_PREFIX: &str = "!\"Metal\", ";

impl IrModule {
    /// The AIR version declared by `!air.version`.
    pub fn air_version(&self) -> Option<Version> {
        parse_version_list(self.named_node("air.version")?.body)
    }

    /// The Metal language version declared by `!air.language_version`.
    pub fn language_version(&self) -> Option<Version> {
        let node = self.named_node("air.language_version")?;
        parse_version_list(node.body.strip_prefix(LANGUAGE_PREFIX)?)
    }
}

fn language_version_rule(target: Version) -> PatchRule {
    PatchRule::new(
        LANGUAGE_VERSION_RULE,
        Pattern::structural(|module| {
            version_node(module, "air.language_version", LANGUAGE_PREFIX)
                .into_iter()
                .collect()
        }),
        Action::rewrite(move |body| {
            let Some(version) = body.strip_prefix(LANGUAGE_PREFIX).and_then(parse_version_list) else {
                return body.to_owned();
            };
            if version <= target {
                return body.to_owned();
            }
            format!(
                "{LANGUAGE_PREFIX}i32 {}, i32 {}, i32 {}",
                target.major, target.minor, target.patch
            )
        }),
    )
}

/// Range of the body of the node referenced by `!name`, if it is a version list after `prefix`.
fn version_node(module: &IrModule, name: &str, prefix: &str) -> Option<Range<usize>> {
    let node = module.named_node(name)?;
    node.body
        .strip_prefix(prefix)
        .and_then(parse_version_list)
        .map(|_| node.body_span)
}

/// Parses `i32 MAJ, i32 MIN, i32 PATCH`.
fn parse_version_list(body: &str) -> Option<Version> {
    let mut parts = body.split(',').map(|part| {
        part.trim()
            .strip_prefix("i32 ")
            .and_then(|n| n.trim().parse::<u32>().ok())
    });
    let version = Version::new(parts.next()??, parts.next()??, parts.next()??);
    parts.next().is_none().then_some(version)
}

fn target_triple_rule(target: &DowngradeTarget) -> PatchRule {
    let re = Regex::new(r"air64_v(\d)(\d+)-apple-macosx(\d+)\.(\d+)\.(\d+)")
        .expect("static regex must compile");
    let air = target.air;
    let os = target.os;
    let captures = re.clone();
    PatchRule::new(
        TARGET_TRIPLE_RULE,
        Pattern::Regex(re),
        Action::rewrite(move |triple| {
            let Some(caps) = captures.captures(triple) else {
                return triple.to_owned();
            };
            let num = |i: usize| caps[i].parse::<u32>().unwrap_or(0);
            let triple_air = Version::new(num(1), num(2), 0);
            let triple_os = Version::new(num(3), num(4), num(5));
            if triple_air <= air && triple_os <= os {
                return triple.to_owned();
            }
            let triple_air = triple_air.min(air);
            let triple_os = triple_os.min(os);
            format!(
                "air64_v{}{}-apple-macosx{triple_os}",
                triple_air.major, triple_air.minor
            )
        }),
    )
}

fn sampler_state_rule() -> PatchRule {
    let re = Regex::new(r"\[2 x i64\] \[i64 ([0-9]+), i64 0\]")
        .expect("static regex must compile");
    PatchRule::new(
        SAMPLER_STATE_RULE,
        Pattern::LineContaining(vec!["@__air_sampler_state".into(), "[2 x i64]".into()]),
        Action::rewrite(move |line| {
            if let Some(caps) = re.captures(line) {
                let whole = caps.get(0).map_or("", |m| m.as_str());
                return line.replacen(whole, &format!("i64 {}", &caps[1]), 1);
            }
            line.replace("[2 x i64]", "i64")
        }),
    )
}
