use core::fmt;
use core::ops::Range;

use crate::error::PatchError;

/// First line of every module printed by the disassembler.
pub const MODULE_ID_PREFIX: &str = "; ModuleID = ";

/// Header directives whose relative order must survive patching.
pub const HEADER_DIRECTIVES: [&str; 3] = ["source_filename", "target datalayout", "target triple"];

/// An immutable snapshot of one module's decompiled text.
#[derive(Clone, PartialEq, Eq)]
pub struct IrModule {
    text: String,
}

/// A named metadata directive such as `!air.version = !{!12}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedMetadata<'a> {
    /// Directive name without the leading `!`.
    pub name: &'a str,
    /// Referenced node ids, in order.
    pub nodes: Vec<u32>,
    /// Byte range of the whole line (without the newline).
    pub span: Range<usize>,
}

/// A numbered metadata node such as `!12 = !{i32 2, i32 7, i32 0}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataNode<'a> {
    /// Node id.
    pub id: u32,
    /// Text between the outer `!{` and `}`.
    pub body: &'a str,
    /// Byte range of `body` in the module text.
    pub body_span: Range<usize>,
}

impl IrModule {
    /// Wraps `text` as-is.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Builds a module from raw disassembler output, dropping any banner printed before the
    /// first `; ModuleID = ` line.
    pub fn from_disassembly(output: &str) -> Result<Self, PatchError> {
        let start = line_spans(output)
            .find(|span| output[span.clone()].starts_with(MODULE_ID_PREFIX))
            .map(|span| span.start)
            .ok_or_else(|| {
                PatchError::malformed(format!(
                    "disassembly has no `{}` line",
                    MODULE_ID_PREFIX.trim()
                ))
            })?;
        Ok(Self::new(&output[start..]))
    }

    /// The full module text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consumes the snapshot, returning its text.
    pub fn into_text(self) -> String {
        self.text
    }

    /// Byte ranges of every line, excluding line terminators.
    pub fn line_spans(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        line_spans(&self.text)
    }

    /// The quoted value of the `target triple` directive.
    pub fn target_triple(&self) -> Option<&str> {
        self.line_spans().find_map(|span| {
            let line = &self.text[span];
            let rest = line.strip_prefix("target triple")?.trim_start();
            let rest = rest.strip_prefix('=')?.trim();
            rest.strip_prefix('"')?.strip_suffix('"')
        })
    }

    /// Looks up a named metadata directive (`name` without the leading `!`).
    pub fn named_metadata(&self, name: &str) -> Option<NamedMetadata<'_>> {
        self.line_spans().find_map(|span| {
            let line = &self.text[span.clone()];
            let rest = line.strip_prefix('!')?.strip_prefix(name)?;
            let rest = rest.trim_start().strip_prefix('=')?.trim();
            let list = rest.strip_prefix("!{")?.strip_suffix('}')?;
            let nodes = list
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| item.strip_prefix('!')?.parse().ok())
                .collect::<Option<Vec<u32>>>()?;
            let (name, _) = line[1..].split_at(name.len());
            Some(NamedMetadata { name, nodes, span })
        })
    }

    /// Looks up a numbered metadata node (`!id = !{...}` or `!id = distinct !{...}`).
    pub fn metadata_node(&self, id: u32) -> Option<MetadataNode<'_>> {
        let label = format!("!{id}");
        self.line_spans().find_map(|span| {
            let line = &self.text[span.clone()];
            let rest = line.strip_prefix(label.as_str())?;
            let rest = rest.strip_prefix(' ')?.trim_start().strip_prefix('=')?.trim_start();
            let rest = rest.strip_prefix("distinct ").unwrap_or(rest).trim_start();
            if !rest.starts_with("!{") || !line.ends_with('}') {
                return None;
            }
            let body_start = span.start + (line.len() - rest.len()) + 2;
            let body_end = span.end - 1;
            Some(MetadataNode {
                id,
                body: &self.text[body_start..body_end],
                body_span: body_start..body_end,
            })
        })
    }

    /// Resolves the first node referenced by named metadata `name`.
    pub fn named_node(&self, name: &str) -> Option<MetadataNode<'_>> {
        let named = self.named_metadata(name)?;
        self.metadata_node(*named.nodes.first()?)
    }
}

impl fmt::Debug for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self.text.lines().next().unwrap_or_default();
        f.debug_struct("IrModule")
            .field("first_line", &first)
            .field("len", &self.text.len())
            .finish()
    }
}

impl From<String> for IrModule {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

pub(crate) fn line_spans(text: &str) -> impl Iterator<Item = Range<usize>> + '_ {
    let mut start = 0usize;
    text.split_inclusive('\n').map(move |raw| {
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let line = line.strip_suffix('\r').unwrap_or(line);
        let span = start..start + line.len();
        start += raw.len();
        span
    })
}
