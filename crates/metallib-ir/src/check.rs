//! Cheap structural sanity checks run on patched text.
//!
//! These are not a parser. They catch edits that obviously broke the module (an unbalanced
//! delimiter, a header directive moved or dropped) before the text is handed to the compiler.

use crate::error::PatchError;
use crate::module::{line_spans, IrModule, HEADER_DIRECTIVES};

/// Checks that `{}`, `[]` and `()` balance outside string literals and `;` comments.
pub fn check_balanced(module: &IrModule) -> Result<(), PatchError> {
    let mut stack: Vec<(u8, usize)> = Vec::new();
    for (line_no, span) in line_spans(module.text()).enumerate() {
        let line = &module.text().as_bytes()[span];
        let mut in_string = false;
        for &b in line {
            if in_string {
                // Quotes inside strings are hex-escaped (`\22`), so a bare quote always closes.
                if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b';' => break,
                b'{' | b'[' | b'(' => stack.push((b, line_no + 1)),
                b'}' | b']' | b')' => {
                    let open = match b {
                        b'}' => b'{',
                        b']' => b'[',
                        _ => b'(',
                    };
                    match stack.pop() {
                        Some((top, _)) if top == open => {}
                        Some((top, opened_at)) => {
                            return Err(PatchError::malformed(format!(
                                "line {}: `{}` closes `{}` opened on line {opened_at}",
                                line_no + 1,
                                b as char,
                                top as char
                            )))
                        }
                        None => {
                            return Err(PatchError::malformed(format!(
                                "line {}: unmatched `{}`",
                                line_no + 1,
                                b as char
                            )))
                        }
                    }
                }
                _ => {}
            }
        }
        if in_string {
            return Err(PatchError::malformed(format!(
                "line {}: unterminated string literal",
                line_no + 1
            )));
        }
    }
    if let Some((open, line)) = stack.pop() {
        return Err(PatchError::malformed(format!(
            "`{}` opened on line {line} is never closed",
            open as char
        )));
    }
    Ok(())
}

/// Header directives present in `module`, in order of appearance.
pub fn header_directives(module: &IrModule) -> Vec<&'static str> {
    let text = module.text();
    line_spans(text)
        .filter_map(|span| {
            let line = &text[span];
            HEADER_DIRECTIVES.into_iter().find(|directive| {
                line.strip_prefix(directive)
                    .is_some_and(|rest| rest.trim_start().starts_with('='))
            })
        })
        .collect()
}

/// Checks that `patched` is balanced and keeps the header directives of `original` in order.
pub fn check_well_formed(original: &IrModule, patched: &IrModule) -> Result<(), PatchError> {
    check_balanced(patched)?;
    let before = header_directives(original);
    let after = header_directives(patched);
    if before != after {
        return Err(PatchError::malformed(format!(
            "header directives changed from {before:?} to {after:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_delimiters_in_strings_and_comments() {
        let ok = IrModule::new(
            "; <label>:3 ) ]\n@s = constant [3 x i8] c\"{(\\22\", align 1 ; }\ndefine void @f() {\n}\n",
        );
        check_balanced(&ok).unwrap();
    }

    #[test]
    fn reports_mismatch_and_unclosed() {
        let mismatched = IrModule::new("!0 = !{i32 1]\n");
        assert!(matches!(
            check_balanced(&mismatched),
            Err(PatchError::Malformed(_))
        ));

        let unclosed = IrModule::new("define void @f() {\n  ret void\n");
        let err = check_balanced(&unclosed).unwrap_err();
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn header_order_is_compared() {
        let original = IrModule::new(
            "source_filename = \"a\"\ntarget datalayout = \"e\"\ntarget triple = \"air64\"\n",
        );
        let swapped = IrModule::new(
            "target datalayout = \"e\"\nsource_filename = \"a\"\ntarget triple = \"air64\"\n",
        );
        assert_eq!(
            header_directives(&original),
            ["source_filename", "target datalayout", "target triple"]
        );
        check_well_formed(&original, &original).unwrap();
        assert!(check_well_formed(&original, &swapped).is_err());
    }
}
