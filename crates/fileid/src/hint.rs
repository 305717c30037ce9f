//! The hint grammar: a comma-separated list of `key`, `key=value`, and
//! `key=(child hints)` items. Keys are case-insensitive; a bare key or
//! an empty value reads as boolean true. Child-hint lists are returned
//! verbatim (parens stripped) so the caller can parse them with the
//! same function.

use common::{EngineError, EngineResult};

/// One parsed hint item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hint {
    pub key: String,
    /// `None` for a bare key; `Some("")` for `key=`.
    pub value: Option<String>,
}

/// Split a hint string into items, honoring nested parentheses and
/// single-quoted strings.
pub fn parse_hint_list(input: &str) -> EngineResult<Vec<Hint>> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0usize;

    let bytes = input.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| EngineError::SqlSyntax(format!("unbalanced ')' in '{input}'")))?;
            }
            b',' if !in_quote && depth == 0 => {
                push_item(&input[start..i], &mut items)?;
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 || in_quote {
        return Err(EngineError::SqlSyntax(format!("unterminated hint '{input}'")));
    }
    push_item(&input[start..], &mut items)?;
    Ok(items)
}

fn push_item(raw: &str, items: &mut Vec<Hint>) -> EngineResult<()> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }
    match raw.split_once('=') {
        None => items.push(Hint {
            key: raw.to_ascii_lowercase(),
            value: None,
        }),
        Some((key, value)) => {
            let key = key.trim();
            if key.is_empty() {
                return Err(EngineError::SqlSyntax(format!("hint without a key: '{raw}'")));
            }
            let mut value = value.trim();
            // `key=(...)`: hand back the inside for recursive parsing.
            if value.starts_with('(') && value.ends_with(')') && value.len() >= 2 {
                value = &value[1..value.len() - 1];
            } else if let Some(stripped) = value.strip_prefix('\'') {
                value = stripped.strip_suffix('\'').ok_or_else(|| {
                    EngineError::SqlSyntax(format!("unterminated string in '{raw}'"))
                })?;
            }
            items.push(Hint {
                key: key.to_ascii_lowercase(),
                value: Some(value.to_string()),
            });
        }
    }
    Ok(())
}

/// Look a key up in a parsed hint list.
///
/// Returns `None` when absent and `Some(value)` when present; a bare
/// key yields an empty value.
pub fn read_hint<'a>(hints: &'a [Hint], key: &str) -> Option<&'a str> {
    hints
        .iter()
        .find(|h| h.key == key)
        .map(|h| h.value.as_deref().unwrap_or(""))
}

/// Interpret a hint value as a boolean: `true`, `false`, or empty
/// (which reads as true). Anything else is a syntax error carrying the
/// offending value.
pub fn read_bool(value: &str) -> EngineResult<bool> {
    if value.is_empty() || value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(EngineError::SqlSyntax(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_list() {
        let hints = parse_hint_list("sectionized, kwic=true, deleteflag=false").unwrap();
        assert_eq!(read_hint(&hints, "sectionized"), Some(""));
        assert_eq!(read_hint(&hints, "kwic"), Some("true"));
        assert_eq!(read_hint(&hints, "deleteflag"), Some("false"));
        assert_eq!(read_hint(&hints, "inverted"), None);
    }

    #[test]
    fn keys_are_case_insensitive() {
        let hints = parse_hint_list("Sectionized, KWIC=TRUE").unwrap();
        assert_eq!(read_hint(&hints, "sectionized"), Some(""));
        assert!(read_bool(read_hint(&hints, "kwic").unwrap()).unwrap());
    }

    #[test]
    fn nested_value_is_returned_verbatim() {
        let hints =
            parse_hint_list("inverted=(indexing=Dual, coder=(id=PEG:2)), delayed=sync").unwrap();
        let inverted = read_hint(&hints, "inverted").unwrap();
        assert_eq!(inverted, "indexing=Dual, coder=(id=PEG:2)");

        let children = parse_hint_list(inverted).unwrap();
        assert_eq!(read_hint(&children, "indexing"), Some("Dual"));
        assert_eq!(read_hint(&children, "coder"), Some("id=PEG:2"));
    }

    #[test]
    fn quoted_values_keep_commas() {
        let hints = parse_hint_list("tokenizer='DUAL:JAP,ALL', kwic").unwrap();
        assert_eq!(read_hint(&hints, "tokenizer"), Some("DUAL:JAP,ALL"));
        assert_eq!(read_hint(&hints, "kwic"), Some(""));
    }

    #[test]
    fn unbalanced_parens_are_rejected() {
        assert!(parse_hint_list("inverted=(indexing=Ngram").is_err());
        assert!(parse_hint_list("inverted=indexing)").is_err());
    }

    #[test]
    fn boolean_values() {
        assert!(read_bool("").unwrap());
        assert!(read_bool("TRUE").unwrap());
        assert!(!read_bool("false").unwrap());
        assert!(matches!(read_bool("banana"), Err(EngineError::SqlSyntax(_))));
    }
}
