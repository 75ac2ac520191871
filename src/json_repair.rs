use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref TRAILING_COMMA: Regex =
        Regex::new(r",(\s*[}\]])").expect("trailing comma pattern is valid");
}

/// Remove commas that directly precede a closing `}` or `]`.
///
/// Runs to a fixed point so runs like `[1,,]` collapse fully, which also makes
/// the function idempotent. The pattern is not string-aware; callers only use
/// it after a strict decode has already failed.
pub fn remove_trailing_commas(text: &str) -> Cow<'_, str> {
    let mut current = Cow::Borrowed(text);
    loop {
        let replaced = match TRAILING_COMMA.replace_all(&current, "$1") {
            Cow::Borrowed(_) => None,
            Cow::Owned(replaced) => Some(replaced),
        };
        match replaced {
            Some(next) => current = Cow::Owned(next),
            None => return current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_trailing_commas() {
        assert_eq!(remove_trailing_commas(r#"{"a": 1, "b": 2,}"#), r#"{"a": 1, "b": 2}"#);
        assert_eq!(remove_trailing_commas("[1, 2, 3,]"), "[1, 2, 3]");
    }

    #[test]
    fn test_nested_trailing_commas_with_whitespace() {
        let input = "{\"items\": [1, 2,\n  ],\n \"x\": 1,\n}";
        assert_eq!(remove_trailing_commas(input), "{\"items\": [1, 2\n  ],\n \"x\": 1\n}");
    }

    #[test]
    fn test_clean_input_is_borrowed() {
        let input = r#"{"a": [1, 2], "b": {"c": 3}}"#;
        assert!(matches!(remove_trailing_commas(input), Cow::Borrowed(_)));
    }

    #[test]
    fn test_repair_is_idempotent() {
        let inputs = [
            r#"{"a": 1,}"#,
            "[1,,]",
            "{\"x\": [[1,],],}",
            r#"{"ok": true}"#,
        ];
        for input in inputs {
            let once = remove_trailing_commas(input).into_owned();
            let twice = remove_trailing_commas(&once).into_owned();
            assert_eq!(once, twice, "repair not idempotent for {input}");
        }
    }
}
