//! Record parser
//!
//! Frames carry records written as brace groups of `key: value` pairs:
//!
//! ```text
//! {temp: 21.5, count: 007, label: 'boiler', raw: b"AAEC"}
//! ```
//!
//! Only the first group of a frame is used. Values are typed by shape:
//! digit-only text is an integer, anything `f64` accepts is a float (digits
//! may be grouped with `_`),
//! `b"..."`/`b'...'` is base64-encoded bytes and everything else is a string
//! with surrounding quotes removed.
//!
//! A value ends at the first comma followed by another `key:` pair, so commas
//! inside a value survive as long as no identifier and colon follow them.
//!
//! # Example
//!
//! ```
//! use sensorvis_rs::parser::parse;
//! use sensorvis_rs::types::Value;
//!
//! let record = parse("{a: 1, a: 2, b: 'x'}").unwrap();
//! assert_eq!(record.get("a"), Some(&Value::Sequence(vec![Value::Integer(1), Value::Integer(2)])));
//! assert_eq!(record.get("b"), Some(&Value::String("x".into())));
//! ```

use crate::error::FrameError;
use crate::types::{ParsedRecord, Value};
use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;
use std::sync::OnceLock;

/// Control characters and their two-character escapes
const ESCAPES: [(char, &str); 5] = [
    ('\n', "\\n"),
    ('\r', "\\r"),
    ('\t', "\\t"),
    ('\u{8}', "\\b"),
    ('\u{c}', "\\f"),
];

/// Parse the first brace group of `text`
///
/// Returns `None` when the text holds no group or a binary field is not
/// valid base64.
pub fn parse(text: &str) -> Option<ParsedRecord> {
    try_parse(text).ok()
}

/// Like [`parse`], reporting why the text was rejected
pub fn try_parse(text: &str) -> Result<ParsedRecord, FrameError> {
    let escaped = escape(text);
    let group = first_group(&escaped).ok_or(FrameError::MalformedRecord)?;

    let pairs = split_pairs(group)
        .into_iter()
        .map(|(key, raw)| {
            let value = coerce(&key, &raw)?;
            Ok((key, value))
        })
        .collect::<Result<Vec<_>, FrameError>>()?;

    Ok(ParsedRecord::from_pairs(pairs))
}

/// Render a record as a brace group that [`parse`] reads back
pub fn render(record: &ParsedRecord) -> String {
    let mut out = String::from("{");
    let mut first = true;
    for (key, value) in record.iter() {
        match value {
            Value::Sequence(items) => {
                for item in items {
                    push_pair(&mut out, &mut first, key, item);
                }
            }
            scalar => push_pair(&mut out, &mut first, key, scalar),
        }
    }
    out.push('}');
    out
}

fn push_pair(out: &mut String, first: &mut bool, key: &str, value: &Value) {
    if !*first {
        out.push_str(", ");
    }
    *first = false;
    out.push_str(key);
    out.push_str(": ");
    match value {
        Value::Integer(i) => out.push_str(&i.to_string()),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => {
            // Keep the decimal point so it does not read back as an integer
            out.push_str(&format!("{:.1}", f))
        }
        Value::Float(f) => out.push_str(&f.to_string()),
        Value::String(s) => {
            out.push('\'');
            out.push_str(&escape(s));
            out.push('\'');
        }
        Value::Bytes(b) => {
            out.push_str("b\"");
            out.push_str(&STANDARD.encode(b));
            out.push('"');
        }
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                    out.push_str(key);
                    out.push_str(": ");
                }
                out.push_str(&item.to_string());
            }
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match ESCAPES.iter().find(|(raw, _)| *raw == c) {
            Some((_, esc)) => out.push_str(esc),
            None => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    ESCAPES
        .iter()
        .fold(text.to_string(), |acc, (raw, esc)| acc.replace(*esc, &raw.to_string()))
}

// White space in these patterns is `\s` plus the information separators U+001C..U+001F.

/// `{...}` holding no nested braces
fn group_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("group regex"))
}

/// `key:` with the white space after the colon captured
fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\w+)[\s\x1C-\x1F]*:([\s\x1C-\x1F]*)").expect("key regex")
    })
}

/// `,` followed by the next `key:`
fn boundary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r",[\s\x1C-\x1F]*\w+[\s\x1C-\x1F]*:").expect("boundary regex")
    })
}

/// Contents of the first `{...}` holding no nested braces
fn first_group(text: &str) -> Option<&str> {
    group_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str())
}

/// Split a group body into raw `(key, value)` pairs
///
/// Text that does not form a pair is skipped.
fn split_pairs(group: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut pos = 0;

    while let Some(caps) = key_pattern().captures_at(group, pos) {
        let (Some(key), Some(gap)) = (caps.get(1), caps.get(2)) else {
            break;
        };

        let mut start = gap.end();
        if start == group.len() {
            // A value needs one character; give back a white space if there is one
            match group[gap.range()].chars().next_back() {
                Some(last) => start -= last.len_utf8(),
                None => {
                    pos = gap.end();
                    continue;
                }
            }
        }

        let first_len = group[start..].chars().next().map_or(1, char::len_utf8);
        let end = boundary_pattern()
            .find_at(group, start + first_len)
            .map_or(group.len(), |m| m.start());

        pairs.push((key.as_str().to_string(), group[start..end].to_string()));
        pos = end;
    }
    pairs
}

/// Type a raw value by its shape
fn coerce(key: &str, raw: &str) -> Result<Value, FrameError> {
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(match raw.parse::<i64>() {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Float(raw.parse().unwrap_or(f64::INFINITY)),
        });
    }

    if let Some(f) = parse_float(raw) {
        return Ok(Value::Float(f));
    }

    if let Some(encoded) = binary_literal(raw) {
        return STANDARD
            .decode(encoded)
            .map(Value::Bytes)
            .map_err(|_| FrameError::InvalidBinaryField {
                field: key.to_string(),
            });
    }

    Ok(Value::String(unescape(
        raw.trim_matches(|c| c == '\'' || c == '"'),
    )))
}

/// `raw` as a float, accepting `_` only between two digits (`1_000`)
fn parse_float(raw: &str) -> Option<f64> {
    let text = raw.trim();
    if !text.contains('_') {
        return text.parse().ok();
    }

    let bytes = text.as_bytes();
    let mut cleaned = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        if c != '_' {
            cleaned.push(c);
            continue;
        }
        let digit_before = i > 0 && bytes[i - 1].is_ascii_digit();
        let digit_after = bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
        if !(digit_before && digit_after) {
            return None;
        }
    }
    cleaned.parse().ok()
}

/// Interior of `b"..."` or `b'...'`
fn binary_literal(raw: &str) -> Option<&str> {
    let rest = raw.strip_prefix('b')?;
    ['"', '\'']
        .into_iter()
        .find_map(|q| rest.strip_prefix(q)?.strip_suffix(q))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Integer(i)
    }

    #[test]
    fn test_scalar_fields() {
        let record = parse("{a: 1, b: 2}").unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("a"), Some(&int(1)));
        assert_eq!(record.get("b"), Some(&int(2)));
    }

    #[test]
    fn test_repeated_key_becomes_sequence() {
        let record = parse("{a: 1, a: 2}").unwrap();
        assert_eq!(record.get("a"), Some(&Value::Sequence(vec![int(1), int(2)])));
    }

    #[test]
    fn test_single_value_not_wrapped() {
        let record = parse("{a: 1}").unwrap();
        assert_eq!(record.get("a"), Some(&int(1)));
    }

    #[test]
    fn test_type_coercion() {
        let record = parse("{x: 3.14, s: 'hi', n: 007, d: \"quoted\"}").unwrap();
        assert_eq!(record.get("x"), Some(&Value::Float(3.14)));
        assert_eq!(record.get("s"), Some(&Value::String("hi".into())));
        assert_eq!(record.get("n"), Some(&int(7)));
        assert_eq!(record.get("d"), Some(&Value::String("quoted".into())));
    }

    #[test]
    fn test_float_forms() {
        let record = parse("{a: -2, b: 1e3, c: 5 , d: inf}").unwrap();
        assert_eq!(record.get("a"), Some(&Value::Float(-2.0)));
        assert_eq!(record.get("b"), Some(&Value::Float(1000.0)));
        assert_eq!(record.get("c"), Some(&Value::Float(5.0)));
        assert_eq!(record.get("d"), Some(&Value::Float(f64::INFINITY)));
    }

    #[test]
    fn test_huge_integer_falls_back_to_float() {
        let record = parse("{big: 99999999999999999999}").unwrap();
        assert!(matches!(record.get("big"), Some(Value::Float(f)) if *f > 9.9e19));
    }

    #[test]
    fn test_binary_field() {
        let record = parse("{raw: b\"AAEC\", alt: b'aGk='}").unwrap();
        assert_eq!(record.get("raw"), Some(&Value::Bytes(vec![0, 1, 2])));
        assert_eq!(record.get("alt"), Some(&Value::Bytes(b"hi".to_vec())));
    }

    #[test]
    fn test_invalid_binary_field_rejects_record() {
        assert_eq!(
            try_parse("{raw: b\"!!!\"}"),
            Err(FrameError::InvalidBinaryField {
                field: "raw".into()
            })
        );
        assert!(parse("{raw: b\"!!!\"}").is_none());
    }

    #[test]
    fn test_commas_inside_values() {
        let record = parse("{msg: hello, world, n: 1}").unwrap();
        assert_eq!(record.get("msg"), Some(&Value::String("hello, world".into())));
        assert_eq!(record.get("n"), Some(&int(1)));
    }

    #[test]
    fn test_only_first_group_used() {
        let record = parse("junk {a: 1} {b: 2}").unwrap();
        assert_eq!(record.get("a"), Some(&int(1)));
        assert!(record.get("b").is_none());
    }

    #[test]
    fn test_nested_braces_skip_to_inner_group() {
        let record = parse("{outer {a: 1}}").unwrap();
        assert_eq!(record.get("a"), Some(&int(1)));
    }

    #[test]
    fn test_no_group() {
        assert!(parse("a: 1, b: 2").is_none());
        assert!(parse("{unterminated: 1").is_none());
        assert_eq!(try_parse(""), Err(FrameError::MalformedRecord));
    }

    #[test]
    fn test_empty_group() {
        let record = parse("{}").unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn test_control_characters_round_trip() {
        let record = parse("{a: 'line1\nline2', b: 3}\r\n").unwrap();
        assert_eq!(record.get("a"), Some(&Value::String("line1\nline2".into())));
        assert_eq!(record.get("b"), Some(&int(3)));
    }

    #[test]
    fn test_trailing_delimiter_stays_outside_group() {
        let record = parse("{temp: 21}\n").unwrap();
        assert_eq!(record.get("temp"), Some(&int(21)));
    }

    #[test]
    fn test_render_reads_back() {
        let original = parse("{a: 1, a: 2, f: 2.0, s: 'x y', raw: b\"AAEC\"}").unwrap();
        let text = render(&original);
        assert_eq!(parse(&text).unwrap(), original);
    }

    #[test]
    fn test_underscore_digit_groups() {
        let record = parse("{a: 1_000, b: 2_5.0_5, c: 1e1_0}").unwrap();
        assert_eq!(record.get("a"), Some(&Value::Float(1000.0)));
        assert_eq!(record.get("b"), Some(&Value::Float(25.05)));
        assert_eq!(record.get("c"), Some(&Value::Float(1e10)));

        let record = parse("{a: _1, b: 1__0, c: 1_, d: 1_.5}").unwrap();
        assert_eq!(record.get("a"), Some(&Value::String("_1".into())));
        assert_eq!(record.get("b"), Some(&Value::String("1__0".into())));
        assert_eq!(record.get("c"), Some(&Value::String("1_".into())));
        assert_eq!(record.get("d"), Some(&Value::String("1_.5".into())));
    }

    #[test]
    fn test_separator_controls_count_as_white_space() {
        let record = parse("{a:\x1c1, b \x1f: 2,\x1dc: 3}").unwrap();
        assert_eq!(record.get("a"), Some(&int(1)));
        assert_eq!(record.get("b"), Some(&int(2)));
        assert_eq!(record.get("c"), Some(&int(3)));
    }

    #[test]
    fn test_white_space_kept_as_value_at_end() {
        let record = parse("{a: 1, b: }").unwrap();
        assert_eq!(record.get("a"), Some(&int(1)));
        assert_eq!(record.get("b"), Some(&Value::String(" ".into())));

        let record = parse("{a: 1, b:}").unwrap();
        assert_eq!(record.get("a"), Some(&int(1)));
        assert!(record.get("b").is_none());
    }

    #[test]
    fn test_unicode_keys_and_values() {
        let record = parse("{température: 21, état: 'prêt'}").unwrap();
        assert_eq!(record.get("température"), Some(&int(21)));
        assert_eq!(record.get("état"), Some(&Value::String("prêt".into())));
    }

    #[test]
    fn test_empty_value_swallows_next_pair() {
        let record = parse("{a:, b: 2}").unwrap();
        assert_eq!(record.get("a"), Some(&Value::String(", b: 2".into())));
        assert!(record.get("b").is_none());
    }
}
