//! Header and structured-body redaction.
//!
//! Headers named in the redaction set are removed from the captured map
//! outright. Body fields are addressed with a small JSONPath subset and
//! replaced with [`REDACTION_MARKER`], so the payload keeps its shape:
//!
//! | Syntax            | Selects                                  |
//! |-------------------|------------------------------------------|
//! | `$`               | the whole document                       |
//! | `.name`           | object member `name`                     |
//! | `['name']`        | object member `name` (any characters)    |
//! | `[3]`             | array element 3                          |
//! | `[*]` / `.*`      | every member or element                  |
//! | `..name`          | member `name` at any depth               |
//!
//! A body that is not valid JSON is never touched here; the caller decides
//! what to do with it (see [`UnparseableBodyPolicy`](crate::UnparseableBodyPolicy)).

use crate::capture::HeaderFields;
use crate::error::{MonoscopeError, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Replacement written over every redacted body value.
pub const REDACTION_MARKER: &str = "[CLIENT_REDACTED]";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
    Descend(String),
}

/// A parsed redaction path such as `$.user.credit_card`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parse a path expression.
    ///
    /// A leading `$` is optional: `password` is read as `$.password`.
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(MonoscopeError::invalid_path(expr, "empty path"));
        }

        let normalized = if trimmed.starts_with('$') {
            trimmed.to_string()
        } else if trimmed.starts_with('[') {
            format!("${}", trimmed)
        } else {
            format!("$.{}", trimmed)
        };

        let chars: Vec<char> = normalized.chars().collect();
        let mut segments = Vec::new();
        let mut pos = 1;

        while pos < chars.len() {
            match chars[pos] {
                '.' if chars.get(pos + 1) == Some(&'.') => {
                    pos += 2;
                    let name = read_name(&chars, &mut pos);
                    if name.is_empty() {
                        return Err(MonoscopeError::invalid_path(
                            expr,
                            "recursive descent needs a member name",
                        ));
                    }
                    segments.push(Segment::Descend(name));
                }
                '.' => {
                    pos += 1;
                    if chars.get(pos) == Some(&'*') {
                        pos += 1;
                        segments.push(Segment::Wildcard);
                        continue;
                    }
                    let name = read_name(&chars, &mut pos);
                    if name.is_empty() {
                        return Err(MonoscopeError::invalid_path(expr, "empty member name"));
                    }
                    segments.push(Segment::Field(name));
                }
                '[' => {
                    pos += 1;
                    segments.push(read_bracket(expr, &chars, &mut pos)?);
                }
                other => {
                    return Err(MonoscopeError::invalid_path(
                        expr,
                        format!("unexpected character `{}`", other),
                    ));
                }
            }
        }

        Ok(Self {
            raw: normalized,
            segments,
        })
    }

    /// The normalized expression, always starting with `$`.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Replace every value this path selects inside `value` with the marker.
    ///
    /// Returns whether anything was selected.
    pub fn redact(&self, value: &mut Value) -> bool {
        apply(value, &self.segments)
    }
}

impl FromStr for FieldPath {
    type Err = MonoscopeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn read_name(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && chars[*pos] != '.' && chars[*pos] != '[' {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn read_bracket(expr: &str, chars: &[char], pos: &mut usize) -> Result<Segment> {
    let segment = match chars.get(*pos) {
        Some('*') => {
            *pos += 1;
            Segment::Wildcard
        }
        Some(&quote) if quote == '\'' || quote == '"' => {
            *pos += 1;
            let start = *pos;
            while *pos < chars.len() && chars[*pos] != quote {
                *pos += 1;
            }
            if *pos >= chars.len() {
                return Err(MonoscopeError::invalid_path(expr, "unterminated quoted name"));
            }
            let name: String = chars[start..*pos].iter().collect();
            *pos += 1;
            Segment::Field(name)
        }
        Some(c) if c.is_ascii_digit() => {
            let start = *pos;
            while *pos < chars.len() && chars[*pos].is_ascii_digit() {
                *pos += 1;
            }
            let digits: String = chars[start..*pos].iter().collect();
            let index = digits
                .parse()
                .map_err(|_| MonoscopeError::invalid_path(expr, "array index out of range"))?;
            Segment::Index(index)
        }
        _ => {
            return Err(MonoscopeError::invalid_path(
                expr,
                "expected `*`, a quoted name or an index inside brackets",
            ))
        }
    };

    if chars.get(*pos) != Some(&']') {
        return Err(MonoscopeError::invalid_path(expr, "missing closing `]`"));
    }
    *pos += 1;
    Ok(segment)
}

fn apply(value: &mut Value, segments: &[Segment]) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        *value = Value::String(REDACTION_MARKER.to_string());
        return true;
    };

    match head {
        Segment::Field(name) => match value {
            Value::Object(map) => map.get_mut(name).map_or(false, |child| apply(child, rest)),
            _ => false,
        },
        Segment::Index(index) => match value {
            Value::Array(items) => items.get_mut(*index).map_or(false, |child| apply(child, rest)),
            _ => false,
        },
        Segment::Wildcard => match value {
            Value::Object(map) => map
                .values_mut()
                .fold(false, |hit, child| apply(child, rest) | hit),
            Value::Array(items) => items
                .iter_mut()
                .fold(false, |hit, child| apply(child, rest) | hit),
            _ => false,
        },
        Segment::Descend(name) => descend(value, name, rest),
    }
}

fn descend(value: &mut Value, name: &str, rest: &[Segment]) -> bool {
    match value {
        Value::Object(map) => {
            let mut hit = false;
            for (key, child) in map.iter_mut() {
                if key == name {
                    hit |= apply(child, rest);
                }
                hit |= descend(child, name, rest);
            }
            hit
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |hit, child| descend(child, name, rest) | hit),
        _ => false,
    }
}

/// Parse a list of path expressions, dropping (and logging) invalid ones.
pub fn compile_paths<I, S>(exprs: I) -> Vec<FieldPath>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    exprs
        .into_iter()
        .filter_map(|expr| match FieldPath::parse(expr.as_ref()) {
            Ok(path) => Some(path),
            Err(error) => {
                tracing::warn!(target: "monoscope::redact", %error, "ignoring redaction path");
                None
            }
        })
        .collect()
}

/// Outcome of redacting one captured body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyRedaction {
    /// Nothing to do: no paths configured, an empty body, or no path
    /// selected anything. The body is to be used as-is.
    Skipped,
    /// The body parsed and was re-serialized with the selected values masked.
    Redacted(Vec<u8>),
    /// Paths were configured but the body is not JSON.
    Unparseable,
}

/// Apply `paths` to a raw JSON body.
pub fn redact_body(body: &[u8], paths: &[FieldPath]) -> BodyRedaction {
    if paths.is_empty() || body.iter().all(u8::is_ascii_whitespace) {
        return BodyRedaction::Skipped;
    }

    let mut value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => return BodyRedaction::Unparseable,
    };
    let mut hit = false;
    for path in paths {
        hit |= path.redact(&mut value);
    }
    if !hit {
        return BodyRedaction::Skipped;
    }

    match serde_json::to_vec(&value) {
        Ok(bytes) => BodyRedaction::Redacted(bytes),
        Err(_) => BodyRedaction::Unparseable,
    }
}

/// Remove every header whose lower-cased name is in `names`.
///
/// `names` is expected to hold lower-cased entries already.
pub fn redact_headers(headers: &mut HeaderFields, names: &HashSet<String>) {
    if names.is_empty() {
        return;
    }
    headers.retain(|name, _| !names.contains(&name.to_ascii_lowercase()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use proptest::test_runner::TestCaseError;
    use serde_json::json;

    fn paths(exprs: &[&str]) -> Vec<FieldPath> {
        exprs.iter().map(|e| FieldPath::parse(e).unwrap()).collect()
    }

    fn redacted(body: &Value, exprs: &[&str]) -> Value {
        let raw = serde_json::to_vec(body).unwrap();
        match redact_body(&raw, &paths(exprs)) {
            BodyRedaction::Redacted(out) => serde_json::from_slice(&out).unwrap(),
            other => panic!("expected redaction, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_member_path() {
        let path = FieldPath::parse("$.user.credit_card").unwrap();
        assert_eq!(
            path.segments,
            vec![
                Segment::Field("user".into()),
                Segment::Field("credit_card".into())
            ]
        );
    }

    #[test]
    fn test_parse_without_root_marker() {
        assert_eq!(FieldPath::parse("password").unwrap().as_str(), "$.password");
        assert_eq!(FieldPath::parse("[0].id").unwrap().as_str(), "$[0].id");
    }

    #[test]
    fn test_parse_brackets_and_wildcards() {
        let path = FieldPath::parse("$.items[*]['card number'][2].*").unwrap();
        assert_eq!(
            path.segments,
            vec![
                Segment::Field("items".into()),
                Segment::Wildcard,
                Segment::Field("card number".into()),
                Segment::Index(2),
                Segment::Wildcard,
            ]
        );
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("$.").is_err());
        assert!(FieldPath::parse("$..").is_err());
        assert!(FieldPath::parse("$.a[").is_err());
        assert!(FieldPath::parse("$.a['b").is_err());
        assert!(FieldPath::parse("$.a[x]").is_err());
        assert!(FieldPath::parse("$x").is_err());
    }

    #[test]
    fn test_compile_paths_drops_invalid_entries() {
        let compiled = compile_paths(["$.password", "$.a[", "token"]);
        let raw: Vec<&str> = compiled.iter().map(FieldPath::as_str).collect();
        assert_eq!(raw, vec!["$.password", "$.token"]);
    }

    #[test]
    fn test_redact_top_level_field_keeps_siblings() {
        let out = redacted(
            &json!({"password": "secret123", "username": "john"}),
            &["$.password"],
        );
        assert_eq!(out["password"], REDACTION_MARKER);
        assert_eq!(out["username"], "john");
    }

    #[test]
    fn test_redact_nested_field_and_object_value() {
        let out = redacted(
            &json!({"user": {"credit_card": {"number": "4111", "cvv": 123}, "name": "a"}}),
            &["$.user.credit_card"],
        );
        assert_eq!(out["user"]["credit_card"], REDACTION_MARKER);
        assert_eq!(out["user"]["name"], "a");
    }

    #[test]
    fn test_redact_array_index_and_wildcard() {
        let body = json!({"cards": [{"pan": "1"}, {"pan": "2"}, {"pan": "3"}]});

        let first = redacted(&body, &["$.cards[0].pan"]);
        assert_eq!(first["cards"][0]["pan"], REDACTION_MARKER);
        assert_eq!(first["cards"][1]["pan"], "2");

        let all = redacted(&body, &["$.cards[*].pan"]);
        for card in all["cards"].as_array().unwrap() {
            assert_eq!(card["pan"], REDACTION_MARKER);
        }
    }

    #[test]
    fn test_redact_recursive_descent() {
        let out = redacted(
            &json!({"token": "a", "nested": {"token": "b", "list": [{"token": "c"}]}}),
            &["$..token"],
        );
        assert_eq!(out["token"], REDACTION_MARKER);
        assert_eq!(out["nested"]["token"], REDACTION_MARKER);
        assert_eq!(out["nested"]["list"][0]["token"], REDACTION_MARKER);
    }

    #[test]
    fn test_missing_path_leaves_body_untouched() {
        let raw = br#"{"username":"john","score":1.50}"#;
        let result = redact_body(raw, &paths(&["$.password", "$.a.b[3]"]));
        assert_eq!(result, BodyRedaction::Skipped);
    }

    #[test]
    fn test_untouched_fields_keep_order_and_number_text() {
        let raw = br#"{"zeta":1,"id":123456789012345678901234567890,"amount":1.50,"password":"x"}"#;
        let result = redact_body(raw, &paths(&["$.password"]));

        let expected = br#"{"zeta":1,"id":123456789012345678901234567890,"amount":1.50,"password":"[CLIENT_REDACTED]"}"#;
        assert_eq!(result, BodyRedaction::Redacted(expected.to_vec()));
    }

    #[test]
    fn test_unparseable_body_is_reported_not_touched() {
        let result = redact_body(b"password=secret", &paths(&["$.password"]));
        assert_eq!(result, BodyRedaction::Unparseable);
    }

    #[test]
    fn test_empty_body_or_no_paths_is_skipped() {
        assert_eq!(redact_body(b"", &paths(&["$.a"])), BodyRedaction::Skipped);
        assert_eq!(redact_body(b"{\"a\":1}", &[]), BodyRedaction::Skipped);
    }

    #[test]
    fn test_redact_headers_case_insensitive_removal() {
        let mut headers = HeaderFields::new();
        headers.insert("Authorization".into(), vec!["Bearer x".into()]);
        headers.insert("x-api-key".into(), vec!["k1".into(), "k2".into()]);
        headers.insert("content-type".into(), vec!["application/json".into()]);

        let names: HashSet<String> = ["authorization", "x-api-key"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        redact_headers(&mut headers, &names);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("content-type"));
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 48, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-c]{1,2}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_redaction_is_idempotent(
            body in arb_json(),
            selected in prop::sample::subsequence(
                vec!["$.a", "$.b.c", "$..a", "$.*.b", "$[0]", "$.a[*]", "$['ab'].c", "$..bc"],
                1..4,
            ),
        ) {
            let compiled = paths(&selected);
            let raw = serde_json::to_vec(&body).unwrap();

            let once = match redact_body(&raw, &compiled) {
                BodyRedaction::Redacted(out) => out,
                BodyRedaction::Skipped => raw.clone(),
                other => return Err(TestCaseError::fail(format!("unexpected {:?}", other))),
            };
            let twice = match redact_body(&once, &compiled) {
                BodyRedaction::Redacted(out) => out,
                BodyRedaction::Skipped => once.clone(),
                other => return Err(TestCaseError::fail(format!("unexpected {:?}", other))),
            };
            prop_assert_eq!(once, twice);
        }
    }
}
