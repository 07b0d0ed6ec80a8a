//! Expansion of `{name}` and `{name|alt}` references inside strings.
//!
//! References resolve against an [`Environment`]. Names of the form
//! `U+XXXX` are reserved and resolve to the Unicode code point they
//! name, which is how scripts write a literal brace (`{U+007B}`).
//! Substituted values are never re-scanned, so a binding that refers
//! to itself cannot loop.

use crate::environment::Environment;
use serde_json::Value;

/// Expands variable references against one environment.
#[derive(Debug, Clone, Copy)]
pub struct VariableResolver<'a> {
    env: &'a Environment,
}

/// A well-formed reference found at some `{`.
struct Reference<'t> {
    name: &'t str,
    alt: Option<&'t str>,
    /// Byte offset just past the closing `}`.
    end: usize,
}

impl<'a> VariableResolver<'a> {
    pub fn new(env: &'a Environment) -> Self {
        Self { env }
    }

    /// Replace every resolvable reference in `text` with the string
    /// form of its value.
    ///
    /// Unbound references without alt text, and braces that do not
    /// form a reference, are kept verbatim.
    pub fn expand(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;

        while let Some(offset) = text[pos..].find('{') {
            let start = pos + offset;
            out.push_str(&text[pos..start]);

            let Some(reference) = parse_reference(text, start) else {
                out.push('{');
                pos = start + 1;
                continue;
            };

            match self.lookup(reference.name) {
                Some(value) => out.push_str(&stringify(&value)),
                None => match reference.alt {
                    Some(alt) => out.push_str(&self.expand(alt)),
                    None => out.push_str(&text[start..reference.end]),
                },
            }
            pos = reference.end;
        }

        out.push_str(&text[pos..]);
        out
    }

    /// Like [`expand`](Self::expand) but passes absence through.
    pub fn expand_opt(&self, text: Option<&str>) -> Option<String> {
        text.map(|t| self.expand(t))
    }

    /// Expand every string inside a JSON value.
    ///
    /// A string that is a single bare reference to a bound variable is
    /// replaced by the bound value itself, so numbers, booleans and
    /// nested structures survive expansion unchanged.
    pub fn expand_value(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => self
                .resolve_var_value(text)
                .unwrap_or_else(|| Value::String(self.expand(text))),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.expand_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (self.expand(k), self.expand_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve a value node (`"{name}"` or `"{name|alt}"`) to the value
    /// it denotes.
    ///
    /// Returns the bound value when `name` is bound. Otherwise the alt
    /// text is used: as a value node itself when it is one, else as its
    /// expanded string. `None` when `text` is not a value node or
    /// nothing resolves.
    pub fn resolve_var_value(&self, text: &str) -> Option<Value> {
        let trimmed = text.trim();
        let reference = parse_value_node(trimmed)?;

        if let Some(value) = self.lookup(reference.name) {
            return Some(value);
        }
        let alt = reference.alt?;
        self.resolve_var_value(alt)
            .or_else(|| Some(Value::String(self.expand(alt))))
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if is_code_point_name(name) {
            return code_point_value(name).map(|c| Value::String(c.to_string()));
        }
        self.env.binding(name).cloned()
    }
}

/// `true` when `text`, once trimmed, is exactly one well-formed
/// reference with no surrounding literal text.
pub fn is_value_node(text: &str) -> bool {
    parse_value_node(text.trim()).is_some()
}

/// `true` for the reserved `U+XXXX` pseudo-variable names (4 to 6 hex
/// digits, either case of `U`).
pub fn is_code_point_name(name: &str) -> bool {
    let Some(digits) = name
        .strip_prefix("U+")
        .or_else(|| name.strip_prefix("u+"))
    else {
        return false;
    };
    (4..=6).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_hexdigit())
}

/// The character a `U+XXXX` name denotes, if it is a valid code point.
pub fn code_point_value(name: &str) -> Option<char> {
    if !is_code_point_name(name) {
        return None;
    }
    u32::from_str_radix(&name[2..], 16)
        .ok()
        .and_then(char::from_u32)
}

/// String form used for substitution: strings as-is, everything else
/// as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '$' | '+')
}

fn parse_value_node(trimmed: &str) -> Option<Reference<'_>> {
    if !trimmed.starts_with('{') {
        return None;
    }
    parse_reference(trimmed, 0).filter(|r| r.end == trimmed.len())
}

/// Parse the reference opening at byte `start` (which holds `{`).
fn parse_reference(text: &str, start: usize) -> Option<Reference<'_>> {
    let name_start = start + 1;
    let rest = &text[name_start..];
    let name_len = rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len());
    if name_len == 0 {
        return None;
    }
    let name = &rest[..name_len];
    let after = name_start + name_len;

    match text[after..].chars().next()? {
        '}' => Some(Reference {
            name,
            alt: None,
            end: after + 1,
        }),
        '|' => {
            let alt_start = after + 1;
            let mut depth = 1usize;
            for (offset, c) in text[alt_start..].char_indices() {
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            let alt_end = alt_start + offset;
                            return Some(Reference {
                                name,
                                alt: Some(&text[alt_start..alt_end]),
                                end: alt_end + 1,
                            });
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, Value)]) -> Environment {
        let mut env = Environment::new();
        for (name, value) in pairs {
            env.bind(*name, value.clone()).unwrap();
        }
        env
    }

    #[test]
    fn test_text_without_braces_is_unchanged() {
        let env = env(&[("x", json!("5"))]);
        let r = VariableResolver::new(&env);
        for s in ["", "plain text", "x", "a | b", "éü 日本"] {
            assert_eq!(r.expand(s), s);
        }
    }

    #[test]
    fn test_absent_input_stays_absent() {
        let env = Environment::new();
        assert_eq!(VariableResolver::new(&env).expand_opt(None), None);
    }

    #[test]
    fn test_simple_and_default_references() {
        let env = env(&[("x", json!("5"))]);
        let r = VariableResolver::new(&env);
        assert_eq!(r.expand("{x}"), "5");
        assert_eq!(r.expand("{y|default}"), "default");
        assert_eq!(r.expand("{y|{x}}"), "5");
        assert_eq!(r.expand("{x|ignored}"), "5");
        assert_eq!(r.expand("x={x}, y={y|none}."), "x=5, y=none.");
    }

    #[test]
    fn test_nested_defaults() {
        let env = env(&[("c", json!("deep"))]);
        let r = VariableResolver::new(&env);
        assert_eq!(r.expand("{a|{b|{c}}}"), "deep");
        assert_eq!(r.expand("{a|{b|fallback}}"), "fallback");
        assert_eq!(r.expand("{a|}"), "");
    }

    #[test]
    fn test_unresolved_reference_is_kept() {
        let env = Environment::new();
        let r = VariableResolver::new(&env);
        assert_eq!(r.expand("hello {who}"), "hello {who}");
    }

    #[test]
    fn test_malformed_braces_are_kept() {
        let env = env(&[("x", json!(1))]);
        let r = VariableResolver::new(&env);
        assert_eq!(r.expand("{"), "{");
        assert_eq!(r.expand("}"), "}");
        assert_eq!(r.expand("{}"), "{}");
        assert_eq!(r.expand("{ x }"), "{ x }");
        assert_eq!(r.expand("{x|unterminated"), "{x|unterminated");
        assert_eq!(r.expand(r#"{"a": {x}}"#), r#"{"a": 1}"#);
    }

    #[test]
    fn test_non_string_values_are_json_encoded() {
        let env = env(&[
            ("n", json!(42)),
            ("b", json!(true)),
            ("o", json!({"k": [1, 2]})),
            ("z", Value::Null),
        ]);
        let r = VariableResolver::new(&env);
        assert_eq!(r.expand("{n}/{b}"), "42/true");
        assert_eq!(r.expand("{o}"), r#"{"k":[1,2]}"#);
        assert_eq!(r.expand("{z}"), "null");
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let env = env(&[("loop", json!("{loop}")), ("x", json!("{y}")), ("y", json!("no"))]);
        let r = VariableResolver::new(&env);
        assert_eq!(r.expand("{loop}"), "{loop}");
        assert_eq!(r.expand("{x}"), "{y}");
    }

    #[test]
    fn test_code_point_pseudo_variables() {
        let env = Environment::new();
        let r = VariableResolver::new(&env);
        assert_eq!(r.expand("{U+007B}x{U+007D}"), "{x}");
        assert_eq!(r.expand("{u+00e9}"), "é");
        assert_eq!(r.expand("{U+1F600}"), "😀");
        assert_eq!(r.expand("{U+D800}"), "{U+D800}");
    }

    #[test]
    fn test_code_point_names() {
        assert!(is_code_point_name("U+0041"));
        assert!(is_code_point_name("u+10FFFF"));
        assert!(!is_code_point_name("U+41"));
        assert!(!is_code_point_name("U+0041234"));
        assert!(!is_code_point_name("U+00G1"));
        assert!(!is_code_point_name("X+0041"));
        assert_eq!(code_point_value("U+0041"), Some('A'));
        assert_eq!(code_point_value("U+110000"), None);
    }

    #[test]
    fn test_value_node_detection() {
        assert!(is_value_node("{x}"));
        assert!(is_value_node("  {x}  "));
        assert!(is_value_node("{x|{y}}"));
        assert!(!is_value_node("a{x}"));
        assert!(!is_value_node("{x}{y}"));
        assert!(!is_value_node("{x|a}b"));
        assert!(!is_value_node("x"));
    }

    #[test]
    fn test_resolve_var_value_preserves_types() {
        let env = env(&[("n", json!(7)), ("o", json!({"a": [1]}))]);
        let r = VariableResolver::new(&env);
        assert_eq!(r.resolve_var_value("{n}"), Some(json!(7)));
        assert_eq!(r.resolve_var_value("{o}"), Some(json!({"a": [1]})));
        assert_eq!(r.resolve_var_value("{missing|{n}}"), Some(json!(7)));
        assert_eq!(r.resolve_var_value("{missing|n={n}}"), Some(json!("n=7")));
        assert_eq!(r.resolve_var_value("{missing}"), None);
        assert_eq!(r.resolve_var_value("n is {n}"), None);
    }

    #[test]
    fn test_expand_value_walks_structures() {
        let env = env(&[("id", json!(12)), ("who", json!("ann"))]);
        let r = VariableResolver::new(&env);
        let expanded = r.expand_value(&json!({
            "id": "{id}",
            "greeting": "hi {who}",
            "list": ["{who}", 3, null],
            "{who}": true
        }));
        assert_eq!(
            expanded,
            json!({
                "id": 12,
                "greeting": "hi ann",
                "list": ["ann", 3, null],
                "ann": true
            })
        );
    }
}
