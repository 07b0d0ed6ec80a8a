//! Built-in assertions.

use super::{is_truthy, AssertionPlugin, CallContext, Verdict};
use crate::resolver::stringify;
use crate::runtime::Runtime;
use crate::validator;
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// `{"status": 200}`, `{"status": [200, 201]}` or `{"status": "2.."}`
/// (a regex matched against the whole status code).
pub struct StatusAssertion;

impl AssertionPlugin for StatusAssertion {
    fn evaluate(&self, spec: &Value, ctx: &CallContext<'_>, runtime: &Runtime) -> Result<Verdict> {
        let status = ctx.require_response("status assertion")?.status;
        let expected = runtime.expand_value(spec);
        let candidates: Vec<&Value> = match &expected {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };

        for candidate in &candidates {
            if status_matches(status, candidate)? {
                return Ok(Verdict::Pass);
            }
        }
        Ok(Verdict::Fail(format!(
            "status {status} does not match {expected}"
        )))
    }
}

fn status_matches(status: u16, expected: &Value) -> Result<bool> {
    match expected {
        Value::Number(n) => Ok(n.as_u64() == Some(u64::from(status))),
        Value::String(pattern) => {
            let re = Regex::new(&format!("^(?:{pattern})$"))
                .context(format!("Invalid status pattern '{pattern}'"))?;
            Ok(re.is_match(&status.to_string()))
        }
        other => bail!("status must be a number, pattern or list, got {other}"),
    }
}

/// `{"headers": {"Content-Type": "application/json"}}`
pub struct HeadersAssertion;

impl AssertionPlugin for HeadersAssertion {
    fn evaluate(&self, spec: &Value, ctx: &CallContext<'_>, runtime: &Runtime) -> Result<Verdict> {
        let response = ctx.require_response("headers assertion")?;
        let Value::Object(expected) = spec else {
            bail!("headers assertion expects an object, got {spec}");
        };
        let expected: Vec<(String, String)> = expected
            .iter()
            .map(|(name, value)| (name.clone(), stringify(&runtime.expand_value(value))))
            .collect();

        let errors = validator::validate_headers(&response.headers, &expected);
        Ok(verdict(errors))
    }
}

/// `{"json": <expected>}`: the response body must equal the expanded
/// expected JSON.
pub struct JsonAssertion;

impl AssertionPlugin for JsonAssertion {
    fn evaluate(&self, spec: &Value, ctx: &CallContext<'_>, runtime: &Runtime) -> Result<Verdict> {
        let response = ctx.require_response("json assertion")?;
        let Some(actual) = response.json() else {
            return Ok(Verdict::Fail("response body is not valid JSON".to_string()));
        };
        let expected = runtime.expand_value(spec);

        Ok(match validator::json_difference(&expected, &actual) {
            None => Verdict::Pass,
            Some(diff) => Verdict::Fail(diff),
        })
    }
}

/// `{"contains": "text"}` or `{"contains": ["a", "b"]}`
pub struct ContainsAssertion;

impl AssertionPlugin for ContainsAssertion {
    fn evaluate(&self, spec: &Value, ctx: &CallContext<'_>, runtime: &Runtime) -> Result<Verdict> {
        let response = ctx.require_response("contains assertion")?;
        let texts = string_list(spec, "contains")?
            .into_iter()
            .map(|t| runtime.expand(&t))
            .collect::<Vec<_>>();
        Ok(verdict(validator::validate_contains(&response.body, &texts)))
    }
}

/// `{"bound": "name"}` or `{"bound": ["a", "b"]}`: the variables must
/// be bound.
pub struct BoundAssertion;

impl AssertionPlugin for BoundAssertion {
    fn evaluate(&self, spec: &Value, _ctx: &CallContext<'_>, runtime: &Runtime) -> Result<Verdict> {
        let unbound: Vec<String> = string_list(spec, "bound")?
            .into_iter()
            .filter(|name| !runtime.bound(name))
            .collect();
        Ok(if unbound.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail(format!("unbound variable(s): {}", unbound.join(", ")))
        })
    }
}

/// An expression that must evaluate to a truthy value. Bare strings in
/// an assertion list use the runtime's default language; an object key
/// naming a script engine selects that engine.
pub struct ScriptAssertion {
    language: Option<String>,
}

impl ScriptAssertion {
    pub fn new(language: Option<String>) -> Self {
        Self { language }
    }
}

impl AssertionPlugin for ScriptAssertion {
    fn evaluate(&self, spec: &Value, _ctx: &CallContext<'_>, runtime: &Runtime) -> Result<Verdict> {
        let engine = runtime.script_engine(self.language.as_deref())?;
        for expr in string_list(spec, "expression")? {
            let expanded = runtime.expand(&expr);
            let result = engine
                .evaluate(&expanded, runtime.env())
                .context(format!("Failed to evaluate assertion '{expanded}'"))?;
            debug!("Assertion '{}' evaluated to {}", expanded, result);
            if !is_truthy(&result) {
                return Ok(Verdict::Fail(format!("'{expanded}' evaluated to {result}")));
            }
        }
        Ok(Verdict::Pass)
    }
}

fn verdict(errors: Vec<String>) -> Verdict {
    if errors.is_empty() {
        Verdict::Pass
    } else {
        Verdict::Fail(errors.join("; "))
    }
}

fn string_list(spec: &Value, what: &str) -> Result<Vec<String>> {
    match spec {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(anyhow!("{what} entries must be strings, got {other}")),
            })
            .collect(),
        other => Err(anyhow!("{what} expects a string or list of strings, got {other}")),
    }
}
