//! Built-in extractors.

use super::{CallContext, ExtractorPlugin};
use crate::runtime::Runtime;
use crate::validator::get_by_json_path;
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use tracing::debug;

/// `{"json": "var"}` binds the whole parsed body;
/// `{"json": {"var": "data.items.0.id"}}` binds values at dotted paths.
pub struct JsonExtractor;

impl ExtractorPlugin for JsonExtractor {
    fn extract(&self, spec: &Value, ctx: &CallContext<'_>, runtime: &mut Runtime) -> Result<()> {
        let response = ctx.require_response("json extractor")?;
        let body = response
            .json()
            .ok_or_else(|| anyhow!("Failed to parse response of {} as JSON", ctx.script.label()))?;

        match spec {
            Value::String(var) => {
                runtime.bind(runtime.expand(var), body)?;
            }
            Value::Object(paths) => {
                for (var, path) in paths {
                    let Value::String(path) = path else {
                        bail!("json extractor path for '{var}' must be a string, got {path}");
                    };
                    let path = runtime.expand(path);
                    let value = get_by_json_path(&body, &path)
                        .ok_or_else(|| anyhow!("JSON path '{path}' not found in response"))?
                        .clone();
                    debug!("Extracted '{}' from {} = {}", var, path, value);
                    runtime.bind(var.clone(), value)?;
                }
            }
            other => bail!("json extractor expects a name or an object of paths, got {other}"),
        }
        Ok(())
    }
}

/// `{"headers": {"var": "Header-Name"}}`
pub struct HeadersExtractor;

impl ExtractorPlugin for HeadersExtractor {
    fn extract(&self, spec: &Value, ctx: &CallContext<'_>, runtime: &mut Runtime) -> Result<()> {
        let response = ctx.require_response("headers extractor")?;
        let names = object(spec, "headers extractor")?;
        for (var, header) in names {
            let Value::String(header) = header else {
                bail!("header name for '{var}' must be a string, got {header}");
            };
            let value = response
                .header(header)
                .ok_or_else(|| anyhow!("Header '{header}' not found in response"))?;
            runtime.bind(var.clone(), Value::String(value.to_string()))?;
        }
        Ok(())
    }
}

/// `{"text": "var"}` binds the raw response body.
pub struct TextExtractor;

impl ExtractorPlugin for TextExtractor {
    fn extract(&self, spec: &Value, ctx: &CallContext<'_>, runtime: &mut Runtime) -> Result<()> {
        let response = ctx.require_response("text extractor")?;
        let Value::String(var) = spec else {
            bail!("text extractor expects a variable name, got {spec}");
        };
        runtime.bind(var.clone(), Value::String(response.body.clone()))?;
        Ok(())
    }
}

/// `{"<language>": {"var": "expression"}}` binds expression results.
pub struct ScriptExtractor {
    language: Option<String>,
}

impl ScriptExtractor {
    pub fn new(language: Option<String>) -> Self {
        Self { language }
    }
}

impl ExtractorPlugin for ScriptExtractor {
    fn extract(&self, spec: &Value, _ctx: &CallContext<'_>, runtime: &mut Runtime) -> Result<()> {
        let engine = runtime.script_engine(self.language.as_deref())?;
        for (var, expr) in object(spec, "script extractor")? {
            let Value::String(expr) = expr else {
                bail!("expression for '{var}' must be a string, got {expr}");
            };
            let expanded = runtime.expand(expr);
            let value = engine
                .evaluate(&expanded, runtime.env())
                .context(format!("Failed to evaluate '{expanded}' for '{var}'"))?;
            debug!("Bound '{}' = {} from '{}'", var, value, expanded);
            runtime.bind(var.clone(), value)?;
        }
        Ok(())
    }
}

fn object<'a>(spec: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    match spec {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("{what} expects an object, got {other}")),
    }
}
