//! Built-in request body generators.

use super::{BodyGenerator, RequestBody};
use crate::runtime::Runtime;
use anyhow::{bail, Context, Result};
use serde_json::Value;

/// `{"json": <value>}`: the expanded value, sent as JSON.
pub struct JsonBody;

impl BodyGenerator for JsonBody {
    fn generate(&self, spec: &Value, runtime: &Runtime) -> Result<RequestBody> {
        let expanded = runtime.expand_value(spec);
        let content = serde_json::to_string(&expanded).context("Failed to encode JSON body")?;
        Ok(RequestBody {
            content,
            content_type: Some("application/json".to_string()),
        })
    }
}

/// `{"text": "line"}` or `{"text": ["line 1", "line 2"]}`: expanded
/// text, lists joined with newlines.
pub struct TextBody;

impl BodyGenerator for TextBody {
    fn generate(&self, spec: &Value, runtime: &Runtime) -> Result<RequestBody> {
        let content = match spec {
            Value::String(text) => runtime.expand(text),
            Value::Array(lines) => {
                let mut out = Vec::with_capacity(lines.len());
                for line in lines {
                    let Value::String(line) = line else {
                        bail!("text body lines must be strings, got {line}");
                    };
                    out.push(runtime.expand(line));
                }
                out.join("\n")
            }
            other => bail!("text body expects a string or list of strings, got {other}"),
        };
        Ok(RequestBody {
            content,
            content_type: Some("text/plain".to_string()),
        })
    }
}
