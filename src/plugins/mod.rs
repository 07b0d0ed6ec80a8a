//! Plugin capabilities the runtime invokes per script directive, and
//! the registry they are looked up in.
//!
//! A registry is built once and handed to each runtime explicitly;
//! [`PluginRegistry::builtin`] provides the default set.

pub mod assertions;
pub mod extractors;
pub mod generators;

use crate::environment::Environment;
use crate::expression::CelEngine;
use crate::model::{ApiRequest, ApiResponse, Script};
use crate::runtime::Runtime;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What an assertion or extractor can see of the call being made.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub script: &'a Script,
    pub request: Option<&'a ApiRequest>,
    pub response: Option<&'a ApiResponse>,
}

impl<'a> CallContext<'a> {
    /// The response, or an error naming `what` needed it.
    pub fn require_response(&self, what: &str) -> Result<&'a ApiResponse> {
        self.response.ok_or_else(|| {
            anyhow::anyhow!(
                "{what} requires a response but script {} made no request",
                self.script.label()
            )
        })
    }
}

/// Outcome of evaluating one assertion.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Fail(String),
}

/// Checks one condition of a call. Returning `Err` is a configuration
/// or evaluation problem, not an assertion failure.
pub trait AssertionPlugin: Send + Sync {
    fn evaluate(
        &self,
        spec: &Value,
        ctx: &CallContext<'_>,
        runtime: &Runtime,
    ) -> Result<Verdict>;
}

/// Pulls values out of a call and binds them in the runtime.
pub trait ExtractorPlugin: Send + Sync {
    fn extract(
        &self,
        spec: &Value,
        ctx: &CallContext<'_>,
        runtime: &mut Runtime,
    ) -> Result<()>;
}

/// A generated request body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub content: String,
    pub content_type: Option<String>,
}

/// Produces a request body from a `body` directive.
pub trait BodyGenerator: Send + Sync {
    fn generate(&self, spec: &Value, runtime: &Runtime) -> Result<RequestBody>;
}

/// An embedded interpreter for `if` conditions and expression
/// assertions/extractors.
pub trait ScriptEngine: Send + Sync {
    fn evaluate(&self, expr: &str, env: &Environment) -> Result<Value>;
}

/// Name → plugin lookup tables.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    assertions: HashMap<String, Arc<dyn AssertionPlugin>>,
    extractors: HashMap<String, Arc<dyn ExtractorPlugin>>,
    generators: HashMap<String, Arc<dyn BodyGenerator>>,
    engines: HashMap<String, Arc<dyn ScriptEngine>>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in plugins and the `cel` script engine.
    pub fn builtin() -> Self {
        use assertions::*;
        use extractors::*;
        use generators::*;

        Self::new()
            .with_assertion("status", StatusAssertion)
            .with_assertion("headers", HeadersAssertion)
            .with_assertion("json", JsonAssertion)
            .with_assertion("contains", ContainsAssertion)
            .with_assertion("bound", BoundAssertion)
            .with_extractor("json", JsonExtractor)
            .with_extractor("headers", HeadersExtractor)
            .with_extractor("text", TextExtractor)
            .with_body_generator("json", JsonBody)
            .with_body_generator("text", TextBody)
            .with_script_engine("cel", CelEngine)
    }

    pub fn with_assertion(
        mut self,
        name: impl Into<String>,
        plugin: impl AssertionPlugin + 'static,
    ) -> Self {
        self.assertions.insert(name.into(), Arc::new(plugin));
        self
    }

    pub fn with_extractor(
        mut self,
        name: impl Into<String>,
        plugin: impl ExtractorPlugin + 'static,
    ) -> Self {
        self.extractors.insert(name.into(), Arc::new(plugin));
        self
    }

    pub fn with_body_generator(
        mut self,
        name: impl Into<String>,
        plugin: impl BodyGenerator + 'static,
    ) -> Self {
        self.generators.insert(name.into(), Arc::new(plugin));
        self
    }

    pub fn with_script_engine(
        mut self,
        language: impl Into<String>,
        engine: impl ScriptEngine + 'static,
    ) -> Self {
        self.engines.insert(language.into(), Arc::new(engine));
        self
    }

    pub fn find_assertion(&self, name: &str) -> Option<Arc<dyn AssertionPlugin>> {
        self.assertions.get(name).cloned()
    }

    pub fn find_extractor(&self, name: &str) -> Option<Arc<dyn ExtractorPlugin>> {
        self.extractors.get(name).cloned()
    }

    pub fn find_body_generator(&self, name: &str) -> Option<Arc<dyn BodyGenerator>> {
        self.generators.get(name).cloned()
    }

    pub fn script_engine(&self, language: &str) -> Option<Arc<dyn ScriptEngine>> {
        self.engines.get(language).cloned()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<T: ?Sized>(map: &HashMap<String, Arc<T>>) -> Vec<&str> {
            let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
            names.sort_unstable();
            names
        }
        f.debug_struct("PluginRegistry")
            .field("assertions", &names(&self.assertions))
            .field("extractors", &names(&self.extractors))
            .field("generators", &names(&self.generators))
            .field("engines", &names(&self.engines))
            .finish()
    }
}

/// Truthiness of an expression result: `false`, `null`, zero, and
/// empty strings, lists and objects are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = PluginRegistry::builtin();
        for name in ["status", "headers", "json", "contains", "bound"] {
            assert!(registry.find_assertion(name).is_some(), "{name}");
        }
        for name in ["json", "headers", "text"] {
            assert!(registry.find_extractor(name).is_some(), "{name}");
        }
        assert!(registry.find_body_generator("json").is_some());
        assert!(registry.find_body_generator("text").is_some());
        assert!(registry.script_engine("cel").is_some());
        assert!(registry.script_engine("groovy").is_none());
        assert!(PluginRegistry::new().find_assertion("status").is_none());
    }

    #[test]
    fn test_truthiness() {
        for v in [json!(true), json!(1), json!(-0.5), json!("x"), json!([0]), json!({"a": 1})] {
            assert!(is_truthy(&v), "{v}");
        }
        for v in [json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({}), Value::Null] {
            assert!(!is_truthy(&v), "{v}");
        }
    }
}
