//! CEL-based script engine, the default language for `if` conditions
//! and expression assertions/extractors.

use crate::environment::Environment;
use crate::plugins::ScriptEngine;
use anyhow::{anyhow, Result};
use cel::{Context, Program};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Evaluates CEL expressions with every bound variable whose name is
/// a CEL identifier in scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct CelEngine;

impl ScriptEngine for CelEngine {
    fn evaluate(&self, expr: &str, env: &Environment) -> Result<Value> {
        let program = compile(expr)?;
        let context = build_context(env)?;
        let result = program
            .execute(&context)
            .map_err(|e| anyhow!("CEL execution error: {e}"))?;

        cel_to_json(&result)
    }
}

/// Pre-process an expression to support function aliases.
///
/// Conversions:
/// - `len(x)` → `size(x)`
/// - `type(x)` → `type_of(x)` (avoid CEL keyword clash)
fn preprocess_expr(expr: &str) -> String {
    use regex::Regex;
    use std::sync::LazyLock;

    static LEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\blen\(").expect("failed to compile len regex"));

    static TYPE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\btype\(").expect("failed to compile type regex"));

    let result = LEN_RE.replace_all(expr, "size(").into_owned();
    TYPE_RE.replace_all(&result, "type_of(").into_owned()
}

fn compile(expr: &str) -> Result<Program> {
    let processed = preprocess_expr(expr);
    debug!("Compiling CEL expression: {processed}");
    Program::compile(&processed)
        .map_err(|e| anyhow!("CEL compile error for '{processed}': {e}"))
}

fn build_context<'a>(env: &Environment) -> Result<Context<'a>> {
    let mut context = Context::default();

    for (name, value) in env.iter().filter(|(name, _)| is_identifier(name)) {
        context
            .add_variable(name.as_str(), value.clone())
            .map_err(|e| anyhow!("Failed to add variable '{name}' to CEL context: {e}"))?;
    }

    register_custom_functions(&mut context);

    Ok(context)
}

/// Environment variables such as `HOME` are in scope; names such as
/// `steps.login.id` are only reachable through `{...}` expansion.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn register_custom_functions(context: &mut Context<'_>) {
    // compare(a, b) - deep equality check returning bool
    context.add_function("compare", |a: cel::Value, b: cel::Value| -> bool { a == b });

    // type_of(x) - returns type name as string
    context.add_function("type_of", |v: cel::Value| -> Arc<String> {
        let t = match v {
            cel::Value::Int(_) => "int",
            cel::Value::UInt(_) => "uint",
            cel::Value::Float(_) => "double",
            cel::Value::String(_) => "string",
            cel::Value::Bool(_) => "bool",
            cel::Value::List(_) => "list",
            cel::Value::Map(_) => "map",
            cel::Value::Null => "null",
            cel::Value::Bytes(_) => "bytes",
            _ => "unknown",
        };
        Arc::new(t.to_string())
    });

    // urlencode(str) - URL-encode a string
    context.add_function("urlencode", |s: Arc<String>| -> Arc<String> {
        Arc::new(url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>())
    });
}

fn cel_to_json(value: &cel::Value) -> Result<Value> {
    value
        .json()
        .map_err(|e| anyhow!("Failed to convert CEL value to JSON: {e}"))
}
