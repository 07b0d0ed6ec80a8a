//! Running one resolved script: template merge, `env`, `if`,
//! preconditions, request body, the HTTP call, `bind` and `assert`.

use crate::error::RuntimeError;
use crate::ledger::{ApiCall, AssertionFailure};
use crate::model::{ApiRequest, ApiResponse, HttpMethod, Script};
use crate::plugins::assertions::ScriptAssertion;
use crate::plugins::extractors::ScriptExtractor;
use crate::plugins::generators::JsonBody;
use crate::plugins::{is_truthy, AssertionPlugin, BodyGenerator, CallContext, ExtractorPlugin, Verdict};
use crate::resolver::stringify;
use crate::runtime::Runtime;
use crate::transport::Transport;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Executes one script against a runtime.
///
/// Returns the call record on success and `None` when the script's
/// `if` condition skipped it. Assertion failures are reported as
/// [`RuntimeError::AssertionFailed`] carrying the record.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn run(
        &self,
        script: Arc<Script>,
        runtime: &mut Runtime,
    ) -> Result<Option<ApiCall>, RuntimeError>;
}

/// Executor driving the plugin registry and a [`Transport`].
pub struct DefaultScriptExecutor {
    transport: Arc<dyn Transport>,
}

impl DefaultScriptExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn bind_env(script: &Script, runtime: &mut Runtime) -> Result<(), RuntimeError> {
        let Some(env) = script.get("env") else {
            return Ok(());
        };
        let Value::Object(env) = env else {
            return Err(RuntimeError::invalid(script.label(), "\"env\" must be an object"));
        };
        for (name, value) in env {
            let value = runtime.expand_value(value);
            runtime.bind(name.clone(), value)?;
        }
        Ok(())
    }

    fn condition_holds(script: &Script, runtime: &Runtime) -> Result<bool, RuntimeError> {
        match script.get("if") {
            None => Ok(true),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(expr)) => {
                let expanded = runtime.expand(expr);
                let engine = runtime.script_engine(None)?;
                let result = engine.evaluate(&expanded, runtime.env())?;
                debug!("Condition '{}' evaluated to {}", expanded, result);
                Ok(is_truthy(&result))
            }
            Some(other) => Err(RuntimeError::invalid(
                script.label(),
                format!("\"if\" must be a boolean or expression, got {other}"),
            )),
        }
    }

    /// Evaluate every assertion in `directive`, collecting failures.
    fn check_assertions(
        directive: &str,
        ctx: &CallContext<'_>,
        runtime: &Runtime,
        failures: &mut Vec<AssertionFailure>,
    ) -> Result<(), RuntimeError> {
        for entry in ctx.script.list(directive) {
            match entry {
                Value::String(expr) => {
                    let verdict = ScriptAssertion::new(None).evaluate(entry, ctx, runtime)?;
                    record(verdict, expr, failures);
                }
                Value::Object(map) => {
                    for (name, spec) in map {
                        let plugin: Arc<dyn AssertionPlugin> =
                            match runtime.plugins().find_assertion(name) {
                                Some(plugin) => plugin,
                                None if runtime.plugins().script_engine(name).is_some() => {
                                    Arc::new(ScriptAssertion::new(Some(name.clone())))
                                }
                                None => {
                                    return Err(RuntimeError::UnknownPlugin {
                                        kind: "assertion",
                                        name: name.clone(),
                                    })
                                }
                            };
                        let verdict = plugin.evaluate(spec, ctx, runtime)?;
                        record(verdict, name, failures);
                    }
                }
                other => {
                    return Err(RuntimeError::invalid(
                        ctx.script.label(),
                        format!("{directive} entries must be strings or objects, got {other}"),
                    ))
                }
            }
        }
        Ok(())
    }

    fn run_extractors(ctx: &CallContext<'_>, runtime: &mut Runtime) -> Result<(), RuntimeError> {
        for entry in ctx.script.list("bind") {
            let Value::Object(map) = entry else {
                return Err(RuntimeError::invalid(
                    ctx.script.label(),
                    format!("bind entries must be objects, got {entry}"),
                ));
            };
            for (name, spec) in map {
                let plugin: Arc<dyn ExtractorPlugin> = match runtime.plugins().find_extractor(name) {
                    Some(plugin) => plugin,
                    None if runtime.plugins().script_engine(name).is_some() => {
                        Arc::new(ScriptExtractor::new(Some(name.clone())))
                    }
                    None => {
                        return Err(RuntimeError::UnknownPlugin {
                            kind: "extractor",
                            name: name.clone(),
                        })
                    }
                };
                plugin.extract(spec, ctx, runtime)?;
            }
        }
        Ok(())
    }

    fn build_request(
        script: &Script,
        method: HttpMethod,
        url: &str,
        runtime: &Runtime,
    ) -> Result<ApiRequest, RuntimeError> {
        let mut headers = IndexMap::new();
        match script.get("headers") {
            None => {}
            Some(Value::Object(map)) => {
                for (name, value) in map {
                    headers.insert(name.clone(), stringify(&runtime.expand_value(value)));
                }
            }
            Some(other) => {
                return Err(RuntimeError::invalid(
                    script.label(),
                    format!("\"headers\" must be an object, got {other}"),
                ))
            }
        }

        let mut request = ApiRequest {
            method,
            url: runtime.expand(url),
            headers,
            body: None,
        };

        let generated = match script.get("body") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some((runtime.expand(text), None)),
            Some(spec) => {
                let body = match single_entry(spec)
                    .and_then(|(name, inner)| Some((runtime.plugins().find_body_generator(name)?, inner)))
                {
                    Some((generator, inner)) => generator.generate(inner, runtime)?,
                    None => JsonBody.generate(spec, runtime)?,
                };
                Some((body.content, body.content_type))
            }
        };

        if let Some((content, content_type)) = generated {
            if let Some(content_type) = content_type {
                if !request.has_header("Content-Type") {
                    request.headers.insert("Content-Type".to_string(), content_type);
                }
            }
            request.body = Some(content);
        }
        Ok(request)
    }
}

#[async_trait]
impl ScriptExecutor for DefaultScriptExecutor {
    #[instrument(skip(self, script, runtime), fields(script = %script.label()))]
    async fn run(
        &self,
        script: Arc<Script>,
        runtime: &mut Runtime,
    ) -> Result<Option<ApiCall>, RuntimeError> {
        let started = Instant::now();
        let script = if script.templates().is_empty() {
            script
        } else {
            Arc::new(runtime.registry().apply_templates(&script)?)
        };
        info!("Running script {}", script.label());

        Self::bind_env(&script, runtime)?;

        if !Self::condition_holds(&script, runtime)? {
            debug!("Skipping script {} due to condition", script.label());
            return Ok(None);
        }

        let mut failures = Vec::new();
        let unsent = CallContext {
            script: &script,
            request: None,
            response: None,
        };
        Self::check_assertions("preconditions", &unsent, runtime, &mut failures)?;

        let mut request: Option<ApiRequest> = None;
        let mut response: Option<ApiResponse> = None;

        if failures.is_empty() {
            if let Some((method, url)) = script.request()? {
                let built = Self::build_request(&script, method, url, runtime)?;
                let received = self.transport.send(&built).await?;
                request = Some(built);
                response = Some(received);
            }

            let ctx = CallContext {
                script: &script,
                request: request.as_ref(),
                response: response.as_ref(),
            };
            Self::run_extractors(&ctx, runtime)?;
            Self::check_assertions("assert", &ctx, runtime, &mut failures)?;
        } else {
            debug!("Preconditions failed; skipping request of {}", script.label());
        }

        let call = ApiCall::new(Arc::clone(&script))
            .with_request(request)
            .with_response(response)
            .with_failures(failures)
            .with_duration_ms(started.elapsed().as_millis() as u64);

        if call.passed() {
            Ok(Some(call))
        } else {
            Err(RuntimeError::AssertionFailed(Box::new(call)))
        }
    }
}

fn record(verdict: Verdict, assertion: &str, failures: &mut Vec<AssertionFailure>) {
    if let Verdict::Fail(message) = verdict {
        failures.push(AssertionFailure::new(assertion, message));
    }
}

fn single_entry(spec: &Value) -> Option<(&String, &Value)> {
    match spec {
        Value::Object(map) if map.len() == 1 => map.iter().next(),
        _ => None,
    }
}
