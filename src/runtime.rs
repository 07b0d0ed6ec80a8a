//! The orchestrator: owns the environment, registries, call ledger and
//! cancellation flag, and resolves loaded documents into script runs.

use crate::cancel::CancelToken;
use crate::config::RuntimeConfig;
use crate::environment::Environment;
use crate::error::RuntimeError;
use crate::executor::{DefaultScriptExecutor, ScriptExecutor};
use crate::ledger::{ApiCall, CallLedger};
use crate::loader::DocumentLoader;
use crate::model::{Script, REDIRECT_PREFIX};
use crate::notifier::{ChangeEvent, ChangeNotifier, ListenerId, CALLS_EVENT, CANCELLED_EVENT, ENV_EVENT_PREFIX};
use crate::plugins::{PluginRegistry, ScriptEngine};
use crate::registry::ScriptRegistry;
use crate::resolver;
use crate::transport::{ReqwestTransport, Transport};
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Name of the variable mirroring the failed-assertion counter.
pub const FAILED_ASSERTION_COUNT: &str = "failedAssertionCount";

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<(), RuntimeError>> + Send + 'a>>;

/// Resolves and executes script documents.
///
/// A runtime is meant to be reused across many runs; [`Runtime::reset`]
/// clears the history between them while keeping variables and
/// registered scripts.
pub struct Runtime {
    env: Environment,
    registry: ScriptRegistry,
    ledger: CallLedger,
    cancelled: bool,
    cancel_token: Arc<CancelToken>,
    notifier: ChangeNotifier,
    plugins: Arc<PluginRegistry>,
    executor: Arc<dyn ScriptExecutor>,
    loader: DocumentLoader,
    script_language: String,
}

impl Runtime {
    /// A runtime seeded from the process environment, using the
    /// built-in plugins.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::with_plugins(config, Arc::new(PluginRegistry::builtin()))
    }

    pub fn with_plugins(
        config: RuntimeConfig,
        plugins: Arc<PluginRegistry>,
    ) -> Result<Self, RuntimeError> {
        Self::with_environment(Environment::from_process(), config, plugins)
    }

    /// A runtime over `env`, with the config's bindings applied on top
    /// and the failed-assertion counter bound to zero.
    pub fn with_environment(
        env: Environment,
        config: RuntimeConfig,
        plugins: Arc<PluginRegistry>,
    ) -> Result<Self, RuntimeError> {
        let timeout = Duration::from_secs(config.timeout);
        let transport = Arc::new(ReqwestTransport::new(timeout));
        let mut runtime = Self {
            env,
            registry: ScriptRegistry::new(),
            ledger: CallLedger::new(),
            cancelled: false,
            cancel_token: CancelToken::new(),
            notifier: ChangeNotifier::new(),
            plugins,
            executor: Arc::new(DefaultScriptExecutor::new(transport)),
            loader: DocumentLoader::new(timeout)?,
            script_language: config.script_language,
        };
        for (name, value) in config.bindings {
            runtime.bind(name, value)?;
        }
        runtime.publish_failed_assertion_count();
        debug!("Runtime created with {} binding(s)", runtime.env.len());
        Ok(runtime)
    }

    /// A fresh runtime holding a copy of `other`'s variables.
    ///
    /// Registries, history and listeners are not copied and the
    /// cancellation flag starts lowered. Bound values are deep copies:
    /// later changes to either runtime are invisible to the other.
    pub fn from_runtime(other: &Runtime) -> Self {
        let mut runtime = Self {
            env: other.env.clone(),
            registry: ScriptRegistry::new(),
            ledger: CallLedger::new(),
            cancelled: false,
            cancel_token: CancelToken::new(),
            notifier: ChangeNotifier::new(),
            plugins: Arc::clone(&other.plugins),
            executor: Arc::clone(&other.executor),
            loader: other.loader.clone(),
            script_language: other.script_language.clone(),
        };
        runtime.publish_failed_assertion_count();
        runtime
    }

    pub fn with_executor(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Use the default executor over `transport`.
    pub fn with_transport(self, transport: Arc<dyn Transport>) -> Self {
        self.with_executor(Arc::new(DefaultScriptExecutor::new(transport)))
    }

    pub fn set_executor(&mut self, executor: Arc<dyn ScriptExecutor>) {
        self.executor = executor;
    }

    // Variables

    /// Bind `value` to `name` and notify `env.<name>` listeners.
    pub fn bind(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, RuntimeError> {
        let name = name.into();
        let value = value.into();
        let old = self.env.bind(name.clone(), value.clone())?;
        self.notifier
            .fire(format!("{ENV_EVENT_PREFIX}{name}"), old, Some(value));
        Ok(self)
    }

    /// Remove a binding, returning its value.
    pub fn unbind(&mut self, name: &str) -> Option<Value> {
        let old = self.env.unbind(name)?;
        self.notifier
            .fire(format!("{ENV_EVENT_PREFIX}{name}"), Some(old.clone()), None);
        Some(old)
    }

    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.env.binding(name)
    }

    pub fn bound(&self, name: &str) -> bool {
        self.env.bound(name)
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn expand(&self, text: &str) -> String {
        self.env.resolver().expand(text)
    }

    pub fn expand_opt(&self, text: Option<&str>) -> Option<String> {
        self.env.resolver().expand_opt(text)
    }

    /// Expand every string inside `value`; strings that are a single
    /// reference become the bound value itself.
    pub fn expand_value(&self, value: &Value) -> Value {
        self.env.resolver().expand_value(value)
    }

    pub fn is_value_node(&self, text: &str) -> bool {
        resolver::is_value_node(text)
    }

    /// The value a single-reference string resolves to, with its type
    /// intact.
    pub fn obtain_variable_value(&self, text: &str) -> Option<Value> {
        self.env.resolver().resolve_var_value(text)
    }

    // Scripts and templates

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ScriptRegistry {
        &mut self.registry
    }

    pub fn script(&self, name: &str) -> Option<Arc<Script>> {
        self.registry.script(name)
    }

    pub fn template(&self, name: &str) -> Option<Arc<Script>> {
        self.registry.template(name)
    }

    pub fn set_template(&mut self, name: impl Into<String>, template: Script) {
        self.registry.set_template(name, Arc::new(template));
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.registry.has_template(name)
    }

    // Calls and counters

    pub fn ledger(&self) -> &CallLedger {
        &self.ledger
    }

    pub fn api_calls(&self) -> &[ApiCall] {
        self.ledger.calls()
    }

    /// Number of recorded calls.
    pub fn size(&self) -> usize {
        self.ledger.len()
    }

    pub fn add_api_call(&mut self, call: ApiCall) {
        let before = self.ledger.len();
        self.ledger.push(call);
        self.notifier.fire(
            CALLS_EVENT,
            Some(json!(before)),
            Some(json!(self.ledger.len())),
        );
    }

    pub fn failed_assertion_count(&self) -> u64 {
        self.ledger.failed_assertion_count()
    }

    /// Count one failed assertion and return the new total.
    pub fn increment_failed_assertion_count(&mut self) -> u64 {
        let count = self.ledger.increment();
        self.publish_failed_assertion_count();
        count
    }

    pub fn reset_failed_assertion_count(&mut self) {
        self.ledger.reset_failed_assertion_count();
        self.publish_failed_assertion_count();
    }

    fn publish_failed_assertion_count(&mut self) {
        let count = json!(self.ledger.failed_assertion_count());
        if let Ok(old) = self.env.bind(FAILED_ASSERTION_COUNT, count.clone()) {
            self.notifier.fire(
                format!("{ENV_EVENT_PREFIX}{FAILED_ASSERTION_COUNT}"),
                old,
                Some(count),
            );
        }
    }

    // Lifecycle

    pub fn is_cancelled(&self) -> bool {
        self.cancelled || self.cancel_token.is_cancelled()
    }

    /// Token that stops this runtime before its next document when
    /// raised from another task. A running script is never interrupted.
    pub fn cancel_handle(&self) -> Arc<CancelToken> {
        Arc::clone(&self.cancel_token)
    }

    /// Stop before the next document. Repeated calls are no-ops.
    pub fn cancel(&mut self) {
        self.cancel_token.cancel();
        self.observe_cancellation();
    }

    /// Notify once on the first poll that sees the token raised.
    fn observe_cancellation(&mut self) -> bool {
        if !self.cancelled && self.cancel_token.is_cancelled() {
            info!("Cancellation requested");
            self.cancelled = true;
            self.notifier
                .fire(CANCELLED_EVENT, Some(json!(false)), Some(json!(true)));
        }
        self.cancelled
    }

    fn clear_cancelled(&mut self) {
        self.cancel_token.clear();
        if self.cancelled {
            self.cancelled = false;
            self.notifier
                .fire(CANCELLED_EVENT, Some(json!(true)), Some(json!(false)));
        }
    }

    /// Zero the counter, clear the history and lower the cancellation
    /// flag.
    pub fn reset(&mut self) {
        let before = self.ledger.len();
        self.ledger.reset();
        self.publish_failed_assertion_count();
        self.clear_cancelled();
        self.notifier
            .fire(CALLS_EVENT, Some(json!(before)), Some(json!(0)));
    }

    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ChangeEvent) + Send + 'static,
    {
        self.notifier.subscribe(listener)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // Plugins

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn script_language(&self) -> &str {
        &self.script_language
    }

    pub fn set_script_language(&mut self, language: impl Into<String>) {
        self.script_language = language.into();
    }

    /// The engine for `language`, or for the default language.
    pub fn script_engine(
        &self,
        language: Option<&str>,
    ) -> Result<Arc<dyn ScriptEngine>, RuntimeError> {
        let language = language.unwrap_or(&self.script_language);
        self.plugins
            .script_engine(language)
            .ok_or_else(|| RuntimeError::UnknownPlugin {
                kind: "script engine",
                name: language.to_string(),
            })
    }

    // Execution

    /// Load the documents of one source. The returned future owns what
    /// it needs and does not borrow the runtime.
    pub fn read(
        &self,
        locator: &str,
    ) -> impl Future<Output = Result<Vec<Value>, RuntimeError>> + Send + 'static {
        let loader = self.loader.clone();
        let locator = locator.to_string();
        async move {
            loader.read(&locator).await.inspect_err(|e| {
                error!("{}", e);
            })
        }
    }

    #[instrument(skip(self))]
    pub async fn execute_source(&mut self, locator: &str) -> Result<(), RuntimeError> {
        self.clear_cancelled();
        let documents = self.read(locator).await?;
        self.resolve_all(documents).await
    }

    /// Run several sources in order. No further source is loaded once
    /// the runtime is cancelled.
    #[instrument(skip(self, sources), fields(count = sources.len()))]
    pub async fn execute_sources<S>(&mut self, sources: &[S]) -> Result<(), RuntimeError>
    where
        S: AsRef<str> + Sync,
    {
        self.clear_cancelled();
        for source in sources {
            if self.observe_cancellation() {
                info!("Cancelled; skipping remaining sources");
                break;
            }
            let documents = self.read(source.as_ref()).await?;
            self.resolve_all(documents).await?;
        }
        Ok(())
    }

    /// Run already loaded documents.
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    pub async fn execute(&mut self, documents: Vec<Value>) -> Result<(), RuntimeError> {
        self.clear_cancelled();
        self.resolve_all(documents).await
    }

    /// Resolve each document in order until one fails or the runtime
    /// is cancelled.
    pub async fn resolve_all(&mut self, documents: Vec<Value>) -> Result<(), RuntimeError> {
        for document in documents {
            if self.observe_cancellation() {
                debug!("Cancelled; not resolving further documents");
                break;
            }
            self.resolve(document).await?;
        }
        Ok(())
    }

    /// Resolve one document: a redirect, a script name, a list of
    /// documents or a script object.
    pub fn resolve<'a>(&'a mut self, node: Value) -> ResolveFuture<'a> {
        Box::pin(async move {
            match node {
                Value::String(text) => match text.strip_prefix(REDIRECT_PREFIX) {
                    Some(rest) => {
                        let locator = self.expand(rest);
                        debug!("Redirecting to {}", locator);
                        let documents = self.read(&locator).await?;
                        self.resolve_all(documents).await
                    }
                    None => {
                        let script = self
                            .registry
                            .script(&text)
                            .ok_or_else(|| RuntimeError::NoSuchScript(text.clone()))?;
                        self.run_script(script).await
                    }
                },
                Value::Array(items) => self.resolve_all(items).await,
                Value::Object(map) => {
                    let script = Arc::new(Script::from_map(map)?);
                    if script.is_template() {
                        if let Some(name) = script.name() {
                            self.registry.set_template(name, Arc::clone(&script));
                        }
                        return Ok(());
                    }
                    if let Some(name) = script.name() {
                        self.registry.set_script(name, Arc::clone(&script));
                    }
                    self.run_script(script).await
                }
                other => Err(RuntimeError::invalid(
                    other.to_string(),
                    "a document must be a script object, a script name or a list",
                )),
            }
        })
    }

    /// Run one script, absorbing assertion failures into the counter
    /// and history.
    pub async fn run_script(&mut self, script: Arc<Script>) -> Result<(), RuntimeError> {
        let executor = Arc::clone(&self.executor);
        match executor.run(Arc::clone(&script), self).await {
            Ok(Some(call)) => {
                self.add_api_call(call);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(RuntimeError::AssertionFailed(call)) => {
                for failure in call.failed_assertions() {
                    error!(
                        "Assertion '{}' failed in script {}: {}",
                        failure.assertion,
                        script.label(),
                        failure.message
                    );
                }
                for _ in 0..call.failed_assertions().len().max(1) {
                    self.increment_failed_assertion_count();
                }
                self.add_api_call(*call);
                Ok(())
            }
            Err(err) => {
                error!("Script {} failed: {}", script.label(), err);
                Err(err)
            }
        }
    }

    /// Failure count of the run: one per failed assertion recorded in
    /// the history, or one when nothing ran at all.
    pub fn report(&self) -> usize {
        if self.is_cancelled() {
            info!("Run was cancelled");
        }
        let failures = self.ledger.recorded_failures();
        if self.ledger.is_empty() {
            failures + 1
        } else {
            failures
        }
    }
}
