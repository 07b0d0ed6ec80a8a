//! Runtime for declarative, JSON-based API test scripts.
//!
//! Documents are loaded from files or URLs, resolved (redirects, named
//! references, lists, script objects) and executed against a shared,
//! mutable variable environment. Strings in scripts may reference
//! variables as `{name}` or `{name|default}`.

pub mod cancel;
pub mod config;
pub mod environment;
pub mod error;
pub mod executor;
pub mod expression;
pub mod ledger;
pub mod loader;
pub mod model;
pub mod notifier;
pub mod plugins;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod transport;
pub mod validator;

pub use cancel::CancelToken;
pub use config::RuntimeConfig;
pub use environment::Environment;
pub use error::RuntimeError;
pub use executor::{DefaultScriptExecutor, ScriptExecutor};
pub use ledger::{ApiCall, AssertionFailure, CallLedger};
pub use loader::DocumentLoader;
pub use model::{ApiRequest, ApiResponse, HttpMethod, Script};
pub use notifier::{ChangeEvent, ChangeNotifier, ListenerId};
pub use plugins::PluginRegistry;
pub use registry::ScriptRegistry;
pub use resolver::VariableResolver;
pub use runtime::{Runtime, FAILED_ASSERTION_COUNT};
pub use transport::{ReqwestTransport, Transport};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
