//! Error type surfaced by the runtime.

use crate::ledger::ApiCall;
use thiserror::Error;

/// Failures raised while resolving and executing script documents.
///
/// Collaborators (plugins, transports, script engines) report failures
/// through `anyhow`; converting such an error back into a
/// `RuntimeError` recovers the original variant when one was carried
/// inside it, so callers always see the root failure kind.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no such script named '{0}'")]
    NoSuchScript(String),

    #[error("no such template named '{0}'")]
    NoSuchTemplate(String),

    #[error("template cycle detected: {}", .0.join(" -> "))]
    TemplateCycle(Vec<String>),

    #[error("cannot rebind special Unicode variable {0}")]
    ReservedName(String),

    #[error("failed to load '{locator}': {cause:#}")]
    Load {
        locator: String,
        cause: anyhow::Error,
    },

    #[error("invalid script {script}: {message}")]
    InvalidScript { script: String, message: String },

    #[error("no {kind} plugin named '{name}'")]
    UnknownPlugin { kind: &'static str, name: String },

    #[error(
        "{} assertion(s) failed in script {}",
        .0.failed_assertions().len(),
        .0.script().label()
    )]
    AssertionFailed(Box<ApiCall>),

    #[error(transparent)]
    Plugin(anyhow::Error),
}

impl RuntimeError {
    pub(crate) fn invalid(
        script: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidScript {
            script: script.into(),
            message: message.into(),
        }
    }

    /// `true` for the one failure kind the resolution loop absorbs.
    pub fn is_assertion_failure(&self) -> bool {
        matches!(self, Self::AssertionFailed(_))
    }
}

impl From<anyhow::Error> for RuntimeError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<RuntimeError>() {
            Ok(inner) => inner,
            Err(err) => RuntimeError::Plugin(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_carried_runtime_error_is_recovered() {
        let carried = anyhow::Error::from(RuntimeError::ReservedName(
            "U+0041".to_string(),
        ));
        let err = RuntimeError::from(carried);
        assert!(matches!(err, RuntimeError::ReservedName(ref n) if n == "U+0041"));
    }

    #[test]
    fn test_context_wrapped_runtime_error_is_recovered() {
        let result: anyhow::Result<()> =
            Err(RuntimeError::NoSuchScript("login".to_string()))
                .context("while running extractor");
        let err = RuntimeError::from(result.unwrap_err());
        assert!(matches!(err, RuntimeError::NoSuchScript(_)));
    }

    #[test]
    fn test_foreign_error_becomes_plugin_failure() {
        let err = RuntimeError::from(anyhow::anyhow!("connection refused"));
        assert!(matches!(err, RuntimeError::Plugin(_)));
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn test_template_cycle_message() {
        let err = RuntimeError::TemplateCycle(vec![
            "a.template".to_string(),
            "b.template".to_string(),
            "a.template".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "template cycle detected: a.template -> b.template -> a.template"
        );
    }
}
