//! Runtime configuration.

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Environment variable selecting the default script language.
pub const SCRIPT_LANGUAGE_ENV: &str = "RAVEL_SCRIPT_LANGUAGE";
/// Environment variable holding the request timeout in seconds.
pub const TIMEOUT_ENV: &str = "RAVEL_TIMEOUT";

/// Settings chosen when a runtime is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Language of `if` conditions and bare-string assertions.
    #[serde(default = "default_script_language")]
    pub script_language: String,
    /// Per-request timeout in seconds, also used when fetching
    /// remote script sources.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Extra bindings applied after the process environment.
    #[serde(default)]
    pub bindings: IndexMap<String, Value>,
}

fn default_script_language() -> String {
    "cel".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            script_language: default_script_language(),
            timeout: default_timeout(),
            bindings: IndexMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `RAVEL_SCRIPT_LANGUAGE` and
    /// `RAVEL_TIMEOUT` when set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(language) = std::env::var(SCRIPT_LANGUAGE_ENV) {
            debug!("Script language from {}: {}", SCRIPT_LANGUAGE_ENV, language);
            config.script_language = language;
        }
        if let Ok(timeout) = std::env::var(TIMEOUT_ENV) {
            config.timeout = timeout
                .parse()
                .context(format!("Invalid {TIMEOUT_ENV} value: {timeout}"))?;
        }
        Ok(config)
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }
}

/// Parse a `NAME=VALUE` command-line binding.
///
/// The value is taken as JSON when it parses as JSON, otherwise as a
/// plain string.
pub fn parse_binding(text: &str) -> Result<(String, Value)> {
    let (name, raw) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("Binding must have the form NAME=VALUE: {text}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("Binding name is empty: {text}"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.script_language, "cel");
        assert_eq!(config.timeout, 30);
        assert!(config.bindings.is_empty());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: RuntimeConfig = serde_yaml::from_str("timeout: 5\n").unwrap();
        assert_eq!(config.timeout, 5);
        assert_eq!(config.script_language, "cel");
    }

    #[test]
    fn test_parse_binding() {
        assert_eq!(parse_binding("n=42").unwrap(), ("n".to_string(), json!(42)));
        assert_eq!(
            parse_binding("host=example.com").unwrap(),
            ("host".to_string(), json!("example.com"))
        );
        assert_eq!(
            parse_binding("o={\"a\":1}").unwrap(),
            ("o".to_string(), json!({"a": 1}))
        );
        assert_eq!(parse_binding("e=").unwrap(), ("e".to_string(), json!("")));
        assert_eq!(
            parse_binding("url=http://x/?a=b").unwrap(),
            ("url".to_string(), json!("http://x/?a=b"))
        );
        assert!(parse_binding("novalue").is_err());
        assert!(parse_binding("=1").is_err());
    }
}
