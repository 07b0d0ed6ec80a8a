//! The ordered variable store scripts read and write.

use crate::error::RuntimeError;
use crate::resolver::{is_code_point_name, VariableResolver};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::trace;

/// Ordered mapping of variable names to JSON values.
///
/// Cloning copies every bound value; two environments never share
/// nested structures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// An environment seeded with the process environment variables.
    ///
    /// Variables whose name or value is not valid Unicode, and names
    /// that collide with reserved pseudo-variables, are skipped.
    pub fn from_process() -> Self {
        let mut env = Self::new();
        for (name, value) in std::env::vars_os() {
            let (Ok(name), Ok(value)) = (name.into_string(), value.into_string())
            else {
                continue;
            };
            if is_code_point_name(&name) {
                continue;
            }
            env.bindings.insert(name, Value::String(value));
        }
        env
    }

    /// Bind `value` to `name`, returning the previous value.
    ///
    /// Reserved `U+XXXX` names are rejected.
    pub fn bind(
        &mut self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<Option<Value>, RuntimeError> {
        let name = name.into();
        if is_code_point_name(&name) {
            return Err(RuntimeError::ReservedName(name));
        }
        trace!(name = %name, value = %value, "bind");
        Ok(self.bindings.insert(name, value))
    }

    /// Remove a binding, returning its value.
    pub fn unbind(&mut self, name: &str) -> Option<Value> {
        self.bindings.shift_remove(name)
    }

    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn bound(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.bindings.iter()
    }

    pub fn resolver(&self) -> VariableResolver<'_> {
        VariableResolver::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bind_then_binding_round_trips() {
        let mut env = Environment::new();
        assert_eq!(env.bind("a", json!(1)).unwrap(), None);
        assert_eq!(env.bind("a", json!({"x": [2]})).unwrap(), Some(json!(1)));
        assert_eq!(env.binding("a"), Some(&json!({"x": [2]})));
        assert!(env.bound("a"));
    }

    #[test]
    fn test_unbind_removes() {
        let mut env = Environment::new();
        env.bind("a", json!("v")).unwrap();
        assert_eq!(env.unbind("a"), Some(json!("v")));
        assert!(!env.bound("a"));
        assert_eq!(env.binding("a"), None);
        assert_eq!(env.unbind("a"), None);
    }

    #[test]
    fn test_null_is_a_binding() {
        let mut env = Environment::new();
        env.bind("n", Value::Null).unwrap();
        assert!(env.bound("n"));
        assert_eq!(env.binding("n"), Some(&Value::Null));
    }

    #[test]
    fn test_reserved_names_are_rejected() {
        let mut env = Environment::new();
        for name in ["U+0041", "u+007b", "U+1F600"] {
            let err = env.bind(name, json!("x")).unwrap_err();
            assert!(matches!(err, RuntimeError::ReservedName(ref n) if n == name));
            assert!(!env.bound(name));
        }
        env.bind("U+", json!(1)).unwrap();
        env.bind("U+41", json!(1)).unwrap();
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let mut env = Environment::new();
        for name in ["z", "a", "m"] {
            env.bind(name, json!(name)).unwrap();
        }
        env.unbind("a");
        env.bind("b", json!(0)).unwrap();
        let names: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, ["z", "m", "b"]);
    }

    #[test]
    fn test_clone_does_not_alias() {
        let mut original = Environment::new();
        original.bind("o", json!({"list": [1]})).unwrap();
        let mut copy = original.clone();
        copy.bind("o", json!({"list": [1, 2]})).unwrap();
        copy.bind("extra", json!(true)).unwrap();
        assert_eq!(original.binding("o"), Some(&json!({"list": [1]})));
        assert!(!original.bound("extra"));
    }

    #[test]
    fn test_from_process_sees_environment_variables() {
        let env = Environment::from_process();
        if let Ok(path) = std::env::var("PATH") {
            assert_eq!(env.binding("PATH"), Some(&json!(path)));
        }
    }
}
