//! Named scripts and templates.

use crate::error::RuntimeError;
use crate::model::Script;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Two independent name → script mappings used to resolve textual
/// references during execution.
#[derive(Debug, Clone, Default)]
pub struct ScriptRegistry {
    scripts: IndexMap<String, Arc<Script>>,
    templates: IndexMap<String, Arc<Script>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: &str) -> Option<Arc<Script>> {
        self.scripts.get(name).cloned()
    }

    pub fn set_script(&mut self, name: impl Into<String>, script: Arc<Script>) {
        let name = name.into();
        debug!("Registering script {}", name);
        self.scripts.insert(name, script);
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    pub fn scripts(&self) -> impl Iterator<Item = (&String, &Arc<Script>)> {
        self.scripts.iter()
    }

    pub fn template(&self, name: &str) -> Option<Arc<Script>> {
        self.templates.get(name).cloned()
    }

    /// Define a template. Redefinition replaces the old one.
    pub fn set_template(&mut self, name: impl Into<String>, template: Arc<Script>) {
        let name = name.into();
        if self.templates.contains_key(&name) {
            warn!("Replacing template {}", name);
        }
        self.templates.insert(name, template);
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn templates(&self) -> impl Iterator<Item = (&String, &Arc<Script>)> {
        self.templates.iter()
    }

    /// A copy of `script` with all of its templates merged in,
    /// transitively.
    ///
    /// When several templates are listed, later ones take precedence
    /// over earlier ones, and the script itself over all of them.
    pub fn apply_templates(&self, script: &Script) -> Result<Script, RuntimeError> {
        let mut stack = Vec::new();
        if script.is_template() {
            stack.extend(script.name().map(str::to_string));
        }
        let mut merged = script.clone();
        self.inherit_all(&mut merged, script.templates(), &mut stack)?;
        Ok(merged)
    }

    fn inherit_all(
        &self,
        target: &mut Script,
        names: &[String],
        stack: &mut Vec<String>,
    ) -> Result<(), RuntimeError> {
        for name in names.iter().rev() {
            if stack.contains(name) {
                let mut cycle = stack.clone();
                cycle.push(name.clone());
                return Err(RuntimeError::TemplateCycle(cycle));
            }
            let template = self
                .template(name)
                .ok_or_else(|| RuntimeError::NoSuchTemplate(name.clone()))?;

            stack.push(name.clone());
            let mut resolved = Script::clone(&template);
            self.inherit_all(&mut resolved, template.templates(), stack)?;
            stack.pop();

            target.inherit(&resolved);
        }
        Ok(())
    }
}
