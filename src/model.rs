//! Script documents and the request/response records exchanged with
//! the transport.

use crate::error::RuntimeError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A textual document starting with this marker loads another source
/// in its place.
pub const REDIRECT_PREFIX: &str = "@";

/// Scripts whose name ends with this suffix define templates.
pub const TEMPLATE_SUFFIX: &str = ".template";

const ANONYMOUS: &str = "<anonymous>";

/// Directives holding objects that merge key by key with templates.
const MERGED_OBJECTS: [&str; 2] = ["env", "headers"];

/// Directives holding lists that concatenate with templates.
const MERGED_LISTS: [&str; 3] = ["preconditions", "bind", "assert"];

/// One executable unit: an optional name, the templates it inherits
/// from, and the directives needed to perform one API call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Script {
    name: Option<String>,
    templates: Vec<String>,
    directives: Map<String, Value>,
}

impl Script {
    /// Build a script from a loaded document node.
    pub fn from_value(value: Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(RuntimeError::invalid(
                other.to_string(),
                "a script must be a JSON object",
            )),
        }
    }

    /// Build a script from a JSON object, splitting off `name` and
    /// `template`.
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, RuntimeError> {
        let name = match map.remove("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name),
            Some(other) => {
                return Err(RuntimeError::invalid(
                    other.to_string(),
                    "\"name\" must be a string",
                ))
            }
        };
        let label = name.as_deref().unwrap_or(ANONYMOUS);

        let templates = match map.remove("template") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(template)) => vec![template],
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(RuntimeError::invalid(
                        label,
                        format!("template name must be a string, got {other}"),
                    )),
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(RuntimeError::invalid(
                    label,
                    format!("\"template\" must be a string or list, got {other}"),
                ))
            }
        };

        Ok(Self {
            name,
            templates,
            directives: map,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The name, or a placeholder for anonymous scripts.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(ANONYMOUS)
    }

    pub fn is_template(&self) -> bool {
        self.name
            .as_deref()
            .is_some_and(|name| name.ends_with(TEMPLATE_SUFFIX))
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    pub fn directives(&self) -> &Map<String, Value> {
        &self.directives
    }

    pub fn get(&self, directive: &str) -> Option<&Value> {
        self.directives.get(directive)
    }

    /// A list-valued directive; a single item counts as a one-element
    /// list and an absent directive as an empty one.
    pub fn list(&self, directive: &str) -> Vec<&Value> {
        match self.directives.get(directive) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().collect(),
            Some(item) => vec![item],
        }
    }

    /// The request directive (`GET`, `POST`, ...) and its URL, if any.
    pub fn request(&self) -> Result<Option<(HttpMethod, &str)>, RuntimeError> {
        let mut found = None;
        for method in HttpMethod::ALL {
            let Some(value) = self.directives.get(method.as_str()) else {
                continue;
            };
            if found.is_some() {
                return Err(RuntimeError::invalid(
                    self.label(),
                    "a script may contain only one request method",
                ));
            }
            match value {
                Value::String(url) => found = Some((method, url.as_str())),
                other => {
                    return Err(RuntimeError::invalid(
                        self.label(),
                        format!("{} URL must be a string, got {other}", method.as_str()),
                    ))
                }
            }
        }
        Ok(found)
    }

    /// Fill this script's gaps from `template`.
    ///
    /// Keys missing here are copied; `env` and `headers` merge with
    /// this script's entries winning; `preconditions`, `bind` and
    /// `assert` lists are concatenated template-first.
    pub fn inherit(&mut self, template: &Script) {
        for (key, inherited) in &template.directives {
            let Some(own) = self.directives.get_mut(key) else {
                self.directives.insert(key.clone(), inherited.clone());
                continue;
            };

            if MERGED_OBJECTS.contains(&key.as_str()) {
                if let (Value::Object(own), Value::Object(inherited)) =
                    (&mut *own, inherited)
                {
                    let mut merged = inherited.clone();
                    merged.extend(std::mem::take(own));
                    *own = merged;
                }
            } else if MERGED_LISTS.contains(&key.as_str()) {
                let mut merged = as_list(inherited);
                merged.extend(as_list(own));
                *own = Value::Array(merged);
            }
        }
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        item => vec![item.clone()],
    }
}

/// HTTP methods a script can use as its request directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 6] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Patch,
        HttpMethod::Head,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// A fully expanded request, ready for the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

/// A received response. Header names are stored lowercase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl ApiResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The body parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}
