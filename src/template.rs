use std::collections::BTreeMap;

use crate::config::ConfigStore;
use crate::error::{DeployError, DeployResult};

/// Named values substituted into a [`ScriptTemplate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(BTreeMap<String, String>);

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bind(mut self, name: &str, value: impl ToString) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    /// Bind each of `keys` to its current value in `config`.
    pub fn from_config(config: &ConfigStore, keys: &[&str]) -> DeployResult<Self> {
        let mut bindings = Self::new();
        for key in keys {
            bindings = bindings.bind(key, config.fetch(key)?);
        }
        Ok(bindings)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Shell script (or any text) with `{{name}}` placeholders.
///
/// ```
/// use hookdeploy::template::{Bindings, ScriptTemplate};
///
/// let tpl = ScriptTemplate::new("exec thin start -p {{ thin_port }}");
/// let out = tpl.render(&Bindings::new().bind("thin_port", 45000)).unwrap();
/// assert_eq!(out, "exec thin start -p 45000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTemplate {
    text: String,
}

impl ScriptTemplate {
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> DeployResult<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for segment in segments(&self.text)? {
            if let Segment::Placeholder(name) = segment {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    pub fn render(&self, bindings: &Bindings) -> DeployResult<String> {
        render(&self.text, bindings)
    }

    /// Render with every placeholder looked up in `config` as it
    /// stands right now.
    pub fn render_config(&self, config: &ConfigStore) -> DeployResult<String> {
        let names = self.placeholders()?;
        let keys: Vec<&str> = names.iter().map(String::as_str).collect();
        self.render(&Bindings::from_config(config, &keys)?)
    }
}

/// Substitute every `{{name}}` in `template`. A placeholder without
/// a binding is an error.
pub fn render(template: &str, bindings: &Bindings) -> DeployResult<String> {
    let mut out = String::with_capacity(template.len());
    for segment in segments(template)? {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Placeholder(name) => {
                let value = bindings.get(name).ok_or_else(|| {
                    DeployError::Template(format!("no value bound for '{{{{{name}}}}}'"))
                })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

fn segments(template: &str) -> DeployResult<Vec<Segment<'_>>> {
    let mut parts = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            parts.push(Segment::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            DeployError::Template(format!(
                "unterminated placeholder near '{}'",
                after.chars().take(20).collect::<String>()
            ))
        })?;
        let name = after[..end].trim();
        if name.is_empty() {
            return Err(DeployError::Template("empty placeholder".into()));
        }
        parts.push(Segment::Placeholder(name));
        rest = &after[end + 2..];
    }

    if !rest.is_empty() {
        parts.push(Segment::Text(rest));
    }
    Ok(parts)
}
