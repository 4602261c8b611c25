use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DeployError, DeployResult};

/// A setting value. Deserializes untagged, so plain YAML/JSON
/// scalars and sequences map straight onto it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Parse a command-line literal such as `keep_releases=5`.
    #[must_use]
    pub fn parse_literal(raw: &str) -> Self {
        match raw {
            "~" | "null" => Self::Null,
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => raw
                .parse::<i64>()
                .map_or_else(|_| Self::Str(raw.to_string()), Self::Int),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(n.into())
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Self::Int(n.into())
    }
}

impl<T: Into<Self>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

type Thunk = Arc<dyn Fn(&ConfigStore) -> DeployResult<Value> + Send + Sync>;

#[derive(Clone)]
enum Slot {
    Value(Value),
    Lazy(Thunk),
}

/// Deployment settings with lazily evaluated, memoized defaults.
///
/// A lazy setting is a closure over the store itself, so defaults
/// can derive from other keys:
///
/// ```
/// use hookdeploy::ConfigStore;
///
/// let mut config = ConfigStore::new();
/// config.set("user", "demo");
/// config.default_lazy("home", |c| Ok(format!("/home/{}", c.string("user")?).into()));
///
/// assert_eq!(config.string("home").unwrap(), "/home/demo");
/// ```
///
/// The closure runs once, on first access; the result is kept for
/// the rest of the run even if the keys it read change afterwards.
#[derive(Clone, Default)]
pub struct ConfigStore {
    slots: IndexMap<String, Slot>,
    required: IndexSet<String>,
    cache: RefCell<HashMap<String, Value>>,
    resolving: RefCell<Vec<String>>,
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("keys", &self.slots.keys().collect::<Vec<_>>())
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit value, replacing whatever was registered.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.cache.get_mut().remove(key);
        self.slots.insert(key.to_string(), Slot::Value(value.into()));
        self
    }

    /// Set a lazily computed value, replacing whatever was
    /// registered.
    pub fn set_lazy<F>(&mut self, key: &str, thunk: F) -> &mut Self
    where
        F: Fn(&Self) -> DeployResult<Value> + Send + Sync + 'static,
    {
        self.cache.get_mut().remove(key);
        self.slots.insert(key.to_string(), Slot::Lazy(Arc::new(thunk)));
        self
    }

    /// Register a value only if nothing is registered under `key`.
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        if !self.slots.contains_key(key) {
            self.slots.insert(key.to_string(), Slot::Value(value.into()));
        }
        self
    }

    /// Register a lazy default only if nothing is registered under
    /// `key`.
    pub fn default_lazy<F>(&mut self, key: &str, thunk: F) -> &mut Self
    where
        F: Fn(&Self) -> DeployResult<Value> + Send + Sync + 'static,
    {
        if !self.slots.contains_key(key) {
            self.slots.insert(key.to_string(), Slot::Lazy(Arc::new(thunk)));
        }
        self
    }

    /// Declare a setting the operator must provide.
    pub fn require_setting(&mut self, key: &str) -> &mut Self {
        self.required.insert(key.to_string());
        self
    }

    #[must_use]
    pub fn is_set(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Registered keys, in registration order. Required keys that
    /// were never set come last.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.slots.keys().map(String::as_str).collect();
        for key in &self.required {
            if !self.slots.contains_key(key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Resolve `key`. Unknown keys are `None`; an unset required key
    /// is a configuration error.
    pub fn get(&self, key: &str) -> DeployResult<Option<Value>> {
        if let Some(cached) = self.cache.borrow().get(key) {
            return Ok(Some(cached.clone()));
        }

        let thunk = match self.slots.get(key) {
            Some(Slot::Value(v)) => return Ok(Some(v.clone())),
            Some(Slot::Lazy(thunk)) => Arc::clone(thunk),
            None if self.required.contains(key) => {
                return Err(DeployError::Configuration(key.to_string()));
            }
            None => return Ok(None),
        };

        if self.resolving.borrow().iter().any(|k| k == key) {
            let mut chain = self.resolving.borrow().clone();
            chain.push(key.to_string());
            return Err(DeployError::Configuration(format!(
                "{key} (cyclic default: {})",
                chain.join(" -> ")
            )));
        }

        self.resolving.borrow_mut().push(key.to_string());
        let result = thunk(self);
        self.resolving.borrow_mut().pop();

        let value = result?;
        debug!(key, value = %value, "resolved lazy setting");
        self.cache
            .borrow_mut()
            .insert(key.to_string(), value.clone());
        Ok(Some(value))
    }

    /// Like [`get`](Self::get), but an unknown key is an error.
    pub fn fetch(&self, key: &str) -> DeployResult<Value> {
        self.get(key)?
            .ok_or_else(|| DeployError::Configuration(key.to_string()))
    }

    /// Like [`fetch`](Self::fetch), and a null value is an error too.
    pub fn require(&self, key: &str) -> DeployResult<Value> {
        match self.fetch(key)? {
            Value::Null => Err(DeployError::Configuration(key.to_string())),
            v => Ok(v),
        }
    }

    /// Check every required setting. Runs before anything touches
    /// the remote host.
    pub fn validate(&self) -> DeployResult<()> {
        for key in &self.required {
            self.require(key)?;
        }
        Ok(())
    }

    pub fn string(&self, key: &str) -> DeployResult<String> {
        match self.require(key)? {
            Value::List(_) => Err(invalid(key, "expected a scalar, found a list")),
            v => Ok(v.to_string()),
        }
    }

    pub fn optional_string(&self, key: &str) -> DeployResult<Option<String>> {
        match self.get(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::List(_)) => Err(invalid(key, "expected a scalar, found a list")),
            Some(v) => Ok(Some(v.to_string())),
        }
    }

    pub fn integer(&self, key: &str) -> DeployResult<i64> {
        match self.require(key)? {
            Value::Int(n) => Ok(n),
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| invalid(key, &format!("expected an integer, found '{s}'"))),
            other => Err(invalid(key, &format!("expected an integer, found '{other}'"))),
        }
    }

    pub fn boolean(&self, key: &str) -> DeployResult<bool> {
        match self.fetch(key)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            Value::Int(n) => Ok(n != 0),
            Value::Str(s) => match s.as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" | "" => Ok(false),
                _ => Err(invalid(key, &format!("expected a boolean, found '{s}'"))),
            },
            Value::List(_) => Err(invalid(key, "expected a boolean, found a list")),
        }
    }

    /// A list setting. A single scalar counts as a one-item list and
    /// null or unknown as empty.
    pub fn list(&self, key: &str) -> DeployResult<Vec<String>> {
        Ok(match self.get(key)? {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::List(items)) => items.iter().map(ToString::to_string).collect(),
            Some(v) => vec![v.to_string()],
        })
    }

    /// Resolve every registered key.
    pub fn snapshot(&self) -> DeployResult<IndexMap<String, Value>> {
        self.keys()
            .into_iter()
            .map(|k| Ok((k.to_string(), self.fetch(k)?)))
            .collect()
    }

    /// Apply a YAML mapping of settings as explicit values.
    pub fn merge_yaml(&mut self, text: &str) -> DeployResult<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let values: BTreeMap<String, Value> = serde_yaml::from_str(text)?;
        for (key, value) in values {
            self.set(&key, value);
        }
        Ok(())
    }

    pub fn load_yaml(&mut self, path: &Path) -> DeployResult<()> {
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loading settings");
        self.merge_yaml(&text)
    }

    /// Apply a `key=value` override from the command line.
    pub fn apply_override(&mut self, raw: &str) -> DeployResult<()> {
        let (key, value) = raw.split_once('=').ok_or_else(|| {
            invalid(raw, "expected key=value")
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(invalid(raw, "empty key"));
        }
        self.set(key, Value::parse_literal(value.trim()));
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> DeployError {
    DeployError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
