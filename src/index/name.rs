//! Key -> UUID index with reverse lookup.
//!
//! Used for the volume-name namespace, for the per-volume snapshot-name namespaces and
//! for the snapshot -> volume back-reference. Several keys may point at one value
//! (many snapshots belong to one volume); a key is bound to at most one value.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone)]
pub struct Index {
    label: &'static str,
    forward: HashMap<String, String>,
    reverse: HashMap<String, BTreeSet<String>>,
}

impl Index {
    /// `label` names the namespace in error messages ("volume name", ...).
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Bind `key` to `value`. Re-binding the same pair is a no-op;
    /// binding a key that already points elsewhere is a `Conflict`.
    pub fn put(&mut self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() || value.is_empty() {
            return Err(Error::invalid(format!("{}: empty key or value", self.label)));
        }
        match self.forward.get(key) {
            Some(existing) if existing == value => return Ok(()),
            Some(existing) => {
                return Err(Error::conflict(format!(
                    "{} '{}' already in use by {}",
                    self.label, key, existing
                )))
            }
            None => {}
        }
        self.forward.insert(key.to_string(), value.to_string());
        self.reverse
            .entry(value.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    /// Idempotent: removing a missing key returns `None`.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let value = self.forward.remove(key)?;
        if let Some(keys) = self.reverse.get_mut(&value) {
            keys.remove(key);
            if keys.is_empty() {
                self.reverse.remove(&value);
            }
        }
        Some(value)
    }

    pub fn lookup(&self, key: &str) -> Result<String> {
        self.forward
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{} '{}'", self.label, key)))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.forward.get(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.forward.contains_key(key)
    }

    /// All keys bound to `value`, sorted.
    pub fn keys_for(&self, value: &str) -> Vec<String> {
        self.reverse
            .get(value)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.forward.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
