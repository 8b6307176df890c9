//! Process-wide expansion cache
//!
//! Keyed by the value set canonical (`url|version`) and a digest of the expansion
//! parameters. Inserts never replace an existing entry; two operations computing the
//! same key concurrently both do the work and the first insert wins.

use std::collections::HashMap;
use std::sync::RwLock;

use crmi_common::{json_digest, Canonical, Error, Result};
use crmi_domain::Expansion;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    canonical: String,
    parameters: String,
}

impl CacheKey {
    fn new(canonical: &Canonical, parameters: Option<&Value>) -> Self {
        Self {
            canonical: canonical.to_string(),
            parameters: json_digest(parameters.unwrap_or(&Value::Null)),
        }
    }
}

#[derive(Debug, Default)]
pub struct ExpansionCache {
    entries: RwLock<HashMap<CacheKey, Expansion>>,
}

impl ExpansionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, canonical: &Canonical, parameters: Option<&Value>) -> Result<Option<Expansion>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| Error::Internal(format!("expansion cache lock poisoned: {e}")))?;
        Ok(entries.get(&CacheKey::new(canonical, parameters)).cloned())
    }

    /// Store an expansion unless one is already cached; true when stored
    pub fn insert_if_absent(
        &self,
        canonical: &Canonical,
        parameters: Option<&Value>,
        expansion: Expansion,
    ) -> Result<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| Error::Internal(format!("expansion cache lock poisoned: {e}")))?;
        let key = CacheKey::new(canonical, parameters);
        if entries.contains_key(&key) {
            return Ok(false);
        }
        entries.insert(key, expansion);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<()> {
        self.entries
            .write()
            .map_err(|e| Error::Internal(format!("expansion cache lock poisoned: {e}")))?
            .clear();
        Ok(())
    }
}
