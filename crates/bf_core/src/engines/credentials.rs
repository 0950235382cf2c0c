//! Engine credential store.
//!
//! Secrets live in `<project>/00_CONFIG/engines.json` (gitignored) as a
//! two-level map: engine name -> key -> value. Environment variables of
//! the form `BOOKFORGE_<ENGINE>_<KEY>` override file values. Secret
//! values are never logged.

use std::collections::BTreeMap;
use std::path::Path;

/// Per-engine secret/config lookup.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl CredentialStore {
    /// Empty store: only environment variables resolve.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from an `engines.json` file. A missing or unreadable file
    /// yields an empty store; engines then report a failed connection
    /// test rather than erroring at construction.
    pub fn load(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };

        match serde_json::from_str::<BTreeMap<String, BTreeMap<String, String>>>(&content) {
            Ok(entries) => Self { entries },
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve a value for an engine, environment first.
    pub fn get(&self, engine: &str, key: &str) -> Option<String> {
        let env_name = format!(
            "BOOKFORGE_{}_{}",
            engine.to_uppercase(),
            key.to_uppercase()
        );
        if let Ok(value) = std::env::var(&env_name) {
            if !value.is_empty() {
                return Some(value);
            }
        }

        self.entries
            .get(engine)
            .and_then(|m| m.get(key))
            .filter(|v| !v.is_empty())
            .cloned()
    }
}
