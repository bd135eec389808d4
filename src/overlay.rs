use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::model::CollectionKind;
use crate::storage::Store;

pub const DEFAULT_KEY_PREFIX: &str = "hidden";

/// Opens per-collection overlay sets. Without a backing store the sets live
/// only in memory.
#[derive(Debug, Clone)]
pub struct OverlayStore {
    store: Option<Arc<Store>>,
    key_prefix: String,
}

impl OverlayStore {
    pub fn new(store: Arc<Store>, key_prefix: impl Into<String>) -> Self {
        Self {
            store: Some(store),
            key_prefix: key_prefix.into(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            store: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Storage key for one collection kind, e.g. `hiddenPosts`.
    pub fn key_for(&self, kind: CollectionKind) -> String {
        format!("{}{}", self.key_prefix, kind.display_name())
    }

    pub fn load(&self, kind: CollectionKind) -> OverlaySet {
        let key = self.key_for(kind);
        let ids = match self.store.as_ref() {
            Some(store) => match store.get_value(&key) {
                Ok(Some(raw)) => parse_ids(&key, &raw),
                Ok(None) => Vec::new(),
                Err(err) => {
                    warn!(key = %key, error = %err, "overlay unreadable; treating as empty");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        debug!(key = %key, count = ids.len(), "overlay loaded");
        OverlaySet {
            kind,
            key,
            store: self.store.clone(),
            index: ids.iter().cloned().collect(),
            ids,
        }
    }

    pub fn is_suppressed(&self, kind: CollectionKind, id: &str) -> bool {
        self.load(kind).is_suppressed(id)
    }

    pub fn suppress(&self, kind: CollectionKind, id: &str) -> Result<bool> {
        self.load(kind).suppress(id)
    }

    pub fn unsuppress(&self, kind: CollectionKind, id: &str) -> Result<bool> {
        self.load(kind).unsuppress(id)
    }
}

fn parse_ids(key: &str, raw: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(ids) => {
            let mut seen = HashSet::new();
            ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
        }
        Err(err) => {
            warn!(key = %key, error = %err, "overlay value corrupt; treating as empty");
            Vec::new()
        }
    }
}

/// Ids suppressed from view for one collection kind, in the order they were
/// hidden.
#[derive(Debug, Clone)]
pub struct OverlaySet {
    kind: CollectionKind,
    key: String,
    store: Option<Arc<Store>>,
    ids: Vec<String>,
    index: HashSet<String>,
}

impl OverlaySet {
    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_suppressed(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Returns false when `id` was already hidden.
    pub fn suppress(&mut self, id: &str) -> Result<bool> {
        self.update(|ids| {
            if ids.iter().any(|existing| existing == id) {
                return false;
            }
            ids.push(id.to_string());
            true
        })
    }

    pub fn unsuppress(&mut self, id: &str) -> Result<bool> {
        self.update(|ids| {
            let before = ids.len();
            ids.retain(|existing| existing != id);
            ids.len() != before
        })
    }

    /// Apply `change` to the stored list, not just this copy, so sets of
    /// the same kind never drop each other's ids. Memory is only touched
    /// once the write has landed.
    fn update(&mut self, change: impl FnOnce(&mut Vec<String>) -> bool) -> Result<bool> {
        let Some(store) = self.store.clone() else {
            let mut ids = self.ids.clone();
            let changed = change(&mut ids);
            self.commit(ids);
            return Ok(changed);
        };

        let key = self.key.clone();
        let mut changed = false;
        let mut latest = Vec::new();
        store
            .update_value(&key, |raw| {
                let mut ids = raw.map(|raw| parse_ids(&key, raw)).unwrap_or_default();
                changed = change(&mut ids);
                let encoded = if changed {
                    Some(serde_json::to_string(&ids).context("overlay: encode ids")?)
                } else {
                    None
                };
                latest = ids;
                Ok(encoded)
            })
            .with_context(|| format!("overlay: persist {key}"))?;
        self.commit(latest);
        Ok(changed)
    }

    fn commit(&mut self, ids: Vec<String>) {
        self.index = ids.iter().cloned().collect();
        self.ids = ids;
    }
}
