use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use toolgate_embed::Embedder;

use crate::error::RegistryError;
use crate::tool::ToolSpec;

/// Immutable row-aligned view of the catalog for the discovery engine.
///
/// Rebuilt and atomically swapped on every mutation, so readers holding an
/// `Arc` never observe a torn index.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    pub tools: Vec<Arc<ToolSpec>>,
    /// Row-major `tools.len() × dim` matrix, row i belongs to `tools[i]`.
    pub matrix: Vec<f32>,
    pub dim: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ToolFilter {
    pub backend: Option<String>,
    pub tag: Option<String>,
}

#[derive(Default)]
struct Inner {
    tools: BTreeMap<String, Arc<ToolSpec>>,
    by_tag: HashMap<String, BTreeSet<String>>,
    by_backend: HashMap<String, BTreeSet<String>>,
    snapshot: Arc<IndexSnapshot>,
}

/// Authoritative in-memory tool catalog. Many readers, single writer.
pub struct ToolRegistry {
    embedder: Arc<dyn Embedder>,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            inner: RwLock::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    /// Insert a descriptor, computing its embedding when none was supplied.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateId` if the id is taken, or an
    /// embedding error.
    pub fn insert(&self, mut tool: ToolSpec) -> Result<(), RegistryError> {
        tool.normalize_tags();
        if tool.vector.is_empty() {
            tool.vector = self.embedder.embed(&tool.embedding_text())?;
        }

        let mut inner = self.write();
        if inner.tools.contains_key(&tool.id) {
            return Err(RegistryError::DuplicateId { id: tool.id });
        }

        let id = tool.id.clone();
        for tag in &tool.tags {
            inner.by_tag.entry(tag.clone()).or_default().insert(id.clone());
        }
        if let Some(backend) = &tool.backend {
            inner
                .by_backend
                .entry(backend.clone())
                .or_default()
                .insert(id.clone());
        }
        inner.tools.insert(id, Arc::new(tool));
        rebuild_snapshot(&mut inner, self.embedder.dimension());
        Ok(())
    }

    /// Remove one descriptor. Idempotent.
    pub fn delete(&self, id: &str) {
        let mut inner = self.write();
        if remove_entry(&mut inner, id) {
            rebuild_snapshot(&mut inner, self.embedder.dimension());
        }
    }

    /// Remove every descriptor owned by `backend`. Returns the removed count.
    pub fn delete_by_backend(&self, backend: &str) -> usize {
        let mut inner = self.write();
        let ids: Vec<String> = inner
            .by_backend
            .get(backend)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for id in &ids {
            remove_entry(&mut inner, id);
        }
        if !ids.is_empty() {
            rebuild_snapshot(&mut inner, self.embedder.dimension());
            tracing::debug!(backend, removed = ids.len(), "dropped backend tools");
        }
        ids.len()
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        *inner = Inner::default();
    }

    /// # Errors
    ///
    /// Returns `RegistryError::UnknownTool` if the id is absent.
    pub fn get(&self, id: &str) -> Result<Arc<ToolSpec>, RegistryError> {
        self.read()
            .tools
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTool { id: id.into() })
    }

    /// List descriptors in id order, optionally filtered by backend or tag.
    #[must_use]
    pub fn list(&self, filter: &ToolFilter) -> Vec<Arc<ToolSpec>> {
        let inner = self.read();
        inner
            .tools
            .values()
            .filter(|t| {
                filter
                    .backend
                    .as_ref()
                    .is_none_or(|b| t.backend.as_ref() == Some(b))
            })
            .filter(|t| filter.tag.as_ref().is_none_or(|tag| t.tags.contains(tag)))
            .cloned()
            .collect()
    }

    /// Zero-copy view for the discovery engine; scoring runs with no
    /// registry lock held.
    #[must_use]
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.read().snapshot)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn remove_entry(inner: &mut Inner, id: &str) -> bool {
    let Some(tool) = inner.tools.remove(id) else {
        return false;
    };
    for tag in &tool.tags {
        if let Some(set) = inner.by_tag.get_mut(tag) {
            set.remove(id);
            if set.is_empty() {
                inner.by_tag.remove(tag);
            }
        }
    }
    if let Some(backend) = &tool.backend {
        if let Some(set) = inner.by_backend.get_mut(backend) {
            set.remove(id);
            if set.is_empty() {
                inner.by_backend.remove(backend);
            }
        }
    }
    true
}

fn rebuild_snapshot(inner: &mut Inner, dim: usize) {
    let tools: Vec<Arc<ToolSpec>> = inner.tools.values().cloned().collect();
    let mut matrix = Vec::with_capacity(tools.len() * dim);
    for tool in &tools {
        debug_assert_eq!(tool.vector.len(), dim);
        matrix.extend_from_slice(&tool.vector);
    }
    inner.snapshot = Arc::new(IndexSnapshot { tools, matrix, dim });
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_embed::HashEmbedder;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(Arc::new(HashEmbedder::new(32).unwrap()))
    }

    fn tool(id: &str, backend: Option<&str>, tags: &[&str]) -> ToolSpec {
        ToolSpec {
            id: id.into(),
            name: id.rsplit('_').next().unwrap_or(id).into(),
            description: format!("{id} test tool"),
            tags: tags.iter().map(|s| (*s).into()).collect(),
            parameters: serde_json::json!({"type": "object"}),
            estimated_tokens: 50,
            backend: backend.map(Into::into),
            vector: Vec::new(),
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let reg = registry();
        reg.insert(tool("exa_search", Some("exa"), &["web"])).unwrap();

        let got = reg.get("exa_search").unwrap();
        assert_eq!(got.name, "search");
        assert_eq!(got.backend.as_deref(), Some("exa"));
        assert_eq!(got.tags, ["web"]);
        let norm: f32 = got.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn duplicate_id_rejected() {
        let reg = registry();
        reg.insert(tool("a_t", Some("a"), &[])).unwrap();
        let err = reg.insert(tool("a_t", Some("a"), &[])).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId { ref id } if id == "a_t"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn get_unknown_errors() {
        let reg = registry();
        let err = reg.get("nope").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTool { ref id } if id == "nope"));
    }

    #[test]
    fn delete_is_idempotent() {
        let reg = registry();
        reg.insert(tool("a_t", Some("a"), &["x"])).unwrap();
        reg.delete("a_t");
        reg.delete("a_t");
        assert!(reg.is_empty());
        assert!(reg.list(&ToolFilter { tag: Some("x".into()), ..Default::default() }).is_empty());
    }

    #[test]
    fn delete_by_backend_removes_all_owned() {
        let reg = registry();
        reg.insert(tool("a_one", Some("a"), &[])).unwrap();
        reg.insert(tool("a_two", Some("a"), &[])).unwrap();
        reg.insert(tool("b_one", Some("b"), &[])).unwrap();

        assert_eq!(reg.delete_by_backend("a"), 2);
        assert_eq!(reg.len(), 1);
        assert!(reg.get("b_one").is_ok());
        assert!(reg
            .list(&ToolFilter { backend: Some("a".into()), ..Default::default() })
            .is_empty());
    }

    #[test]
    fn delete_by_backend_unknown_is_noop() {
        let reg = registry();
        reg.insert(tool("a_one", Some("a"), &[])).unwrap();
        assert_eq!(reg.delete_by_backend("ghost"), 0);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn list_filters_by_backend_and_tag() {
        let reg = registry();
        reg.insert(tool("a_one", Some("a"), &["web"])).unwrap();
        reg.insert(tool("a_two", Some("a"), &["file"])).unwrap();
        reg.insert(tool("b_one", Some("b"), &["web"])).unwrap();

        let by_backend = reg.list(&ToolFilter { backend: Some("a".into()), ..Default::default() });
        assert_eq!(by_backend.len(), 2);

        let by_tag = reg.list(&ToolFilter { tag: Some("web".into()), ..Default::default() });
        let ids: Vec<&str> = by_tag.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a_one", "b_one"]);
    }

    #[test]
    fn snapshot_rows_align_with_tools() {
        let reg = registry();
        reg.insert(tool("b_t", Some("b"), &[])).unwrap();
        reg.insert(tool("a_t", Some("a"), &[])).unwrap();

        let snap = reg.snapshot();
        assert_eq!(snap.tools.len(), 2);
        assert_eq!(snap.matrix.len(), 2 * snap.dim);
        // Id order is stable.
        assert_eq!(snap.tools[0].id, "a_t");
        assert_eq!(snap.tools[1].id, "b_t");
        assert_eq!(&snap.matrix[..snap.dim], snap.tools[0].vector.as_slice());
    }

    #[test]
    fn snapshot_is_immutable_across_mutation() {
        let reg = registry();
        reg.insert(tool("a_t", Some("a"), &[])).unwrap();
        let before = reg.snapshot();
        reg.insert(tool("b_t", Some("b"), &[])).unwrap();
        assert_eq!(before.tools.len(), 1);
        assert_eq!(reg.snapshot().tools.len(), 2);
    }

    #[test]
    fn clear_empties_everything() {
        let reg = registry();
        reg.insert(tool("a_t", Some("a"), &["web"])).unwrap();
        reg.clear();
        assert!(reg.is_empty());
        assert_eq!(reg.snapshot().tools.len(), 0);
    }

    #[test]
    fn supplied_vector_is_kept() {
        let reg = registry();
        let mut t = tool("a_t", Some("a"), &[]);
        t.vector = {
            let mut v = vec![0.0; 32];
            v[0] = 1.0;
            v
        };
        reg.insert(t).unwrap();
        assert_eq!(reg.get("a_t").unwrap().vector[0], 1.0);
    }

    #[test]
    fn ids_stay_unique_under_concurrent_insert() {
        let reg = Arc::new(registry());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let reg = Arc::clone(&reg);
            handles.push(std::thread::spawn(move || {
                let _ = reg.insert(tool("shared_t", Some("shared"), &[]));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 1);
    }
}
