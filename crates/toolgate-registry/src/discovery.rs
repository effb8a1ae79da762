use std::cmp::Ordering;
use std::sync::Arc;

use toolgate_embed::Embedder;

use crate::registry::ToolRegistry;
use crate::tool::ToolSpec;

const TAG_BOOST: f32 = 0.2;

#[derive(Debug, Clone)]
pub struct ToolMatch {
    pub tool: Arc<ToolSpec>,
    pub score: f32,
    pub matched_tags: Vec<String>,
}

/// Ranks catalog tools against a natural-language query.
pub struct DiscoveryEngine {
    registry: Arc<ToolRegistry>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryEngine").finish_non_exhaustive()
    }
}

impl DiscoveryEngine {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        let embedder = registry.embedder();
        Self { registry, embedder }
    }

    /// Score every indexed tool and return the top `limit` matches.
    ///
    /// Score is cosine similarity (zero for an empty query) plus a
    /// `0.2 × |tags ∩ tool.tags|` boost, clamped to `[0, 1]`. Ties break by
    /// ascending id so a fixed catalog and query always rank identically.
    ///
    /// # Errors
    ///
    /// Returns an embedding error for the query text.
    pub fn discover(
        &self,
        query: &str,
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<ToolMatch>, toolgate_embed::EmbedError> {
        let query_vec = if query.trim().is_empty() {
            None
        } else {
            Some(self.embedder.embed(query)?)
        };
        let wanted: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();

        // Scoring runs on the snapshot with no registry lock held.
        let snapshot = self.registry.snapshot();
        let mut matches: Vec<ToolMatch> = snapshot
            .tools
            .iter()
            .enumerate()
            .map(|(row, tool)| {
                let sim = query_vec.as_ref().map_or(0.0, |q| {
                    let start = row * snapshot.dim;
                    dot(q, &snapshot.matrix[start..start + snapshot.dim])
                });
                let matched_tags: Vec<String> = wanted
                    .iter()
                    .filter(|t| tool.tags.contains(t))
                    .cloned()
                    .collect();
                #[allow(clippy::cast_precision_loss)]
                let boost = TAG_BOOST * matched_tags.len() as f32;
                ToolMatch {
                    tool: Arc::clone(tool),
                    score: (sim + boost).clamp(0.0, 1.0),
                    matched_tags,
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.tool.id.cmp(&b.tool.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
