use serde::{Deserialize, Serialize};

/// Registered tool descriptor. Immutable once inserted; replacement is
/// delete + insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Flat identifier, `"<backend>_<native_name>"` for proxied tools.
    pub id: String,
    /// Native tool name as reported by the backend.
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opaque JSON schema, passed through untouched in both directions.
    #[serde(default = "empty_object")]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub estimated_tokens: u32,
    /// Owning backend; `None` for locally defined tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Unit-norm embedding. Computed at insert time when left empty.
    #[serde(skip)]
    pub vector: Vec<f32>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ToolSpec {
    /// Text fed to the embedder: name, description, and tags joined.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!("{} {} {}", self.name, self.description, self.tags.join(" "))
    }

    /// Lower-cases, deduplicates, and sorts the tag set.
    pub fn normalize_tags(&mut self) {
        for tag in &mut self.tags {
            *tag = tag.to_lowercase();
        }
        self.tags.sort_unstable();
        self.tags.dedup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_text_joins_fields() {
        let tool = ToolSpec {
            id: "exa_search".into(),
            name: "search".into(),
            description: "Search the web".into(),
            tags: vec!["web".into(), "search".into()],
            parameters: serde_json::json!({}),
            estimated_tokens: 80,
            backend: Some("exa".into()),
            vector: Vec::new(),
        };
        assert_eq!(tool.embedding_text(), "search Search the web web search");
    }

    #[test]
    fn normalize_tags_dedups_and_sorts() {
        let mut tool = ToolSpec {
            id: "t".into(),
            name: "t".into(),
            description: "d".into(),
            tags: vec!["Web".into(), "search".into(), "web".into()],
            parameters: serde_json::json!({}),
            estimated_tokens: 0,
            backend: None,
            vector: Vec::new(),
        };
        tool.normalize_tags();
        assert_eq!(tool.tags, ["search", "web"]);
    }

    #[test]
    fn deserialize_fills_defaults() {
        let tool: ToolSpec = serde_json::from_str(
            r#"{"id":"calc","name":"Calculator","description":"Perform calculations"}"#,
        )
        .unwrap();
        assert!(tool.tags.is_empty());
        assert!(tool.parameters.is_object());
        assert_eq!(tool.estimated_tokens, 0);
        assert!(tool.backend.is_none());
        assert!(tool.vector.is_empty());
    }

    #[test]
    fn vector_is_not_serialized() {
        let tool = ToolSpec {
            id: "t".into(),
            name: "t".into(),
            description: "d".into(),
            tags: Vec::new(),
            parameters: serde_json::json!({}),
            estimated_tokens: 0,
            backend: None,
            vector: vec![1.0, 0.0],
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(!json.contains("vector"));
    }
}
