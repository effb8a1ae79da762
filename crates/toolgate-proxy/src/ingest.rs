//! Turns native backend tools into enriched registry descriptors.

use toolgate_mcp::NativeTool;
use toolgate_registry::ToolSpec;

const KEYWORD_TAGS: &[&str] = &["search", "web", "browser", "file", "code", "api", "data"];

const BASE_TOKENS: u32 = 50;

/// Build the namespaced descriptor for a tool reported by `backend`.
#[must_use]
pub fn descriptor_from_native(backend: &str, native: &NativeTool) -> ToolSpec {
    let parameters = if native.input_schema.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        native.input_schema.clone()
    };

    ToolSpec {
        id: format!("{backend}_{}", native.name),
        name: native.name.clone(),
        description: native.description.clone(),
        tags: extract_tags(&native.description),
        estimated_tokens: estimate_tokens(&native.description, &parameters),
        parameters,
        backend: Some(backend.to_owned()),
        vector: Vec::new(),
    }
}

/// Keyword-derived tags, sorted and deduplicated.
fn extract_tags(description: &str) -> Vec<String> {
    let lower = description.to_lowercase();
    let mut tags: Vec<String> = KEYWORD_TAGS
        .iter()
        .filter(|k| lower.contains(*k))
        .map(|k| (*k).to_owned())
        .collect();

    if lower.contains("screenshot") {
        tags.push("screenshot".into());
    }
    if lower.contains("navigate") || lower.contains("navigation") {
        tags.push("navigation".into());
    }
    if lower.contains("read") {
        tags.push("read".into());
    }
    if lower.contains("write") {
        tags.push("write".into());
    }
    if lower.contains("documentation") || lower.contains("docs") {
        tags.push("documentation".into());
    }

    tags.sort_unstable();
    tags.dedup();
    tags
}

/// Prompt cost of a tool definition: description words plus a quarter of the
/// serialized schema length, over a fixed base.
fn estimate_tokens(description: &str, parameters: &serde_json::Value) -> u32 {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let desc_tokens = (description.split_whitespace().count() as f32 * 1.3) as u32;
    let schema_len = serde_json::to_string(parameters).map_or(0, |s| s.len());
    #[allow(clippy::cast_possible_truncation)]
    let schema_tokens = (schema_len / 4) as u32;
    BASE_TOKENS + desc_tokens + schema_tokens
}
