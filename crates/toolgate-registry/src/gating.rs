use std::sync::Arc;

use crate::discovery::ToolMatch;
use crate::error::RegistryError;
use crate::registry::ToolRegistry;
use crate::tool::ToolSpec;

pub const DEFAULT_MAX_TOOLS: usize = 10;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Per-request budget caps for provisioning.
#[derive(Debug, Clone, Copy)]
pub struct GatingPolicy {
    pub max_tools: usize,
    pub max_tokens: u32,
}

impl Default for GatingPolicy {
    fn default() -> Self {
        Self {
            max_tools: DEFAULT_MAX_TOOLS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionedSet {
    pub tools: Vec<Arc<ToolSpec>>,
    pub total_tokens: u32,
    /// True iff at least one candidate was rejected by a cap.
    pub gating_applied: bool,
}

impl GatingPolicy {
    /// Provision explicit ids in input order.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownTool` if any id is absent; no partial
    /// result is produced in that case.
    pub fn select_ids(
        &self,
        registry: &ToolRegistry,
        ids: &[String],
    ) -> Result<ProvisionedSet, RegistryError> {
        let tools = ids
            .iter()
            .map(|id| registry.get(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.select(tools))
    }

    /// Provision a ranked list, highest score first.
    #[must_use]
    pub fn select_ranked(&self, matches: &[ToolMatch]) -> ProvisionedSet {
        self.select(matches.iter().map(|m| Arc::clone(&m.tool)).collect())
    }

    fn select(&self, candidates: Vec<Arc<ToolSpec>>) -> ProvisionedSet {
        let mut set = ProvisionedSet::default();
        for tool in candidates {
            let within_count = set.tools.len() + 1 <= self.max_tools;
            let spent = set.total_tokens.saturating_add(tool.estimated_tokens);
            let within_tokens = spent <= self.max_tokens;
            if within_count && within_tokens {
                set.total_tokens = spent;
                set.tools.push(tool);
            } else {
                set.gating_applied = true;
            }
        }
        set
    }
}
