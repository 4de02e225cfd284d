use std::sync::Arc;

use tracing::{instrument, trace};

use bnode_model::Task;

use crate::toolchain::Toolchain;

/// Picks the toolchain for a task; first registered match wins.
#[derive(Default, Clone)]
pub struct ToolchainRouter {
    toolchains: Vec<Arc<dyn Toolchain>>,
}

impl ToolchainRouter {
    #[inline]
    pub fn new() -> Self {
        Self {
            toolchains: Vec::new(),
        }
    }

    #[inline]
    pub fn register(&mut self, toolchain: Arc<dyn Toolchain>) {
        self.toolchains.push(toolchain);
    }

    #[inline]
    pub fn with(mut self, toolchain: Arc<dyn Toolchain>) -> Self {
        self.register(toolchain);
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.toolchains.is_empty()
    }

    #[instrument(level = "trace", skip(self, task), fields(task = %task.id, backend = task.backend.as_str()))]
    pub fn pick(&self, task: &Task) -> Option<&Arc<dyn Toolchain>> {
        let found = self.toolchains.iter().find(|t| t.supports(task));
        if let Some(t) = found {
            trace!(toolchain = t.name(), "toolchain selected");
        }
        found
    }
}
