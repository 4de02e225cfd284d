use async_trait::async_trait;
use bnode_core::Subscribe;
use bnode_model::PoolEvent;

use crate::subscriber::view::log_event;

/// Subscriber that renders every pool event through `tracing`.
#[derive(Debug, Default)]
pub struct Journal;

impl Journal {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for Journal {
    async fn on_event(&self, event: &PoolEvent) {
        log_event(event);
    }
    fn name(&self) -> &'static str {
        "journal"
    }
    fn queue_capacity(&self) -> usize {
        2048
    }
}
