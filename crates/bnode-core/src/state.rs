use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::SystemTime,
};

use tracing::warn;

use bnode_model::{BuildPhase, EventKind, Platform, PoolEvent, TaskId};

use crate::events::Bus;

/// Snapshot of one in-flight task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub platform: Platform,
    pub phase: BuildPhase,
    pub claimed_at: SystemTime,
    pub updated_at: SystemTime,
    pub error: Option<String>,
}

/// In-memory registry of tasks the pool is currently working on.
#[derive(Clone, Default)]
pub struct TaskState {
    inner: Arc<RwLock<HashMap<TaskId, TaskInfo>>>,
}

impl TaskState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly claimed task.
    pub fn add_task(&self, id: TaskId, platform: Platform) {
        let now = SystemTime::now();
        let info = TaskInfo {
            id: id.clone(),
            platform,
            phase: BuildPhase::Claimed,
            claimed_at: now,
            updated_at: now,
            error: None,
        };
        self.write().insert(id, info);
    }

    /// Moves a task to `phase`; illegal transitions are ignored.
    ///
    /// Returns `true` when the phase changed.
    pub fn set_phase(&self, id: &TaskId, phase: BuildPhase) -> bool {
        let mut inner = self.write();
        let Some(info) = inner.get_mut(id) else {
            return false;
        };
        if !info.phase.can_advance_to(phase) {
            warn!(task = %id, from = ?info.phase, to = ?phase, "illegal phase transition ignored");
            return false;
        }
        info.phase = phase;
        info.updated_at = SystemTime::now();
        true
    }

    pub fn set_error(&self, id: &TaskId, error: impl Into<String>) {
        if let Some(info) = self.write().get_mut(id) {
            info.error = Some(error.into());
            info.updated_at = SystemTime::now();
        }
    }

    pub fn remove_task(&self, id: &TaskId) -> Option<TaskInfo> {
        self.write().remove(id)
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskInfo> {
        self.read().get(id).cloned()
    }

    pub fn list_all(&self) -> Vec<TaskInfo> {
        self.read().values().cloned().collect()
    }

    pub fn list_by_phase(&self, phase: BuildPhase) -> Vec<TaskInfo> {
        self.read()
            .values()
            .filter(|info| info.phase == phase)
            .cloned()
            .collect()
    }

    /// Ids of every registered task, sorted.
    pub fn active_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TaskId, TaskInfo>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TaskId, TaskInfo>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Phase bookkeeping for one task: registry update plus `PhaseChanged` event.
#[derive(Clone)]
pub struct PhaseTracker {
    id: TaskId,
    state: TaskState,
    bus: Bus,
}

impl PhaseTracker {
    pub fn new(id: TaskId, state: TaskState, bus: Bus) -> Self {
        Self { id, state, bus }
    }

    pub fn advance(&self, phase: BuildPhase) {
        if self.state.set_phase(&self.id, phase) {
            self.bus.emit(
                PoolEvent::new(EventKind::PhaseChanged)
                    .with_task(&self.id)
                    .with_phase(phase),
            );
        }
    }

    pub fn fail(&self, reason: &str) {
        self.state.set_error(&self.id, reason);
        self.advance(BuildPhase::Failed);
    }

    #[inline]
    pub fn task(&self) -> &TaskId {
        &self.id
    }
}
