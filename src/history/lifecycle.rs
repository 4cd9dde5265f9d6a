//! Two-phase interceptor the host calls around each save: `before_mutate`
//! while the persisted state is still readable, `after_mutate` once the write
//! went through, inside the same transaction.

use super::error::HistoryResult;
use super::options::Hook;
use super::History;
use crate::domain::{Attributes, HistoryEntry, Resource};
use crate::store::Transaction;

/// Persisted attributes captured before a mutation, consumed by the matching
/// [`History::after_mutate`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedState(Option<Attributes>);

impl CapturedState {
    pub fn attributes(&self) -> Option<&Attributes> {
        self.0.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// Per-save options.
pub struct MutationOptions<'a> {
    /// `false` skips the snapshot for this save.
    pub history: bool,
    /// The save carried only a subset of the attributes.
    pub patch: bool,
    pub transacting: Option<&'a mut dyn Transaction>,
}

impl Default for MutationOptions<'_> {
    fn default() -> Self {
        Self {
            history: true,
            patch: false,
            transacting: None,
        }
    }
}

impl<'a> MutationOptions<'a> {
    pub fn without_history() -> Self {
        Self {
            history: false,
            ..Self::default()
        }
    }

    pub fn patch(mut self, patch: bool) -> Self {
        self.patch = patch;
        self
    }

    pub fn transacting(mut self, tx: &'a mut dyn Transaction) -> Self {
        self.transacting = Some(tx);
        self
    }
}

impl History {
    /// Captures `persisted` ahead of an update so the snapshot written after
    /// it carries a diff. Creations have no prior state to capture.
    pub fn before_mutate(&self, hook: Hook, persisted: &Resource) -> CapturedState {
        match self.registry.get(&persisted.kind) {
            Some(tracked) if hook == Hook::Updated && tracked.records(hook) => {
                CapturedState(Some(persisted.attributes.clone()))
            }
            _ => CapturedState::default(),
        }
    }

    /// Records the post-mutation state of `resource` when its type tracks
    /// `hook` and the save did not opt out. Returns the written entry, if any.
    pub async fn after_mutate(
        &self,
        hook: Hook,
        resource: &Resource,
        captured: CapturedState,
        options: MutationOptions<'_>,
    ) -> HistoryResult<Option<HistoryEntry>> {
        if !options.history {
            tracing::debug!(resource_type = %resource.kind, "history skipped for this save");
            return Ok(None);
        }
        let Some(tracked) = self.registry.get(&resource.kind) else {
            return Ok(None);
        };
        if !tracked.records(hook) {
            return Ok(None);
        }

        self.record(
            resource,
            captured.attributes(),
            options.patch,
            hook.into(),
            options.transacting,
        )
        .await
        .map(Some)
    }
}
