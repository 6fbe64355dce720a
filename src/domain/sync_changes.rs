use super::EntityRef;
use serde::Serialize;

/// Outcome of reconciling an owner's followings with a target set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncChanges {
    /// Newly followed, in target order.
    pub attached: Vec<EntityRef>,
    /// No longer followed, in their previous insertion order.
    pub detached: Vec<EntityRef>,
}

impl SyncChanges {
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attached.len() + self.detached.len()
    }
}
