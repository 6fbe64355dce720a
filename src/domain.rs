pub mod entity_ref;
pub use entity_ref::{EntityRef, Followable, Model};

pub mod follow;
pub use follow::Follow;

pub mod sync_changes;
pub use sync_changes::SyncChanges;
