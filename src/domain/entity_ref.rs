use serde::{Deserialize, Serialize};
use std::fmt;

/// Polymorphic key of anything that can sit on either side of a follow: the
/// entity's type tag plus its integer id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    kind: String,
    id: i64,
}

impl EntityRef {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> i64 {
        self.id
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Grants an entity both the follower and the followable role.
pub trait Followable {
    fn entity_ref(&self) -> EntityRef;
}

impl Followable for EntityRef {
    fn entity_ref(&self) -> EntityRef {
        self.clone()
    }
}

/// A followable stored as a row of its own table, keyed by an integer `id`
/// column. Needed to delete the entity together with its follows.
pub trait Model: Followable {
    const TABLE: &'static str;
}
