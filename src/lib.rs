//! Follow relationships between arbitrary entities, stored in one polymorphic
//! pivot table.
//!
//! ```no_run
//! # use follows::{EntityRef, Follows, Repo};
//! # use std::sync::Arc;
//! # async fn run(repo: Repo) -> Result<(), follows::RepoError> {
//! let follows = Follows::new(Arc::new(repo));
//! let user = EntityRef::new("user", 1);
//! let company = EntityRef::new("company", 7);
//!
//! follows.of(&user).follow(&company).await?;
//! assert!(follows.of(&company).has_followers().await?);
//! # Ok(())
//! # }
//! ```

pub mod can_follow;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod migrations;
pub mod repo;

pub use can_follow::{CanFollow, Follows};
pub use config::FollowsConfig;
pub use domain::{EntityRef, Follow, Followable, Model, SyncChanges};
pub use repo::{Repo, RepoError, RepoTrait};
