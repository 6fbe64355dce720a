use crate::domain::{EntityRef, Follow, Followable, Model, SyncChanges};
use crate::metrics;
use crate::repo::{RepoError, RepoTrait};
use ordermap::OrderSet;
use std::sync::Arc;
use tracing::debug;

/// Entry point of the follow capability, shared by every entity type that
/// lives in the same pivot table.
pub struct Follows<T>
where
    T: RepoTrait,
{
    repo: Arc<T>,
}

impl<T> Follows<T>
where
    T: RepoTrait,
{
    pub fn new(repo: Arc<T>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &Arc<T> {
        &self.repo
    }

    /// Follow operations on behalf of `owner`.
    pub fn of<E>(&self, owner: &E) -> CanFollow<'_, T>
    where
        E: Followable + ?Sized,
    {
        CanFollow {
            repo: &self.repo,
            owner: owner.entity_ref(),
        }
    }

    /// Deletes `entity` and every follow it appears in, as follower or as
    /// followable, in a single transaction.
    pub async fn delete<M>(&self, entity: &M) -> Result<u64, RepoError>
    where
        M: Model + ?Sized,
    {
        let entity = entity.entity_ref();
        let removed = self.repo.delete_entity(&entity, M::TABLE).await?;
        metrics::cascade_deleted_follows().increment(removed);

        debug!("Deleted {} and {} follows", entity, removed);
        Ok(removed)
    }
}

/// The follower/followable role of a single entity. Nothing is cached here,
/// every query reads the current state of the pivot table.
pub struct CanFollow<'a, T>
where
    T: RepoTrait,
{
    repo: &'a T,
    owner: EntityRef,
}

impl<T> CanFollow<'_, T>
where
    T: RepoTrait,
{
    pub fn owner(&self) -> &EntityRef {
        &self.owner
    }

    pub async fn follow<E>(&self, target: &E) -> Result<&Self, RepoError>
    where
        E: Followable + ?Sized,
    {
        let attached = self
            .repo
            .attach(&self.owner, &[target.entity_ref()])
            .await?;
        self.record_attached(attached.len());
        Ok(self)
    }

    /// Follows every target, skipping the ones already followed.
    pub async fn follow_many<'e, E, I>(&self, targets: I) -> Result<&Self, RepoError>
    where
        I: IntoIterator<Item = &'e E>,
        E: Followable + 'e,
    {
        let targets = collect_refs(targets);
        let attached = self.repo.attach(&self.owner, &targets).await?;
        self.record_attached(attached.len());
        Ok(self)
    }

    pub async fn unfollow<E>(&self, target: &E) -> Result<&Self, RepoError>
    where
        E: Followable + ?Sized,
    {
        let detached = self
            .repo
            .detach(&self.owner, &[target.entity_ref()])
            .await?;
        self.record_detached(detached.len());
        Ok(self)
    }

    pub async fn unfollow_many<'e, E, I>(&self, targets: I) -> Result<&Self, RepoError>
    where
        I: IntoIterator<Item = &'e E>,
        E: Followable + 'e,
    {
        let targets = collect_refs(targets);
        let detached = self.repo.detach(&self.owner, &targets).await?;
        self.record_detached(detached.len());
        Ok(self)
    }

    /// Leaves the owner following exactly `targets`. Follows that already
    /// exist are kept as they are.
    pub async fn sync_many_followings<'e, E, I>(&self, targets: I) -> Result<&Self, RepoError>
    where
        I: IntoIterator<Item = &'e E>,
        E: Followable + 'e,
    {
        let (can_follow, _) = self.sync_many_followings_with_changes(targets).await?;
        Ok(can_follow)
    }

    /// Same as [`Self::sync_many_followings`], also reporting what was
    /// attached and detached.
    pub async fn sync_many_followings_with_changes<'e, E, I>(
        &self,
        targets: I,
    ) -> Result<(&Self, SyncChanges), RepoError>
    where
        I: IntoIterator<Item = &'e E>,
        E: Followable + 'e,
    {
        let targets = collect_refs(targets);
        let changes = self.repo.sync(&self.owner, &targets).await?;
        self.record_attached(changes.attached.len());
        self.record_detached(changes.detached.len());
        Ok((self, changes))
    }

    pub async fn is_following<E>(&self, target: &E) -> Result<bool, RepoError>
    where
        E: Followable + ?Sized,
    {
        self.repo
            .is_following(&self.owner, &target.entity_ref())
            .await
    }

    pub async fn has_followings(&self) -> Result<bool, RepoError> {
        self.repo.has_followings(&self.owner).await
    }

    pub async fn has_followers(&self) -> Result<bool, RepoError> {
        self.repo.has_followers(&self.owner).await
    }

    pub async fn followings_count(&self) -> Result<u64, RepoError> {
        self.repo.count_followings(&self.owner).await
    }

    pub async fn followers_count(&self) -> Result<u64, RepoError> {
        self.repo.count_followers(&self.owner).await
    }

    /// Entities the owner follows, oldest follow first.
    pub async fn followings(&self) -> Result<Vec<EntityRef>, RepoError> {
        let follows = self.repo.get_followings(&self.owner).await?;
        Ok(follows.into_iter().map(|follow| follow.followable).collect())
    }

    /// Entities following the owner, oldest follow first.
    pub async fn followers(&self) -> Result<Vec<EntityRef>, RepoError> {
        let follows = self.repo.get_followers(&self.owner).await?;
        Ok(follows.into_iter().map(|follow| follow.follower).collect())
    }

    pub async fn following_records(&self) -> Result<Vec<Follow>, RepoError> {
        self.repo.get_followings(&self.owner).await
    }

    pub async fn follower_records(&self) -> Result<Vec<Follow>, RepoError> {
        self.repo.get_followers(&self.owner).await
    }

    fn record_attached(&self, count: usize) {
        if count > 0 {
            metrics::follows().increment(count as u64);
            debug!("{} followed {} entities", self.owner, count);
        }
    }

    fn record_detached(&self, count: usize) {
        if count > 0 {
            metrics::unfollows().increment(count as u64);
            debug!("{} unfollowed {} entities", self.owner, count);
        }
    }
}

// First occurrence wins.
fn collect_refs<'e, E, I>(targets: I) -> Vec<EntityRef>
where
    I: IntoIterator<Item = &'e E>,
    E: Followable + 'e,
{
    targets
        .into_iter()
        .map(Followable::entity_ref)
        .collect::<OrderSet<_>>()
        .into_iter()
        .collect()
}
