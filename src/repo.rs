use crate::config::{is_identifier, quote_identifier, FollowsConfig};
use crate::domain::{EntityRef, Follow, SyncChanges};
use chrono::{DateTime, Utc};
use ordermap::OrderSet;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::future::Future;
use std::num::NonZeroU32;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("`{0}` is not a valid SQL identifier")]
    InvalidIdentifier(String),
    #[error("Migration `{0}` does not start with a number")]
    InvalidMigration(String),
}

/// Storage primitives behind the follow capability. Every method is one
/// synchronous set mutation or set query against the pivot table.
pub trait RepoTrait: Sync + Send {
    /// Inserts the missing follows, returns the ones that were actually added.
    fn attach(
        &self,
        follower: &EntityRef,
        followables: &[EntityRef],
    ) -> impl Future<Output = Result<Vec<EntityRef>, RepoError>> + Send;

    /// Deletes the existing follows, returns the ones that were actually removed.
    fn detach(
        &self,
        follower: &EntityRef,
        followables: &[EntityRef],
    ) -> impl Future<Output = Result<Vec<EntityRef>, RepoError>> + Send;

    /// Makes `followables` the exact following set of `follower`.
    fn sync(
        &self,
        follower: &EntityRef,
        followables: &[EntityRef],
    ) -> impl Future<Output = Result<SyncChanges, RepoError>> + Send;

    fn is_following(
        &self,
        follower: &EntityRef,
        followable: &EntityRef,
    ) -> impl Future<Output = Result<bool, RepoError>> + Send;

    fn has_followings(
        &self,
        follower: &EntityRef,
    ) -> impl Future<Output = Result<bool, RepoError>> + Send;

    fn has_followers(
        &self,
        followable: &EntityRef,
    ) -> impl Future<Output = Result<bool, RepoError>> + Send;

    fn count_followings(
        &self,
        follower: &EntityRef,
    ) -> impl Future<Output = Result<u64, RepoError>> + Send;

    fn count_followers(
        &self,
        followable: &EntityRef,
    ) -> impl Future<Output = Result<u64, RepoError>> + Send;

    /// Outgoing follows in insertion order.
    fn get_followings(
        &self,
        follower: &EntityRef,
    ) -> impl Future<Output = Result<Vec<Follow>, RepoError>> + Send;

    /// Incoming follows in insertion order.
    fn get_followers(
        &self,
        followable: &EntityRef,
    ) -> impl Future<Output = Result<Vec<Follow>, RepoError>> + Send;

    /// Deletes the entity row from `table` together with every follow it takes
    /// part in, on either side. Returns the number of follows removed.
    fn delete_entity(
        &self,
        entity: &EntityRef,
        table: &str,
    ) -> impl Future<Output = Result<u64, RepoError>> + Send;
}

/// SQL for one [`FollowsConfig`], rendered once.
#[derive(Debug)]
struct Statements {
    insert: String,
    delete: String,
    delete_involving: String,
    is_following: String,
    has_followings: String,
    has_followers: String,
    count_followings: String,
    count_followers: String,
    count_all: String,
    select_followings: String,
    select_followers: String,
}

impl Statements {
    fn new(config: &FollowsConfig) -> Self {
        let table = quote_identifier(config.table());
        let follower_type = FollowsConfig::column(config.follower_role(), "type");
        let follower_id = FollowsConfig::column(config.follower_role(), "id");
        let followable_type = FollowsConfig::column(config.followable_role(), "type");
        let followable_id = FollowsConfig::column(config.followable_role(), "id");

        let key_columns =
            format!("{follower_type}, {follower_id}, {followable_type}, {followable_id}");
        let by_follower = format!("{follower_type} = ? AND {follower_id} = ?");
        let by_followable = format!("{followable_type} = ? AND {followable_id} = ?");
        let by_pair = format!("{by_follower} AND {by_followable}");
        let select = format!(
            "SELECT id, {follower_type} AS follower_type, {follower_id} AS follower_id, \
             {followable_type} AS followable_type, {followable_id} AS followable_id, created_at \
             FROM {table}"
        );

        Self {
            insert: format!(
                "INSERT INTO {table} ({key_columns}, created_at) VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT ({key_columns}) DO NOTHING"
            ),
            delete: format!("DELETE FROM {table} WHERE {by_pair}"),
            delete_involving: format!(
                "DELETE FROM {table} WHERE ({by_follower}) OR ({by_followable})"
            ),
            is_following: format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {by_pair})"),
            has_followings: format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {by_follower})"),
            has_followers: format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {by_followable})"),
            count_followings: format!("SELECT COUNT(*) FROM {table} WHERE {by_follower}"),
            count_followers: format!("SELECT COUNT(*) FROM {table} WHERE {by_followable}"),
            count_all: format!("SELECT COUNT(*) FROM {table}"),
            select_followings: format!("{select} WHERE {by_follower} ORDER BY id"),
            select_followers: format!("{select} WHERE {by_followable} ORDER BY id"),
        }
    }
}

pub struct Repo {
    pool: SqlitePool,
    config: FollowsConfig,
    sql: Statements,
}

impl Repo {
    pub fn new(pool: SqlitePool, config: FollowsConfig) -> Self {
        let sql = Statements::new(&config);
        Self { pool, config, sql }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: NonZeroU32,
        config: FollowsConfig,
    ) -> Result<Self, RepoError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.get())
            .connect_with(options)
            .await?;

        Ok(Self::new(pool, config))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &FollowsConfig {
        &self.config
    }

    /// Total number of follow records, across every entity type.
    pub async fn count_all(&self) -> Result<u64, RepoError> {
        let count = sqlx::query_scalar::<_, i64>(&self.sql.count_all)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn insert_follow(
        &self,
        conn: &mut SqliteConnection,
        follower: &EntityRef,
        followable: &EntityRef,
        created_at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        debug!("Inserting follow: {} -> {}", follower, followable);

        let result = sqlx::query(&self.sql.insert)
            .bind(follower.kind())
            .bind(follower.id())
            .bind(followable.kind())
            .bind(followable.id())
            .bind(created_at)
            .execute(conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_follow(
        &self,
        conn: &mut SqliteConnection,
        follower: &EntityRef,
        followable: &EntityRef,
    ) -> Result<bool, RepoError> {
        debug!("Deleting follow: {} -> {}", follower, followable);

        let result = sqlx::query(&self.sql.delete)
            .bind(follower.kind())
            .bind(follower.id())
            .bind(followable.kind())
            .bind(followable.id())
            .execute(conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, sql: &str, entity: &EntityRef) -> Result<bool, RepoError> {
        let exists = sqlx::query_scalar::<_, i64>(sql)
            .bind(entity.kind())
            .bind(entity.id())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists != 0)
    }

    async fn count(&self, sql: &str, entity: &EntityRef) -> Result<u64, RepoError> {
        let count = sqlx::query_scalar::<_, i64>(sql)
            .bind(entity.kind())
            .bind(entity.id())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn select(&self, sql: &str, entity: &EntityRef) -> Result<Vec<Follow>, RepoError> {
        let follows = sqlx::query_as::<_, Follow>(sql)
            .bind(entity.kind())
            .bind(entity.id())
            .fetch_all(&self.pool)
            .await?;
        Ok(follows)
    }
}

impl RepoTrait for Repo {
    async fn attach(
        &self,
        follower: &EntityRef,
        followables: &[EntityRef],
    ) -> Result<Vec<EntityRef>, RepoError> {
        let created_at = Utc::now();
        let mut attached = Vec::new();
        let mut tx = self.pool.begin().await?;

        for followable in followables {
            if self
                .insert_follow(&mut tx, follower, followable, created_at)
                .await?
            {
                attached.push(followable.clone());
            }
        }

        tx.commit().await?;
        Ok(attached)
    }

    async fn detach(
        &self,
        follower: &EntityRef,
        followables: &[EntityRef],
    ) -> Result<Vec<EntityRef>, RepoError> {
        let mut detached = Vec::new();
        let mut tx = self.pool.begin().await?;

        for followable in followables {
            if self.delete_follow(&mut tx, follower, followable).await? {
                detached.push(followable.clone());
            }
        }

        tx.commit().await?;
        Ok(detached)
    }

    async fn sync(
        &self,
        follower: &EntityRef,
        followables: &[EntityRef],
    ) -> Result<SyncChanges, RepoError> {
        let created_at = Utc::now();
        let targets: OrderSet<EntityRef> = followables.iter().cloned().collect();
        let mut changes = SyncChanges::default();
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, Follow>(&self.sql.select_followings)
            .bind(follower.kind())
            .bind(follower.id())
            .fetch_all(&mut *tx)
            .await?;
        let current: HashSet<EntityRef> = current
            .into_iter()
            .map(|follow| {
                if !targets.contains(&follow.followable) {
                    changes.detached.push(follow.followable.clone());
                }
                follow.followable
            })
            .collect();

        for followable in &changes.detached {
            self.delete_follow(&mut tx, follower, followable).await?;
        }

        for followable in targets {
            if current.contains(&followable) {
                continue;
            }

            if self
                .insert_follow(&mut tx, follower, &followable, created_at)
                .await?
            {
                changes.attached.push(followable);
            }
        }

        tx.commit().await?;

        debug!(
            "Synced followings of {}: {} attached, {} detached",
            follower,
            changes.attached.len(),
            changes.detached.len()
        );
        Ok(changes)
    }

    async fn is_following(
        &self,
        follower: &EntityRef,
        followable: &EntityRef,
    ) -> Result<bool, RepoError> {
        let exists = sqlx::query_scalar::<_, i64>(&self.sql.is_following)
            .bind(follower.kind())
            .bind(follower.id())
            .bind(followable.kind())
            .bind(followable.id())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists != 0)
    }

    async fn has_followings(&self, follower: &EntityRef) -> Result<bool, RepoError> {
        self.exists(&self.sql.has_followings, follower).await
    }

    async fn has_followers(&self, followable: &EntityRef) -> Result<bool, RepoError> {
        self.exists(&self.sql.has_followers, followable).await
    }

    async fn count_followings(&self, follower: &EntityRef) -> Result<u64, RepoError> {
        self.count(&self.sql.count_followings, follower).await
    }

    async fn count_followers(&self, followable: &EntityRef) -> Result<u64, RepoError> {
        self.count(&self.sql.count_followers, followable).await
    }

    async fn get_followings(&self, follower: &EntityRef) -> Result<Vec<Follow>, RepoError> {
        self.select(&self.sql.select_followings, follower).await
    }

    async fn get_followers(&self, followable: &EntityRef) -> Result<Vec<Follow>, RepoError> {
        self.select(&self.sql.select_followers, followable).await
    }

    async fn delete_entity(&self, entity: &EntityRef, table: &str) -> Result<u64, RepoError> {
        if !is_identifier(table) {
            return Err(RepoError::InvalidIdentifier(table.to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(&self.sql.delete_involving)
            .bind(entity.kind())
            .bind(entity.id())
            .bind(entity.kind())
            .bind(entity.id())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", quote_identifier(table)))
            .bind(entity.id())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            "Deleted {} from {} along with {} follows",
            entity, table, removed
        );
        Ok(removed)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::domain::{Followable, Model};
    use assertables::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_attach_skips_existing_follows() {
        let repo = test_repo().await;
        let user = create_user(&repo).await.entity_ref();
        let companies = refs(&create_companies(&repo, 2).await);

        let attached = repo.attach(&user, &companies[..1]).await.unwrap();
        assert_eq!(attached, vec![companies[0].clone()]);

        let attached = repo.attach(&user, &companies).await.unwrap();
        assert_eq!(attached, vec![companies[1].clone()]);

        assert_eq!(repo.count_followings(&user).await.unwrap(), 2);
        assert_eq!(repo.count_all().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_attach_same_target_twice_in_one_call() {
        let repo = test_repo().await;
        let user = create_user(&repo).await.entity_ref();
        let company = create_company(&repo).await.entity_ref();

        let attached = repo
            .attach(&user, &[company.clone(), company.clone()])
            .await
            .unwrap();

        assert_eq!(attached, vec![company]);
        assert_eq!(repo.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_detach_missing_follow_is_a_noop() {
        let repo = test_repo().await;
        let user = create_user(&repo).await.entity_ref();
        let company = create_company(&repo).await.entity_ref();

        let detached = repo.detach(&user, &[company]).await.unwrap();

        assert!(detached.is_empty());
        assert!(!repo.has_followings(&user).await.unwrap());
    }

    #[tokio::test]
    async fn test_follows_are_polymorphic() {
        let repo = test_repo().await;
        let user = create_user(&repo).await;
        let company = create_company(&repo).await;

        // Both rows got id 1 in their own tables
        assert_eq!(user.id, company.id);

        repo.attach(&user.entity_ref(), &[company.entity_ref()])
            .await
            .unwrap();

        assert!(repo
            .is_following(&user.entity_ref(), &company.entity_ref())
            .await
            .unwrap());
        assert!(!repo
            .is_following(&company.entity_ref(), &user.entity_ref())
            .await
            .unwrap());
        assert!(repo.has_followers(&company.entity_ref()).await.unwrap());
        assert!(!repo.has_followers(&user.entity_ref()).await.unwrap());
        assert!(!repo.has_followings(&company.entity_ref()).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_followings_and_followers_in_insertion_order() {
        let repo = test_repo().await;
        let users = refs(&[create_user(&repo).await, create_user(&repo).await]);
        let companies = refs(&create_companies(&repo, 3).await);
        let reversed: Vec<EntityRef> = companies.iter().rev().cloned().collect();

        repo.attach(&users[0], &reversed).await.unwrap();
        repo.attach(&users[1], &companies[..1]).await.unwrap();

        let followings: Vec<EntityRef> = repo
            .get_followings(&users[0])
            .await
            .unwrap()
            .into_iter()
            .map(|follow| follow.followable)
            .collect();
        assert_eq!(followings, reversed);

        let followers = repo.get_followers(&companies[0]).await.unwrap();
        assert_eq!(followers.len(), 2);
        assert_eq!(followers[0].follower, users[0]);
        assert_eq!(followers[1].follower, users[1]);
        assert_eq!(repo.count_followers(&companies[0]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_refollow_creates_a_new_record() {
        let repo = test_repo().await;
        let user = create_user(&repo).await.entity_ref();
        let company = create_company(&repo).await.entity_ref();

        repo.attach(&user, &[company.clone()]).await.unwrap();
        let first = repo.get_followings(&user).await.unwrap().remove(0);

        repo.detach(&user, &[company.clone()]).await.unwrap();
        repo.attach(&user, &[company.clone()]).await.unwrap();
        let second = repo.get_followings(&user).await.unwrap().remove(0);

        assert_ne!(first.id, second.id);
        assert_gt!(second.id, first.id);
        assert_ge!(second.created_at, first.created_at);
        assert_eq!(second.followable, company);
    }

    #[tokio::test]
    async fn test_sync_reports_changes() {
        let repo = test_repo().await;
        let user = create_user(&repo).await.entity_ref();
        let companies = refs(&create_companies(&repo, 4).await);

        repo.attach(&user, &companies[..2]).await.unwrap();

        let changes = repo.sync(&user, &companies[1..]).await.unwrap();

        assert_eq!(changes.attached, companies[2..].to_vec());
        assert_eq!(changes.detached, companies[..1].to_vec());
        assert_eq!(changes.len(), 3);
    }

    #[tokio::test]
    async fn test_sync_keeps_existing_records_untouched() {
        let repo = test_repo().await;
        let user = create_user(&repo).await.entity_ref();
        let companies = refs(&create_companies(&repo, 3).await);

        repo.attach(&user, &companies[..2]).await.unwrap();
        let before = repo.get_followings(&user).await.unwrap();

        repo.sync(&user, &companies).await.unwrap();
        let after = repo.get_followings(&user).await.unwrap();

        assert_eq!(after[..2].to_vec(), before);
        assert_eq!(after[2].followable, companies[2]);
    }

    #[tokio::test]
    async fn test_sync_with_same_set_changes_nothing() {
        let repo = test_repo().await;
        let user = create_user(&repo).await.entity_ref();
        let companies = refs(&create_companies(&repo, 2).await);

        repo.attach(&user, &companies).await.unwrap();
        let changes = repo.sync(&user, &companies).await.unwrap();

        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_sync_with_empty_set_removes_all_followings() {
        let repo = test_repo().await;
        let user = create_user(&repo).await.entity_ref();
        let companies = refs(&create_companies(&repo, 3).await);

        repo.attach(&user, &companies).await.unwrap();
        let changes = repo.sync(&user, &[]).await.unwrap();

        assert_bag_eq!(changes.detached, companies);
        assert!(!repo.has_followings(&user).await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_leaves_other_followers_alone() {
        let repo = test_repo().await;
        let users = refs(&[create_user(&repo).await, create_user(&repo).await]);
        let companies = refs(&create_companies(&repo, 2).await);

        repo.attach(&users[0], &companies).await.unwrap();
        repo.attach(&users[1], &companies).await.unwrap();

        repo.sync(&users[0], &[]).await.unwrap();

        assert_eq!(repo.count_followings(&users[1]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_entity_removes_follows_on_both_sides() {
        let repo = test_repo().await;
        let user = create_user(&repo).await;
        let other_user = create_user(&repo).await;
        let company = create_company(&repo).await;

        repo.attach(&user.entity_ref(), &[company.entity_ref(), other_user.entity_ref()])
            .await
            .unwrap();
        repo.attach(&other_user.entity_ref(), &[user.entity_ref()])
            .await
            .unwrap();

        let removed = repo
            .delete_entity(&user.entity_ref(), User::TABLE)
            .await
            .unwrap();

        assert_eq!(removed, 3);
        assert!(!row_exists(&repo, User::TABLE, user.id).await);
        assert!(row_exists(&repo, User::TABLE, other_user.id).await);
        assert!(!repo.has_followers(&company.entity_ref()).await.unwrap());
        assert!(!repo.has_followings(&other_user.entity_ref()).await.unwrap());
        assert_eq!(repo.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_entity_keeps_same_id_of_other_kind() {
        let repo = test_repo().await;
        let user = create_user(&repo).await;
        let company = create_company(&repo).await;
        let other_user = create_user(&repo).await;

        repo.attach(&other_user.entity_ref(), &[company.entity_ref()])
            .await
            .unwrap();

        repo.delete_entity(&user.entity_ref(), User::TABLE)
            .await
            .unwrap();

        assert!(row_exists(&repo, Company::TABLE, company.id).await);
        assert!(repo.has_followers(&company.entity_ref()).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_entity_rejects_bad_table_name() {
        let repo = test_repo().await;
        let user = create_user(&repo).await;

        let result = repo
            .delete_entity(&user.entity_ref(), "users; DROP TABLE follows")
            .await;

        assert!(matches!(result, Err(RepoError::InvalidIdentifier(_))));
        assert!(row_exists(&repo, User::TABLE, user.id).await);
    }

    #[tokio::test]
    async fn test_keyword_table_and_role_names() {
        let config = FollowsConfig::new("order", "group", "select").unwrap();
        let repo = Repo::new(memory_pool().await, config);
        crate::migrations::apply_migrations(repo.pool(), repo.config())
            .await
            .unwrap();
        sqlx::query("CREATE TABLE \"where\" (id INTEGER PRIMARY KEY AUTOINCREMENT)")
            .execute(repo.pool())
            .await
            .unwrap();

        let follower = EntityRef::new("user", 1);
        let followable = EntityRef::new("company", 2);

        repo.attach(&follower, &[followable.clone()]).await.unwrap();
        assert!(repo.is_following(&follower, &followable).await.unwrap());
        assert_eq!(repo.count_all().await.unwrap(), 1);

        let other = EntityRef::new("company", 3);
        let changes = repo
            .sync(&follower, &[followable.clone(), other.clone()])
            .await
            .unwrap();
        assert_eq!(changes.attached, vec![other.clone()]);
        assert_eq!(repo.get_followers(&other).await.unwrap().len(), 1);
        repo.detach(&follower, &[other]).await.unwrap();

        let removed = repo.delete_entity(&followable, "where").await.unwrap();
        assert_eq!(removed, 1);
        assert!(!repo.has_followers(&followable).await.unwrap());
    }

    #[tokio::test]
    async fn test_custom_config_tables() {
        let config = FollowsConfig::new("subscriptions", "subscriber", "channel").unwrap();
        let repo = Repo::new(memory_pool().await, config);
        crate::migrations::apply_migrations(repo.pool(), repo.config())
            .await
            .unwrap();

        let subscriber = EntityRef::new("user", 7);
        let channel = EntityRef::new("channel", 9);

        repo.attach(&subscriber, &[channel.clone()]).await.unwrap();

        assert!(repo.is_following(&subscriber, &channel).await.unwrap());
        let follows = repo.get_followers(&channel).await.unwrap();
        assert_eq!(follows[0].follower, subscriber);
        assert_eq!(follows[0].followable, channel);
    }
}
