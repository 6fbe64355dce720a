use crate::config::{quote_identifier, FollowsConfig};
use crate::repo::RepoError;
use sqlx::SqlitePool;
use tracing::info;

/// Embedded schema migrations, in file name order. Placeholders `{table}`,
/// `{index}` and `{<role>_type}`/`{<role>_id}` are filled with quoted names
/// from the [`FollowsConfig`].
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_create_follows",
        include_str!("../migrations/0001_create_follows.sql"),
    ),
    (
        "0002_index_followables",
        include_str!("../migrations/0002_index_followables.sql"),
    ),
];

pub async fn apply_migrations(
    pool: &SqlitePool,
    config: &FollowsConfig,
) -> Result<(), RepoError> {
    // Ensure the bookkeeping row exists
    ensure_migrations_table(pool, config).await?;

    let current_migration_number = get_current_migration_number(pool, config).await?;

    for (name, template) in MIGRATIONS {
        let migration_number = extract_migration_number(name)?;
        if migration_number > current_migration_number {
            run_migration(pool, config, name, template).await?;
            update_migration_number(pool, config, migration_number).await?;
        }
    }

    Ok(())
}

async fn ensure_migrations_table(
    pool: &SqlitePool,
    config: &FollowsConfig,
) -> Result<(), RepoError> {
    let table = quote_identifier(&config.migrations_table());
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            latest_migration INTEGER NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "INSERT INTO {table} (id, latest_migration) VALUES (1, 0) ON CONFLICT (id) DO NOTHING"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_current_migration_number(
    pool: &SqlitePool,
    config: &FollowsConfig,
) -> Result<i64, RepoError> {
    let latest_migration = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT latest_migration FROM {} WHERE id = 1",
        quote_identifier(&config.migrations_table())
    ))
    .fetch_optional(pool)
    .await?;

    Ok(latest_migration.unwrap_or(0))
}

async fn update_migration_number(
    pool: &SqlitePool,
    config: &FollowsConfig,
    migration_number: i64,
) -> Result<(), RepoError> {
    sqlx::query(&format!(
        "UPDATE {} SET latest_migration = ? WHERE id = 1",
        quote_identifier(&config.migrations_table())
    ))
    .bind(migration_number)
    .execute(pool)
    .await?;
    Ok(())
}

fn extract_migration_number(name: &str) -> Result<i64, RepoError> {
    name.split('_')
        .next()
        .and_then(|prefix| prefix.parse::<i64>().ok())
        .ok_or_else(|| RepoError::InvalidMigration(name.to_string()))
}

fn render(template: &str, config: &FollowsConfig) -> String {
    let follower = config.follower_role();
    let followable = config.followable_role();

    template
        .replace("{table}", &quote_identifier(config.table()))
        .replace(
            "{index}",
            &quote_identifier(&format!("{}_{followable}_index", config.table())),
        )
        .replace("{follower_type}", &FollowsConfig::column(follower, "type"))
        .replace("{follower_id}", &FollowsConfig::column(follower, "id"))
        .replace("{followable_type}", &FollowsConfig::column(followable, "type"))
        .replace("{followable_id}", &FollowsConfig::column(followable, "id"))
}

async fn run_migration(
    pool: &SqlitePool,
    config: &FollowsConfig,
    name: &str,
    template: &str,
) -> Result<(), RepoError> {
    let contents = render(template, config);
    let mut tx = pool.begin().await?;

    for statement in contents.split(';') {
        if statement.trim().is_empty() {
            continue;
        }

        sqlx::query(statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    info!("Migration applied: {} on {}", name, config.table());

    Ok(())
}
