use config_rs::{Config as ConfigTree, ConfigError, Environment, File};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::env;
use std::num::NonZeroU32;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: NonZeroU32,
    pub table: String,
    pub follower_role: String,
    pub followable_role: String,
}

impl Settings {
    pub fn follows_config(&self) -> Result<FollowsConfig, ConfigError> {
        FollowsConfig::new(&self.table, &self.follower_role, &self.followable_role)
    }
}

impl Configurable for Settings {
    fn key() -> &'static str {
        // Root key
        "follows"
    }
}

pub const ENVIRONMENT_PREFIX: &str = "APP";
pub const CONFIG_SEPARATOR: &str = "__";

#[must_use]
pub fn environment() -> String {
    env::var(format!("{ENVIRONMENT_PREFIX}{CONFIG_SEPARATOR}ENVIRONMENT"))
        .unwrap_or_else(|_| "development".into())
}

pub trait Configurable {
    fn key() -> &'static str;
}

#[derive(Debug, Clone)]
pub struct Config {
    config: ConfigTree,
}

impl Config {
    pub fn new(config_dir: &str) -> Result<Self, ConfigError> {
        let environment = environment();

        let default_config_path = format!("{}/settings.yml", &config_dir);
        let env_config_path = format!("{}/settings.{}.yml", &config_dir, &environment);
        let local_config_path = format!("{}/settings.local.yml", &config_dir);

        info!("Loading configuration from: {}", default_config_path);
        info!(
            "Loading environment-specific configuration from: {}",
            env_config_path
        );
        info!("Loading local overrides from: {}", local_config_path);

        ConfigTree::builder()
            .add_source(File::with_name(&default_config_path))
            .add_source(File::with_name(&env_config_path).required(false))
            .add_source(File::with_name(&local_config_path).required(false))
            .add_source(Environment::with_prefix(ENVIRONMENT_PREFIX).separator(CONFIG_SEPARATOR))
            .build()
            .map(|c| Config { config: c })
    }

    pub fn get<T>(&self) -> Result<T, ConfigError>
    where
        T: Configurable,
        T: DeserializeOwned,
    {
        self.config.get::<T>(T::key())
    }
}

/// Names the pivot table and the two polymorphic roles stored in it.
///
/// Every follow record lives in `table`, with the follower side in the
/// `{follower_role}_type`/`{follower_role}_id` columns and the followed side
/// in `{followable_role}_type`/`{followable_role}_id`. All three names end up
/// inside SQL statements, so they are validated as plain identifiers and
/// always emitted double-quoted, which lets keywords like `order` through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowsConfig {
    table: String,
    follower_role: String,
    followable_role: String,
}

impl Default for FollowsConfig {
    fn default() -> Self {
        Self {
            table: "follows".to_string(),
            follower_role: "follower".to_string(),
            followable_role: "followable".to_string(),
        }
    }
}

impl FollowsConfig {
    pub fn new(
        table: &str,
        follower_role: &str,
        followable_role: &str,
    ) -> Result<Self, ConfigError> {
        for name in [table, follower_role, followable_role] {
            if !is_identifier(name) {
                return Err(ConfigError::Message(format!(
                    "`{name}` is not a valid SQL identifier"
                )));
            }
        }

        if follower_role == followable_role {
            return Err(ConfigError::Message(format!(
                "follower and followable roles must differ, both are `{follower_role}`"
            )));
        }

        Ok(Self {
            table: table.to_string(),
            follower_role: follower_role.to_string(),
            followable_role: followable_role.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn follower_role(&self) -> &str {
        &self.follower_role
    }

    pub fn followable_role(&self) -> &str {
        &self.followable_role
    }

    pub fn migrations_table(&self) -> String {
        format!("{}_migrations", self.table)
    }

    /// `"{role}_{suffix}"`, quoted.
    pub fn column(role: &str, suffix: &str) -> String {
        quote_identifier(&format!("{role}_{suffix}"))
    }
}

/// Only sound for names that passed [`is_identifier`].
pub fn quote_identifier(name: &str) -> String {
    format!("\"{name}\"")
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
