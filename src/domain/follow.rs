use super::EntityRef;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

/// A stored "follower follows followable" edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Follow {
    pub id: i64,
    pub follower: EntityRef,
    pub followable: EntityRef,
    pub created_at: DateTime<Utc>,
}

// Queries alias the configured role columns to these fixed names.
impl FromRow<'_, SqliteRow> for Follow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            follower: EntityRef::new(
                row.try_get::<String, _>("follower_type")?,
                row.try_get("follower_id")?,
            ),
            followable: EntityRef::new(
                row.try_get::<String, _>("followable_type")?,
                row.try_get("followable_id")?,
            ),
            created_at: row.try_get("created_at")?,
        })
    }
}
