use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{self, Db};
use crate::error::{Result, ShepError};

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Started,
    Analyze,
    Requirements,
    Research,
    Planning,
    Implementation,
    Review,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Started => "started",
            Lifecycle::Analyze => "analyze",
            Lifecycle::Requirements => "requirements",
            Lifecycle::Research => "research",
            Lifecycle::Planning => "planning",
            Lifecycle::Implementation => "implementation",
            Lifecycle::Review => "review",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = ShepError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "started" => Ok(Lifecycle::Started),
            "analyze" => Ok(Lifecycle::Analyze),
            "requirements" => Ok(Lifecycle::Requirements),
            "research" => Ok(Lifecycle::Research),
            "planning" => Ok(Lifecycle::Planning),
            "implementation" => Ok(Lifecycle::Implementation),
            "review" => Ok(Lifecycle::Review),
            other => Err(ShepError::Store(format!("unknown lifecycle '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// FeatureRepository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureLifecycle {
    pub feature_id: String,
    pub lifecycle: Lifecycle,
    pub updated_at: DateTime<Utc>,
}

pub trait FeatureRepository: Send + Sync {
    fn set_lifecycle(&self, feature_id: &str, lifecycle: Lifecycle) -> Result<()>;
    fn get(&self, feature_id: &str) -> Result<Option<FeatureLifecycle>>;
}

pub struct SqliteFeatureRepository {
    db: Db,
}

impl SqliteFeatureRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

impl FeatureRepository for SqliteFeatureRepository {
    fn set_lifecycle(&self, feature_id: &str, lifecycle: Lifecycle) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO feature_lifecycle (feature_id, lifecycle, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(feature_id) DO UPDATE
                 SET lifecycle = excluded.lifecycle, updated_at = excluded.updated_at",
                params![feature_id, lifecycle.as_str(), db::ts(Utc::now())],
            )?;
            Ok(())
        })
    }

    fn get(&self, feature_id: &str) -> Result<Option<FeatureLifecycle>> {
        let row = self.db.with(|conn| {
            Ok(conn
                .query_row(
                    "SELECT lifecycle, updated_at FROM feature_lifecycle WHERE feature_id = ?1",
                    params![feature_id],
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
                )
                .optional()?)
        })?;
        row.map(|(lifecycle, updated_at)| {
            Ok(FeatureLifecycle {
                feature_id: feature_id.to_string(),
                lifecycle: lifecycle.parse()?,
                updated_at: db::parse_ts(&updated_at)?,
            })
        })
        .transpose()
    }
}
