use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::PinError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UploadKind {
    File,
    Pin,
}

impl Display for UploadKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadKind::File => write!(f, "file"),
            UploadKind::Pin => write!(f, "pin"),
        }
    }
}

impl FromStr for UploadKind {
    type Err = PinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(UploadKind::File),
            "pin" => Ok(UploadKind::Pin),
            _ => Err(PinError::validation(format!("Invalid upload kind: {}", s))),
        }
    }
}

/// One ledger row per (content id, network, user).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadRecord {
    pub id: i64,
    pub content_id: String,
    pub kind: UploadKind,
    pub name: Option<String>,
    pub network_name: String,
    pub hold_months: i64,
    /// User who most recently created or renewed the record.
    pub user_name: String,
    /// Everyone who ever uploaded or renewed this content on this network.
    pub co_owners: Vec<String>,
    pub garbage_collect_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for UploadRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(UploadRecord {
            id: row.try_get("id")?,
            content_id: row.try_get("content_id")?,
            kind: row.try_get::<String, _>("kind")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse upload kind: {}", e).into())
            })?,
            name: row.try_get("name")?,
            network_name: row.try_get("network_name")?,
            hold_months: row.try_get("hold_months")?,
            user_name: row.try_get("user_name")?,
            co_owners: row.try_get("co_owners")?,
            garbage_collect_at: row.try_get("garbage_collect_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl UploadRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.garbage_collect_at <= now
    }

    pub fn is_co_owner(&self, user: &str) -> bool {
        self.co_owners.iter().any(|u| u == user)
    }

    /// The ledger key of this record.
    pub fn key(&self) -> UploadKey<'_> {
        UploadKey {
            content_id: &self.content_id,
            network_name: &self.network_name,
            user_name: &self.user_name,
        }
    }
}

/// Borrowed (content id, network, user) triple that identifies a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadKey<'a> {
    pub content_id: &'a str,
    pub network_name: &'a str,
    pub user_name: &'a str,
}

/// Input for creating a ledger record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUpload {
    pub content_id: String,
    pub kind: UploadKind,
    pub network_name: String,
    pub user_name: String,
    pub name: Option<String>,
    pub hold_months: i64,
}

impl NewUpload {
    pub fn pin(content_id: &str, network_name: &str, user_name: &str, hold_months: i64) -> Self {
        Self {
            content_id: content_id.to_string(),
            kind: UploadKind::Pin,
            network_name: network_name.to_string(),
            user_name: user_name.to_string(),
            name: None,
            hold_months,
        }
    }

    pub fn file(
        content_id: &str,
        network_name: &str,
        user_name: &str,
        name: Option<String>,
        hold_months: i64,
    ) -> Self {
        Self {
            content_id: content_id.to_string(),
            kind: UploadKind::File,
            network_name: network_name.to_string(),
            user_name: user_name.to_string(),
            name,
            hold_months,
        }
    }

    pub fn key(&self) -> UploadKey<'_> {
        UploadKey {
            content_id: &self.content_id,
            network_name: &self.network_name,
            user_name: &self.user_name,
        }
    }
}
