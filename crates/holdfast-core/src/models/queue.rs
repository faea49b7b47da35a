use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PinError, PinResult};
use crate::models::LifecycleIntent;

/// A durable broker message as stored in `queue_messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueMessage {
    pub id: i64,
    pub queue_name: String,
    /// Exchange the message was routed through, if any.
    pub exchange_name: Option<String>,
    pub payload: serde_json::Value,
    /// Number of times the message was handed to a consumer.
    pub delivery_count: i32,
    pub visible_at: DateTime<Utc>,
    pub locked_by: Option<Uuid>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for QueueMessage {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(QueueMessage {
            id: row.try_get("id")?,
            queue_name: row.try_get("queue_name")?,
            exchange_name: row.try_get("exchange_name")?,
            payload: row.try_get("payload")?,
            delivery_count: row.try_get("delivery_count")?,
            visible_at: row.try_get("visible_at")?,
            locked_by: row.try_get("locked_by")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl QueueMessage {
    /// Decode the payload into the intent it carries.
    pub fn intent(&self) -> PinResult<LifecycleIntent> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            PinError::validation(format!(
                "message {} on {} is not a lifecycle intent: {}",
                self.id, self.queue_name, e
            ))
        })
    }
}
