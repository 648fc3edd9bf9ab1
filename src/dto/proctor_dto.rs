use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{EventSeverity, EventType, ProctorSettings};
use crate::store::EventAppended;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StartSessionRequest {
    pub attempt_id: uuid::Uuid,
    /// Omitted fields fall back to a no-hardware baseline.
    #[serde(default)]
    pub settings: ProctorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RecordEventRequest {
    pub event_type: EventType,
    pub severity: Option<EventSeverity>,
    pub occurred_at: Option<chrono::DateTime<chrono::Utc>>,
    pub details: Option<serde_json::Value>,
    #[validate(length(min = 1))]
    pub snapshot_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEventResponse {
    pub event_id: uuid::Uuid,
    pub seq: i64,
    pub severity: EventSeverity,
    pub anomaly_score: rust_decimal::Decimal,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl From<EventAppended> for RecordEventResponse {
    fn from(appended: EventAppended) -> Self {
        Self {
            event_id: appended.event.id,
            seq: appended.event.seq,
            severity: appended.event.severity,
            anomaly_score: appended.anomaly_score,
            recorded_at: appended.event.recorded_at,
        }
    }
}
