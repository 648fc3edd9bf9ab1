use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "proctor_session_status", rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Terminated,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "proctor_event_type", rename_all = "snake_case")]
pub enum EventType {
    TabSwitch,
    FullScreenExit,
    FaceNotDetected,
    MultipleFaces,
    AudioDetected,
    SuspiciousActivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "proctor_event_severity", rename_all = "snake_case")]
pub enum EventSeverity {
    Low,
    Medium,
    High,
}

impl EventSeverity {
    /// Contribution to the session anomaly score. Exact decimals so the
    /// accumulated total is independent of arrival order.
    pub fn weight(&self) -> Decimal {
        match self {
            EventSeverity::Low => Decimal::new(2, 1),
            EventSeverity::Medium => Decimal::new(5, 1),
            EventSeverity::High => Decimal::ONE,
        }
    }
}

impl Default for EventSeverity {
    fn default() -> Self {
        EventSeverity::Medium
    }
}

/// Monitoring capabilities snapshotted when the session starts. The client
/// reports what it was asked to enable and what it actually enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProctorSettings {
    pub webcam_required: bool,
    pub webcam_enabled: bool,
    pub screen_required: bool,
    pub screen_enabled: bool,
    pub audio_required: bool,
    pub audio_enabled: bool,
    pub full_screen_required: bool,
    pub browser_lockdown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProctorSession {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub assessment_id: Uuid,
    pub user_id: Uuid,
    pub status: SessionStatus,
    pub settings: ProctorSettings,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub anomaly_score: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpNetwork>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProctorEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub attempt_id: Uuid,
    pub assessment_id: Uuid,
    pub user_id: Uuid,
    /// Per-session sequence number, assigned in arrival order.
    pub seq: i64,
    pub event_type: EventType,
    pub severity: EventSeverity,
    /// Client-reported time of the incident.
    pub occurred_at: DateTime<Utc>,
    /// Server time the event was accepted.
    pub recorded_at: DateTime<Utc>,
    pub details: Option<JsonValue>,
    pub snapshot_url: Option<String>,
    /// sha256 of the snapshot reference, kept so stored evidence can be
    /// matched against the original capture later.
    pub snapshot_digest: Option<String>,
}
