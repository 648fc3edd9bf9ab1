pub mod cache;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::types::ipnetwork::IpNetwork;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AnswerSlot, Assessment, Attempt, EventSeverity, EventType, ProctorEvent, ProctorSession,
    ProctorSettings, Question, SessionStatus,
};

pub use cache::{MemorySessionCache, SessionCache};

/// Everything needed to create an attempt and its empty answer slots in one
/// atomic step.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub user_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub max_possible_score: i32,
    /// Attempt limit enforced atomically with the insert.
    pub allowed_attempts: i32,
    pub slots: Vec<NewSlot>,
}

#[derive(Debug, Clone)]
pub struct NewSlot {
    pub question_id: Uuid,
    pub position: i32,
    pub max_points: i32,
}

/// One graded answer write for an existing slot.
#[derive(Debug, Clone)]
pub struct SlotUpdate {
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    pub answer: JsonValue,
    pub is_correct: Option<bool>,
    pub points_awarded: i32,
    pub time_spent_seconds: i32,
}

/// Terminal transition for an attempt, applied as a compare-and-set: only an
/// in-progress attempt can take it and exactly one caller wins. Every outcome
/// scores the saved slots; only `Completed` evaluates the pass threshold, the
/// other outcomes record `passed = false`.
#[derive(Debug, Clone, Copy)]
pub enum FinalizeOutcome {
    Completed {
        ended_at: DateTime<Utc>,
        passing_score: i32,
    },
    /// Time budget elapsed. `ended_at` is the attempt deadline, not the
    /// detection instant.
    TimedOut { ended_at: DateTime<Utc> },
    /// Administrative close-out.
    Abandoned { ended_at: DateTime<Utc> },
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Checks the attempt limit and creates the attempt with one empty slot
    /// per assigned question, atomically. Two racing calls must not both
    /// succeed when a single attempt slot remains; the loser gets
    /// `Error::LimitExceeded`.
    async fn create_attempt(&self, new: NewAttempt) -> Result<Attempt>;

    async fn get_attempt(&self, id: Uuid) -> Result<Option<Attempt>>;

    async fn count_attempts(&self, assessment_id: Uuid, user_id: Uuid) -> Result<i64>;

    /// Slots in display order.
    async fn get_slots(&self, attempt_id: Uuid) -> Result<Vec<AnswerSlot>>;

    async fn get_slot(
        &self,
        attempt_id: Uuid,
        question_id: Uuid,
    ) -> Result<Option<AnswerSlot>>;

    /// Writes a graded answer. Returns `false` without writing when the
    /// attempt is no longer in progress. `time_spent_seconds` never
    /// decreases across writes to the same slot.
    async fn save_slot(&self, update: SlotUpdate) -> Result<bool>;

    /// Terminal compare-and-set. Returns the finalized attempt when this
    /// call won the transition, `None` when the attempt was already
    /// terminal. Scoring happens in the same transaction as the status
    /// flip, so a finalized attempt is never observable unscored.
    async fn finalize_attempt(
        &self,
        id: Uuid,
        outcome: FinalizeOutcome,
    ) -> Result<Option<Attempt>>;

    /// In-progress attempts whose deadline has passed, oldest first, for
    /// the background sweep.
    async fn list_expired(&self, now: DateTime<Utc>, limit: i64)
        -> Result<Vec<Attempt>>;
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub assessment_id: Uuid,
    pub user_id: Uuid,
    pub settings: ProctorSettings,
    pub started_at: DateTime<Utc>,
    pub ip_address: Option<IpNetwork>,
    pub user_agent: Option<String>,
}

/// Event payload as accepted from the client. The denormalized attempt,
/// assessment and user references are filled in from the session row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub event_type: EventType,
    pub severity: EventSeverity,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub details: Option<JsonValue>,
    pub snapshot_url: Option<String>,
    pub snapshot_digest: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventAppended {
    pub event: ProctorEvent,
    /// Session anomaly score after this event's weight was added.
    pub anomaly_score: Decimal,
}

#[async_trait]
pub trait ProctorStore: Send + Sync {
    /// Creates the session unless an active one already exists for the
    /// (attempt, user) pair. Racing calls yield exactly one winner; the
    /// loser gets `Error::LimitExceeded`.
    async fn create_session(&self, new: NewSession) -> Result<ProctorSession>;

    async fn get_session(&self, id: Uuid) -> Result<Option<ProctorSession>>;

    /// Compare-and-set to a terminal status. `None` when the session was
    /// already terminal.
    async fn finalize_session(
        &self,
        id: Uuid,
        status: SessionStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<ProctorSession>>;

    /// Appends the event and adds its severity weight to the session
    /// anomaly score in one atomic step. `None` when the session is no
    /// longer active.
    async fn append_event(&self, new: NewEvent) -> Result<Option<EventAppended>>;

    /// Events in arrival order.
    async fn get_events(&self, session_id: Uuid) -> Result<Vec<ProctorEvent>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn get_assessment(&self, id: Uuid) -> Result<Option<Assessment>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuestionCatalog: Send + Sync {
    async fn get_question(&self, id: Uuid) -> Result<Option<Question>>;

    /// Fetches a batch of questions; ids that do not resolve are simply
    /// absent from the result.
    async fn get_questions(&self, ids: &[Uuid]) -> Result<Vec<Question>>;
}
