use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{AnswerSlot, AnswerValue, AttemptStatus, ProctoringConfig};
use crate::services::{AttemptProgress, StartedAttempt};

/// One question as revealed to the test-taker: its place in the display
/// order and its weight. Correctness and awarded points never leave the
/// server while the attempt is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotView {
    pub question_id: uuid::Uuid,
    pub position: i32,
    pub max_points: i32,
    pub answered: bool,
    pub time_spent_seconds: i32,
}

impl From<&AnswerSlot> for SlotView {
    fn from(slot: &AnswerSlot) -> Self {
        Self {
            question_id: slot.question_id,
            position: slot.position,
            max_points: slot.max_points,
            answered: slot.answer.is_some(),
            time_spent_seconds: slot.time_spent_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAttemptResponse {
    pub attempt_id: uuid::Uuid,
    pub assessment_id: uuid::Uuid,
    pub status: AttemptStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub deadline: chrono::DateTime<chrono::Utc>,
    pub max_possible_score: i32,
    pub proctoring: ProctoringConfig,
    pub questions: Vec<SlotView>,
}

impl From<StartedAttempt> for StartAttemptResponse {
    fn from(started: StartedAttempt) -> Self {
        Self {
            attempt_id: started.attempt.id,
            assessment_id: started.attempt.assessment_id,
            status: started.attempt.status,
            started_at: started.attempt.started_at,
            deadline: started.attempt.deadline,
            max_possible_score: started.attempt.max_possible_score,
            proctoring: started.proctoring,
            questions: started.slots.iter().map(SlotView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    pub question_id: uuid::Uuid,
    pub answer: AnswerValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAnswerResponse {
    pub saved: bool,
    pub question_id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptStatusResponse {
    pub attempt_id: uuid::Uuid,
    pub status: AttemptStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub deadline: chrono::DateTime<chrono::Utc>,
    pub time_remaining_seconds: i64,
    pub questions_total: usize,
    pub questions_answered: usize,
}

impl From<AttemptProgress> for AttemptStatusResponse {
    fn from(progress: AttemptProgress) -> Self {
        Self {
            attempt_id: progress.attempt.id,
            status: progress.attempt.status,
            started_at: progress.attempt.started_at,
            deadline: progress.attempt.deadline,
            time_remaining_seconds: progress.time_remaining_seconds,
            questions_total: progress.questions_total,
            questions_answered: progress.questions_answered,
        }
    }
}
