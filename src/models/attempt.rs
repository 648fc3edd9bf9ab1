use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attempt_status", rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    TimedOut,
    Abandoned,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub user_id: Uuid,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    /// started_at + assessment duration, fixed at creation. A timed-out
    /// attempt ends exactly here regardless of when the timeout is noticed.
    pub deadline: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_score: Option<i32>,
    pub max_possible_score: i32,
    pub passed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Attempt {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    pub fn time_remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline - now).num_seconds().max(0)
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_seconds().max(0)
    }
}

/// One question's answer record within an attempt. Created empty for every
/// assigned question at attempt creation; exactly one row per question.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnswerSlot {
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    /// Display position after the optional shuffle.
    pub position: i32,
    pub answer: Option<JsonValue>,
    pub is_correct: Option<bool>,
    pub points_awarded: i32,
    /// Per-assessment point override snapshotted at attempt creation.
    pub max_points: i32,
    pub time_spent_seconds: i32,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Submitted answer payload. Choice answers carry option ids; true/false,
/// fill-in, essay and coding answers arrive as a single string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Many(Vec<String>),
    One(String),
}

impl AnswerValue {
    /// The submitted selection as a set: order- and duplicate-independent.
    pub fn selection_set(&self) -> BTreeSet<&str> {
        match self {
            AnswerValue::Many(ids) => ids.iter().map(String::as_str).collect(),
            AnswerValue::One(id) => std::iter::once(id.as_str()).collect(),
        }
    }

    /// The single selected value, when the submission is single-valued.
    pub fn single(&self) -> Option<&str> {
        match self {
            AnswerValue::One(v) => Some(v.as_str()),
            AnswerValue::Many(ids) if ids.len() == 1 => Some(ids[0].as_str()),
            AnswerValue::Many(_) => None,
        }
    }
}
