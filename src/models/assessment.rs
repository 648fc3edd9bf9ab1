use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "assessment_status", rename_all = "snake_case")]
pub enum AssessmentStatus {
    Draft,
    Published,
    Archived,
}

/// One entry of the assessment's ordered question list. `points` is the
/// per-assessment override of the question's default weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentQuestion {
    pub question_id: Uuid,
    pub points: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProctoringConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webcam_required: bool,
    #[serde(default)]
    pub screensharing_required: bool,
    #[serde(default)]
    pub lockdown_browser_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    /// Points threshold; an attempt passes when total_score reaches it.
    pub passing_score: i32,
    pub questions: Vec<AssessmentQuestion>,
    pub randomize_questions: bool,
    pub allowed_attempts: i32,
    pub proctoring: ProctoringConfig,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub status: AssessmentStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Assessment {
    /// Sum of the per-question point overrides; the value snapshotted into
    /// an attempt's max_possible_score at creation.
    pub fn total_points(&self) -> i32 {
        self.questions.iter().map(|q| q.points).sum()
    }

    /// Half-open availability window: start <= now < end, with either bound
    /// optional.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(starts) = self.starts_at {
            if now < starts {
                return false;
            }
        }
        if let Some(ends) = self.ends_at {
            if now >= ends {
                return false;
            }
        }
        true
    }
}
