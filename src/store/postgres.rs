//! Postgres-backed stores. Writes that must be atomic run inside explicit
//! transactions with the attempt or session row locked first, so racing
//! callers serialize per record while unrelated records stay independent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{
    AssessmentStore, AttemptStore, EventAppended, FinalizeOutcome, NewAttempt, NewEvent,
    NewSession, ProctorStore, QuestionCatalog, SlotUpdate,
};
use crate::error::{Error, Result};
use crate::models::{
    AnswerSlot, Assessment, AssessmentQuestion, Attempt, AttemptStatus, ProctorEvent,
    ProctorSession, ProctoringConfig, ProctorSettings, Question, QuestionOption, SessionStatus,
};

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(d) if d.code().as_deref() == Some("23505"))
}

#[derive(Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn create_attempt(&self, new: NewAttempt) -> Result<Attempt> {
        // The unique index on (assessment_id, user_id, attempt_no) arbitrates
        // racing creates: both compute the same attempt_no, one insert wins,
        // the loser recounts and either retries or hits the limit.
        loop {
            let mut tx = self.pool.begin().await?;

            let prior: i64 = sqlx::query_scalar(
                r#"SELECT COUNT(*) FROM attempts WHERE assessment_id = $1 AND user_id = $2"#,
            )
            .bind(new.assessment_id)
            .bind(new.user_id)
            .fetch_one(&mut *tx)
            .await?;

            if prior >= i64::from(new.allowed_attempts) {
                tx.rollback().await?;
                return Err(Error::LimitExceeded(format!(
                    "attempt limit of {} reached for this assessment",
                    new.allowed_attempts
                )));
            }

            let inserted = sqlx::query_as::<_, Attempt>(
                r#"
                INSERT INTO attempts (
                    id, assessment_id, user_id, attempt_no, status, started_at, deadline,
                    ended_at, total_score, max_possible_score, passed
                ) VALUES (
                    $1, $2, $3, $4, 'in_progress', $5, $6,
                    NULL, NULL, $7, NULL
                )
                RETURNING *
                "#,
            )
            .bind(new.id)
            .bind(new.assessment_id)
            .bind(new.user_id)
            .bind(prior as i32 + 1)
            .bind(new.started_at)
            .bind(new.deadline)
            .bind(new.max_possible_score)
            .fetch_one(&mut *tx)
            .await;

            let attempt = match inserted {
                Ok(attempt) => attempt,
                Err(err) if is_unique_violation(&err) => {
                    tx.rollback().await?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            for slot in &new.slots {
                sqlx::query(
                    r#"
                    INSERT INTO answer_slots (
                        attempt_id, question_id, position, answer, is_correct,
                        points_awarded, max_points, time_spent_seconds
                    ) VALUES ($1, $2, $3, NULL, NULL, 0, $4, 0)
                    "#,
                )
                .bind(new.id)
                .bind(slot.question_id)
                .bind(slot.position)
                .bind(slot.max_points)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            return Ok(attempt);
        }
    }

    async fn get_attempt(&self, id: Uuid) -> Result<Option<Attempt>> {
        let attempt = sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(attempt)
    }

    async fn count_attempts(&self, assessment_id: Uuid, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM attempts WHERE assessment_id = $1 AND user_id = $2"#,
        )
        .bind(assessment_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn get_slots(&self, attempt_id: Uuid) -> Result<Vec<AnswerSlot>> {
        let slots = sqlx::query_as::<_, AnswerSlot>(
            r#"SELECT * FROM answer_slots WHERE attempt_id = $1 ORDER BY position ASC"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(slots)
    }

    async fn get_slot(&self, attempt_id: Uuid, question_id: Uuid) -> Result<Option<AnswerSlot>> {
        let slot = sqlx::query_as::<_, AnswerSlot>(
            r#"SELECT * FROM answer_slots WHERE attempt_id = $1 AND question_id = $2"#,
        )
        .bind(attempt_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(slot)
    }

    async fn save_slot(&self, update: SlotUpdate) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Lock the attempt row so the in-progress check holds until commit,
        // against both concurrent finalization and other slot writes.
        let status: Option<AttemptStatus> =
            sqlx::query_scalar(r#"SELECT status FROM attempts WHERE id = $1 FOR UPDATE"#)
                .bind(update.attempt_id)
                .fetch_optional(&mut *tx)
                .await?;

        let live = match status {
            Some(status) => !status.is_terminal(),
            None => false,
        };
        if !live {
            tx.rollback().await?;
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE answer_slots
            SET answer = $3, is_correct = $4, points_awarded = $5,
                time_spent_seconds = GREATEST(time_spent_seconds, $6), updated_at = NOW()
            WHERE attempt_id = $1 AND question_id = $2
            "#,
        )
        .bind(update.attempt_id)
        .bind(update.question_id)
        .bind(update.answer)
        .bind(update.is_correct)
        .bind(update.points_awarded)
        .bind(update.time_spent_seconds)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn finalize_attempt(
        &self,
        id: Uuid,
        outcome: FinalizeOutcome,
    ) -> Result<Option<Attempt>> {
        let mut tx = self.pool.begin().await?;

        let status: Option<AttemptStatus> =
            sqlx::query_scalar(r#"SELECT status FROM attempts WHERE id = $1 FOR UPDATE"#)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let live = match status {
            Some(status) => !status.is_terminal(),
            None => false,
        };
        if !live {
            tx.rollback().await?;
            return Ok(None);
        }

        // Slot writers are blocked on the attempt row lock, so this sum is
        // the final one.
        let total: i32 = sqlx::query_scalar(
            r#"SELECT COALESCE(SUM(points_awarded), 0)::INT FROM answer_slots WHERE attempt_id = $1"#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let (status, ended_at, passed) = match outcome {
            FinalizeOutcome::Completed {
                ended_at,
                passing_score,
            } => (AttemptStatus::Completed, ended_at, total >= passing_score),
            FinalizeOutcome::TimedOut { ended_at } => (AttemptStatus::TimedOut, ended_at, false),
            FinalizeOutcome::Abandoned { ended_at } => (AttemptStatus::Abandoned, ended_at, false),
        };

        let attempt = sqlx::query_as::<_, Attempt>(
            r#"
            UPDATE attempts
            SET status = $2, ended_at = $3, total_score = $4, passed = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(ended_at)
        .bind(total)
        .bind(passed)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(attempt))
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Attempt>> {
        let attempts = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT * FROM attempts
            WHERE status = 'in_progress' AND deadline < $1
            ORDER BY deadline ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(attempts)
    }
}

fn row_to_session(row: &PgRow) -> Result<ProctorSession> {
    Ok(ProctorSession {
        id: row.try_get("id")?,
        attempt_id: row.try_get("attempt_id")?,
        assessment_id: row.try_get("assessment_id")?,
        user_id: row.try_get("user_id")?,
        status: row.try_get("status")?,
        settings: row.try_get::<Json<ProctorSettings>, _>("settings")?.0,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        anomaly_score: row.try_get("anomaly_score")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Clone)]
pub struct PgProctorStore {
    pool: PgPool,
}

impl PgProctorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProctorStore for PgProctorStore {
    async fn create_session(&self, new: NewSession) -> Result<ProctorSession> {
        // The partial unique index on (attempt_id, user_id) WHERE active
        // arbitrates racing starts.
        let inserted = sqlx::query(
            r#"
            INSERT INTO proctor_sessions (
                id, attempt_id, assessment_id, user_id, status, settings,
                started_at, ended_at, anomaly_score, ip_address, user_agent
            ) VALUES ($1, $2, $3, $4, 'active', $5, $6, NULL, 0, $7, $8)
            RETURNING *
            "#,
        )
        .bind(new.id)
        .bind(new.attempt_id)
        .bind(new.assessment_id)
        .bind(new.user_id)
        .bind(Json(&new.settings))
        .bind(new.started_at)
        .bind(new.ip_address)
        .bind(new.user_agent)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => row_to_session(&row),
            Err(err) if is_unique_violation(&err) => Err(Error::LimitExceeded(
                "an active proctoring session already exists for this attempt".into(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ProctorSession>> {
        let row = sqlx::query(r#"SELECT * FROM proctor_sessions WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn finalize_session(
        &self,
        id: Uuid,
        status: SessionStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<ProctorSession>> {
        let row = sqlx::query(
            r#"
            UPDATE proctor_sessions
            SET status = $2, ended_at = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(ended_at)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn append_event(&self, new: NewEvent) -> Result<Option<EventAppended>> {
        let mut tx = self.pool.begin().await?;

        // Session row lock serializes appends within one session: the seq
        // assignment and the score increment stay consistent.
        let row = sqlx::query(r#"SELECT * FROM proctor_sessions WHERE id = $1 FOR UPDATE"#)
            .bind(new.session_id)
            .fetch_optional(&mut *tx)
            .await?;
        let session = match row.as_ref().map(row_to_session).transpose()? {
            Some(session) => session,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };
        if session.status.is_terminal() {
            tx.rollback().await?;
            return Ok(None);
        }

        let seq: i64 = sqlx::query_scalar(
            r#"SELECT COALESCE(MAX(seq), 0) + 1 FROM proctor_events WHERE session_id = $1"#,
        )
        .bind(new.session_id)
        .fetch_one(&mut *tx)
        .await?;

        let event = sqlx::query_as::<_, ProctorEvent>(
            r#"
            INSERT INTO proctor_events (
                id, session_id, attempt_id, assessment_id, user_id, seq,
                event_type, severity, occurred_at, recorded_at, details,
                snapshot_url, snapshot_digest
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(new.id)
        .bind(new.session_id)
        .bind(session.attempt_id)
        .bind(session.assessment_id)
        .bind(session.user_id)
        .bind(seq)
        .bind(new.event_type)
        .bind(new.severity)
        .bind(new.occurred_at)
        .bind(new.recorded_at)
        .bind(new.details)
        .bind(new.snapshot_url)
        .bind(new.snapshot_digest)
        .fetch_one(&mut *tx)
        .await?;

        let anomaly_score: Decimal = sqlx::query_scalar(
            r#"
            UPDATE proctor_sessions
            SET anomaly_score = anomaly_score + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING anomaly_score
            "#,
        )
        .bind(new.session_id)
        .bind(new.severity.weight())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(EventAppended {
            event,
            anomaly_score,
        }))
    }

    async fn get_events(&self, session_id: Uuid) -> Result<Vec<ProctorEvent>> {
        let events = sqlx::query_as::<_, ProctorEvent>(
            r#"SELECT * FROM proctor_events WHERE session_id = $1 ORDER BY seq ASC"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}

fn row_to_assessment(row: &PgRow) -> Result<Assessment> {
    Ok(Assessment {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        duration_minutes: row.try_get("duration_minutes")?,
        passing_score: row.try_get("passing_score")?,
        questions: row.try_get::<Json<Vec<AssessmentQuestion>>, _>("questions")?.0,
        randomize_questions: row.try_get("randomize_questions")?,
        allowed_attempts: row.try_get("allowed_attempts")?,
        proctoring: row.try_get::<Json<ProctoringConfig>, _>("proctoring")?.0,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Clone)]
pub struct PgAssessmentStore {
    pool: PgPool,
}

impl PgAssessmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssessmentStore for PgAssessmentStore {
    async fn get_assessment(&self, id: Uuid) -> Result<Option<Assessment>> {
        let row = sqlx::query(r#"SELECT * FROM assessments WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_assessment).transpose()
    }
}

fn row_to_question(row: &PgRow) -> Result<Question> {
    Ok(Question {
        id: row.try_get("id")?,
        question_type: row.try_get("question_type")?,
        text: row.try_get("text")?,
        code: row.try_get("code")?,
        image_url: row.try_get("image_url")?,
        options: row.try_get::<Json<Vec<QuestionOption>>, _>("options")?.0,
        correct_answer: row.try_get("correct_answer")?,
        difficulty: row.try_get("difficulty")?,
        points: row.try_get("points")?,
        tags: row.try_get("tags")?,
    })
}

#[derive(Clone)]
pub struct PgQuestionCatalog {
    pool: PgPool,
}

impl PgQuestionCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionCatalog for PgQuestionCatalog {
    async fn get_question(&self, id: Uuid) -> Result<Option<Question>> {
        let row = sqlx::query(r#"SELECT * FROM questions WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_question).transpose()
    }

    async fn get_questions(&self, ids: &[Uuid]) -> Result<Vec<Question>> {
        let rows = sqlx::query(r#"SELECT * FROM questions WHERE id = ANY($1)"#)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_question).collect()
    }
}
