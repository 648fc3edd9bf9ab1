use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::grading_service::GradingService;
use crate::error::{Error, Result};
use crate::models::{
    AnswerSlot, AnswerValue, Assessment, AssessmentStatus, Attempt, AttemptStatus,
    ProctoringConfig, Role,
};
use crate::store::{
    AssessmentStore, AttemptStore, FinalizeOutcome, NewAttempt, NewSlot, QuestionCatalog,
    SessionCache, SlotUpdate,
};

/// How many expired attempts one sweep pass will close out.
const SWEEP_BATCH: i64 = 200;

#[derive(Debug, Clone, serde::Serialize)]
pub struct AttemptResult {
    pub attempt_id: Uuid,
    pub status: AttemptStatus,
    pub total_score: i32,
    pub max_possible_score: i32,
    pub percentage: f64,
    pub passed: bool,
    pub completion_time_seconds: i64,
}

impl AttemptResult {
    fn from_finalized(attempt: &Attempt) -> Result<Self> {
        let (ended_at, total_score, passed) =
            match (attempt.ended_at, attempt.total_score, attempt.passed) {
                (Some(e), Some(t), Some(p)) => (e, t, p),
                _ => {
                    return Err(Error::Internal(
                        "finalized attempt is missing its outcome fields".into(),
                    ))
                }
            };
        let percentage = if attempt.max_possible_score > 0 {
            f64::from(total_score) / f64::from(attempt.max_possible_score) * 100.0
        } else {
            0.0
        };
        Ok(Self {
            attempt_id: attempt.id,
            status: attempt.status,
            total_score,
            max_possible_score: attempt.max_possible_score,
            percentage,
            passed,
            completion_time_seconds: (ended_at - attempt.started_at).num_seconds(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct StartedAttempt {
    pub attempt: Attempt,
    pub slots: Vec<AnswerSlot>,
    /// Proctoring requirements the client must honor before answering.
    pub proctoring: ProctoringConfig,
}

#[derive(Debug, Clone)]
pub struct AttemptProgress {
    pub attempt: Attempt,
    pub time_remaining_seconds: i64,
    pub questions_total: usize,
    pub questions_answered: usize,
}

/// Owns the attempt state machine: creation, per-answer grading, explicit
/// submission and lazy timeout detection. Terminal transitions go through
/// the store's compare-and-set so racing finalizers resolve to one winner.
pub struct AttemptService {
    attempts: Arc<dyn AttemptStore>,
    assessments: Arc<dyn AssessmentStore>,
    catalog: Arc<dyn QuestionCatalog>,
    cache: Arc<dyn SessionCache>,
}

impl AttemptService {
    pub fn new(
        attempts: Arc<dyn AttemptStore>,
        assessments: Arc<dyn AssessmentStore>,
        catalog: Arc<dyn QuestionCatalog>,
        cache: Arc<dyn SessionCache>,
    ) -> Self {
        Self {
            attempts,
            assessments,
            catalog,
            cache,
        }
    }

    pub async fn start_attempt(&self, assessment_id: Uuid, user_id: Uuid) -> Result<StartedAttempt> {
        let assessment = self
            .assessments
            .get_assessment(assessment_id)
            .await?
            .ok_or_else(|| Error::NotFound("assessment not found".into()))?;

        if assessment.status != AssessmentStatus::Published {
            return Err(Error::InvalidState("assessment is not published".into()));
        }
        let now = Utc::now();
        if !assessment.is_open_at(now) {
            return Err(Error::InvalidState(
                "assessment is outside its availability window".into(),
            ));
        }

        // Every referenced question must resolve before we pin the slot set.
        let question_ids: Vec<Uuid> = assessment.questions.iter().map(|q| q.question_id).collect();
        let found = self.catalog.get_questions(&question_ids).await?;
        if found.len() != question_ids.len() {
            return Err(Error::Internal(
                "assessment references a question missing from the catalog".into(),
            ));
        }

        let deadline = now + Duration::minutes(i64::from(assessment.duration_minutes));
        let attempt = self
            .attempts
            .create_attempt(NewAttempt {
                id: Uuid::new_v4(),
                assessment_id,
                user_id,
                started_at: now,
                deadline,
                max_possible_score: assessment.total_points(),
                allowed_attempts: assessment.allowed_attempts,
                slots: build_slots(&assessment),
            })
            .await?;

        // Cache record lifetime mirrors the time budget. Best-effort: expiry
        // is always recomputed from the stored deadline.
        let ttl = i64::from(assessment.duration_minutes).max(0) as u64 * 60;
        if let Err(err) = self
            .cache
            .set(attempt.id, deadline.to_rfc3339(), ttl)
            .await
        {
            warn!(attempt_id = %attempt.id, error = %err, "failed to register attempt in session cache");
        }

        info!(
            attempt_id = %attempt.id,
            assessment_id = %assessment_id,
            user_id = %user_id,
            deadline = %deadline,
            "attempt started"
        );

        let slots = self.attempts.get_slots(attempt.id).await?;
        Ok(StartedAttempt {
            attempt,
            slots,
            proctoring: assessment.proctoring,
        })
    }

    pub async fn submit_answer(
        &self,
        attempt_id: Uuid,
        user_id: Uuid,
        question_id: Uuid,
        answer: AnswerValue,
    ) -> Result<()> {
        let attempt = self.owned_attempt(attempt_id, user_id).await?;
        if attempt.status.is_terminal() {
            return Err(Error::InvalidState("attempt is already finalized".into()));
        }

        let now = Utc::now();
        if attempt.is_expired(now) {
            self.expire(&attempt).await?;
            return Err(Error::TimeExpired("attempt time budget has elapsed".into()));
        }

        let slot = self
            .attempts
            .get_slot(attempt_id, question_id)
            .await?
            .ok_or_else(|| Error::BadRequest("question is not part of this attempt".into()))?;

        let question = self
            .catalog
            .get_question(question_id)
            .await?
            .ok_or_else(|| Error::Internal("question missing from the catalog".into()))?;

        let grade = GradingService::grade_answer(&question, &answer, slot.max_points);
        let saved = self
            .attempts
            .save_slot(SlotUpdate {
                attempt_id,
                question_id,
                answer: serde_json::to_value(&answer)?,
                is_correct: grade.is_correct,
                points_awarded: grade.points_awarded,
                time_spent_seconds: attempt.elapsed_seconds(now) as i32,
            })
            .await?;
        if !saved {
            // A concurrent finalization won between our check and the write.
            return Err(Error::InvalidState("attempt is already finalized".into()));
        }

        debug!(attempt_id = %attempt_id, question_id = %question_id, "answer recorded");
        Ok(())
    }

    pub async fn finish_attempt(&self, attempt_id: Uuid, user_id: Uuid) -> Result<AttemptResult> {
        let attempt = self.owned_attempt(attempt_id, user_id).await?;
        if attempt.status.is_terminal() {
            return Err(Error::InvalidState("attempt is already finalized".into()));
        }

        let now = Utc::now();
        if attempt.is_expired(now) {
            self.expire(&attempt).await?;
            return Err(Error::TimeExpired("attempt time budget has elapsed".into()));
        }

        let assessment = self
            .assessments
            .get_assessment(attempt.assessment_id)
            .await?
            .ok_or_else(|| Error::Internal("assessment record is gone".into()))?;

        let finalized = self
            .attempts
            .finalize_attempt(
                attempt_id,
                FinalizeOutcome::Completed {
                    ended_at: now,
                    passing_score: assessment.passing_score,
                },
            )
            .await?
            .ok_or_else(|| Error::InvalidState("attempt is already finalized".into()))?;

        self.drop_cache_record(attempt_id).await;
        let result = AttemptResult::from_finalized(&finalized)?;
        info!(
            attempt_id = %attempt_id,
            total_score = result.total_score,
            max_possible_score = result.max_possible_score,
            passed = result.passed,
            "attempt completed"
        );
        Ok(result)
    }

    /// Result payload for a finalized attempt. The owner may read it, as may
    /// instructors and admins.
    pub async fn get_result(
        &self,
        attempt_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<AttemptResult> {
        let attempt = self.readable_attempt(attempt_id, user_id, role).await?;
        if !attempt.status.is_terminal() {
            return Err(Error::InvalidState("attempt is still in progress".into()));
        }
        AttemptResult::from_finalized(&attempt)
    }

    /// Live view of an attempt. Doubles as an explicit time check: an
    /// expired in-progress attempt is timed out before the view is built.
    pub async fn get_progress(
        &self,
        attempt_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<AttemptProgress> {
        let mut attempt = self.readable_attempt(attempt_id, user_id, role).await?;

        let now = Utc::now();
        if attempt.status == AttemptStatus::InProgress && attempt.is_expired(now) {
            self.expire(&attempt).await?;
            attempt = self
                .attempts
                .get_attempt(attempt_id)
                .await?
                .ok_or_else(|| Error::NotFound("attempt not found".into()))?;
        }

        let slots = self.attempts.get_slots(attempt_id).await?;
        let time_remaining_seconds = if attempt.status == AttemptStatus::InProgress {
            attempt.time_remaining_seconds(now)
        } else {
            0
        };
        Ok(AttemptProgress {
            questions_total: slots.len(),
            questions_answered: slots.iter().filter(|s| s.answer.is_some()).count(),
            time_remaining_seconds,
            attempt,
        })
    }

    /// Administrative close-out of a stuck attempt.
    pub async fn abandon_attempt(&self, attempt_id: Uuid, role: Role) -> Result<Attempt> {
        if !role.is_elevated() {
            return Err(Error::Forbidden(
                "only instructors and admins may abandon an attempt".into(),
            ));
        }
        let attempt = self
            .attempts
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound("attempt not found".into()))?;
        if attempt.status.is_terminal() {
            return Err(Error::InvalidState("attempt is already finalized".into()));
        }

        let finalized = self
            .attempts
            .finalize_attempt(
                attempt_id,
                FinalizeOutcome::Abandoned {
                    ended_at: Utc::now(),
                },
            )
            .await?
            .ok_or_else(|| Error::InvalidState("attempt is already finalized".into()))?;

        self.drop_cache_record(attempt_id).await;
        info!(attempt_id = %attempt_id, "attempt abandoned");
        Ok(finalized)
    }

    /// Closes out in-progress attempts whose deadline has passed. Hygiene
    /// only: the lazy checks on the request paths stay authoritative.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let expired = self.attempts.list_expired(now, SWEEP_BATCH).await?;
        let mut swept = 0;
        for attempt in expired {
            let won = self
                .attempts
                .finalize_attempt(
                    attempt.id,
                    FinalizeOutcome::TimedOut {
                        ended_at: attempt.deadline,
                    },
                )
                .await?
                .is_some();
            if won {
                self.drop_cache_record(attempt.id).await;
                swept += 1;
            }
        }
        if swept > 0 {
            info!(count = swept, "swept timed-out attempts");
        }
        Ok(swept)
    }

    async fn owned_attempt(&self, attempt_id: Uuid, user_id: Uuid) -> Result<Attempt> {
        let attempt = self
            .attempts
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound("attempt not found".into()))?;
        if attempt.user_id != user_id {
            return Err(Error::Forbidden("attempt belongs to another user".into()));
        }
        Ok(attempt)
    }

    async fn readable_attempt(&self, attempt_id: Uuid, user_id: Uuid, role: Role) -> Result<Attempt> {
        let attempt = self
            .attempts
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound("attempt not found".into()))?;
        if attempt.user_id != user_id && !role.is_elevated() {
            return Err(Error::Forbidden("attempt belongs to another user".into()));
        }
        Ok(attempt)
    }

    /// Applies the timeout transition. Losing the compare-and-set is fine:
    /// someone else already finalized the attempt.
    async fn expire(&self, attempt: &Attempt) -> Result<()> {
        let won = self
            .attempts
            .finalize_attempt(
                attempt.id,
                FinalizeOutcome::TimedOut {
                    ended_at: attempt.deadline,
                },
            )
            .await?
            .is_some();
        if won {
            self.drop_cache_record(attempt.id).await;
            info!(attempt_id = %attempt.id, deadline = %attempt.deadline, "attempt timed out");
        }
        Ok(())
    }

    async fn drop_cache_record(&self, attempt_id: Uuid) {
        if let Err(err) = self.cache.delete(attempt_id).await {
            warn!(attempt_id = %attempt_id, error = %err, "failed to drop cached attempt record");
        }
    }
}

/// Slot layout for a new attempt: one slot per assigned question, display
/// order shuffled with a uniform Fisher-Yates permutation when the
/// assessment asks for it.
fn build_slots(assessment: &Assessment) -> Vec<NewSlot> {
    let mut order: Vec<(Uuid, i32)> = assessment
        .questions
        .iter()
        .map(|q| (q.question_id, q.points))
        .collect();
    if assessment.randomize_questions {
        order.shuffle(&mut rand::thread_rng());
    }
    order
        .into_iter()
        .enumerate()
        .map(|(idx, (question_id, max_points))| NewSlot {
            question_id,
            position: idx as i32 + 1,
            max_points,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryAttemptStore;
    use crate::store::{MemorySessionCache, MockAssessmentStore, MockQuestionCatalog};

    fn assessment(status: AssessmentStatus) -> Assessment {
        Assessment {
            id: Uuid::new_v4(),
            title: "Sample".into(),
            description: None,
            duration_minutes: 10,
            passing_score: 3,
            questions: Vec::new(),
            randomize_questions: false,
            allowed_attempts: 1,
            proctoring: ProctoringConfig::default(),
            starts_at: None,
            ends_at: None,
            status,
            created_at: None,
            updated_at: None,
        }
    }

    fn service_with(assessments: MockAssessmentStore, catalog: MockQuestionCatalog) -> AttemptService {
        AttemptService::new(
            Arc::new(MemoryAttemptStore::new()),
            Arc::new(assessments),
            Arc::new(catalog),
            Arc::new(MemorySessionCache::new()),
        )
    }

    #[tokio::test]
    async fn start_rejects_unpublished_assessment() {
        let a = assessment(AssessmentStatus::Draft);
        let id = a.id;
        let mut assessments = MockAssessmentStore::new();
        assessments
            .expect_get_assessment()
            .returning(move |_| Ok(Some(a.clone())));

        let service = service_with(assessments, MockQuestionCatalog::new());
        let err = service.start_attempt(id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn start_rejects_missing_assessment() {
        let mut assessments = MockAssessmentStore::new();
        assessments.expect_get_assessment().returning(|_| Ok(None));

        let service = service_with(assessments, MockQuestionCatalog::new());
        let err = service
            .start_attempt(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn start_rejects_assessment_outside_window() {
        let mut a = assessment(AssessmentStatus::Published);
        a.ends_at = Some(Utc::now() - Duration::hours(1));
        let id = a.id;
        let mut assessments = MockAssessmentStore::new();
        assessments
            .expect_get_assessment()
            .returning(move |_| Ok(Some(a.clone())));

        let service = service_with(assessments, MockQuestionCatalog::new());
        let err = service.start_attempt(id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn start_fails_when_catalog_is_missing_a_question() {
        let mut a = assessment(AssessmentStatus::Published);
        a.questions = vec![crate::models::AssessmentQuestion {
            question_id: Uuid::new_v4(),
            points: 5,
        }];
        let id = a.id;
        let mut assessments = MockAssessmentStore::new();
        assessments
            .expect_get_assessment()
            .returning(move |_| Ok(Some(a.clone())));
        let mut catalog = MockQuestionCatalog::new();
        catalog.expect_get_questions().returning(|_| Ok(Vec::new()));

        let service = service_with(assessments, catalog);
        let err = service.start_attempt(id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn start_survives_a_failing_session_cache() {
        let mut a = assessment(AssessmentStatus::Published);
        a.allowed_attempts = 1;
        let id = a.id;
        let mut assessments = MockAssessmentStore::new();
        assessments
            .expect_get_assessment()
            .returning(move |_| Ok(Some(a.clone())));
        let mut catalog = MockQuestionCatalog::new();
        catalog.expect_get_questions().returning(|_| Ok(Vec::new()));
        let mut cache = crate::store::cache::MockSessionCache::new();
        cache
            .expect_set()
            .returning(|_, _, _| Err(Error::Internal("cache offline".into())));

        let service = AttemptService::new(
            Arc::new(MemoryAttemptStore::new()),
            Arc::new(assessments),
            Arc::new(catalog),
            Arc::new(cache),
        );
        let started = service.start_attempt(id, Uuid::new_v4()).await.unwrap();
        assert_eq!(started.attempt.status, AttemptStatus::InProgress);
    }

    #[test]
    fn slots_keep_authored_order_without_randomization() {
        let mut a = assessment(AssessmentStatus::Published);
        a.questions = (0..5)
            .map(|i| crate::models::AssessmentQuestion {
                question_id: Uuid::new_v4(),
                points: i + 1,
            })
            .collect();

        let slots = build_slots(&a);
        for (idx, slot) in slots.iter().enumerate() {
            assert_eq!(slot.position, idx as i32 + 1);
            assert_eq!(slot.question_id, a.questions[idx].question_id);
            assert_eq!(slot.max_points, a.questions[idx].points);
        }
    }

    #[test]
    fn shuffled_slots_are_a_permutation_of_the_assignment() {
        use std::collections::BTreeSet;

        let mut a = assessment(AssessmentStatus::Published);
        a.randomize_questions = true;
        a.questions = (0..12)
            .map(|i| crate::models::AssessmentQuestion {
                question_id: Uuid::new_v4(),
                points: i % 3 + 1,
            })
            .collect();

        let slots = build_slots(&a);
        assert_eq!(slots.len(), a.questions.len());

        let positions: BTreeSet<i32> = slots.iter().map(|s| s.position).collect();
        assert_eq!(positions, (1..=12).collect::<BTreeSet<i32>>());

        let assigned: BTreeSet<(Uuid, i32)> =
            a.questions.iter().map(|q| (q.question_id, q.points)).collect();
        let placed: BTreeSet<(Uuid, i32)> =
            slots.iter().map(|s| (s.question_id, s.max_points)).collect();
        assert_eq!(placed, assigned);
    }

    #[tokio::test]
    async fn result_of_in_progress_attempt_is_refused() {
        let mut a = assessment(AssessmentStatus::Published);
        a.allowed_attempts = 2;
        let id = a.id;
        let mut assessments = MockAssessmentStore::new();
        assessments
            .expect_get_assessment()
            .returning(move |_| Ok(Some(a.clone())));
        let mut catalog = MockQuestionCatalog::new();
        catalog.expect_get_questions().returning(|_| Ok(Vec::new()));

        let service = service_with(assessments, catalog);
        let user_id = Uuid::new_v4();
        let started = service.start_attempt(id, user_id).await.unwrap();
        let err = service
            .get_result(started.attempt.id, user_id, Role::Student)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
