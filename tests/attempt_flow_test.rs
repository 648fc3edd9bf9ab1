use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use assessment_backend::error::Error;
use assessment_backend::models::{
    AnswerValue, Assessment, AssessmentQuestion, AssessmentStatus, AttemptStatus, Difficulty,
    ProctoringConfig, Question, QuestionOption, QuestionType, Role,
};
use assessment_backend::services::attempt_service::AttemptService;
use assessment_backend::store::memory::{
    MemoryAssessmentStore, MemoryAttemptStore, MemoryQuestionCatalog,
};
use assessment_backend::store::{AttemptStore, MemorySessionCache};

fn single_choice_question(id: Uuid, correct: &str, option_ids: &[&str]) -> Question {
    Question {
        id,
        question_type: QuestionType::SingleChoice,
        text: "Pick the right option".into(),
        code: None,
        image_url: None,
        options: option_ids
            .iter()
            .map(|o| QuestionOption {
                id: (*o).to_string(),
                text: format!("option {}", o),
                is_correct: *o == correct,
            })
            .collect(),
        correct_answer: None,
        difficulty: Difficulty::Easy,
        points: 1,
        tags: vec![],
    }
}

fn essay_question(id: Uuid) -> Question {
    Question {
        id,
        question_type: QuestionType::Essay,
        text: "Explain your reasoning".into(),
        code: None,
        image_url: None,
        options: vec![],
        correct_answer: None,
        difficulty: Difficulty::Medium,
        points: 1,
        tags: vec![],
    }
}

fn published_assessment(
    questions: &[(Uuid, i32)],
    duration_minutes: i32,
    passing_score: i32,
    allowed_attempts: i32,
) -> Assessment {
    Assessment {
        id: Uuid::new_v4(),
        title: "Fixture".into(),
        description: None,
        duration_minutes,
        passing_score,
        questions: questions
            .iter()
            .map(|(question_id, points)| AssessmentQuestion {
                question_id: *question_id,
                points: *points,
            })
            .collect(),
        randomize_questions: false,
        allowed_attempts,
        proctoring: ProctoringConfig::default(),
        starts_at: None,
        ends_at: None,
        status: AssessmentStatus::Published,
        created_at: None,
        updated_at: None,
    }
}

struct Harness {
    attempts: Arc<MemoryAttemptStore>,
    assessments: Arc<MemoryAssessmentStore>,
    catalog: Arc<MemoryQuestionCatalog>,
    service: AttemptService,
}

fn harness() -> Harness {
    let attempts = Arc::new(MemoryAttemptStore::new());
    let assessments = Arc::new(MemoryAssessmentStore::new());
    let catalog = Arc::new(MemoryQuestionCatalog::new());
    let service = AttemptService::new(
        attempts.clone(),
        assessments.clone(),
        catalog.clone(),
        Arc::new(MemorySessionCache::new()),
    );
    Harness {
        attempts,
        assessments,
        catalog,
        service,
    }
}

#[tokio::test]
async fn single_question_flow_scores_and_passes() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "b", &["a", "b", "c"]))
        .expect("insert question");
    let assessment = published_assessment(&[(question_id, 5)], 10, 5, 3);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let user = Uuid::new_v4();
    let started = h
        .service
        .start_attempt(assessment_id, user)
        .await
        .expect("start");
    assert_eq!(started.attempt.status, AttemptStatus::InProgress);
    assert_eq!(started.attempt.max_possible_score, 5);
    assert_eq!(started.slots.len(), 1);
    assert!(started.slots[0].answer.is_none());

    let deadline = started.attempt.deadline;
    let expected = started.attempt.started_at + Duration::minutes(10);
    assert_eq!(deadline, expected);

    let progress = h
        .service
        .get_progress(started.attempt.id, user, Role::Student)
        .await
        .expect("progress");
    assert_eq!(progress.questions_total, 1);
    assert_eq!(progress.questions_answered, 0);
    assert!(progress.time_remaining_seconds > 0);

    h.service
        .submit_answer(
            started.attempt.id,
            user,
            question_id,
            AnswerValue::One("b".into()),
        )
        .await
        .expect("submit");

    let result = h
        .service
        .finish_attempt(started.attempt.id, user)
        .await
        .expect("finish");
    assert_eq!(result.status, AttemptStatus::Completed);
    assert_eq!(result.total_score, 5);
    assert_eq!(result.max_possible_score, 5);
    assert!((result.percentage - 100.0).abs() < f64::EPSILON);
    assert!(result.passed);
    assert!(result.completion_time_seconds >= 0);

    // The stored result is reachable afterwards and identical.
    let stored = h
        .service
        .get_result(started.attempt.id, user, Role::Student)
        .await
        .expect("result");
    assert_eq!(stored.total_score, 5);
    assert!(stored.passed);
}

#[tokio::test]
async fn wrong_answer_fails_below_threshold() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "b", &["a", "b", "c"]))
        .expect("insert question");
    let assessment = published_assessment(&[(question_id, 5)], 10, 5, 1);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let user = Uuid::new_v4();
    let started = h.service.start_attempt(assessment_id, user).await.expect("start");
    h.service
        .submit_answer(
            started.attempt.id,
            user,
            question_id,
            AnswerValue::One("a".into()),
        )
        .await
        .expect("submit");

    let result = h
        .service
        .finish_attempt(started.attempt.id, user)
        .await
        .expect("finish");
    assert_eq!(result.total_score, 0);
    assert!(!result.passed);
}

#[tokio::test]
async fn draft_assessment_cannot_be_started() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "a", &["a", "b"]))
        .expect("insert question");
    let mut assessment = published_assessment(&[(question_id, 1)], 10, 1, 1);
    assessment.status = AssessmentStatus::Draft;
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let err = h
        .service
        .start_attempt(assessment_id, Uuid::new_v4())
        .await
        .expect_err("draft must not start");
    assert!(matches!(err, Error::InvalidState(_)), "got {:?}", err);
}

#[tokio::test]
async fn resubmission_overwrites_previous_answer() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "b", &["a", "b"]))
        .expect("insert question");
    let assessment = published_assessment(&[(question_id, 3)], 10, 3, 1);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let user = Uuid::new_v4();
    let started = h.service.start_attempt(assessment_id, user).await.expect("start");

    for answer in ["a", "b", "b"] {
        h.service
            .submit_answer(
                started.attempt.id,
                user,
                question_id,
                AnswerValue::One(answer.into()),
            )
            .await
            .expect("submit");
    }

    // Last write wins; repeating the same answer changes nothing.
    let result = h
        .service
        .finish_attempt(started.attempt.id, user)
        .await
        .expect("finish");
    assert_eq!(result.total_score, 3);
    assert!(result.passed);
}

#[tokio::test]
async fn unanswered_questions_score_zero() {
    let h = harness();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(first, "a", &["a", "b"]))
        .expect("insert question");
    h.catalog
        .insert(single_choice_question(second, "b", &["a", "b"]))
        .expect("insert question");
    let assessment = published_assessment(&[(first, 2), (second, 2)], 10, 4, 1);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let user = Uuid::new_v4();
    let started = h.service.start_attempt(assessment_id, user).await.expect("start");
    h.service
        .submit_answer(started.attempt.id, user, first, AnswerValue::One("a".into()))
        .await
        .expect("submit");

    let result = h
        .service
        .finish_attempt(started.attempt.id, user)
        .await
        .expect("finish");
    assert_eq!(result.total_score, 2);
    assert_eq!(result.max_possible_score, 4);
    assert!(!result.passed);
}

#[tokio::test]
async fn manual_question_types_wait_for_grading() {
    let h = harness();
    let auto = Uuid::new_v4();
    let manual = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(auto, "a", &["a", "b"]))
        .expect("insert question");
    h.catalog.insert(essay_question(manual)).expect("insert question");
    let assessment = published_assessment(&[(auto, 2), (manual, 6)], 15, 2, 1);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let user = Uuid::new_v4();
    let started = h.service.start_attempt(assessment_id, user).await.expect("start");
    h.service
        .submit_answer(started.attempt.id, user, auto, AnswerValue::One("a".into()))
        .await
        .expect("submit auto");
    h.service
        .submit_answer(
            started.attempt.id,
            user,
            manual,
            AnswerValue::One("my long essay text".into()),
        )
        .await
        .expect("submit manual");

    // The essay slot holds the answer but contributes no points and stays
    // ungraded.
    let result = h
        .service
        .finish_attempt(started.attempt.id, user)
        .await
        .expect("finish");
    assert_eq!(result.total_score, 2);
    assert_eq!(result.max_possible_score, 8);
    assert!(result.passed);

    let slots = h.attempts.get_slots(started.attempt.id).await.expect("slots");
    let essay_slot = slots
        .iter()
        .find(|s| s.question_id == manual)
        .expect("essay slot");
    assert!(essay_slot.answer.is_some());
    assert_eq!(essay_slot.is_correct, None);
    assert_eq!(essay_slot.points_awarded, 0);
}

#[tokio::test]
async fn foreign_question_is_rejected() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "a", &["a", "b"]))
        .expect("insert question");
    let assessment = published_assessment(&[(question_id, 1)], 10, 1, 1);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let user = Uuid::new_v4();
    let started = h.service.start_attempt(assessment_id, user).await.expect("start");
    let err = h
        .service
        .submit_answer(
            started.attempt.id,
            user,
            Uuid::new_v4(),
            AnswerValue::One("a".into()),
        )
        .await
        .expect_err("question outside the attempt");
    assert!(matches!(err, Error::BadRequest(_)), "got {:?}", err);
}

#[tokio::test]
async fn attempt_limit_is_exhausted_sequentially() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "a", &["a", "b"]))
        .expect("insert question");
    let assessment = published_assessment(&[(question_id, 1)], 10, 1, 2);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let user = Uuid::new_v4();
    h.service.start_attempt(assessment_id, user).await.expect("first");
    h.service.start_attempt(assessment_id, user).await.expect("second");
    let err = h
        .service
        .start_attempt(assessment_id, user)
        .await
        .expect_err("third must hit the limit");
    assert!(matches!(err, Error::LimitExceeded(_)), "got {:?}", err);

    // A different user is unaffected.
    h.service
        .start_attempt(assessment_id, Uuid::new_v4())
        .await
        .expect("other user");
}

/// Overdue attempts reject answers with the time-expired error and move to
/// timed_out as a side effect, with ended_at pinned to the deadline.
#[tokio::test]
async fn expired_attempt_times_out_lazily() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "b", &["a", "b"]))
        .expect("insert question");
    let assessment = published_assessment(&[(question_id, 5)], 10, 5, 1);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let user = Uuid::new_v4();
    let started = h.service.start_attempt(assessment_id, user).await.expect("start");

    // Rewind the clock: plant the same attempt with a deadline in the past.
    let mut overdue = started.attempt.clone();
    overdue.started_at = Utc::now() - Duration::minutes(20);
    overdue.deadline = Utc::now() - Duration::minutes(10);
    let slots = h.attempts.get_slots(started.attempt.id).await.expect("slots");
    h.attempts.seed(overdue.clone(), slots).expect("seed");

    let err = h
        .service
        .submit_answer(
            overdue.id,
            user,
            question_id,
            AnswerValue::One("b".into()),
        )
        .await
        .expect_err("submission after the deadline");
    assert!(matches!(err, Error::TimeExpired(_)), "got {:?}", err);

    let timed_out = h
        .attempts
        .get_attempt(overdue.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(timed_out.status, AttemptStatus::TimedOut);
    assert_eq!(timed_out.ended_at, Some(overdue.deadline));
    assert_eq!(timed_out.total_score, Some(0));
    assert_eq!(timed_out.passed, Some(false));

    // Already finalized now, so finishing reports the conflict, not expiry.
    let err = h
        .service
        .finish_attempt(overdue.id, user)
        .await
        .expect_err("finish after timeout");
    assert!(matches!(err, Error::InvalidState(_)), "got {:?}", err);

    let result = h
        .service
        .get_result(overdue.id, user, Role::Student)
        .await
        .expect("result");
    assert_eq!(result.status, AttemptStatus::TimedOut);
    assert!(!result.passed);
}

/// The status call is the explicit time check: reading an overdue attempt
/// finalizes it.
#[tokio::test]
async fn status_read_times_out_overdue_attempt() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "a", &["a", "b"]))
        .expect("insert question");
    let assessment = published_assessment(&[(question_id, 1)], 5, 1, 1);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let user = Uuid::new_v4();
    let started = h.service.start_attempt(assessment_id, user).await.expect("start");
    let mut overdue = started.attempt.clone();
    overdue.deadline = Utc::now() - Duration::seconds(30);
    let slots = h.attempts.get_slots(started.attempt.id).await.expect("slots");
    h.attempts.seed(overdue.clone(), slots).expect("seed");

    let progress = h
        .service
        .get_progress(overdue.id, user, Role::Student)
        .await
        .expect("progress");
    assert_eq!(progress.attempt.status, AttemptStatus::TimedOut);
    assert_eq!(progress.time_remaining_seconds, 0);
    assert_eq!(progress.attempt.ended_at, Some(overdue.deadline));
}

#[tokio::test]
async fn sweep_finalizes_only_overdue_attempts() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "a", &["a", "b"]))
        .expect("insert question");
    let assessment = published_assessment(&[(question_id, 1)], 30, 1, 10);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let mut overdue_ids = Vec::new();
    for _ in 0..2 {
        let user = Uuid::new_v4();
        let started = h.service.start_attempt(assessment_id, user).await.expect("start");
        let mut overdue = started.attempt.clone();
        overdue.deadline = Utc::now() - Duration::minutes(1);
        let slots = h.attempts.get_slots(started.attempt.id).await.expect("slots");
        h.attempts.seed(overdue.clone(), slots).expect("seed");
        overdue_ids.push(overdue.id);
    }
    let live = h
        .service
        .start_attempt(assessment_id, Uuid::new_v4())
        .await
        .expect("live attempt");

    let swept = h.service.sweep_expired().await.expect("sweep");
    assert_eq!(swept, 2);

    for id in overdue_ids {
        let attempt = h.attempts.get_attempt(id).await.expect("get").expect("exists");
        assert_eq!(attempt.status, AttemptStatus::TimedOut);
    }
    let untouched = h
        .attempts
        .get_attempt(live.attempt.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(untouched.status, AttemptStatus::InProgress);

    // A second sweep finds nothing left.
    assert_eq!(h.service.sweep_expired().await.expect("sweep"), 0);
}

#[tokio::test]
async fn abandon_is_reviewer_only() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "a", &["a", "b"]))
        .expect("insert question");
    let assessment = published_assessment(&[(question_id, 1)], 10, 1, 1);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let user = Uuid::new_v4();
    let started = h.service.start_attempt(assessment_id, user).await.expect("start");

    let err = h
        .service
        .abandon_attempt(started.attempt.id, Role::Student)
        .await
        .expect_err("students cannot abandon");
    assert!(matches!(err, Error::Forbidden(_)), "got {:?}", err);

    let abandoned = h
        .service
        .abandon_attempt(started.attempt.id, Role::Instructor)
        .await
        .expect("abandon");
    assert_eq!(abandoned.status, AttemptStatus::Abandoned);
    assert_eq!(abandoned.passed, Some(false));
    assert!(abandoned.ended_at.is_some());

    let err = h
        .service
        .abandon_attempt(started.attempt.id, Role::Admin)
        .await
        .expect_err("already finalized");
    assert!(matches!(err, Error::InvalidState(_)), "got {:?}", err);
}

#[tokio::test]
async fn attempt_is_invisible_to_strangers() {
    let h = harness();
    let question_id = Uuid::new_v4();
    h.catalog
        .insert(single_choice_question(question_id, "a", &["a", "b"]))
        .expect("insert question");
    let assessment = published_assessment(&[(question_id, 1)], 10, 1, 1);
    let assessment_id = assessment.id;
    h.assessments.insert(assessment).expect("insert assessment");

    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let started = h.service.start_attempt(assessment_id, owner).await.expect("start");

    let err = h
        .service
        .submit_answer(
            started.attempt.id,
            stranger,
            question_id,
            AnswerValue::One("a".into()),
        )
        .await
        .expect_err("stranger submit");
    assert!(matches!(err, Error::Forbidden(_)), "got {:?}", err);

    let err = h
        .service
        .get_progress(started.attempt.id, stranger, Role::Student)
        .await
        .expect_err("stranger status");
    assert!(matches!(err, Error::Forbidden(_)), "got {:?}", err);

    // Instructors can read but not answer.
    h.service
        .get_progress(started.attempt.id, stranger, Role::Instructor)
        .await
        .expect("reviewer status");
}
