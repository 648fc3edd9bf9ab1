//! Process-local store implementations backed by plain maps. The production
//! deployment runs on Postgres; these exist so the engines can be exercised
//! in isolation, with the same locking discipline per record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

use super::{
    AssessmentStore, AttemptStore, EventAppended, FinalizeOutcome, NewAttempt, NewEvent,
    NewSession, ProctorStore, QuestionCatalog, SlotUpdate,
};
use crate::error::{Error, Result};
use crate::models::{
    AnswerSlot, Assessment, Attempt, AttemptStatus, ProctorEvent, ProctorSession, Question,
    SessionStatus,
};

fn poisoned() -> Error {
    Error::Internal("in-memory store lock poisoned".into())
}

struct AttemptRecord {
    attempt: Attempt,
    slots: Vec<AnswerSlot>,
}

/// Per-attempt mutexes serialize mutations on one attempt while leaving
/// unrelated attempts fully independent.
#[derive(Default)]
pub struct MemoryAttemptStore {
    records: RwLock<HashMap<Uuid, Arc<Mutex<AttemptRecord>>>>,
    /// Serializes the count-and-insert so racing creates cannot both pass
    /// the attempt-limit check.
    create_lock: Mutex<()>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs an attempt as-is, bypassing the limit check. Lets tests
    /// plant attempts with deadlines already in the past.
    pub fn seed(&self, attempt: Attempt, slots: Vec<AnswerSlot>) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(attempt.id, Arc::new(Mutex::new(AttemptRecord { attempt, slots })));
        Ok(())
    }

    fn record(&self, id: Uuid) -> Result<Option<Arc<Mutex<AttemptRecord>>>> {
        Ok(self.records.read().map_err(|_| poisoned())?.get(&id).cloned())
    }

    fn count_for(&self, assessment_id: Uuid, user_id: Uuid) -> Result<i64> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut count = 0;
        for rec in records.values() {
            let rec = rec.lock().map_err(|_| poisoned())?;
            if rec.attempt.assessment_id == assessment_id && rec.attempt.user_id == user_id {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn create_attempt(&self, new: NewAttempt) -> Result<Attempt> {
        let _guard = self.create_lock.lock().map_err(|_| poisoned())?;
        let prior = self.count_for(new.assessment_id, new.user_id)?;
        if prior >= i64::from(new.allowed_attempts) {
            return Err(Error::LimitExceeded(format!(
                "attempt limit of {} reached for this assessment",
                new.allowed_attempts
            )));
        }

        let now = Utc::now();
        let attempt = Attempt {
            id: new.id,
            assessment_id: new.assessment_id,
            user_id: new.user_id,
            status: AttemptStatus::InProgress,
            started_at: new.started_at,
            deadline: new.deadline,
            ended_at: None,
            total_score: None,
            max_possible_score: new.max_possible_score,
            passed: None,
            created_at: Some(now),
            updated_at: Some(now),
        };
        let slots = new
            .slots
            .iter()
            .map(|s| AnswerSlot {
                attempt_id: new.id,
                question_id: s.question_id,
                position: s.position,
                answer: None,
                is_correct: None,
                points_awarded: 0,
                max_points: s.max_points,
                time_spent_seconds: 0,
                updated_at: None,
            })
            .collect();

        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(
            new.id,
            Arc::new(Mutex::new(AttemptRecord {
                attempt: attempt.clone(),
                slots,
            })),
        );
        Ok(attempt)
    }

    async fn get_attempt(&self, id: Uuid) -> Result<Option<Attempt>> {
        match self.record(id)? {
            Some(rec) => Ok(Some(rec.lock().map_err(|_| poisoned())?.attempt.clone())),
            None => Ok(None),
        }
    }

    async fn count_attempts(&self, assessment_id: Uuid, user_id: Uuid) -> Result<i64> {
        self.count_for(assessment_id, user_id)
    }

    async fn get_slots(&self, attempt_id: Uuid) -> Result<Vec<AnswerSlot>> {
        match self.record(attempt_id)? {
            Some(rec) => {
                let mut slots = rec.lock().map_err(|_| poisoned())?.slots.clone();
                slots.sort_by_key(|s| s.position);
                Ok(slots)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn get_slot(&self, attempt_id: Uuid, question_id: Uuid) -> Result<Option<AnswerSlot>> {
        match self.record(attempt_id)? {
            Some(rec) => Ok(rec
                .lock()
                .map_err(|_| poisoned())?
                .slots
                .iter()
                .find(|s| s.question_id == question_id)
                .cloned()),
            None => Ok(None),
        }
    }

    async fn save_slot(&self, update: SlotUpdate) -> Result<bool> {
        let Some(rec) = self.record(update.attempt_id)? else {
            return Ok(false);
        };
        let mut rec = rec.lock().map_err(|_| poisoned())?;
        if rec.attempt.status.is_terminal() {
            return Ok(false);
        }
        let Some(slot) = rec
            .slots
            .iter_mut()
            .find(|s| s.question_id == update.question_id)
        else {
            return Ok(false);
        };
        slot.answer = Some(update.answer);
        slot.is_correct = update.is_correct;
        slot.points_awarded = update.points_awarded;
        slot.time_spent_seconds = slot.time_spent_seconds.max(update.time_spent_seconds);
        slot.updated_at = Some(Utc::now());
        Ok(true)
    }

    async fn finalize_attempt(
        &self,
        id: Uuid,
        outcome: FinalizeOutcome,
    ) -> Result<Option<Attempt>> {
        let Some(rec) = self.record(id)? else {
            return Ok(None);
        };
        let mut rec = rec.lock().map_err(|_| poisoned())?;
        if rec.attempt.status.is_terminal() {
            return Ok(None);
        }

        let total: i32 = rec.slots.iter().map(|s| s.points_awarded).sum();
        let (status, ended_at, passed) = match outcome {
            FinalizeOutcome::Completed {
                ended_at,
                passing_score,
            } => (AttemptStatus::Completed, ended_at, total >= passing_score),
            FinalizeOutcome::TimedOut { ended_at } => (AttemptStatus::TimedOut, ended_at, false),
            FinalizeOutcome::Abandoned { ended_at } => (AttemptStatus::Abandoned, ended_at, false),
        };
        rec.attempt.status = status;
        rec.attempt.ended_at = Some(ended_at);
        rec.attempt.total_score = Some(total);
        rec.attempt.passed = Some(passed);
        rec.attempt.updated_at = Some(Utc::now());
        Ok(Some(rec.attempt.clone()))
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Attempt>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut expired = Vec::new();
        for rec in records.values() {
            let rec = rec.lock().map_err(|_| poisoned())?;
            if rec.attempt.status == AttemptStatus::InProgress && rec.attempt.deadline < now {
                expired.push(rec.attempt.clone());
            }
        }
        expired.sort_by_key(|a| a.deadline);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }
}

struct SessionRecord {
    session: ProctorSession,
    events: Vec<ProctorEvent>,
}

#[derive(Default)]
pub struct MemoryProctorStore {
    records: RwLock<HashMap<Uuid, Arc<Mutex<SessionRecord>>>>,
    /// Serializes the active-uniqueness check against the insert.
    create_lock: Mutex<()>,
}

impl MemoryProctorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: Uuid) -> Result<Option<Arc<Mutex<SessionRecord>>>> {
        Ok(self.records.read().map_err(|_| poisoned())?.get(&id).cloned())
    }
}

#[async_trait]
impl ProctorStore for MemoryProctorStore {
    async fn create_session(&self, new: NewSession) -> Result<ProctorSession> {
        let _guard = self.create_lock.lock().map_err(|_| poisoned())?;
        {
            let records = self.records.read().map_err(|_| poisoned())?;
            for rec in records.values() {
                let rec = rec.lock().map_err(|_| poisoned())?;
                if rec.session.attempt_id == new.attempt_id
                    && rec.session.user_id == new.user_id
                    && rec.session.status == SessionStatus::Active
                {
                    return Err(Error::LimitExceeded(
                        "an active proctoring session already exists for this attempt".into(),
                    ));
                }
            }
        }

        let now = Utc::now();
        let session = ProctorSession {
            id: new.id,
            attempt_id: new.attempt_id,
            assessment_id: new.assessment_id,
            user_id: new.user_id,
            status: SessionStatus::Active,
            settings: new.settings,
            started_at: new.started_at,
            ended_at: None,
            anomaly_score: rust_decimal::Decimal::ZERO,
            ip_address: new.ip_address,
            user_agent: new.user_agent,
            created_at: Some(now),
            updated_at: Some(now),
        };
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(
            new.id,
            Arc::new(Mutex::new(SessionRecord {
                session: session.clone(),
                events: Vec::new(),
            })),
        );
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ProctorSession>> {
        match self.record(id)? {
            Some(rec) => Ok(Some(rec.lock().map_err(|_| poisoned())?.session.clone())),
            None => Ok(None),
        }
    }

    async fn finalize_session(
        &self,
        id: Uuid,
        status: SessionStatus,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<ProctorSession>> {
        let Some(rec) = self.record(id)? else {
            return Ok(None);
        };
        let mut rec = rec.lock().map_err(|_| poisoned())?;
        if rec.session.status.is_terminal() {
            return Ok(None);
        }
        rec.session.status = status;
        rec.session.ended_at = Some(ended_at);
        rec.session.updated_at = Some(Utc::now());
        Ok(Some(rec.session.clone()))
    }

    async fn append_event(&self, new: NewEvent) -> Result<Option<EventAppended>> {
        let Some(rec) = self.record(new.session_id)? else {
            return Ok(None);
        };
        let mut rec = rec.lock().map_err(|_| poisoned())?;
        if rec.session.status.is_terminal() {
            return Ok(None);
        }

        let event = ProctorEvent {
            id: new.id,
            session_id: new.session_id,
            attempt_id: rec.session.attempt_id,
            assessment_id: rec.session.assessment_id,
            user_id: rec.session.user_id,
            seq: rec.events.len() as i64 + 1,
            event_type: new.event_type,
            severity: new.severity,
            occurred_at: new.occurred_at,
            recorded_at: new.recorded_at,
            details: new.details,
            snapshot_url: new.snapshot_url,
            snapshot_digest: new.snapshot_digest,
        };
        rec.events.push(event.clone());
        rec.session.anomaly_score += new.severity.weight();
        rec.session.updated_at = Some(Utc::now());
        Ok(Some(EventAppended {
            event,
            anomaly_score: rec.session.anomaly_score,
        }))
    }

    async fn get_events(&self, session_id: Uuid) -> Result<Vec<ProctorEvent>> {
        match self.record(session_id)? {
            Some(rec) => Ok(rec.lock().map_err(|_| poisoned())?.events.clone()),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Default)]
pub struct MemoryAssessmentStore {
    assessments: RwLock<HashMap<Uuid, Assessment>>,
}

impl MemoryAssessmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, assessment: Assessment) -> Result<()> {
        self.assessments
            .write()
            .map_err(|_| poisoned())?
            .insert(assessment.id, assessment);
        Ok(())
    }
}

#[async_trait]
impl AssessmentStore for MemoryAssessmentStore {
    async fn get_assessment(&self, id: Uuid) -> Result<Option<Assessment>> {
        Ok(self
            .assessments
            .read()
            .map_err(|_| poisoned())?
            .get(&id)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryQuestionCatalog {
    questions: RwLock<HashMap<Uuid, Question>>,
}

impl MemoryQuestionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, question: Question) -> Result<()> {
        self.questions
            .write()
            .map_err(|_| poisoned())?
            .insert(question.id, question);
        Ok(())
    }
}

#[async_trait]
impl QuestionCatalog for MemoryQuestionCatalog {
    async fn get_question(&self, id: Uuid) -> Result<Option<Question>> {
        Ok(self
            .questions
            .read()
            .map_err(|_| poisoned())?
            .get(&id)
            .cloned())
    }

    async fn get_questions(&self, ids: &[Uuid]) -> Result<Vec<Question>> {
        let questions = self.questions.read().map_err(|_| poisoned())?;
        Ok(ids.iter().filter_map(|id| questions.get(id).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewSlot;
    use chrono::Duration;

    fn new_attempt(assessment_id: Uuid, user_id: Uuid, allowed: i32) -> NewAttempt {
        let now = Utc::now();
        NewAttempt {
            id: Uuid::new_v4(),
            assessment_id,
            user_id,
            started_at: now,
            deadline: now + Duration::minutes(10),
            max_possible_score: 5,
            allowed_attempts: allowed,
            slots: vec![NewSlot {
                question_id: Uuid::new_v4(),
                position: 1,
                max_points: 5,
            }],
        }
    }

    #[tokio::test]
    async fn time_spent_never_decreases() {
        let store = MemoryAttemptStore::new();
        let new = new_attempt(Uuid::new_v4(), Uuid::new_v4(), 1);
        let question_id = new.slots[0].question_id;
        let attempt = store.create_attempt(new).await.unwrap();

        let write = |time_spent| SlotUpdate {
            attempt_id: attempt.id,
            question_id,
            answer: serde_json::json!("b"),
            is_correct: Some(true),
            points_awarded: 5,
            time_spent_seconds: time_spent,
        };
        assert!(store.save_slot(write(30)).await.unwrap());
        assert!(store.save_slot(write(10)).await.unwrap());

        let slot = store.get_slot(attempt.id, question_id).await.unwrap().unwrap();
        assert_eq!(slot.time_spent_seconds, 30);
    }

    #[tokio::test]
    async fn finalize_is_single_winner() {
        let store = MemoryAttemptStore::new();
        let new = new_attempt(Uuid::new_v4(), Uuid::new_v4(), 1);
        let attempt = store.create_attempt(new).await.unwrap();

        let ended_at = Utc::now();
        let first = store
            .finalize_attempt(
                attempt.id,
                FinalizeOutcome::Completed {
                    ended_at,
                    passing_score: 3,
                },
            )
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .finalize_attempt(attempt.id, FinalizeOutcome::TimedOut { ended_at })
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn attempt_limit_is_enforced() {
        let store = MemoryAttemptStore::new();
        let assessment_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        store
            .create_attempt(new_attempt(assessment_id, user_id, 1))
            .await
            .unwrap();
        let err = store
            .create_attempt(new_attempt(assessment_id, user_id, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));
    }
}
