use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use sqlx::types::ipnetwork::IpNetwork;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    EventSeverity, EventType, ProctorSession, ProctorSettings, Role, SessionStatus,
};
use crate::store::{AttemptStore, EventAppended, NewEvent, NewSession, ProctorStore};

/// Key combinations the lockdown client refuses to pass through. Fixed
/// policy, identical for every session.
const BLOCKED_KEYS: [&str; 4] = ["F12", "PrintScreen", "ContextMenu", "Escape"];
const PREVENT_COPY_PASTE: bool = true;
const PREVENT_TAB_SWITCH: bool = true;

#[derive(Debug, Clone)]
pub struct EventSubmission {
    pub event_type: EventType,
    /// Defaults to medium when the client does not classify the incident.
    pub severity: Option<EventSeverity>,
    /// Client-reported incident time; defaults to the server clock.
    pub occurred_at: Option<DateTime<Utc>>,
    pub details: Option<JsonValue>,
    pub snapshot_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvents {
    pub session: ProctorSession,
    pub events: Vec<crate::models::ProctorEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockdownConfig {
    pub full_screen_required: bool,
    pub browser_lockdown: bool,
    pub blocked_keys: Vec<String>,
    pub prevent_copy_paste: bool,
    pub prevent_tab_switch: bool,
}

/// Owns the proctoring session lifecycle and the append-only event log,
/// including the anomaly score accumulator. Reads attempts only to anchor a
/// session to a live attempt; it never mutates them.
pub struct ProctorService {
    sessions: Arc<dyn ProctorStore>,
    attempts: Arc<dyn AttemptStore>,
}

impl ProctorService {
    pub fn new(sessions: Arc<dyn ProctorStore>, attempts: Arc<dyn AttemptStore>) -> Self {
        Self { sessions, attempts }
    }

    pub async fn start_session(
        &self,
        attempt_id: Uuid,
        user_id: Uuid,
        settings: ProctorSettings,
        ip_address: Option<IpNetwork>,
        user_agent: Option<String>,
    ) -> Result<ProctorSession> {
        let attempt = self
            .attempts
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound("attempt not found".into()))?;
        if attempt.user_id != user_id {
            return Err(Error::Forbidden("attempt belongs to another user".into()));
        }
        if attempt.status.is_terminal() {
            return Err(Error::InvalidState(
                "attempt is no longer in progress".into(),
            ));
        }

        let session = self
            .sessions
            .create_session(NewSession {
                id: Uuid::new_v4(),
                attempt_id,
                assessment_id: attempt.assessment_id,
                user_id,
                settings,
                started_at: Utc::now(),
                ip_address,
                user_agent,
            })
            .await?;

        info!(
            session_id = %session.id,
            attempt_id = %attempt_id,
            user_id = %user_id,
            "proctoring session started"
        );
        Ok(session)
    }

    pub async fn end_session(&self, session_id: Uuid, user_id: Uuid) -> Result<ProctorSession> {
        let session = self.owned_session(session_id, user_id).await?;
        if session.status.is_terminal() {
            return Err(Error::InvalidState("session is not active".into()));
        }

        let finalized = self
            .sessions
            .finalize_session(session_id, SessionStatus::Completed, Utc::now())
            .await?
            .ok_or_else(|| Error::InvalidState("session is not active".into()))?;

        info!(
            session_id = %session_id,
            anomaly_score = %finalized.anomaly_score,
            "proctoring session completed"
        );
        Ok(finalized)
    }

    /// Forcible close-out by an instructor or admin, e.g. after review of a
    /// runaway anomaly score.
    pub async fn terminate_session(&self, session_id: Uuid, role: Role) -> Result<ProctorSession> {
        if !role.is_elevated() {
            return Err(Error::Forbidden(
                "only instructors and admins may terminate a session".into(),
            ));
        }
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound("session not found".into()))?;
        if session.status.is_terminal() {
            return Err(Error::InvalidState("session is not active".into()));
        }

        let finalized = self
            .sessions
            .finalize_session(session_id, SessionStatus::Terminated, Utc::now())
            .await?
            .ok_or_else(|| Error::InvalidState("session is not active".into()))?;

        info!(session_id = %session_id, "proctoring session terminated");
        Ok(finalized)
    }

    pub async fn record_event(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        submission: EventSubmission,
    ) -> Result<EventAppended> {
        let session = self.owned_session(session_id, user_id).await?;
        if session.status.is_terminal() {
            return Err(Error::InvalidState("session is not active".into()));
        }

        let snapshot_digest = match submission.snapshot_url.as_deref() {
            Some(raw) => {
                let url = url::Url::parse(raw).map_err(|_| {
                    Error::BadRequest("snapshot reference is not a valid URL".into())
                })?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(Error::BadRequest(
                        "snapshot reference must use http or https".into(),
                    ));
                }
                // Digest covers the string as submitted, not the normalized form.
                Some(hex::encode(Sha256::digest(raw.as_bytes())))
            }
            None => None,
        };

        let now = Utc::now();
        let severity = submission.severity.unwrap_or_default();
        let appended = self
            .sessions
            .append_event(NewEvent {
                id: Uuid::new_v4(),
                session_id,
                event_type: submission.event_type,
                severity,
                occurred_at: submission.occurred_at.unwrap_or(now),
                recorded_at: now,
                details: submission.details,
                snapshot_url: submission.snapshot_url,
                snapshot_digest,
            })
            .await?
            .ok_or_else(|| Error::InvalidState("session is not active".into()))?;

        debug!(
            session_id = %session_id,
            event_id = %appended.event.id,
            severity = ?severity,
            anomaly_score = %appended.anomaly_score,
            "proctor event recorded"
        );
        Ok(appended)
    }

    /// Session metadata plus the ordered event timeline. Readable by the
    /// session's own user and by instructors and admins.
    pub async fn get_session_events(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<SessionEvents> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound("session not found".into()))?;
        if session.user_id != user_id && !role.is_elevated() {
            return Err(Error::Forbidden("session belongs to another user".into()));
        }

        let events = self.sessions.get_events(session_id).await?;
        Ok(SessionEvents { session, events })
    }

    /// Browser restrictions for the session: the snapshot's fullscreen and
    /// lockdown flags plus the fixed key/clipboard policy.
    pub async fn get_lockdown_config(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<LockdownConfig> {
        let session = self.owned_session(session_id, user_id).await?;
        Ok(LockdownConfig {
            full_screen_required: session.settings.full_screen_required,
            browser_lockdown: session.settings.browser_lockdown,
            blocked_keys: BLOCKED_KEYS.iter().map(|k| k.to_string()).collect(),
            prevent_copy_paste: PREVENT_COPY_PASTE,
            prevent_tab_switch: PREVENT_TAB_SWITCH,
        })
    }

    async fn owned_session(&self, session_id: Uuid, user_id: Uuid) -> Result<ProctorSession> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound("session not found".into()))?;
        if session.user_id != user_id {
            return Err(Error::Forbidden("session belongs to another user".into()));
        }
        Ok(session)
    }
}
