pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

use std::sync::Arc;

use sqlx::PgPool;

use crate::services::{attempt_service::AttemptService, proctor_service::ProctorService};
use crate::store::{
    postgres::{PgAssessmentStore, PgAttemptStore, PgProctorStore, PgQuestionCatalog},
    AssessmentStore, AttemptStore, MemorySessionCache, ProctorStore, QuestionCatalog, SessionCache,
};

#[derive(Clone)]
pub struct AppState {
    pub attempt_service: Arc<AttemptService>,
    pub proctor_service: Arc<ProctorService>,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let attempts: Arc<dyn AttemptStore> = Arc::new(PgAttemptStore::new(pool.clone()));
        let assessments: Arc<dyn AssessmentStore> = Arc::new(PgAssessmentStore::new(pool.clone()));
        let catalog: Arc<dyn QuestionCatalog> = Arc::new(PgQuestionCatalog::new(pool.clone()));
        let sessions: Arc<dyn ProctorStore> = Arc::new(PgProctorStore::new(pool));
        let cache: Arc<dyn SessionCache> = Arc::new(MemorySessionCache::new());
        Self::with_stores(attempts, assessments, catalog, sessions, cache)
    }

    /// Wires the services over any store implementations. Tests use this
    /// with the in-memory stores.
    pub fn with_stores(
        attempts: Arc<dyn AttemptStore>,
        assessments: Arc<dyn AssessmentStore>,
        catalog: Arc<dyn QuestionCatalog>,
        sessions: Arc<dyn ProctorStore>,
        cache: Arc<dyn SessionCache>,
    ) -> Self {
        let attempt_service = Arc::new(AttemptService::new(
            attempts.clone(),
            assessments,
            catalog,
            cache,
        ));
        let proctor_service = Arc::new(ProctorService::new(sessions, attempts));
        Self {
            attempt_service,
            proctor_service,
        }
    }
}
