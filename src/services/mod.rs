pub mod attempt_service;
pub mod grading_service;
pub mod proctor_service;

pub use attempt_service::{AttemptProgress, AttemptResult, AttemptService, StartedAttempt};
pub use grading_service::{Grade, GradingService};
pub use proctor_service::{EventSubmission, LockdownConfig, ProctorService, SessionEvents};
