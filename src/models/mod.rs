pub mod assessment;
pub mod attempt;
pub mod proctor;
pub mod question;
pub mod user;

pub use assessment::{Assessment, AssessmentQuestion, AssessmentStatus, ProctoringConfig};
pub use attempt::{AnswerSlot, AnswerValue, Attempt, AttemptStatus};
pub use proctor::{
    EventSeverity, EventType, ProctorEvent, ProctorSession, ProctorSettings, SessionStatus,
};
pub use question::{Difficulty, Question, QuestionOption, QuestionType};
pub use user::Role;
