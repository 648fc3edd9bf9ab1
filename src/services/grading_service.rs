use std::collections::BTreeSet;

use crate::models::{AnswerValue, Question, QuestionType};

/// Outcome of grading one answer. `is_correct` stays `None` for question
/// types that need a manual grading pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grade {
    pub is_correct: Option<bool>,
    pub points_awarded: i32,
}

impl Grade {
    fn ungraded() -> Self {
        Self {
            is_correct: None,
            points_awarded: 0,
        }
    }

    fn scored(is_correct: bool, max_points: i32) -> Self {
        Self {
            is_correct: Some(is_correct),
            points_awarded: if is_correct { max_points } else { 0 },
        }
    }
}

pub struct GradingService;

impl GradingService {
    /// Grades one submitted answer against the question's option key.
    /// Pure and idempotent: the same inputs always produce the same grade.
    /// `max_points` is the slot's snapshot of the per-assessment points.
    pub fn grade_answer(question: &Question, answer: &AnswerValue, max_points: i32) -> Grade {
        match question.question_type {
            QuestionType::MultipleChoice => {
                let correct: BTreeSet<&str> = question.correct_option_ids().into_iter().collect();
                // Exact set equality: supersets, subsets and wrong picks all
                // fail; order and duplicates are irrelevant.
                let is_correct = answer.selection_set() == correct;
                Grade::scored(is_correct, max_points)
            }
            QuestionType::SingleChoice | QuestionType::TrueFalse => {
                let correct = question.correct_option_ids();
                let is_correct = match (answer.single(), correct.as_slice()) {
                    (Some(submitted), [only]) => submitted == *only,
                    _ => false,
                };
                Grade::scored(is_correct, max_points)
            }
            QuestionType::FillInTheBlank | QuestionType::Essay | QuestionType::Coding => {
                Grade::ungraded()
            }
        }
    }
}
