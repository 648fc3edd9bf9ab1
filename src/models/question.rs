use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "question_type", rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    SingleChoice,
    TrueFalse,
    FillInTheBlank,
    Essay,
    Coding,
}

impl QuestionType {
    /// Correctness of these types is decidable by exact comparison against
    /// the stored answer key; everything else waits for manual grading.
    pub fn is_auto_gradable(&self) -> bool {
        matches!(
            self,
            QuestionType::MultipleChoice | QuestionType::SingleChoice | QuestionType::TrueFalse
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "question_difficulty", rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// Immutable question definition served by the catalog. The attempt engine
/// reads it at attempt creation and at grading time, never writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    pub code: Option<String>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    pub correct_answer: Option<String>,
    pub difficulty: Difficulty,
    #[serde(default = "default_points")]
    pub points: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_points() -> i32 {
    1
}

impl Question {
    pub fn correct_option_ids(&self) -> Vec<&str> {
        self.options
            .iter()
            .filter(|o| o.is_correct)
            .map(|o| o.id.as_str())
            .collect()
    }
}
