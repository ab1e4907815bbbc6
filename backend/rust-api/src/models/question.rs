use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{DomainError, DomainResult};
use crate::models::ids::{AnswerId, CategoryId, QuestionId};

pub const MAX_POINTS: u32 = 1000;
pub const MIN_ANSWERS: usize = 2;
pub const MAX_ANSWERS: usize = 10;
const MAX_ANSWER_TEXT: usize = 500;
const MAX_QUESTION_TEXT: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Points(u32);

impl Points {
    pub fn new(value: u32) -> DomainResult<Self> {
        if value > MAX_POINTS {
            return Err(DomainError::invalid(format!(
                "points must be between 0 and {}",
                MAX_POINTS
            )));
        }
        Ok(Self(value))
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

/// Quiz-level time budget in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeLimit(u32);

impl TimeLimit {
    pub const MIN_SECS: u32 = 5;
    pub const MAX_SECS: u32 = 3600;

    pub fn new(seconds: u32) -> DomainResult<Self> {
        if !(Self::MIN_SECS..=Self::MAX_SECS).contains(&seconds) {
            return Err(DomainError::invalid(format!(
                "time limit must be between {} and {} seconds",
                Self::MIN_SECS,
                Self::MAX_SECS
            )));
        }
        Ok(Self(seconds))
    }

    pub fn seconds(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassingScore(u32);

impl PassingScore {
    pub fn new(percentage: u32) -> DomainResult<Self> {
        if percentage > 100 {
            return Err(DomainError::invalid(
                "passing score must be between 0 and 100",
            ));
        }
        Ok(Self(percentage))
    }

    pub fn percentage(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(u32);

impl Percentage {
    /// `part / whole` as a whole percentage, 0 when `whole` is 0.
    pub fn of(part: u32, whole: u32) -> Self {
        if whole == 0 {
            return Self(0);
        }
        Self(((u64::from(part) * 100) / u64::from(whole)).min(100) as u32)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionDifficulty {
    Easy,
    Medium,
    Hard,
}

impl QuestionDifficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionDifficulty::Easy => "easy",
            QuestionDifficulty::Medium => "medium",
            QuestionDifficulty::Hard => "hard",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "easy" => Ok(QuestionDifficulty::Easy),
            "medium" => Ok(QuestionDifficulty::Medium),
            "hard" => Ok(QuestionDifficulty::Hard),
            other => Err(DomainError::invalid(format!(
                "unknown difficulty '{}'",
                other
            ))),
        }
    }
}

impl Default for QuestionDifficulty {
    fn default() -> Self {
        QuestionDifficulty::Medium
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    id: AnswerId,
    text: String,
    is_correct: bool,
    position: u32,
}

impl Answer {
    pub fn new(id: AnswerId, text: &str, is_correct: bool, position: u32) -> DomainResult<Self> {
        let text = text.trim();
        if text.is_empty() || text.chars().count() > MAX_ANSWER_TEXT {
            return Err(DomainError::invalid(format!(
                "answer text must be 1..{} characters",
                MAX_ANSWER_TEXT
            )));
        }
        Ok(Self {
            id,
            text: text.to_string(),
            is_correct,
            position,
        })
    }

    pub fn id(&self) -> AnswerId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_correct(&self) -> bool {
        self.is_correct
    }

    pub fn position(&self) -> u32 {
        self.position
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    id: QuestionId,
    text: String,
    points: Points,
    position: u32,
    #[serde(default)]
    difficulty: QuestionDifficulty,
    #[serde(default)]
    category_id: Option<CategoryId>,
    answers: Vec<Answer>,
}

impl Question {
    pub fn new(
        id: QuestionId,
        text: &str,
        points: Points,
        position: u32,
        answers: Vec<Answer>,
    ) -> DomainResult<Self> {
        let text = text.trim();
        if text.is_empty() || text.chars().count() > MAX_QUESTION_TEXT {
            return Err(DomainError::invalid(format!(
                "question text must be 1..{} characters",
                MAX_QUESTION_TEXT
            )));
        }
        if !(MIN_ANSWERS..=MAX_ANSWERS).contains(&answers.len()) {
            return Err(DomainError::invalid(format!(
                "a question needs between {} and {} answers",
                MIN_ANSWERS, MAX_ANSWERS
            )));
        }
        let correct = answers.iter().filter(|a| a.is_correct()).count();
        if correct != 1 {
            return Err(DomainError::invalid(format!(
                "a question needs exactly one correct answer (found {})",
                correct
            )));
        }
        let mut positions = HashSet::new();
        if !answers.iter().all(|a| positions.insert(a.position())) {
            return Err(DomainError::invalid("answer positions must be unique"));
        }

        let mut answers = answers;
        answers.sort_by_key(|a| a.position());

        Ok(Self {
            id,
            text: text.to_string(),
            points,
            position,
            difficulty: QuestionDifficulty::default(),
            category_id: None,
            answers,
        })
    }

    pub fn with_difficulty(mut self, difficulty: QuestionDifficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_category(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    pub(crate) fn set_position(&mut self, position: u32) {
        self.position = position;
    }

    pub fn id(&self) -> QuestionId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn points(&self) -> Points {
        self.points
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn difficulty(&self) -> QuestionDifficulty {
        self.difficulty
    }

    pub fn category_id(&self) -> Option<CategoryId> {
        self.category_id
    }

    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    pub fn answer(&self, answer_id: &AnswerId) -> Option<&Answer> {
        self.answers.iter().find(|a| &a.id == answer_id)
    }

    pub fn correct_answer(&self) -> Option<&Answer> {
        self.answers.iter().find(|a| a.is_correct)
    }

    pub fn correct_answer_id(&self) -> Option<AnswerId> {
        self.correct_answer().map(|a| a.id)
    }

    /// Incorrect answers in position order.
    pub fn incorrect_answer_ids(&self) -> Vec<AnswerId> {
        self.answers
            .iter()
            .filter(|a| !a.is_correct)
            .map(|a| a.id)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Four-answer question whose first answer is correct.
    pub fn question(difficulty: QuestionDifficulty) -> Question {
        question_with_points(difficulty, 10)
    }

    pub fn question_with_points(difficulty: QuestionDifficulty, points: u32) -> Question {
        let answers = (0..4)
            .map(|i| Answer::new(AnswerId::new(), &format!("answer {}", i), i == 0, i).unwrap())
            .collect();
        Question::new(
            QuestionId::new(),
            "What is the answer?",
            Points::new(points).unwrap(),
            0,
            answers,
        )
        .unwrap()
        .with_difficulty(difficulty)
    }

    pub fn correct(question: &Question) -> AnswerId {
        question.correct_answer_id().unwrap()
    }

    pub fn wrong(question: &Question) -> AnswerId {
        question.incorrect_answer_ids()[0]
    }
}
