use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{DomainError, DomainResult};
use crate::models::events::DomainEvent;
use crate::models::ids::{AnswerId, CategoryId, QuestionId, QuizId, SessionId, UserId};
use crate::models::question::{PassingScore, Percentage, Question, TimeLimit};

const MAX_TITLE: usize = 200;
const MAX_DESCRIPTION: usize = 1000;
const MAX_CATEGORY_NAME: usize = 100;
const MAX_TAG_LEN: usize = 100;

pub const TAG_CATEGORIES: [&str; 5] = ["language", "difficulty", "topic", "domain", "format"];

lazy_static! {
    static ref TAG_PATTERN: Regex =
        Regex::new(r"^[a-z0-9-]+:[a-z0-9-]+$").expect("tag pattern is valid");
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(rename = "_id")]
    pub id: CategoryId,
    pub name: String,
    pub created_at: i64,
}

impl Category {
    pub fn new(name: &str, now: i64) -> DomainResult<Self> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_CATEGORY_NAME {
            return Err(DomainError::invalid(format!(
                "category name must be 1..{} characters",
                MAX_CATEGORY_NAME
            )));
        }
        Ok(Self {
            id: CategoryId::new(),
            name: name.to_string(),
            created_at: now,
        })
    }
}

/// `{category}:{value}` label such as `language:rust` or `difficulty:hard`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "_id")]
    name: String,
}

impl Tag {
    pub fn parse(name: &str) -> DomainResult<Self> {
        let name = name.trim().to_lowercase();
        if name.len() > MAX_TAG_LEN {
            return Err(DomainError::invalid("tag is too long"));
        }
        if !TAG_PATTERN.is_match(&name) {
            return Err(DomainError::invalid(format!(
                "tag '{}' must look like category:value",
                name
            )));
        }
        let tag = Self { name };
        if !TAG_CATEGORIES.contains(&tag.category()) {
            return Err(DomainError::invalid(format!(
                "unknown tag category '{}'",
                tag.category()
            )));
        }
        Ok(tag)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        self.name.split(':').next().unwrap_or_default()
    }

    pub fn value(&self) -> &str {
        self.name.split(':').nth(1).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    #[serde(rename = "_id")]
    id: QuizId,
    title: String,
    description: String,
    category_id: Option<CategoryId>,
    tags: BTreeSet<String>,
    time_limit: TimeLimit,
    passing_score: PassingScore,
    questions: Vec<Question>,
    created_at: i64,
    updated_at: i64,
    #[serde(default)]
    played: bool,
}

impl Quiz {
    pub fn new(
        title: &str,
        description: &str,
        category_id: Option<CategoryId>,
        time_limit: TimeLimit,
        passing_score: PassingScore,
        now: i64,
    ) -> DomainResult<Self> {
        let title = title.trim();
        if title.is_empty() || title.chars().count() > MAX_TITLE {
            return Err(DomainError::invalid(format!(
                "quiz title must be 1..{} characters",
                MAX_TITLE
            )));
        }
        if description.chars().count() > MAX_DESCRIPTION {
            return Err(DomainError::invalid("quiz description is too long"));
        }
        Ok(Self {
            id: QuizId::new(),
            title: title.to_string(),
            description: description.trim().to_string(),
            category_id,
            tags: BTreeSet::new(),
            time_limit,
            passing_score,
            questions: Vec::new(),
            created_at: now,
            updated_at: now,
            played: false,
        })
    }

    fn ensure_editable(&self) -> DomainResult<()> {
        if self.played {
            return Err(DomainError::state(
                "quiz cannot be modified after it has been played",
            ));
        }
        Ok(())
    }

    /// Appends a question; its position becomes its index.
    pub fn add_question(&mut self, mut question: Question, now: i64) -> DomainResult<()> {
        self.ensure_editable()?;
        if self.questions.iter().any(|q| q.id() == question.id()) {
            return Err(DomainError::conflict("question already belongs to this quiz"));
        }
        question.set_position(self.questions.len() as u32);
        self.questions.push(question);
        self.updated_at = now;
        Ok(())
    }

    pub fn add_tag(&mut self, tag: &Tag, now: i64) -> DomainResult<()> {
        self.ensure_editable()?;
        self.tags.insert(tag.name().to_string());
        self.updated_at = now;
        Ok(())
    }

    pub fn can_start(&self) -> bool {
        !self.questions.is_empty()
    }

    /// Freezes the quiz on its first play.
    pub fn mark_played(&mut self) {
        self.played = true;
    }

    pub fn total_points(&self) -> u32 {
        self.questions.iter().map(|q| q.points().value()).sum()
    }

    pub fn question(&self, question_id: &QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| &q.id() == question_id)
    }

    pub fn id(&self) -> QuizId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category_id(&self) -> Option<CategoryId> {
        self.category_id
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn time_limit(&self) -> TimeLimit {
        self.time_limit
    }

    pub fn passing_score(&self) -> PassingScore {
        self.passing_score
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn is_played(&self) -> bool {
        self.played
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnswer {
    pub question_id: QuestionId,
    pub answer_id: AnswerId,
    pub is_correct: bool,
    pub points: u32,
    pub answered_at: i64,
}

/// One play-through of a classic quiz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSession {
    #[serde(rename = "_id")]
    id: SessionId,
    quiz_id: QuizId,
    user_id: UserId,
    status: SessionStatus,
    answers: Vec<SessionAnswer>,
    score: u32,
    total_questions: u32,
    started_at: i64,
    completed_at: Option<i64>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl QuizSession {
    pub fn start(quiz: &Quiz, user_id: UserId, now: i64) -> DomainResult<Self> {
        if !quiz.can_start() {
            return Err(DomainError::not_available("quiz has no questions"));
        }
        let id = SessionId::new();
        let events = vec![DomainEvent::QuizStarted {
            session_id: id,
            quiz_id: quiz.id(),
            user_id: user_id.clone(),
            at: now,
        }];
        Ok(Self {
            id,
            quiz_id: quiz.id(),
            user_id,
            status: SessionStatus::Active,
            answers: Vec::new(),
            score: 0,
            total_questions: quiz.questions().len() as u32,
            started_at: now,
            completed_at: None,
            events,
        })
    }

    /// Records an answer; completes the session once every question is answered.
    pub fn submit_answer(
        &mut self,
        quiz: &Quiz,
        question_id: QuestionId,
        answer_id: AnswerId,
        now: i64,
    ) -> DomainResult<&SessionAnswer> {
        if self.status != SessionStatus::Active {
            return Err(DomainError::state("session is not active"));
        }
        if quiz.id() != self.quiz_id {
            return Err(DomainError::invalid("answer does not belong to this quiz"));
        }
        if self.answers.iter().any(|a| a.question_id == question_id) {
            return Err(DomainError::conflict("question already answered"));
        }
        let question = quiz
            .question(&question_id)
            .ok_or_else(|| DomainError::not_found("question"))?;
        let answer = question
            .answer(&answer_id)
            .ok_or_else(|| DomainError::invalid("answer does not belong to the question"))?;

        let is_correct = answer.is_correct();
        let points = if is_correct {
            question.points().value()
        } else {
            0
        };
        self.score += points;
        self.answers.push(SessionAnswer {
            question_id,
            answer_id,
            is_correct,
            points,
            answered_at: now,
        });
        self.events.push(DomainEvent::AnswerSubmitted {
            session_id: self.id,
            question_id,
            answer_id,
            is_correct,
            points,
            at: now,
        });

        if self.answers.len() as u32 >= self.total_questions {
            self.status = SessionStatus::Completed;
            self.completed_at = Some(now);
            let passed = self.has_passed(quiz);
            self.events.push(DomainEvent::QuizCompleted {
                session_id: self.id,
                quiz_id: self.quiz_id,
                user_id: self.user_id.clone(),
                score: self.score,
                passed,
                at: now,
            });
        }

        self.answers
            .last()
            .ok_or_else(|| DomainError::internal("answer was not recorded"))
    }

    pub fn abandon(&mut self, now: i64) -> DomainResult<()> {
        if self.status != SessionStatus::Active {
            return Err(DomainError::state("only an active session can be abandoned"));
        }
        self.status = SessionStatus::Abandoned;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn has_passed(&self, quiz: &Quiz) -> bool {
        Percentage::of(self.score, quiz.total_points()).value() >= quiz.passing_score().percentage()
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn answers(&self) -> &[SessionAnswer] {
        &self.answers
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn current_question(&self) -> u32 {
        self.answers.len() as u32
    }

    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<i64> {
        self.completed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::fixtures;
    use crate::models::question::QuestionDifficulty;

    fn quiz_with(questions: usize) -> Quiz {
        let mut quiz = Quiz::new(
            "Rust basics",
            "",
            None,
            TimeLimit::new(60).unwrap(),
            PassingScore::new(70).unwrap(),
            0,
        )
        .unwrap();
        for _ in 0..questions {
            quiz.add_question(fixtures::question(QuestionDifficulty::Easy), 0)
                .unwrap();
        }
        quiz
    }

    #[test]
    fn test_positions_are_dense() {
        let quiz = quiz_with(3);
        let positions: Vec<u32> = quiz.questions().iter().map(|q| q.position()).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(quiz.total_points(), 30);
    }

    #[test]
    fn test_empty_quiz_cannot_start() {
        let quiz = quiz_with(0);
        assert!(!quiz.can_start());
        assert!(QuizSession::start(&quiz, UserId::from_platform(1), 0).is_err());
    }

    #[test]
    fn test_played_quiz_is_immutable() {
        let mut quiz = quiz_with(1);
        quiz.mark_played();
        let err = quiz
            .add_question(fixtures::question(QuestionDifficulty::Easy), 1)
            .unwrap_err();
        assert!(matches!(err, DomainError::StateViolation(_)));
    }

    #[test]
    fn test_session_scores_and_completes() {
        let quiz = quiz_with(2);
        let mut session = QuizSession::start(&quiz, UserId::from_platform(7), 10).unwrap();
        let q1 = &quiz.questions()[0];
        let q2 = &quiz.questions()[1];

        session
            .submit_answer(&quiz, q1.id(), fixtures::correct(q1), 11)
            .unwrap();
        let dup = session.submit_answer(&quiz, q1.id(), fixtures::correct(q1), 12);
        assert!(matches!(dup, Err(DomainError::Conflict(_))));

        session
            .submit_answer(&quiz, q2.id(), fixtures::wrong(q2), 13)
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.score(), 10);
        assert!(!session.has_passed(&quiz));

        let events = session.take_events();
        assert!(matches!(events.last(), Some(DomainEvent::QuizCompleted { passed: false, .. })));
    }

    #[test]
    fn test_tag_format() {
        let tag = Tag::parse("Language:Rust").unwrap();
        assert_eq!(tag.name(), "language:rust");
        assert_eq!(tag.category(), "language");
        assert_eq!(tag.value(), "rust");
        assert!(Tag::parse("rust").is_err());
        assert!(Tag::parse("colour:red").is_err());
        assert!(Tag::parse("topic:has space").is_err());
    }
}
