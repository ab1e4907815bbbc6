use std::collections::HashSet;

use crate::models::ids::{CategoryId, QuestionId};
use crate::models::question::{Question, QuestionDifficulty};

/// Query object for the question bank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionFilter {
    pub difficulty: Option<QuestionDifficulty>,
    pub category_id: Option<CategoryId>,
    pub exclude_ids: HashSet<QuestionId>,
    pub min_points: Option<u32>,
    pub max_points: Option<u32>,
    pub limit: Option<usize>,
}

impl QuestionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_difficulty(mut self, difficulty: QuestionDifficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn excluding<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = QuestionId>,
    {
        self.exclude_ids.extend(ids);
        self
    }

    pub fn with_points_between(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_points = min;
        self.max_points = max;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn without_exclusions(&self) -> Self {
        Self {
            exclude_ids: HashSet::new(),
            ..self.clone()
        }
    }

    pub fn matches(&self, question: &Question) -> bool {
        if let Some(difficulty) = self.difficulty {
            if question.difficulty() != difficulty {
                return false;
            }
        }
        if let Some(category_id) = self.category_id {
            if question.category_id() != Some(category_id) {
                return false;
            }
        }
        if self.exclude_ids.contains(&question.id()) {
            return false;
        }
        let points = question.points().value();
        if self.min_points.is_some_and(|min| points < min) {
            return false;
        }
        if self.max_points.is_some_and(|max| points > max) {
            return false;
        }
        true
    }
}
