use rand::Rng;
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};
use crate::models::{
    CategoryScope, DifficultyLevel, Question, QuestionDifficulty, QuestionFilter, QuestionId,
};
use crate::services::repositories::QuestionRepository;

/// Cumulative weighted pick over `(difficulty, weight)` buckets.
/// Non-positive weights are skipped; an empty distribution yields medium.
pub fn pick_weighted<R: Rng + ?Sized>(
    entries: &[(QuestionDifficulty, f64)],
    rng: &mut R,
) -> QuestionDifficulty {
    let buckets: Vec<(QuestionDifficulty, f64)> = entries
        .iter()
        .copied()
        .filter(|(_, weight)| *weight > 0.0)
        .collect();
    let Some((last, _)) = buckets.last().copied() else {
        return QuestionDifficulty::Medium;
    };

    let total: f64 = buckets.iter().map(|(_, weight)| weight).sum();
    let sample = rng.random::<f64>() * total;
    let mut cumulative = 0.0;
    for (difficulty, weight) in &buckets {
        cumulative += weight;
        if sample < cumulative {
            return *difficulty;
        }
    }
    // float residue lands in the last bucket
    last
}

/// Picks questions from the bank for every game mode.
#[derive(Clone)]
pub struct QuestionSelector {
    questions: Arc<dyn QuestionRepository>,
}

impl QuestionSelector {
    pub fn new(questions: Arc<dyn QuestionRepository>) -> Self {
        Self { questions }
    }

    /// Next marathon question: weighted difficulty, recent questions avoided when possible.
    pub async fn select_next_question(
        &self,
        category: CategoryScope,
        level: DifficultyLevel,
        recent_ids: &[QuestionId],
    ) -> DomainResult<Question> {
        let difficulty = {
            let mut rng = rand::rng();
            pick_weighted(&level.distribution().entries(), &mut rng)
        };

        let mut filter = QuestionFilter::new()
            .with_difficulty(difficulty)
            .excluding(recent_ids.iter().copied());
        if let Some(category_id) = category.category_id() {
            filter = filter.with_category(category_id);
        }

        if self.questions.count_by_filter(&filter).await? == 0 {
            tracing::debug!(
                "No fresh {} questions for {}, allowing repeats",
                difficulty.as_str(),
                category
            );
            filter = filter.without_exclusions();
            if self.questions.count_by_filter(&filter).await? == 0 {
                return Err(DomainError::not_available(format!(
                    "no {} questions available in category {}",
                    difficulty.as_str(),
                    category
                )));
            }
        }

        self.questions
            .find_random_questions(&filter, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::not_available("no questions available"))
    }

    /// Distinct random question ids from the whole bank.
    pub async fn select_random_ids(&self, count: usize) -> DomainResult<Vec<QuestionId>> {
        let picked = self
            .questions
            .find_random_questions(&QuestionFilter::new(), count)
            .await?;
        if picked.len() < count {
            return Err(DomainError::not_available(format!(
                "the question bank needs at least {} questions, found {}",
                count,
                picked.len()
            )));
        }
        Ok(picked.iter().map(Question::id).collect())
    }
}
