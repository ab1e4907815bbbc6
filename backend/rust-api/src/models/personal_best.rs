use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{DomainError, DomainResult};
use crate::models::ids::{PersonalBestId, UserId};
use crate::models::marathon::CategoryScope;

/// Best marathon run of a player in one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalBest {
    #[serde(rename = "_id")]
    id: PersonalBestId,
    player_id: UserId,
    category: CategoryScope,
    best_streak: u32,
    best_score: u32,
    achieved_at: i64,
    updated_at: i64,
}

impl PersonalBest {
    pub fn new(
        player_id: UserId,
        category: CategoryScope,
        streak: u32,
        score: u32,
        now: i64,
    ) -> DomainResult<Self> {
        if streak == 0 {
            return Err(DomainError::invalid(
                "a personal best needs at least one correct answer",
            ));
        }
        Ok(Self {
            id: PersonalBestId::new(),
            player_id,
            category,
            best_streak: streak,
            best_score: score,
            achieved_at: now,
            updated_at: now,
        })
    }

    pub fn is_better(&self, streak: u32, score: u32) -> bool {
        streak > self.best_streak || (streak == self.best_streak && score > self.best_score)
    }

    /// Returns true when the record moved.
    pub fn update_if_better(&mut self, streak: u32, score: u32, now: i64) -> bool {
        if !self.is_better(streak, score) {
            return false;
        }
        self.best_streak = streak;
        self.best_score = score;
        self.achieved_at = now;
        self.updated_at = now;
        true
    }

    /// Leaderboard order: streak desc, then score desc.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .best_streak
            .cmp(&self.best_streak)
            .then(other.best_score.cmp(&self.best_score))
            .then(self.achieved_at.cmp(&other.achieved_at))
    }

    pub fn id(&self) -> PersonalBestId {
        self.id
    }

    pub fn player_id(&self) -> &UserId {
        &self.player_id
    }

    pub fn category(&self) -> CategoryScope {
        self.category
    }

    pub fn best_streak(&self) -> u32 {
        self.best_streak
    }

    pub fn best_score(&self) -> u32 {
        self.best_score
    }

    pub fn achieved_at(&self) -> i64 {
        self.achieved_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pb(streak: u32, score: u32) -> PersonalBest {
        PersonalBest::new(UserId::from_platform(1), CategoryScope::All, streak, score, 0).unwrap()
    }

    #[test]
    fn test_zero_streak_is_not_a_record() {
        assert!(PersonalBest::new(UserId::from_platform(1), CategoryScope::All, 0, 50, 0).is_err());
    }

    #[test]
    fn test_update_if_better_is_monotone() {
        let mut best = pb(10, 100);
        assert!(!best.update_if_better(9, 1_000, 1));
        assert!(!best.update_if_better(10, 100, 1));
        assert_eq!((best.best_streak(), best.best_score()), (10, 100));

        assert!(best.update_if_better(10, 120, 2));
        assert_eq!(best.best_score(), 120);

        assert!(best.update_if_better(11, 5, 3));
        assert_eq!((best.best_streak(), best.best_score()), (11, 5));
        assert_eq!(best.achieved_at(), 3);
    }

    #[test]
    fn test_rank_order() {
        let mut all = vec![pb(5, 50), pb(8, 10), pb(8, 30)];
        all.sort_by(|a, b| a.rank_cmp(b));
        let order: Vec<(u32, u32)> = all.iter().map(|p| (p.best_streak(), p.best_score())).collect();
        assert_eq!(order, vec![(8, 30), (8, 10), (5, 50)]);
    }
}
