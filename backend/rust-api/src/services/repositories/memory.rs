use async_trait::async_trait;
use chrono::NaiveDate;
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{
    best_per_player, CategoryRepository, ChallengeRepository, DailyGameRepository,
    DailyQuizRepository, DuelMatchRepository, LeaderboardRepository, MarathonGameRepository,
    PersonalBestRepository, PlayerRatingRepository, QuestionRepository, QuizRepository,
    QuizSessionRepository, ReferralRepository, ReferralRow, ScoreRow, TagRepository,
    UserRepository, WalletRepository, rank_referral_rows,
};
use crate::error::{DomainError, DomainResult};
use crate::models::{
    Category, CategoryId, CategoryScope, Challenge, ChallengeId, ChallengeStatus, DailyGame,
    DailyGameId, DailyGameStatus, DailyQuiz, DuelMatch, DuelMatchId, MarathonGame, MarathonGameId,
    MarathonStatus, PersonalBest, PlayerRating, Question, QuestionFilter, QuestionId, Quiz, QuizId,
    DomainEvent, QuizSession, Referral, ReferralId, SessionId, SessionStatus, Tag, User, UserId,
    Wallet,
};

/// Process-local store used by tests and by `STORAGE_BACKEND=memory`.
#[derive(Default)]
pub struct InMemoryStore {
    questions: RwLock<HashMap<QuestionId, Question>>,
    quizzes: RwLock<HashMap<QuizId, Quiz>>,
    sessions: RwLock<HashMap<SessionId, QuizSession>>,
    categories: RwLock<HashMap<CategoryId, Category>>,
    tags: RwLock<HashMap<String, Tag>>,
    users: RwLock<HashMap<UserId, User>>,
    wallets: RwLock<HashMap<UserId, Wallet>>,
    marathon_games: RwLock<HashMap<MarathonGameId, MarathonGame>>,
    personal_bests: RwLock<HashMap<(UserId, CategoryScope), PersonalBest>>,
    daily_quizzes: RwLock<HashMap<NaiveDate, DailyQuiz>>,
    daily_games: RwLock<HashMap<DailyGameId, DailyGame>>,
    duel_matches: RwLock<HashMap<DuelMatchId, DuelMatch>>,
    challenges: RwLock<HashMap<ChallengeId, Challenge>>,
    ratings: RwLock<HashMap<UserId, PlayerRating>>,
    referrals: RwLock<HashMap<ReferralId, Referral>>,
}

fn rating_order(a: &PlayerRating, b: &PlayerRating) -> Ordering {
    b.mmr
        .cmp(&a.mmr)
        .then(b.wins.cmp(&a.wins))
        .then(a.player_id.cmp(&b.player_id))
}

/// Copy of an aggregate for storage; pending events stay with the caller.
fn detached<T: Clone>(value: &T, take_events: fn(&mut T) -> Vec<DomainEvent>) -> T {
    let mut stored = value.clone();
    take_events(&mut stored);
    stored
}

fn apply_limit<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

#[async_trait]
impl QuestionRepository for InMemoryStore {
    async fn find_by_id(&self, id: QuestionId) -> DomainResult<Option<Question>> {
        Ok(self.questions.read().await.get(&id).cloned())
    }

    async fn find_by_ids(&self, ids: &[QuestionId]) -> DomainResult<Vec<Question>> {
        let questions = self.questions.read().await;
        Ok(ids.iter().filter_map(|id| questions.get(id).cloned()).collect())
    }

    async fn find_by_filter(&self, filter: &QuestionFilter) -> DomainResult<Vec<Question>> {
        let questions = self.questions.read().await;
        let mut matching: Vec<Question> = questions
            .values()
            .filter(|q| filter.matches(q))
            .cloned()
            .collect();
        matching.sort_by_key(|q| q.id());
        Ok(apply_limit(matching, filter.limit))
    }

    async fn find_random_questions(
        &self,
        filter: &QuestionFilter,
        count: usize,
    ) -> DomainResult<Vec<Question>> {
        let mut matching: Vec<Question> = {
            let questions = self.questions.read().await;
            questions
                .values()
                .filter(|q| filter.matches(q))
                .cloned()
                .collect()
        };
        {
            let mut rng = rand::rng();
            matching.shuffle(&mut rng);
        }
        matching.truncate(count);
        Ok(matching)
    }

    async fn count_by_filter(&self, filter: &QuestionFilter) -> DomainResult<u64> {
        let questions = self.questions.read().await;
        Ok(questions.values().filter(|q| filter.matches(q)).count() as u64)
    }

    async fn save(&self, question: &Question) -> DomainResult<()> {
        self.questions
            .write()
            .await
            .insert(question.id(), question.clone());
        Ok(())
    }

    async fn save_all(&self, questions: &[Question]) -> DomainResult<()> {
        let mut store = self.questions.write().await;
        for question in questions {
            store.insert(question.id(), question.clone());
        }
        Ok(())
    }

    async fn delete(&self, id: QuestionId) -> DomainResult<()> {
        self.questions.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl QuizRepository for InMemoryStore {
    async fn save(&self, quiz: &Quiz) -> DomainResult<()> {
        self.quizzes.write().await.insert(quiz.id(), quiz.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: QuizId) -> DomainResult<Option<Quiz>> {
        Ok(self.quizzes.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> DomainResult<Vec<Quiz>> {
        let mut quizzes: Vec<Quiz> = self.quizzes.read().await.values().cloned().collect();
        quizzes.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.title().cmp(b.title()))
        });
        Ok(quizzes)
    }

    async fn find_by_title(&self, title: &str) -> DomainResult<Option<Quiz>> {
        Ok(self
            .quizzes
            .read()
            .await
            .values()
            .find(|q| q.title() == title)
            .cloned())
    }

    async fn delete(&self, id: QuizId) -> DomainResult<()> {
        self.quizzes.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl QuizSessionRepository for InMemoryStore {
    async fn save(&self, session: &QuizSession) -> DomainResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.id(), detached(session, QuizSession::take_events));
        Ok(())
    }

    async fn find_by_id(&self, id: SessionId) -> DomainResult<Option<QuizSession>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn find_active(
        &self,
        user_id: &UserId,
        quiz_id: QuizId,
    ) -> DomainResult<Option<QuizSession>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| {
                s.user_id() == user_id
                    && s.quiz_id() == quiz_id
                    && s.status() == SessionStatus::Active
            })
            .cloned())
    }

    async fn find_completed_by_user_quiz_and_date(
        &self,
        user_id: &UserId,
        quiz_id: QuizId,
        start: i64,
        end: i64,
    ) -> DomainResult<Vec<QuizSession>> {
        let mut found: Vec<QuizSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| {
                s.user_id() == user_id
                    && s.quiz_id() == quiz_id
                    && s.status() == SessionStatus::Completed
                    && s.completed_at().is_some_and(|at| at >= start && at < end)
            })
            .cloned()
            .collect();
        found.sort_by_key(|s| s.completed_at());
        Ok(found)
    }
}

impl InMemoryStore {
    async fn completed_rows(&self, quiz_id: Option<QuizId>) -> Vec<(QuizId, ScoreRow)> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.status() == SessionStatus::Completed)
            .filter(|s| quiz_id.map_or(true, |id| s.quiz_id() == id))
            .filter_map(|s| {
                s.completed_at().map(|at| {
                    (
                        s.quiz_id(),
                        ScoreRow {
                            user_id: s.user_id().clone(),
                            score: s.score(),
                            achieved_at: at,
                        },
                    )
                })
            })
            .collect()
    }
}

#[async_trait]
impl LeaderboardRepository for InMemoryStore {
    async fn top_for_quiz(&self, quiz_id: QuizId, limit: usize) -> DomainResult<Vec<ScoreRow>> {
        let rows = self
            .completed_rows(Some(quiz_id))
            .await
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        Ok(best_per_player(rows, limit))
    }

    async fn top_global(&self, limit: usize) -> DomainResult<Vec<ScoreRow>> {
        let mut per_quiz: HashMap<(UserId, QuizId), ScoreRow> = HashMap::new();
        for (quiz_id, row) in self.completed_rows(None).await {
            let key = (row.user_id.clone(), quiz_id);
            match per_quiz.get(&key) {
                Some(best) if best.score >= row.score => {}
                _ => {
                    per_quiz.insert(key, row);
                }
            }
        }
        let mut totals: HashMap<UserId, ScoreRow> = HashMap::new();
        for row in per_quiz.into_values() {
            let total = totals.entry(row.user_id.clone()).or_insert(ScoreRow {
                user_id: row.user_id.clone(),
                score: 0,
                achieved_at: row.achieved_at,
            });
            total.score += row.score;
            total.achieved_at = total.achieved_at.max(row.achieved_at);
        }
        Ok(best_per_player(totals.into_values().collect(), limit))
    }
}

#[async_trait]
impl CategoryRepository for InMemoryStore {
    async fn save(&self, category: &Category) -> DomainResult<()> {
        self.categories
            .write()
            .await
            .insert(category.id, category.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: CategoryId) -> DomainResult<Option<Category>> {
        Ok(self.categories.read().await.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> DomainResult<Option<Category>> {
        Ok(self
            .categories
            .read()
            .await
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn find_all(&self) -> DomainResult<Vec<Category>> {
        let mut categories: Vec<Category> =
            self.categories.read().await.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }
}

#[async_trait]
impl TagRepository for InMemoryStore {
    async fn save(&self, tag: &Tag) -> DomainResult<()> {
        self.tags
            .write()
            .await
            .insert(tag.name().to_string(), tag.clone());
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> DomainResult<Option<Tag>> {
        Ok(self.tags.read().await.get(name).cloned())
    }

    async fn find_all(&self) -> DomainResult<Vec<Tag>> {
        let mut tags: Vec<Tag> = self.tags.read().await.values().cloned().collect();
        tags.sort();
        Ok(tags)
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn save(&self, user: &User) -> DomainResult<()> {
        self.users.write().await.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &UserId) -> DomainResult<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_by_telegram_username(&self, username: &str) -> DomainResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| {
                u.telegram_username
                    .as_deref()
                    .is_some_and(|name| name.eq_ignore_ascii_case(username))
            })
            .cloned())
    }

    async fn find_by_ids(&self, ids: &[UserId]) -> DomainResult<Vec<User>> {
        let users = self.users.read().await;
        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }
}

#[async_trait]
impl WalletRepository for InMemoryStore {
    async fn find(&self, player_id: &UserId) -> DomainResult<Option<Wallet>> {
        Ok(self.wallets.read().await.get(player_id).cloned())
    }

    async fn save(&self, wallet: &Wallet) -> DomainResult<()> {
        self.wallets
            .write()
            .await
            .insert(wallet.player_id.clone(), wallet.clone());
        Ok(())
    }
}

#[async_trait]
impl MarathonGameRepository for InMemoryStore {
    async fn save(&self, game: &MarathonGame) -> DomainResult<()> {
        self.marathon_games
            .write()
            .await
            .insert(game.id(), detached(game, MarathonGame::take_events));
        Ok(())
    }

    async fn find_by_id(&self, id: MarathonGameId) -> DomainResult<Option<MarathonGame>> {
        Ok(self.marathon_games.read().await.get(&id).cloned())
    }

    async fn find_active_by_player(
        &self,
        player_id: &UserId,
    ) -> DomainResult<Option<MarathonGame>> {
        Ok(self
            .marathon_games
            .read()
            .await
            .values()
            .filter(|g| g.player_id() == player_id && !g.status().is_terminal())
            .max_by_key(|g| g.started_at())
            .cloned())
    }

    async fn find_finished_between(
        &self,
        category: CategoryScope,
        start: i64,
        end: i64,
    ) -> DomainResult<Vec<MarathonGame>> {
        Ok(self
            .marathon_games
            .read()
            .await
            .values()
            .filter(|g| {
                g.category() == category
                    && g.status() != MarathonStatus::InProgress
                    && g.finished_at().is_some_and(|at| at >= start && at < end)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PersonalBestRepository for InMemoryStore {
    async fn save(&self, best: &PersonalBest) -> DomainResult<()> {
        self.personal_bests
            .write()
            .await
            .insert((best.player_id().clone(), best.category()), best.clone());
        Ok(())
    }

    async fn find_by_player_and_category(
        &self,
        player_id: &UserId,
        category: CategoryScope,
    ) -> DomainResult<Option<PersonalBest>> {
        Ok(self
            .personal_bests
            .read()
            .await
            .get(&(player_id.clone(), category))
            .cloned())
    }

    async fn find_by_player(&self, player_id: &UserId) -> DomainResult<Vec<PersonalBest>> {
        let mut bests: Vec<PersonalBest> = self
            .personal_bests
            .read()
            .await
            .values()
            .filter(|pb| pb.player_id() == player_id)
            .cloned()
            .collect();
        bests.sort_by(|a, b| a.rank_cmp(b));
        Ok(bests)
    }

    async fn find_top_by_category(
        &self,
        category: CategoryScope,
        limit: usize,
    ) -> DomainResult<Vec<PersonalBest>> {
        let mut bests: Vec<PersonalBest> = self
            .personal_bests
            .read()
            .await
            .values()
            .filter(|pb| pb.category() == category)
            .cloned()
            .collect();
        bests.sort_by(|a, b| a.rank_cmp(b));
        bests.truncate(limit);
        Ok(bests)
    }
}

#[async_trait]
impl DailyQuizRepository for InMemoryStore {
    async fn save(&self, quiz: &DailyQuiz) -> DomainResult<()> {
        let mut quizzes = self.daily_quizzes.write().await;
        if quizzes.get(&quiz.date).is_some_and(|existing| existing.id != quiz.id) {
            return Err(DomainError::conflict(format!(
                "daily quiz for {} already exists",
                quiz.date
            )));
        }
        quizzes.insert(quiz.date, quiz.clone());
        Ok(())
    }

    async fn find_by_date(&self, date: NaiveDate) -> DomainResult<Option<DailyQuiz>> {
        Ok(self.daily_quizzes.read().await.get(&date).cloned())
    }
}

#[async_trait]
impl DailyGameRepository for InMemoryStore {
    async fn save(&self, game: &DailyGame) -> DomainResult<()> {
        let mut games = self.daily_games.write().await;
        let taken = games.values().any(|g| {
            g.id() != game.id()
                && g.player_id() == game.player_id()
                && g.date() == game.date()
                && g.attempt_number() == game.attempt_number()
        });
        if taken {
            return Err(DomainError::conflict(format!(
                "attempt {} of {} already exists",
                game.attempt_number(),
                game.date()
            )));
        }
        games.insert(game.id(), detached(game, DailyGame::take_events));
        Ok(())
    }

    async fn find_by_id(&self, id: DailyGameId) -> DomainResult<Option<DailyGame>> {
        Ok(self.daily_games.read().await.get(&id).cloned())
    }

    async fn find_by_player_and_date(
        &self,
        player_id: &UserId,
        date: NaiveDate,
    ) -> DomainResult<Vec<DailyGame>> {
        let mut games: Vec<DailyGame> = self
            .daily_games
            .read()
            .await
            .values()
            .filter(|g| g.player_id() == player_id && g.date() == date)
            .cloned()
            .collect();
        games.sort_by_key(|g| g.attempt_number());
        Ok(games)
    }

    async fn find_by_date(&self, date: NaiveDate) -> DomainResult<Vec<DailyGame>> {
        Ok(self
            .daily_games
            .read()
            .await
            .values()
            .filter(|g| g.date() == date)
            .cloned()
            .collect())
    }

    async fn find_last_completed_first_attempt(
        &self,
        player_id: &UserId,
        before: NaiveDate,
    ) -> DomainResult<Option<DailyGame>> {
        Ok(self
            .daily_games
            .read()
            .await
            .values()
            .filter(|g| {
                g.player_id() == player_id
                    && g.attempt_number() == 1
                    && g.status() == DailyGameStatus::Completed
                    && g.date() < before
            })
            .max_by_key(|g| g.date())
            .cloned())
    }
}

#[async_trait]
impl DuelMatchRepository for InMemoryStore {
    async fn save(&self, duel: &DuelMatch) -> DomainResult<()> {
        self.duel_matches
            .write()
            .await
            .insert(duel.id(), detached(duel, DuelMatch::take_events));
        Ok(())
    }

    async fn find_by_id(&self, id: DuelMatchId) -> DomainResult<Option<DuelMatch>> {
        Ok(self.duel_matches.read().await.get(&id).cloned())
    }

    async fn find_active_by_player(&self, player_id: &UserId) -> DomainResult<Option<DuelMatch>> {
        Ok(self
            .duel_matches
            .read()
            .await
            .values()
            .filter(|m| m.is_participant(player_id) && !m.status().is_terminal())
            .max_by_key(|m| m.created_at())
            .cloned())
    }

    async fn find_by_player(
        &self,
        player_id: &UserId,
        limit: usize,
    ) -> DomainResult<Vec<DuelMatch>> {
        let mut matches: Vec<DuelMatch> = self
            .duel_matches
            .read()
            .await
            .values()
            .filter(|m| m.is_participant(player_id))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        matches.truncate(limit);
        Ok(matches)
    }
}

#[async_trait]
impl ChallengeRepository for InMemoryStore {
    async fn save(&self, challenge: &Challenge) -> DomainResult<()> {
        self.challenges
            .write()
            .await
            .insert(challenge.id(), detached(challenge, Challenge::take_events));
        Ok(())
    }

    async fn find_by_id(&self, id: ChallengeId) -> DomainResult<Option<Challenge>> {
        Ok(self.challenges.read().await.get(&id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> DomainResult<Option<Challenge>> {
        Ok(self
            .challenges
            .read()
            .await
            .values()
            .find(|c| c.token() == token)
            .cloned())
    }

    async fn find_pending_for(&self, player_id: &UserId) -> DomainResult<Vec<Challenge>> {
        let mut pending: Vec<Challenge> = self
            .challenges
            .read()
            .await
            .values()
            .filter(|c| {
                c.status() == ChallengeStatus::Pending && c.challenged_id() == Some(player_id)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.created_at());
        Ok(pending)
    }

    async fn find_pending_rematch(
        &self,
        match_id: DuelMatchId,
        challenger_id: &UserId,
    ) -> DomainResult<Option<Challenge>> {
        Ok(self
            .challenges
            .read()
            .await
            .values()
            .find(|c| {
                c.status() == ChallengeStatus::Pending
                    && c.rematch_of() == Some(match_id)
                    && c.challenger_id() == challenger_id
            })
            .cloned())
    }
}

#[async_trait]
impl PlayerRatingRepository for InMemoryStore {
    async fn find(&self, player_id: &UserId) -> DomainResult<Option<PlayerRating>> {
        Ok(self.ratings.read().await.get(player_id).cloned())
    }

    async fn save(&self, rating: &PlayerRating) -> DomainResult<()> {
        self.ratings
            .write()
            .await
            .insert(rating.player_id.clone(), rating.clone());
        Ok(())
    }

    async fn find_top(&self, limit: usize) -> DomainResult<Vec<PlayerRating>> {
        let mut ratings: Vec<PlayerRating> = self.ratings.read().await.values().cloned().collect();
        ratings.sort_by(rating_order);
        ratings.truncate(limit);
        Ok(ratings)
    }

    async fn find_top_in_season(
        &self,
        season_id: &str,
        limit: usize,
    ) -> DomainResult<Vec<PlayerRating>> {
        let mut ratings: Vec<PlayerRating> = self
            .ratings
            .read()
            .await
            .values()
            .filter(|r| r.season_id == season_id)
            .cloned()
            .collect();
        ratings.sort_by(rating_order);
        ratings.truncate(limit);
        Ok(ratings)
    }

    async fn rank_in_season(
        &self,
        player_id: &UserId,
        season_id: &str,
    ) -> DomainResult<Option<u32>> {
        let ratings = self.ratings.read().await;
        let Some(mine) = ratings.get(player_id).filter(|r| r.season_id == season_id) else {
            return Ok(None);
        };
        let ahead = ratings
            .values()
            .filter(|r| r.season_id == season_id && rating_order(r, mine) == Ordering::Less)
            .count();
        Ok(Some(ahead as u32 + 1))
    }
}

impl InMemoryStore {
    async fn referral_rows(&self) -> Vec<ReferralRow> {
        let mut rows: HashMap<UserId, ReferralRow> = HashMap::new();
        for referral in self.referrals.read().await.values() {
            let row = rows
                .entry(referral.inviter_id().clone())
                .or_insert_with(|| ReferralRow {
                    inviter_id: referral.inviter_id().clone(),
                    total: 0,
                    active: 0,
                });
            row.total += 1;
            if referral.is_active() {
                row.active += 1;
            }
        }
        rank_referral_rows(rows.into_values().collect())
    }
}

#[async_trait]
impl ReferralRepository for InMemoryStore {
    async fn save(&self, referral: &Referral) -> DomainResult<()> {
        let mut referrals = self.referrals.write().await;
        if referrals
            .values()
            .any(|r| r.invitee_id() == referral.invitee_id() && r.id() != referral.id())
        {
            return Err(DomainError::conflict(format!(
                "{} was already referred",
                referral.invitee_id()
            )));
        }
        referrals.insert(referral.id(), detached(referral, Referral::take_events));
        Ok(())
    }

    async fn find_by_id(&self, id: ReferralId) -> DomainResult<Option<Referral>> {
        Ok(self.referrals.read().await.get(&id).cloned())
    }

    async fn find_by_invitee(&self, invitee_id: &UserId) -> DomainResult<Option<Referral>> {
        Ok(self
            .referrals
            .read()
            .await
            .values()
            .find(|r| r.invitee_id() == invitee_id)
            .cloned())
    }

    async fn find_by_inviter(&self, inviter_id: &UserId) -> DomainResult<Vec<Referral>> {
        let mut found: Vec<Referral> = self
            .referrals
            .read()
            .await
            .values()
            .filter(|r| r.inviter_id() == inviter_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.created_at(), r.id()));
        Ok(found)
    }

    async fn leaderboard(&self, limit: usize) -> DomainResult<Vec<ReferralRow>> {
        let mut rows = self.referral_rows().await;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn rank_of(&self, inviter_id: &UserId) -> DomainResult<Option<u32>> {
        Ok(self
            .referral_rows()
            .await
            .iter()
            .position(|row| row.inviter_id == *inviter_id)
            .map(|i| i as u32 + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::fixtures;
    use crate::models::QuestionDifficulty;

    #[tokio::test]
    async fn test_random_questions_respect_filter_and_count() {
        let store = InMemoryStore::default();
        let easy: Vec<Question> = (0..5)
            .map(|_| fixtures::question(QuestionDifficulty::Easy))
            .collect();
        let hard = fixtures::question(QuestionDifficulty::Hard);
        QuestionRepository::save_all(&store, &easy).await.unwrap();
        QuestionRepository::save(&store, &hard).await.unwrap();

        let filter = QuestionFilter::new().with_difficulty(QuestionDifficulty::Easy);
        assert_eq!(store.count_by_filter(&filter).await.unwrap(), 5);

        let picked = store.find_random_questions(&filter, 3).await.unwrap();
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().all(|q| q.difficulty() == QuestionDifficulty::Easy));

        let excluded = filter.excluding(easy.iter().map(|q| q.id()));
        assert!(store.find_random_questions(&excluded, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_ids_keeps_requested_order() {
        let store = InMemoryStore::default();
        let a = fixtures::question(QuestionDifficulty::Easy);
        let b = fixtures::question(QuestionDifficulty::Medium);
        QuestionRepository::save_all(&store, &[a.clone(), b.clone()])
            .await
            .unwrap();

        let found = QuestionRepository::find_by_ids(&store, &[b.id(), QuestionId::new(), a.id()])
            .await
            .unwrap();
        assert_eq!(found.iter().map(|q| q.id()).collect::<Vec<_>>(), vec![b.id(), a.id()]);
    }

    #[tokio::test]
    async fn test_active_marathon_lookup_skips_terminal_games() {
        let store = InMemoryStore::default();
        let player = UserId::from_platform(9);
        let mut finished = MarathonGame::new(player.clone(), CategoryScope::All, None, 10).unwrap();
        finished.abandon(20).unwrap();
        MarathonGameRepository::save(&store, &finished).await.unwrap();
        assert!(MarathonGameRepository::find_active_by_player(&store, &player)
            .await
            .unwrap()
            .is_none());

        let live = MarathonGame::new(player.clone(), CategoryScope::All, None, 30).unwrap();
        MarathonGameRepository::save(&store, &live).await.unwrap();
        let active = MarathonGameRepository::find_active_by_player(&store, &player)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id(), live.id());
    }

    fn daily_ids() -> Vec<QuestionId> {
        (0..10).map(|_| QuestionId::new()).collect()
    }

    #[tokio::test]
    async fn test_second_daily_quiz_for_a_date_is_rejected() {
        let store = InMemoryStore::default();
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let first = DailyQuiz::new(date, daily_ids(), 10).unwrap();
        let second = DailyQuiz::new(date, daily_ids(), 20).unwrap();

        DailyQuizRepository::save(&store, &first).await.unwrap();
        DailyQuizRepository::save(&store, &first).await.unwrap();
        let err = DailyQuizRepository::save(&store, &second).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let kept = DailyQuizRepository::find_by_date(&store, date).await.unwrap().unwrap();
        assert_eq!(kept.id, first.id);
    }

    #[tokio::test]
    async fn test_duplicate_daily_attempt_is_rejected() {
        let store = InMemoryStore::default();
        let player = UserId::from_platform(5);
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let quiz = DailyQuiz::new(date, daily_ids(), 10).unwrap();
        let streak = crate::models::StreakState::default();

        let first = DailyGame::start(player.clone(), &quiz, streak, 10).unwrap();
        let twin = DailyGame::start(player.clone(), &quiz, streak, 11).unwrap();
        DailyGameRepository::save(&store, &first).await.unwrap();
        DailyGameRepository::save(&store, &first).await.unwrap();
        let err = DailyGameRepository::save(&store, &twin).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let other = DailyGame::start(UserId::from_platform(6), &quiz, streak, 12).unwrap();
        DailyGameRepository::save(&store, &other).await.unwrap();
        let games = DailyGameRepository::find_by_player_and_date(&store, &player, date)
            .await
            .unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].id(), first.id());
    }

    #[tokio::test]
    async fn test_season_table_only_ranks_current_season() {
        let store = InMemoryStore::default();
        let rating = |id: i64, mmr: i32, season: &str| {
            let mut r = PlayerRating::new(UserId::from_platform(id), 0);
            r.mmr = mmr;
            r.season_id = season.to_string();
            r
        };
        for r in [
            rating(1, 1500, "2024-03"),
            rating(2, 1900, "2024-02"),
            rating(3, 1200, "2024-03"),
        ] {
            PlayerRatingRepository::save(&store, &r).await.unwrap();
        }

        let top = store.find_top_in_season("2024-03", 10).await.unwrap();
        let ids: Vec<_> = top.iter().map(|r| r.player_id.clone()).collect();
        assert_eq!(ids, vec![UserId::from_platform(1), UserId::from_platform(3)]);
        assert_eq!(
            store.rank_in_season(&UserId::from_platform(3), "2024-03").await.unwrap(),
            Some(2)
        );
        assert_eq!(
            store.rank_in_season(&UserId::from_platform(2), "2024-03").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_referral_leaderboard_counts_per_inviter() {
        let store = InMemoryStore::default();
        let (alice, bob) = (UserId::from_platform(1), UserId::from_platform(2));
        for (inviter, invitee, active) in [(&alice, 10, true), (&bob, 11, false), (&bob, 12, false)] {
            let mut referral = Referral::new(inviter.clone(), UserId::from_platform(invitee), 0).unwrap();
            if active {
                referral.update_progress(5, crate::models::League::Bronze, 1);
            }
            ReferralRepository::save(&store, &referral).await.unwrap();
        }

        let rows = store.leaderboard(10).await.unwrap();
        assert_eq!(rows[0], ReferralRow { inviter_id: bob.clone(), total: 2, active: 0 });
        assert_eq!(rows[1], ReferralRow { inviter_id: alice.clone(), total: 1, active: 1 });
        assert_eq!(store.rank_of(&alice).await.unwrap(), Some(2));
        assert_eq!(store.rank_of(&UserId::from_platform(3)).await.unwrap(), None);
        assert_eq!(store.find_by_inviter(&bob).await.unwrap().len(), 2);

        let again = Referral::new(alice, UserId::from_platform(12), 5).unwrap();
        assert!(matches!(
            ReferralRepository::save(&store, &again).await,
            Err(DomainError::Conflict(_))
        ));
    }
}
