use async_trait::async_trait;
use chrono::NaiveDate;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};

use super::{
    CategoryRepository, ChallengeRepository, DailyGameRepository, DailyQuizRepository,
    DuelMatchRepository, LeaderboardRepository, MarathonGameRepository, PersonalBestRepository,
    PlayerRatingRepository, QuestionRepository, QuizRepository, QuizSessionRepository,
    ReferralRepository, ReferralRow, ScoreRow, TagRepository, UserRepository, WalletRepository,
};
use crate::error::{DomainError, DomainResult};
use crate::metrics::track_db_operation;
use crate::models::{
    Category, CategoryId, CategoryScope, Challenge, ChallengeId, DailyGame, DailyGameId,
    DailyQuiz, DuelMatch, DuelMatchId, MarathonGame, MarathonGameId, PersonalBest, PlayerRating,
    Question, QuestionFilter, QuestionId, Quiz, QuizId, QuizSession, Referral, ReferralId,
    SessionId, Tag, User, UserId, Wallet,
};
use crate::utils::retry::{retry_async_when, RetryConfig};

const QUESTIONS: &str = "questions";
const QUIZZES: &str = "quizzes";
const SESSIONS: &str = "quiz_sessions";
const CATEGORIES: &str = "categories";
const TAGS: &str = "tags";
const USERS: &str = "users";
const WALLETS: &str = "wallets";
const MARATHON_GAMES: &str = "marathon_games";
const PERSONAL_BESTS: &str = "personal_bests";
const DAILY_QUIZZES: &str = "daily_quizzes";
const DAILY_GAMES: &str = "daily_games";
const DUEL_MATCHES: &str = "duel_matches";
const CHALLENGES: &str = "duel_challenges";
const RATINGS: &str = "player_ratings";
const REFERRALS: &str = "duel_referrals";

/// MongoDB-backed implementation of every repository, one collection per aggregate.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
    retry: RetryConfig,
}

fn bson_i64(value: Option<&Bson>) -> i64 {
    match value {
        Some(Bson::Int32(v)) => i64::from(*v),
        Some(Bson::Int64(v)) => *v,
        Some(Bson::Double(v)) => *v as i64,
        _ => 0,
    }
}

fn score_row(document: &Document) -> DomainResult<ScoreRow> {
    let user_id = document
        .get_str("_id")
        .map_err(|e| DomainError::internal(format!("leaderboard row without user: {}", e)))?;
    Ok(ScoreRow {
        user_id: UserId::parse(user_id)?,
        score: bson_i64(document.get("score")).max(0) as u32,
        achieved_at: bson_i64(document.get("achieved_at")),
    })
}

fn referral_row(document: &Document) -> DomainResult<ReferralRow> {
    let inviter_id = document
        .get_str("_id")
        .map_err(|e| DomainError::internal(format!("referral row without inviter: {}", e)))?;
    Ok(ReferralRow {
        inviter_id: UserId::parse(inviter_id)?,
        total: bson_i64(document.get("total")).max(0) as u32,
        active: bson_i64(document.get("active")).max(0) as u32,
    })
}

fn question_filter_document(filter: &QuestionFilter) -> Document {
    let mut query = Document::new();
    if let Some(difficulty) = filter.difficulty {
        query.insert("difficulty", difficulty.as_str());
    }
    if let Some(category_id) = filter.category_id {
        query.insert("category_id", category_id.to_string());
    }
    if !filter.exclude_ids.is_empty() {
        let excluded: Vec<String> = filter.exclude_ids.iter().map(|id| id.to_string()).collect();
        query.insert("_id", doc! { "$nin": excluded });
    }
    let mut points = Document::new();
    if let Some(min) = filter.min_points {
        points.insert("$gte", i64::from(min));
    }
    if let Some(max) = filter.max_points {
        points.insert("$lte", i64::from(max));
    }
    if !points.is_empty() {
        query.insert("points", points);
    }
    query
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            retry: RetryConfig::default(),
        }
    }

    pub async fn ping(&self) -> DomainResult<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    /// Creates the unique and lookup indexes the repositories rely on.
    pub async fn ensure_indexes(&self) -> DomainResult<()> {
        let unique = || Some(IndexOptions::builder().unique(true).build());
        let indexes: Vec<(&str, Document, Option<IndexOptions>)> = vec![
            (PERSONAL_BESTS, doc! { "player_id": 1, "category": 1 }, unique()),
            (PERSONAL_BESTS, doc! { "category": 1, "best_streak": -1, "best_score": -1 }, None),
            (DAILY_QUIZZES, doc! { "date": 1 }, unique()),
            (DAILY_GAMES, doc! { "player_id": 1, "date": 1, "attempt_number": 1 }, unique()),
            (MARATHON_GAMES, doc! { "player_id": 1, "status": 1 }, None),
            (MARATHON_GAMES, doc! { "category": 1, "finished_at": 1 }, None),
            (DUEL_MATCHES, doc! { "player1_id": 1, "status": 1 }, None),
            (DUEL_MATCHES, doc! { "player2_id": 1, "status": 1 }, None),
            (CHALLENGES, doc! { "token": 1 }, unique()),
            (SESSIONS, doc! { "quiz_id": 1, "status": 1, "score": -1 }, None),
            (QUESTIONS, doc! { "difficulty": 1, "category_id": 1 }, None),
            (USERS, doc! { "telegram_username": 1 }, None),
            (RATINGS, doc! { "mmr": -1 }, None),
            (RATINGS, doc! { "season_id": 1, "mmr": -1, "wins": -1 }, None),
            (REFERRALS, doc! { "invitee_id": 1 }, unique()),
            (REFERRALS, doc! { "inviter_id": 1, "created_at": 1 }, None),
        ];
        for (collection, keys, options) in indexes {
            let model = IndexModel::builder().keys(keys).options(options).build();
            self.db
                .collection::<Document>(collection)
                .create_index(model)
                .await?;
        }
        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }

    fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection::<T>(name)
    }

    async fn upsert<T>(&self, name: &'static str, id: String, value: &T) -> DomainResult<()>
    where
        T: Serialize + Send + Sync,
    {
        let collection = self.collection::<T>(name);
        track_db_operation(
            "upsert",
            name,
            retry_async_when(self.retry.clone(), DomainError::is_retryable, || {
                let collection = collection.clone();
                let id = id.clone();
                async move {
                    collection
                        .replace_one(doc! { "_id": id }, value)
                        .upsert(true)
                        .await
                        .map(|_| ())
                        .map_err(DomainError::from)
                }
            }),
        )
        .await
    }

    async fn find_one<T>(&self, name: &'static str, filter: Document) -> DomainResult<Option<T>>
    where
        T: DeserializeOwned + Send + Sync + Unpin,
    {
        let collection = self.collection::<T>(name);
        track_db_operation(
            "find_one",
            name,
            retry_async_when(self.retry.clone(), DomainError::is_retryable, || {
                let collection = collection.clone();
                let filter = filter.clone();
                async move { collection.find_one(filter).await.map_err(DomainError::from) }
            }),
        )
        .await
    }

    async fn find_many<T>(
        &self,
        name: &'static str,
        filter: Document,
        sort: Option<Document>,
        limit: Option<usize>,
    ) -> DomainResult<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync + Unpin,
    {
        let collection = self.collection::<T>(name);
        track_db_operation(
            "find",
            name,
            retry_async_when(self.retry.clone(), DomainError::is_retryable, || {
                let collection = collection.clone();
                let filter = filter.clone();
                let sort = sort.clone();
                async move {
                    let mut find = collection.find(filter);
                    if let Some(sort) = sort {
                        find = find.sort(sort);
                    }
                    if let Some(limit) = limit {
                        find = find.limit(limit as i64);
                    }
                    let cursor = find.await?;
                    cursor.try_collect().await.map_err(DomainError::from)
                }
            }),
        )
        .await
    }

    async fn aggregate(
        &self,
        name: &'static str,
        pipeline: Vec<Document>,
    ) -> DomainResult<Vec<Document>> {
        let collection = self.collection::<Document>(name);
        track_db_operation(
            "aggregate",
            name,
            retry_async_when(self.retry.clone(), DomainError::is_retryable, || {
                let collection = collection.clone();
                let pipeline = pipeline.clone();
                async move {
                    let cursor = collection.aggregate(pipeline).await?;
                    cursor.try_collect().await.map_err(DomainError::from)
                }
            }),
        )
        .await
    }

    async fn count(&self, name: &'static str, filter: Document) -> DomainResult<u64> {
        let collection = self.collection::<Document>(name);
        track_db_operation(
            "count",
            name,
            retry_async_when(self.retry.clone(), DomainError::is_retryable, || {
                let collection = collection.clone();
                let filter = filter.clone();
                async move {
                    collection
                        .count_documents(filter)
                        .await
                        .map_err(DomainError::from)
                }
            }),
        )
        .await
    }

    async fn referral_rows(&self, limit: Option<usize>) -> DomainResult<Vec<ReferralRow>> {
        let mut pipeline = vec![
            doc! { "$group": {
                "_id": "$inviter_id",
                "total": { "$sum": 1 },
                "active": { "$sum": {
                    "$cond": [{ "$in": ["played_5_duels", "$reached"] }, 1, 0]
                } },
            } },
            doc! { "$sort": { "total": -1, "active": -1, "_id": 1 } },
        ];
        if let Some(limit) = limit {
            pipeline.push(doc! { "$limit": limit as i64 });
        }
        self.aggregate(REFERRALS, pipeline)
            .await?
            .iter()
            .map(referral_row)
            .collect()
    }

    async fn delete_by_id(&self, name: &'static str, id: String) -> DomainResult<()> {
        let collection = self.collection::<Document>(name);
        track_db_operation(
            "delete",
            name,
            retry_async_when(self.retry.clone(), DomainError::is_retryable, || {
                let collection = collection.clone();
                let id = id.clone();
                async move {
                    collection
                        .delete_one(doc! { "_id": id })
                        .await
                        .map(|_| ())
                        .map_err(DomainError::from)
                }
            }),
        )
        .await
    }
}

#[async_trait]
impl QuestionRepository for MongoStore {
    async fn find_by_id(&self, id: QuestionId) -> DomainResult<Option<Question>> {
        self.find_one(QUESTIONS, doc! { "_id": id.to_string() }).await
    }

    async fn find_by_ids(&self, ids: &[QuestionId]) -> DomainResult<Vec<Question>> {
        let keys: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let found: Vec<Question> = self
            .find_many(QUESTIONS, doc! { "_id": { "$in": keys } }, None, None)
            .await?;
        Ok(ids
            .iter()
            .filter_map(|id| found.iter().find(|q| &q.id() == id).cloned())
            .collect())
    }

    async fn find_by_filter(&self, filter: &QuestionFilter) -> DomainResult<Vec<Question>> {
        self.find_many(
            QUESTIONS,
            question_filter_document(filter),
            Some(doc! { "_id": 1 }),
            filter.limit,
        )
        .await
    }

    async fn find_random_questions(
        &self,
        filter: &QuestionFilter,
        count: usize,
    ) -> DomainResult<Vec<Question>> {
        let pipeline = vec![
            doc! { "$match": question_filter_document(filter) },
            doc! { "$sample": { "size": count as i64 } },
        ];
        self.aggregate(QUESTIONS, pipeline)
            .await?
            .into_iter()
            .map(|document| mongodb::bson::from_document(document).map_err(DomainError::from))
            .collect()
    }

    async fn count_by_filter(&self, filter: &QuestionFilter) -> DomainResult<u64> {
        let collection = self.collection::<Document>(QUESTIONS);
        let query = question_filter_document(filter);
        track_db_operation(
            "count",
            QUESTIONS,
            retry_async_when(self.retry.clone(), DomainError::is_retryable, || {
                let collection = collection.clone();
                let query = query.clone();
                async move { collection.count_documents(query).await.map_err(DomainError::from) }
            }),
        )
        .await
    }

    async fn save(&self, question: &Question) -> DomainResult<()> {
        self.upsert(QUESTIONS, question.id().to_string(), question).await
    }

    async fn save_all(&self, questions: &[Question]) -> DomainResult<()> {
        for question in questions {
            QuestionRepository::save(self, question).await?;
        }
        Ok(())
    }

    async fn delete(&self, id: QuestionId) -> DomainResult<()> {
        self.delete_by_id(QUESTIONS, id.to_string()).await
    }
}

#[async_trait]
impl QuizRepository for MongoStore {
    async fn save(&self, quiz: &Quiz) -> DomainResult<()> {
        self.upsert(QUIZZES, quiz.id().to_string(), quiz).await
    }

    async fn find_by_id(&self, id: QuizId) -> DomainResult<Option<Quiz>> {
        self.find_one(QUIZZES, doc! { "_id": id.to_string() }).await
    }

    async fn find_all(&self) -> DomainResult<Vec<Quiz>> {
        self.find_many(QUIZZES, doc! {}, Some(doc! { "created_at": 1, "title": 1 }), None)
            .await
    }

    async fn find_by_title(&self, title: &str) -> DomainResult<Option<Quiz>> {
        self.find_one(QUIZZES, doc! { "title": title }).await
    }

    async fn delete(&self, id: QuizId) -> DomainResult<()> {
        self.delete_by_id(QUIZZES, id.to_string()).await
    }
}

#[async_trait]
impl QuizSessionRepository for MongoStore {
    async fn save(&self, session: &QuizSession) -> DomainResult<()> {
        self.upsert(SESSIONS, session.id().to_string(), session).await
    }

    async fn find_by_id(&self, id: SessionId) -> DomainResult<Option<QuizSession>> {
        self.find_one(SESSIONS, doc! { "_id": id.to_string() }).await
    }

    async fn find_active(
        &self,
        user_id: &UserId,
        quiz_id: QuizId,
    ) -> DomainResult<Option<QuizSession>> {
        self.find_one(
            SESSIONS,
            doc! {
                "user_id": user_id.as_str(),
                "quiz_id": quiz_id.to_string(),
                "status": "active",
            },
        )
        .await
    }

    async fn find_completed_by_user_quiz_and_date(
        &self,
        user_id: &UserId,
        quiz_id: QuizId,
        start: i64,
        end: i64,
    ) -> DomainResult<Vec<QuizSession>> {
        self.find_many(
            SESSIONS,
            doc! {
                "user_id": user_id.as_str(),
                "quiz_id": quiz_id.to_string(),
                "status": "completed",
                "completed_at": { "$gte": start, "$lt": end },
            },
            Some(doc! { "completed_at": 1 }),
            None,
        )
        .await
    }
}

#[async_trait]
impl LeaderboardRepository for MongoStore {
    async fn top_for_quiz(&self, quiz_id: QuizId, limit: usize) -> DomainResult<Vec<ScoreRow>> {
        let pipeline = vec![
            doc! { "$match": { "quiz_id": quiz_id.to_string(), "status": "completed" } },
            doc! { "$sort": { "score": -1, "completed_at": 1 } },
            doc! { "$group": {
                "_id": "$user_id",
                "score": { "$first": "$score" },
                "achieved_at": { "$first": "$completed_at" },
            } },
            doc! { "$sort": { "score": -1, "achieved_at": 1, "_id": 1 } },
            doc! { "$limit": limit as i64 },
        ];
        self.aggregate(SESSIONS, pipeline)
            .await?
            .iter()
            .map(score_row)
            .collect()
    }

    async fn top_global(&self, limit: usize) -> DomainResult<Vec<ScoreRow>> {
        let pipeline = vec![
            doc! { "$match": { "status": "completed" } },
            doc! { "$sort": { "score": -1, "completed_at": 1 } },
            doc! { "$group": {
                "_id": { "user": "$user_id", "quiz": "$quiz_id" },
                "score": { "$first": "$score" },
                "achieved_at": { "$first": "$completed_at" },
            } },
            doc! { "$group": {
                "_id": "$_id.user",
                "score": { "$sum": "$score" },
                "achieved_at": { "$max": "$achieved_at" },
            } },
            doc! { "$sort": { "score": -1, "achieved_at": 1, "_id": 1 } },
            doc! { "$limit": limit as i64 },
        ];
        self.aggregate(SESSIONS, pipeline)
            .await?
            .iter()
            .map(score_row)
            .collect()
    }
}

#[async_trait]
impl CategoryRepository for MongoStore {
    async fn save(&self, category: &Category) -> DomainResult<()> {
        self.upsert(CATEGORIES, category.id.to_string(), category).await
    }

    async fn find_by_id(&self, id: CategoryId) -> DomainResult<Option<Category>> {
        self.find_one(CATEGORIES, doc! { "_id": id.to_string() }).await
    }

    async fn find_by_name(&self, name: &str) -> DomainResult<Option<Category>> {
        let pattern = format!("^{}$", regex::escape(name));
        self.find_one(
            CATEGORIES,
            doc! { "name": { "$regex": pattern, "$options": "i" } },
        )
        .await
    }

    async fn find_all(&self) -> DomainResult<Vec<Category>> {
        self.find_many(CATEGORIES, doc! {}, Some(doc! { "name": 1 }), None)
            .await
    }
}

#[async_trait]
impl TagRepository for MongoStore {
    async fn save(&self, tag: &Tag) -> DomainResult<()> {
        self.upsert(TAGS, tag.name().to_string(), tag).await
    }

    async fn find_by_name(&self, name: &str) -> DomainResult<Option<Tag>> {
        self.find_one(TAGS, doc! { "_id": name }).await
    }

    async fn find_all(&self) -> DomainResult<Vec<Tag>> {
        self.find_many(TAGS, doc! {}, Some(doc! { "_id": 1 }), None).await
    }
}

#[async_trait]
impl UserRepository for MongoStore {
    async fn save(&self, user: &User) -> DomainResult<()> {
        self.upsert(USERS, user.id.to_string(), user).await
    }

    async fn find_by_id(&self, id: &UserId) -> DomainResult<Option<User>> {
        self.find_one(USERS, doc! { "_id": id.as_str() }).await
    }

    async fn find_by_telegram_username(&self, username: &str) -> DomainResult<Option<User>> {
        let pattern = format!("^{}$", regex::escape(username));
        self.find_one(
            USERS,
            doc! { "telegram_username": { "$regex": pattern, "$options": "i" } },
        )
        .await
    }

    async fn find_by_ids(&self, ids: &[UserId]) -> DomainResult<Vec<User>> {
        let keys: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        self.find_many(USERS, doc! { "_id": { "$in": keys } }, None, None)
            .await
    }
}

#[async_trait]
impl WalletRepository for MongoStore {
    async fn find(&self, player_id: &UserId) -> DomainResult<Option<Wallet>> {
        self.find_one(WALLETS, doc! { "_id": player_id.as_str() }).await
    }

    async fn save(&self, wallet: &Wallet) -> DomainResult<()> {
        self.upsert(WALLETS, wallet.player_id.to_string(), wallet).await
    }
}

#[async_trait]
impl MarathonGameRepository for MongoStore {
    async fn save(&self, game: &MarathonGame) -> DomainResult<()> {
        self.upsert(MARATHON_GAMES, game.id().to_string(), game).await
    }

    async fn find_by_id(&self, id: MarathonGameId) -> DomainResult<Option<MarathonGame>> {
        self.find_one(MARATHON_GAMES, doc! { "_id": id.to_string() })
            .await
    }

    async fn find_active_by_player(
        &self,
        player_id: &UserId,
    ) -> DomainResult<Option<MarathonGame>> {
        let games: Vec<MarathonGame> = self
            .find_many(
                MARATHON_GAMES,
                doc! {
                    "player_id": player_id.as_str(),
                    "status": { "$in": ["in_progress", "game_over"] },
                },
                Some(doc! { "started_at": -1 }),
                Some(1),
            )
            .await?;
        Ok(games.into_iter().next())
    }

    async fn find_finished_between(
        &self,
        category: CategoryScope,
        start: i64,
        end: i64,
    ) -> DomainResult<Vec<MarathonGame>> {
        self.find_many(
            MARATHON_GAMES,
            doc! {
                "category": category.to_string(),
                "status": { "$ne": "in_progress" },
                "finished_at": { "$gte": start, "$lt": end },
            },
            None,
            None,
        )
        .await
    }
}

#[async_trait]
impl PersonalBestRepository for MongoStore {
    async fn save(&self, best: &PersonalBest) -> DomainResult<()> {
        self.upsert(PERSONAL_BESTS, best.id().to_string(), best).await
    }

    async fn find_by_player_and_category(
        &self,
        player_id: &UserId,
        category: CategoryScope,
    ) -> DomainResult<Option<PersonalBest>> {
        self.find_one(
            PERSONAL_BESTS,
            doc! { "player_id": player_id.as_str(), "category": category.to_string() },
        )
        .await
    }

    async fn find_by_player(&self, player_id: &UserId) -> DomainResult<Vec<PersonalBest>> {
        self.find_many(
            PERSONAL_BESTS,
            doc! { "player_id": player_id.as_str() },
            Some(doc! { "best_streak": -1, "best_score": -1 }),
            None,
        )
        .await
    }

    async fn find_top_by_category(
        &self,
        category: CategoryScope,
        limit: usize,
    ) -> DomainResult<Vec<PersonalBest>> {
        self.find_many(
            PERSONAL_BESTS,
            doc! { "category": category.to_string() },
            Some(doc! { "best_streak": -1, "best_score": -1, "achieved_at": 1 }),
            Some(limit),
        )
        .await
    }
}

#[async_trait]
impl DailyQuizRepository for MongoStore {
    async fn save(&self, quiz: &DailyQuiz) -> DomainResult<()> {
        self.upsert(DAILY_QUIZZES, quiz.id.to_string(), quiz).await
    }

    async fn find_by_date(&self, date: NaiveDate) -> DomainResult<Option<DailyQuiz>> {
        self.find_one(DAILY_QUIZZES, doc! { "date": date.to_string() })
            .await
    }
}

#[async_trait]
impl DailyGameRepository for MongoStore {
    async fn save(&self, game: &DailyGame) -> DomainResult<()> {
        self.upsert(DAILY_GAMES, game.id().to_string(), game).await
    }

    async fn find_by_id(&self, id: DailyGameId) -> DomainResult<Option<DailyGame>> {
        self.find_one(DAILY_GAMES, doc! { "_id": id.to_string() }).await
    }

    async fn find_by_player_and_date(
        &self,
        player_id: &UserId,
        date: NaiveDate,
    ) -> DomainResult<Vec<DailyGame>> {
        self.find_many(
            DAILY_GAMES,
            doc! { "player_id": player_id.as_str(), "date": date.to_string() },
            Some(doc! { "attempt_number": 1 }),
            None,
        )
        .await
    }

    async fn find_by_date(&self, date: NaiveDate) -> DomainResult<Vec<DailyGame>> {
        self.find_many(DAILY_GAMES, doc! { "date": date.to_string() }, None, None)
            .await
    }

    async fn find_last_completed_first_attempt(
        &self,
        player_id: &UserId,
        before: NaiveDate,
    ) -> DomainResult<Option<DailyGame>> {
        // ISO dates compare lexicographically
        let games: Vec<DailyGame> = self
            .find_many(
                DAILY_GAMES,
                doc! {
                    "player_id": player_id.as_str(),
                    "attempt_number": 1,
                    "status": "completed",
                    "date": { "$lt": before.to_string() },
                },
                Some(doc! { "date": -1 }),
                Some(1),
            )
            .await?;
        Ok(games.into_iter().next())
    }
}

fn participant_filter(player_id: &UserId) -> Document {
    doc! {
        "$or": [
            { "player1_id": player_id.as_str() },
            { "player2_id": player_id.as_str() },
        ]
    }
}

#[async_trait]
impl DuelMatchRepository for MongoStore {
    async fn save(&self, duel: &DuelMatch) -> DomainResult<()> {
        self.upsert(DUEL_MATCHES, duel.id().to_string(), duel).await
    }

    async fn find_by_id(&self, id: DuelMatchId) -> DomainResult<Option<DuelMatch>> {
        self.find_one(DUEL_MATCHES, doc! { "_id": id.to_string() }).await
    }

    async fn find_active_by_player(&self, player_id: &UserId) -> DomainResult<Option<DuelMatch>> {
        let mut filter = participant_filter(player_id);
        filter.insert("status", doc! { "$in": ["pending_ready", "in_progress"] });
        let matches: Vec<DuelMatch> = self
            .find_many(DUEL_MATCHES, filter, Some(doc! { "created_at": -1 }), Some(1))
            .await?;
        Ok(matches.into_iter().next())
    }

    async fn find_by_player(
        &self,
        player_id: &UserId,
        limit: usize,
    ) -> DomainResult<Vec<DuelMatch>> {
        self.find_many(
            DUEL_MATCHES,
            participant_filter(player_id),
            Some(doc! { "created_at": -1 }),
            Some(limit),
        )
        .await
    }
}

#[async_trait]
impl ChallengeRepository for MongoStore {
    async fn save(&self, challenge: &Challenge) -> DomainResult<()> {
        self.upsert(CHALLENGES, challenge.id().to_string(), challenge).await
    }

    async fn find_by_id(&self, id: ChallengeId) -> DomainResult<Option<Challenge>> {
        self.find_one(CHALLENGES, doc! { "_id": id.to_string() }).await
    }

    async fn find_by_token(&self, token: &str) -> DomainResult<Option<Challenge>> {
        self.find_one(CHALLENGES, doc! { "token": token }).await
    }

    async fn find_pending_for(&self, player_id: &UserId) -> DomainResult<Vec<Challenge>> {
        self.find_many(
            CHALLENGES,
            doc! { "challenged_id": player_id.as_str(), "status": "pending" },
            Some(doc! { "created_at": 1 }),
            None,
        )
        .await
    }

    async fn find_pending_rematch(
        &self,
        match_id: DuelMatchId,
        challenger_id: &UserId,
    ) -> DomainResult<Option<Challenge>> {
        self.find_one(
            CHALLENGES,
            doc! {
                "rematch_of": match_id.to_string(),
                "challenger_id": challenger_id.as_str(),
                "status": "pending",
            },
        )
        .await
    }
}

#[async_trait]
impl PlayerRatingRepository for MongoStore {
    async fn find(&self, player_id: &UserId) -> DomainResult<Option<PlayerRating>> {
        self.find_one(RATINGS, doc! { "_id": player_id.as_str() }).await
    }

    async fn save(&self, rating: &PlayerRating) -> DomainResult<()> {
        self.upsert(RATINGS, rating.player_id.to_string(), rating).await
    }

    async fn find_top(&self, limit: usize) -> DomainResult<Vec<PlayerRating>> {
        self.find_many(
            RATINGS,
            doc! {},
            Some(doc! { "mmr": -1, "wins": -1, "_id": 1 }),
            Some(limit),
        )
        .await
    }

    async fn find_top_in_season(
        &self,
        season_id: &str,
        limit: usize,
    ) -> DomainResult<Vec<PlayerRating>> {
        self.find_many(
            RATINGS,
            doc! { "season_id": season_id },
            Some(doc! { "mmr": -1, "wins": -1, "_id": 1 }),
            Some(limit),
        )
        .await
    }

    async fn rank_in_season(
        &self,
        player_id: &UserId,
        season_id: &str,
    ) -> DomainResult<Option<u32>> {
        let Some(mine) = PlayerRatingRepository::find(self, player_id)
            .await?
            .filter(|r| r.season_id == season_id)
        else {
            return Ok(None);
        };
        let wins = i64::from(mine.wins);
        let ahead = self
            .count(
                RATINGS,
                doc! {
                    "season_id": season_id,
                    "$or": [
                        { "mmr": { "$gt": mine.mmr } },
                        { "mmr": mine.mmr, "wins": { "$gt": wins } },
                        { "mmr": mine.mmr, "wins": wins, "_id": { "$lt": player_id.as_str() } },
                    ],
                },
            )
            .await?;
        Ok(Some(ahead as u32 + 1))
    }
}

#[async_trait]
impl ReferralRepository for MongoStore {
    async fn save(&self, referral: &Referral) -> DomainResult<()> {
        self.upsert(REFERRALS, referral.id().to_string(), referral).await
    }

    async fn find_by_id(&self, id: ReferralId) -> DomainResult<Option<Referral>> {
        self.find_one(REFERRALS, doc! { "_id": id.to_string() }).await
    }

    async fn find_by_invitee(&self, invitee_id: &UserId) -> DomainResult<Option<Referral>> {
        self.find_one(REFERRALS, doc! { "invitee_id": invitee_id.as_str() })
            .await
    }

    async fn find_by_inviter(&self, inviter_id: &UserId) -> DomainResult<Vec<Referral>> {
        self.find_many(
            REFERRALS,
            doc! { "inviter_id": inviter_id.as_str() },
            Some(doc! { "created_at": 1, "_id": 1 }),
            None,
        )
        .await
    }

    async fn leaderboard(&self, limit: usize) -> DomainResult<Vec<ReferralRow>> {
        self.referral_rows(Some(limit)).await
    }

    async fn rank_of(&self, inviter_id: &UserId) -> DomainResult<Option<u32>> {
        Ok(self
            .referral_rows(None)
            .await?
            .iter()
            .position(|row| row.inviter_id == *inviter_id)
            .map(|i| i as u32 + 1))
    }
}
