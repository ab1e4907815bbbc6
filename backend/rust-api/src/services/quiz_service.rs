use std::sync::Arc;

use crate::error::{DomainError, DomainResult};
use crate::metrics::record_answer;
use crate::models::dto::{
    leaderboard_limit, CategoryView, LeaderboardEntryView, QuizAnswerResponse, QuizDetailView,
    QuizSummaryView, SessionView, StartQuizResponse,
};
use crate::models::{
    AnswerId, Category, QuestionId, Quiz, QuizId, QuizSession, SessionId, SessionStatus, UserId,
};
use crate::services::event_bus::EventBus;
use crate::services::repositories::{
    CategoryRepository, LeaderboardRepository, QuizRepository, QuizSessionRepository,
    Repositories, ScoreRow,
};
use crate::services::user_service::UserService;
use crate::utils::time::{day_start, Clock};

/// Classic quizzes: browsing, sessions and leaderboards.
pub struct QuizService {
    quizzes: Arc<dyn QuizRepository>,
    sessions: Arc<dyn QuizSessionRepository>,
    leaderboard: Arc<dyn LeaderboardRepository>,
    categories: Arc<dyn CategoryRepository>,
    users: UserService,
    events: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl QuizService {
    pub fn new(
        repos: &Repositories,
        users: UserService,
        events: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            quizzes: repos.quizzes.clone(),
            sessions: repos.sessions.clone(),
            leaderboard: repos.leaderboard.clone(),
            categories: repos.categories.clone(),
            users,
            events,
            clock,
        }
    }

    pub async fn list_quizzes(&self) -> DomainResult<Vec<QuizSummaryView>> {
        let quizzes = self.quizzes.find_all().await?;
        Ok(quizzes.iter().map(QuizSummaryView::from).collect())
    }

    pub async fn get_quiz(&self, quiz_id: QuizId) -> DomainResult<QuizDetailView> {
        let quiz = self.load_quiz(quiz_id).await?;
        Ok(QuizDetailView::from(&quiz))
    }

    /// Starts a session, or hands back the one the player left active.
    pub async fn start(&self, user_id: &UserId, quiz_id: QuizId) -> DomainResult<StartQuizResponse> {
        let mut quiz = self.load_quiz(quiz_id).await?;
        let now = self.clock.now();
        let today = self.clock.today();
        let completed_today = self
            .sessions
            .find_completed_by_user_quiz_and_date(
                user_id,
                quiz_id,
                day_start(today),
                day_start(today) + 86_400,
            )
            .await?
            .len() as u32;

        if let Some(active) = self.sessions.find_active(user_id, quiz_id).await? {
            tracing::debug!("Resuming quiz session {} for {}", active.id(), user_id);
            return Ok(StartQuizResponse {
                session: SessionView::from(&active),
                quiz: QuizDetailView::from(&quiz),
                completed_today,
            });
        }

        let mut session = QuizSession::start(&quiz, user_id.clone(), now)?;
        self.sessions.save(&session).await?;
        if !quiz.is_played() {
            quiz.mark_played();
            self.quizzes.save(&quiz).await?;
        }
        self.events.publish_all(session.take_events());

        tracing::info!("User {} started quiz {} (session {})", user_id, quiz_id, session.id());
        Ok(StartQuizResponse {
            session: SessionView::from(&session),
            quiz: QuizDetailView::from(&quiz),
            completed_today,
        })
    }

    pub async fn submit_answer(
        &self,
        user_id: &UserId,
        session_id: SessionId,
        question_id: QuestionId,
        answer_id: AnswerId,
    ) -> DomainResult<QuizAnswerResponse> {
        let mut session = self.load_owned(user_id, session_id).await?;
        let quiz = self.load_quiz(session.quiz_id()).await?;
        let correct_answer_id = quiz
            .question(&question_id)
            .and_then(|question| question.correct_answer_id());

        let now = self.clock.now();
        let answer = session.submit_answer(&quiz, question_id, answer_id, now)?;
        let (is_correct, points_earned) = (answer.is_correct, answer.points);

        self.sessions.save(&session).await?;
        self.events.publish_all(session.take_events());
        record_answer("quiz", is_correct);

        let passed = (session.status() == SessionStatus::Completed).then(|| {
            let passed = session.has_passed(&quiz);
            tracing::info!(
                "Quiz session {} completed with {} points (passed: {})",
                session.id(),
                session.score(),
                passed
            );
            passed
        });

        Ok(QuizAnswerResponse {
            is_correct,
            points_earned,
            correct_answer_id,
            passed,
            session: SessionView::from(&session),
        })
    }

    pub async fn get_session(&self, user_id: &UserId, session_id: SessionId) -> DomainResult<SessionView> {
        let session = self.load_owned(user_id, session_id).await?;
        Ok(SessionView::from(&session))
    }

    pub async fn abandon(&self, user_id: &UserId, session_id: SessionId) -> DomainResult<SessionView> {
        let mut session = self.load_owned(user_id, session_id).await?;
        session.abandon(self.clock.now())?;
        self.sessions.save(&session).await?;
        self.events.publish_all(session.take_events());
        tracing::info!("User {} abandoned quiz session {}", user_id, session_id);
        Ok(SessionView::from(&session))
    }

    pub async fn quiz_leaderboard(
        &self,
        quiz_id: QuizId,
        limit: Option<usize>,
    ) -> DomainResult<Vec<LeaderboardEntryView>> {
        self.load_quiz(quiz_id).await?;
        let rows = self
            .leaderboard
            .top_for_quiz(quiz_id, leaderboard_limit(limit))
            .await?;
        self.with_names(rows).await
    }

    pub async fn global_leaderboard(&self, limit: Option<usize>) -> DomainResult<Vec<LeaderboardEntryView>> {
        let rows = self.leaderboard.top_global(leaderboard_limit(limit)).await?;
        self.with_names(rows).await
    }

    pub async fn list_categories(&self) -> DomainResult<Vec<CategoryView>> {
        let categories = self.categories.find_all().await?;
        Ok(categories.iter().map(CategoryView::from).collect())
    }

    pub async fn create_category(&self, name: &str) -> DomainResult<CategoryView> {
        let category = Category::new(name, self.clock.now())?;
        if self.categories.find_by_name(&category.name).await?.is_some() {
            return Err(DomainError::conflict(format!(
                "category '{}' already exists",
                category.name
            )));
        }
        self.categories.save(&category).await?;
        tracing::info!("Created category {} ({})", category.name, category.id);
        Ok(CategoryView::from(&category))
    }

    async fn load_quiz(&self, quiz_id: QuizId) -> DomainResult<Quiz> {
        self.quizzes
            .find_by_id(quiz_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("quiz {}", quiz_id)))
    }

    async fn load_owned(&self, user_id: &UserId, session_id: SessionId) -> DomainResult<QuizSession> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("quiz session {}", session_id)))?;
        if session.user_id() != user_id {
            tracing::warn!("User {} tried to access quiz session {}", user_id, session_id);
            return Err(DomainError::unauthorized("quiz session belongs to another user"));
        }
        Ok(session)
    }

    async fn with_names(&self, rows: Vec<ScoreRow>) -> DomainResult<Vec<LeaderboardEntryView>> {
        let ids: Vec<UserId> = rows.iter().map(|row| row.user_id.clone()).collect();
        let mut names = self.users.display_names(&ids).await?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| LeaderboardEntryView {
                rank: i as u32 + 1,
                username: names.remove(&row.user_id).unwrap_or_default(),
                user_id: row.user_id,
                score: row.score,
                achieved_at: row.achieved_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::fixtures;
    use crate::models::{PassingScore, QuestionDifficulty, TimeLimit};
    use crate::services::event_bus::RecordingEventBus;
    use crate::services::repositories::memory::InMemoryStore;
    use crate::utils::time::ManualClock;

    // 2026-03-01T12:00:00Z
    const NOON: i64 = 1_772_366_400;

    struct Fixture {
        service: QuizService,
        store: Arc<InMemoryStore>,
        events: Arc<RecordingEventBus>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::default());
        let repos = Repositories::from_store(store.clone());
        let events = Arc::new(RecordingEventBus::new());
        let clock = Arc::new(ManualClock::starting_at(NOON));
        let users = UserService::new(
            repos.users.clone(),
            repos.wallets.clone(),
            events.clone(),
            clock.clone(),
        );
        Fixture {
            service: QuizService::new(&repos, users, events.clone(), clock.clone()),
            store,
            events,
            clock,
        }
    }

    async fn seed_quiz(f: &Fixture, questions: usize) -> Quiz {
        let mut quiz = Quiz::new(
            "Rust basics",
            "Ownership and borrowing",
            None,
            TimeLimit::new(60).unwrap(),
            PassingScore::new(70).unwrap(),
            NOON,
        )
        .unwrap();
        for _ in 0..questions {
            quiz.add_question(fixtures::question(QuestionDifficulty::Easy), NOON)
                .unwrap();
        }
        QuizRepository::save(f.store.as_ref(), &quiz).await.unwrap();
        quiz
    }

    async fn play(f: &Fixture, user: &UserId, quiz: &Quiz, correct: usize) -> QuizAnswerResponse {
        let started = f.service.start(user, quiz.id()).await.unwrap();
        let mut last = None;
        for (i, question) in quiz.questions().iter().enumerate() {
            let answer = if i < correct {
                fixtures::correct(question)
            } else {
                fixtures::wrong(question)
            };
            last = Some(
                f.service
                    .submit_answer(user, started.session.session_id, question.id(), answer)
                    .await
                    .unwrap(),
            );
            f.clock.advance(5);
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn test_session_completes_after_last_answer() {
        let f = fixture();
        let quiz = seed_quiz(&f, 10).await;
        let user = UserId::from_platform(1);

        let last = play(&f, &user, &quiz, 8).await;
        assert_eq!(last.session.status, SessionStatus::Completed);
        assert_eq!(last.session.score, 80);
        assert_eq!(last.passed, Some(true));
        assert!(!last.is_correct);
        assert!(f.events.event_types().contains(&"quiz_completed"));

        let played = QuizRepository::find_by_id(f.store.as_ref(), quiz.id())
            .await
            .unwrap()
            .unwrap();
        assert!(played.is_played());
    }

    #[tokio::test]
    async fn test_start_resumes_active_session() {
        let f = fixture();
        let quiz = seed_quiz(&f, 3).await;
        let user = UserId::from_platform(1);

        let first = f.service.start(&user, quiz.id()).await.unwrap();
        let again = f.service.start(&user, quiz.id()).await.unwrap();
        assert_eq!(first.session.session_id, again.session.session_id);
        assert_eq!(again.completed_today, 0);

        play(&f, &user, &quiz, 3).await;
        let next = f.service.start(&user, quiz.id()).await.unwrap();
        assert_ne!(next.session.session_id, first.session.session_id);
        assert_eq!(next.completed_today, 1);
    }

    #[tokio::test]
    async fn test_leaderboard_keeps_best_score_per_user() {
        let f = fixture();
        let quiz = seed_quiz(&f, 10).await;
        let alice = UserId::from_platform(1);
        let bob = UserId::from_platform(2);

        play(&f, &alice, &quiz, 6).await;
        play(&f, &alice, &quiz, 8).await;
        play(&f, &bob, &quiz, 7).await;

        let board = f.service.quiz_leaderboard(quiz.id(), None).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user_id, alice);
        assert_eq!(board[0].score, 80);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[1].user_id, bob);
        assert_eq!(board[1].rank, 2);
    }

    #[tokio::test]
    async fn test_foreign_session_is_unauthorized() {
        let f = fixture();
        let quiz = seed_quiz(&f, 2).await;
        let owner = UserId::from_platform(1);
        let started = f.service.start(&owner, quiz.id()).await.unwrap();

        let err = f
            .service
            .abandon(&UserId::from_platform(2), started.session.session_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        let abandoned = f
            .service
            .abandon(&owner, started.session.session_id)
            .await
            .unwrap();
        assert_eq!(abandoned.status, SessionStatus::Abandoned);
    }

    #[tokio::test]
    async fn test_duplicate_category_conflicts() {
        let f = fixture();
        f.service.create_category("Programming").await.unwrap();
        let err = f.service.create_category("Programming").await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(f.service.list_categories().await.unwrap().len(), 1);
    }
}
