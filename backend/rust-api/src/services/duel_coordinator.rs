//! Live duel rounds over WebSocket sessions.
//!
//! Every match gets one actor task that owns the [`DuelMatch`] while it is
//! played. Sessions and timers talk to it through a command channel, so all
//! state changes of a match run one after another. Timer commands carry the
//! round or absence sequence they were scheduled for and are ignored once stale.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{DomainError, DomainResult};
use crate::metrics::{record_answer, DUEL_MATCHES_TOTAL};
use crate::models::duel::{
    COUNTDOWN_SECS, INTERMISSION_SECS, RECONNECT_WINDOW_SECS, ROUND_GRACE_SECS,
    TIME_PER_QUESTION_SECS,
};
use crate::models::dto::QuestionView;
use crate::models::{
    AnswerId, DuelMatch, DuelMatchId, DuelStatus, PlayerRating, Question, QuestionId, UserId,
};
use crate::services::duel_progress::{load_rating, track_referral};
use crate::services::event_bus::EventBus;
use crate::services::repositories::{
    DuelMatchRepository, PlayerRatingRepository, QuestionRepository, ReferralRepository,
    Repositories,
};
use crate::utils::time::Clock;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    SubmitAnswer {
        question_id: QuestionId,
        answer_id: AnswerId,
        time_taken_ms: i64,
    },
    Ping,
    Abandon,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        match_id: DuelMatchId,
        player_id: UserId,
        status: DuelStatus,
        opponent_connected: bool,
    },
    MatchReady {
        starts_in: u32,
        total_rounds: u32,
        player1_id: UserId,
        player2_id: UserId,
    },
    NewQuestion {
        round: u32,
        total_rounds: u32,
        question: QuestionView,
        time_limit: u32,
        server_time: i64,
    },
    AnswerResult {
        round: u32,
        player_id: UserId,
        is_correct: bool,
        points_earned: u32,
        time_taken_ms: i64,
        player1_score: u32,
        player2_score: u32,
    },
    RoundComplete {
        round: u32,
        correct_answer_id: Option<AnswerId>,
        timed_out: bool,
        player1_points_earned: u32,
        player2_points_earned: u32,
        player1_score: u32,
        player2_score: u32,
        next_round_in: u32,
    },
    MatchComplete {
        winner_id: Option<UserId>,
        player1_score: u32,
        player2_score: u32,
        player1_mmr_delta: i32,
        player2_mmr_delta: i32,
        player1_new_mmr: i32,
        player2_new_mmr: i32,
        forfeited_by: Option<UserId>,
    },
    MatchAbandoned {
        reason: String,
    },
    OpponentDisconnected {
        player_id: UserId,
        reconnect_in: u32,
    },
    OpponentReconnected {
        player_id: UserId,
    },
    Resume {
        round: u32,
        remaining_ms: u64,
        question: Option<QuestionView>,
        player1_score: u32,
        player2_score: u32,
    },
    Pong,
    Error {
        message: String,
    },
}

#[derive(Debug)]
enum Command {
    Connect {
        player_id: UserId,
        conn_id: u64,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    },
    Disconnect {
        player_id: UserId,
        conn_id: u64,
    },
    Client {
        player_id: UserId,
        message: ClientMessage,
    },
    StartRound {
        round: u32,
    },
    RoundTimeout {
        round: u32,
    },
    AbsenceExpired {
        player_id: UserId,
        seq: u64,
    },
}

#[derive(Clone)]
struct MatchContext {
    duels: Arc<dyn DuelMatchRepository>,
    questions: Arc<dyn QuestionRepository>,
    ratings: Arc<dyn PlayerRatingRepository>,
    referrals: Arc<dyn ReferralRepository>,
    events: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

struct HubInner {
    ctx: MatchContext,
    matches: RwLock<HashMap<DuelMatchId, mpsc::UnboundedSender<Command>>>,
    next_conn_id: AtomicU64,
}

/// Registry of running match actors.
#[derive(Clone)]
pub struct DuelHub {
    inner: Arc<HubInner>,
}

impl DuelHub {
    pub fn new(repos: &Repositories, events: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        let ctx = MatchContext {
            duels: repos.duel_matches.clone(),
            questions: repos.questions.clone(),
            ratings: repos.ratings.clone(),
            referrals: repos.referrals.clone(),
            events,
            clock,
        };
        Self {
            inner: Arc::new(HubInner {
                ctx,
                matches: RwLock::new(HashMap::new()),
                next_conn_id: AtomicU64::new(1),
            }),
        }
    }

    /// Seats a participant, starting the match actor on first connect.
    pub async fn connect(&self, match_id: DuelMatchId, player_id: &UserId) -> DomainResult<DuelSession> {
        let duel = self
            .inner
            .ctx
            .duels
            .find_by_id(match_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("duel {}", match_id)))?;
        if !duel.is_participant(player_id) {
            return Err(DomainError::unauthorized("player is not part of this duel"));
        }
        if duel.status().is_terminal() {
            return Err(DomainError::state(format!("duel is {}", duel.status().as_str())));
        }

        let commands = self.actor_for(duel).await;
        let conn_id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (outbox, inbox) = mpsc::unbounded_channel();
        commands
            .send(Command::Connect {
                player_id: player_id.clone(),
                conn_id,
                outbox,
            })
            .map_err(|_| DomainError::state("duel is over"))?;

        tracing::debug!("Player {} connected to duel {}", player_id, match_id);
        Ok(DuelSession {
            match_id,
            player_id: player_id.clone(),
            conn_id,
            commands,
            inbox,
        })
    }

    pub async fn active_matches(&self) -> usize {
        self.inner.matches.read().await.len()
    }

    async fn actor_for(&self, duel: DuelMatch) -> mpsc::UnboundedSender<Command> {
        let mut matches = self.inner.matches.write().await;
        if let Some(commands) = matches.get(&duel.id()) {
            if !commands.is_closed() {
                return commands.clone();
            }
        }

        let match_id = duel.id();
        let (commands, receiver) = mpsc::unbounded_channel();
        let actor = MatchActor::new(self.inner.ctx.clone(), duel, commands.clone());
        matches.insert(match_id, commands.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            actor.run(receiver).await;
            inner.matches.write().await.remove(&match_id);
            tracing::debug!("Duel {} coordinator stopped", match_id);
        });
        commands
    }
}

/// One player's connection to a match. Dropping it counts as a disconnect.
pub struct DuelSession {
    pub match_id: DuelMatchId,
    pub player_id: UserId,
    conn_id: u64,
    commands: mpsc::UnboundedSender<Command>,
    inbox: mpsc::UnboundedReceiver<ServerMessage>,
}

impl DuelSession {
    /// Next message for this player; `None` once the match is over.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbox.recv().await
    }

    pub fn send(&self, message: ClientMessage) {
        let _ = self.commands.send(Command::Client {
            player_id: self.player_id.clone(),
            message,
        });
    }
}

impl Drop for DuelSession {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Disconnect {
            player_id: self.player_id.clone(),
            conn_id: self.conn_id,
        });
    }
}

struct Seat {
    conn_id: u64,
    outbox: mpsc::UnboundedSender<ServerMessage>,
}

struct MatchActor {
    ctx: MatchContext,
    duel: DuelMatch,
    commands: mpsc::UnboundedSender<Command>,
    seats: HashMap<UserId, Seat>,
    question: Option<Question>,
    round_open: bool,
    round_deadline: Option<Instant>,
    round_timer: Option<JoinHandle<()>>,
    next_round_timer: Option<JoinHandle<()>>,
    absence_timers: HashMap<UserId, (u64, JoinHandle<()>)>,
    absent_since: HashMap<UserId, Instant>,
    absence_seq: u64,
    seen: HashSet<UserId>,
    ready_announced: bool,
    finished: bool,
}

impl MatchActor {
    fn new(ctx: MatchContext, duel: DuelMatch, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            ctx,
            duel,
            commands,
            seats: HashMap::new(),
            question: None,
            round_open: false,
            round_deadline: None,
            round_timer: None,
            next_round_timer: None,
            absence_timers: HashMap::new(),
            absent_since: HashMap::new(),
            absence_seq: 0,
            seen: HashSet::new(),
            ready_announced: false,
            finished: false,
        }
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("Duel {} coordinator started", self.duel.id());
        while let Some(command) = receiver.recv().await {
            self.handle(command).await;
            if self.finished {
                break;
            }
        }
        self.cancel_timers();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                player_id,
                conn_id,
                outbox,
            } => self.on_connect(player_id, conn_id, outbox).await,
            Command::Disconnect { player_id, conn_id } => self.on_disconnect(player_id, conn_id),
            Command::Client { player_id, message } => match message {
                ClientMessage::Ping => self.send_to(&player_id, ServerMessage::Pong),
                ClientMessage::Abandon => self.on_abandon(player_id).await,
                ClientMessage::SubmitAnswer {
                    question_id,
                    answer_id,
                    time_taken_ms,
                } => {
                    self.on_submit(player_id, question_id, answer_id, time_taken_ms)
                        .await
                }
            },
            Command::StartRound { round } => self.start_round(round).await,
            Command::RoundTimeout { round } => {
                if self.round_open && self.duel.current_round() == round {
                    tracing::debug!("Duel {} round {} timed out", self.duel.id(), round);
                    self.end_round().await;
                }
            }
            Command::AbsenceExpired { player_id, seq } => {
                self.on_absence_expired(player_id, seq).await
            }
        }
    }

    async fn on_connect(
        &mut self,
        player_id: UserId,
        conn_id: u64,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    ) {
        if let Some((_, timer)) = self.absence_timers.remove(&player_id) {
            timer.abort();
        }
        self.absent_since.remove(&player_id);
        let returning = !self.seen.insert(player_id.clone());
        self.seats.insert(player_id.clone(), Seat { conn_id, outbox });

        let opponent = self.duel.opponent_of(&player_id).cloned();
        let opponent_connected = opponent
            .as_ref()
            .is_some_and(|id| self.seats.contains_key(id));
        self.send_to(
            &player_id,
            ServerMessage::Connected {
                match_id: self.duel.id(),
                player_id: player_id.clone(),
                status: self.duel.status(),
                opponent_connected,
            },
        );
        if returning {
            if let Some(opponent) = &opponent {
                self.send_to(
                    opponent,
                    ServerMessage::OpponentReconnected {
                        player_id: player_id.clone(),
                    },
                );
            }
        }

        let Some(opponent) = opponent else {
            return;
        };
        if !opponent_connected && !self.absence_timers.contains_key(&opponent) {
            if self.absence_expired(&opponent) && self.duel.status() == DuelStatus::InProgress {
                tracing::info!("Player {} forfeits duel {} by absence", opponent, self.duel.id());
                self.settle(Some(opponent)).await;
                return;
            }
            if !self.absent_since.contains_key(&opponent) {
                self.schedule_absence(opponent.clone());
            }
        }

        match self.duel.status() {
            // a rebuilt coordinator has no round running yet
            DuelStatus::InProgress if !self.round_open && self.next_round_timer.is_none() => {
                tracing::info!(
                    "Duel {} resumes at round {}",
                    self.duel.id(),
                    self.duel.current_round()
                );
                self.start_round(self.duel.current_round()).await;
            }
            DuelStatus::InProgress => {
                let resume = self.resume_message();
                self.send_to(&player_id, resume);
            }
            DuelStatus::PendingReady if opponent_connected && !self.ready_announced => {
                self.announce_ready();
            }
            _ => {}
        }
    }

    fn on_disconnect(&mut self, player_id: UserId, conn_id: u64) {
        let current = self
            .seats
            .get(&player_id)
            .is_some_and(|seat| seat.conn_id == conn_id);
        if !current {
            return;
        }
        self.seats.remove(&player_id);
        tracing::info!("Player {} left duel {}", player_id, self.duel.id());

        if let Some(opponent) = self.duel.opponent_of(&player_id).cloned() {
            self.send_to(
                &opponent,
                ServerMessage::OpponentDisconnected {
                    player_id: player_id.clone(),
                    reconnect_in: RECONNECT_WINDOW_SECS,
                },
            );
        }
        self.schedule_absence(player_id);
    }

    async fn on_absence_expired(&mut self, player_id: UserId, seq: u64) {
        let current = self
            .absence_timers
            .get(&player_id)
            .is_some_and(|(scheduled, _)| *scheduled == seq);
        if !current || self.seats.contains_key(&player_id) {
            return;
        }
        self.absence_timers.remove(&player_id);

        let opponent = self.duel.opponent_of(&player_id).cloned();
        let opponent_present = opponent
            .as_ref()
            .is_some_and(|id| self.seats.contains_key(id));
        match self.duel.status() {
            DuelStatus::PendingReady => self.abandon("opponent did not show up").await,
            DuelStatus::InProgress if opponent_present => {
                tracing::info!("Player {} forfeits duel {} by absence", player_id, self.duel.id());
                self.settle(Some(player_id)).await;
            }
            DuelStatus::InProgress
                if opponent.as_ref().is_some_and(|id| self.absence_expired(id)) =>
            {
                self.abandon("both players left").await
            }
            // the opponent's own window decides
            DuelStatus::InProgress => {}
            _ => {}
        }
    }

    async fn on_abandon(&mut self, player_id: UserId) {
        match self.duel.status() {
            DuelStatus::PendingReady => self.abandon("match cancelled by a player").await,
            DuelStatus::InProgress => {
                tracing::info!("Player {} quit duel {}", player_id, self.duel.id());
                self.settle(Some(player_id)).await;
            }
            _ => {}
        }
    }

    async fn on_submit(
        &mut self,
        player_id: UserId,
        question_id: QuestionId,
        answer_id: AnswerId,
        time_taken_ms: i64,
    ) {
        let round = self.duel.current_round();
        let result = match self.question.as_ref() {
            Some(_) if !self.round_open => Err(DomainError::state("no round is open")),
            Some(question) if question.id() != question_id => {
                Err(DomainError::invalid("question does not belong to this round"))
            }
            Some(question) => {
                self.duel
                    .submit_answer(&player_id, round, question, answer_id, time_taken_ms)
            }
            None => Err(DomainError::state("no round is open")),
        };

        match result {
            Ok(answer) => {
                record_answer("duel", answer.is_correct);
                self.broadcast(ServerMessage::AnswerResult {
                    round,
                    player_id,
                    is_correct: answer.is_correct,
                    points_earned: answer.points_earned,
                    time_taken_ms: answer.time_taken_ms,
                    player1_score: self.duel.player1_score(),
                    player2_score: self.duel.player2_score(),
                });
                if self.duel.both_answered(round) {
                    self.end_round().await;
                }
            }
            Err(e) => {
                tracing::warn!("Rejected answer in duel {}: {}", self.duel.id(), e);
                self.send_to(
                    &player_id,
                    ServerMessage::Error {
                        message: e.to_string(),
                    },
                );
            }
        }
    }

    fn announce_ready(&mut self) {
        self.ready_announced = true;
        self.broadcast(ServerMessage::MatchReady {
            starts_in: COUNTDOWN_SECS,
            total_rounds: self.duel.total_rounds(),
            player1_id: self.duel.player1_id().clone(),
            player2_id: self.duel.player2_id().clone(),
        });
        let timer = self.schedule(secs(COUNTDOWN_SECS), Command::StartRound { round: 1 });
        self.next_round_timer = Some(timer);
    }

    async fn start_round(&mut self, round: u32) {
        let now = self.ctx.clock.now();
        match self.duel.status() {
            DuelStatus::PendingReady if round == 1 => {
                if let Err(e) = self.duel.start(now) {
                    tracing::error!("Duel {} could not start: {}", self.duel.id(), e);
                    return;
                }
                DUEL_MATCHES_TOTAL.with_label_values(&["started"]).inc();
                tracing::info!("Duel {} started", self.duel.id());
            }
            DuelStatus::InProgress => {}
            _ => return,
        }
        if self.round_open || self.duel.current_round() != round {
            return;
        }

        let question = match self.load_question(round).await {
            Ok(question) => question,
            Err(e) => {
                tracing::error!("Duel {} round {} has no question: {}", self.duel.id(), round, e);
                self.abandon("question unavailable").await;
                return;
            }
        };
        self.persist().await;

        let window = secs(TIME_PER_QUESTION_SECS + ROUND_GRACE_SECS);
        self.round_open = true;
        self.round_deadline = Some(Instant::now() + window);
        self.round_timer = Some(self.schedule(window, Command::RoundTimeout { round }));
        self.broadcast(ServerMessage::NewQuestion {
            round,
            total_rounds: self.duel.total_rounds(),
            question: QuestionView::from(&question),
            time_limit: TIME_PER_QUESTION_SECS,
            server_time: self.ctx.clock.now_millis(),
        });
        self.question = Some(question);
    }

    async fn load_question(&self, round: u32) -> DomainResult<Question> {
        let question_id = self
            .duel
            .question_id_for(round)
            .ok_or_else(|| DomainError::internal(format!("round {} has no question", round)))?;
        self.ctx
            .questions
            .find_by_id(question_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("question {}", question_id)))
    }

    async fn end_round(&mut self) {
        self.round_open = false;
        self.round_deadline = None;
        if let Some(timer) = self.round_timer.take() {
            timer.abort();
        }

        let round = self.duel.current_round();
        let now = self.ctx.clock.now();
        let summary = match self.duel.complete_round(round, now) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!("Duel {} round {} could not close: {}", self.duel.id(), round, e);
                return;
            }
        };
        let correct_answer_id = self.question.as_ref().and_then(Question::correct_answer_id);
        self.broadcast(ServerMessage::RoundComplete {
            round,
            correct_answer_id,
            timed_out: summary.timed_out,
            player1_points_earned: summary.player1_points,
            player2_points_earned: summary.player2_points,
            player1_score: self.duel.player1_score(),
            player2_score: self.duel.player2_score(),
            next_round_in: if summary.is_last { 0 } else { INTERMISSION_SECS },
        });

        if summary.is_last {
            self.settle(None).await;
        } else {
            self.persist().await;
            let timer = self.schedule(
                secs(INTERMISSION_SECS),
                Command::StartRound { round: round + 1 },
            );
            self.next_round_timer = Some(timer);
        }
    }

    /// Finishes the match on score, or against `forfeited_by`, and applies MMR.
    async fn settle(&mut self, forfeited_by: Option<UserId>) {
        let now = self.ctx.clock.now();
        let mut rating1 = self.rating(self.duel.player1_id().clone(), now).await;
        let mut rating2 = self.rating(self.duel.player2_id().clone(), now).await;

        let result = match &forfeited_by {
            Some(loser) => self.duel.forfeit(loser, rating1.mmr, rating2.mmr, now),
            None => self.duel.finish(rating1.mmr, rating2.mmr, now),
        };
        let (outcome1, outcome2) = match result {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::error!("Duel {} could not be settled: {}", self.duel.id(), e);
                return;
            }
        };
        let Some(delta) = self.duel.mmr_delta() else {
            tracing::error!("Duel {} settled without MMR delta", self.duel.id());
            return;
        };

        let applied1 = rating1.apply(outcome1, delta.player1, now);
        let applied2 = rating2.apply(outcome2, delta.player2, now);
        for rating in [&rating1, &rating2] {
            if let Err(e) = self.ctx.ratings.save(rating).await {
                tracing::error!("Failed to save rating of {}: {}", rating.player_id, e);
                continue;
            }
            let referrals = self.ctx.referrals.as_ref();
            if let Err(e) = track_referral(referrals, self.ctx.events.as_ref(), rating, now).await {
                tracing::error!("Failed to track referral of {}: {}", rating.player_id, e);
            }
        }
        self.persist().await;

        let stage = if forfeited_by.is_some() { "forfeited" } else { "completed" };
        DUEL_MATCHES_TOTAL.with_label_values(&[stage]).inc();
        tracing::info!(
            "Duel {} {}: {} - {}",
            self.duel.id(),
            stage,
            self.duel.player1_score(),
            self.duel.player2_score()
        );

        self.broadcast(ServerMessage::MatchComplete {
            winner_id: self.duel.winner_id().cloned(),
            player1_score: self.duel.player1_score(),
            player2_score: self.duel.player2_score(),
            player1_mmr_delta: applied1,
            player2_mmr_delta: applied2,
            player1_new_mmr: rating1.mmr,
            player2_new_mmr: rating2.mmr,
            forfeited_by,
        });
        self.close();
    }

    async fn abandon(&mut self, reason: &str) {
        if let Err(e) = self.duel.abandon(self.ctx.clock.now()) {
            tracing::error!("Duel {} could not be abandoned: {}", self.duel.id(), e);
            return;
        }
        self.persist().await;
        DUEL_MATCHES_TOTAL.with_label_values(&["abandoned"]).inc();
        tracing::info!("Duel {} abandoned: {}", self.duel.id(), reason);
        self.broadcast(ServerMessage::MatchAbandoned {
            reason: reason.to_string(),
        });
        self.close();
    }

    async fn rating(&self, player_id: UserId, now: i64) -> PlayerRating {
        match load_rating(self.ctx.ratings.as_ref(), self.ctx.events.as_ref(), &player_id, now).await {
            Ok(rating) => rating,
            Err(e) => {
                tracing::error!("Failed to load rating of {}: {}", player_id, e);
                PlayerRating::new(player_id, now)
            }
        }
    }

    fn resume_message(&self) -> ServerMessage {
        let remaining_ms = self
            .round_deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_millis() as u64)
            .unwrap_or(0);
        let question = if self.round_open {
            self.question.as_ref().map(QuestionView::from)
        } else {
            None
        };
        ServerMessage::Resume {
            round: self.duel.current_round(),
            remaining_ms,
            question,
            player1_score: self.duel.player1_score(),
            player2_score: self.duel.player2_score(),
        }
    }

    async fn persist(&mut self) {
        match self.ctx.duels.save(&self.duel).await {
            Ok(()) => self.ctx.events.publish_all(self.duel.take_events()),
            Err(e) => tracing::error!("Failed to save duel {}: {}", self.duel.id(), e),
        }
    }

    fn schedule(&self, delay: Duration, command: Command) -> JoinHandle<()> {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(command);
        })
    }

    fn absence_expired(&self, player_id: &UserId) -> bool {
        self.absent_since
            .get(player_id)
            .is_some_and(|since| since.elapsed() >= secs(RECONNECT_WINDOW_SECS))
    }

    fn schedule_absence(&mut self, player_id: UserId) {
        self.absent_since
            .entry(player_id.clone())
            .or_insert_with(Instant::now);
        self.absence_seq += 1;
        let seq = self.absence_seq;
        let timer = self.schedule(
            secs(RECONNECT_WINDOW_SECS),
            Command::AbsenceExpired {
                player_id: player_id.clone(),
                seq,
            },
        );
        if let Some((_, previous)) = self.absence_timers.insert(player_id, (seq, timer)) {
            previous.abort();
        }
    }

    fn send_to(&self, player_id: &UserId, message: ServerMessage) {
        if let Some(seat) = self.seats.get(player_id) {
            let _ = seat.outbox.send(message);
        }
    }

    fn broadcast(&self, message: ServerMessage) {
        for seat in self.seats.values() {
            let _ = seat.outbox.send(message.clone());
        }
    }

    fn cancel_timers(&mut self) {
        for timer in [self.round_timer.take(), self.next_round_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
        for (_, (_, timer)) in self.absence_timers.drain() {
            timer.abort();
        }
    }

    fn close(&mut self) {
        self.finished = true;
        self.cancel_timers();
        self.seats.clear();
    }
}

fn secs(seconds: u32) -> Duration {
    Duration::from_secs(u64::from(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::fixtures;
    use crate::models::{Milestone, QuestionDifficulty, Referral};
    use crate::services::event_bus::RecordingEventBus;
    use crate::services::repositories::memory::InMemoryStore;
    use crate::utils::time::ManualClock;

    struct Fixture {
        hub: DuelHub,
        store: Arc<InMemoryStore>,
        duel: DuelMatch,
        questions: HashMap<QuestionId, Question>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::default());
        let mut questions = HashMap::new();
        let mut ids = Vec::new();
        for _ in 0..7 {
            let question = fixtures::question(QuestionDifficulty::Medium);
            QuestionRepository::save(store.as_ref(), &question).await.unwrap();
            ids.push(question.id());
            questions.insert(question.id(), question);
        }
        let duel = DuelMatch::new(
            UserId::from_platform(1),
            UserId::from_platform(2),
            ids,
            1_700_000_000,
        )
        .unwrap();
        DuelMatchRepository::save(store.as_ref(), &duel).await.unwrap();

        let repos = Repositories::from_store(store.clone());
        let hub = DuelHub::new(
            &repos,
            Arc::new(RecordingEventBus::new()),
            Arc::new(ManualClock::starting_at(1_700_000_000)),
        );
        Fixture {
            hub,
            store,
            duel,
            questions,
        }
    }

    async fn until<F>(session: &mut DuelSession, mut wanted: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let message = session.recv().await.expect("session closed early");
            if wanted(&message) {
                return message;
            }
        }
    }

    fn new_question(message: &ServerMessage) -> bool {
        matches!(message, ServerMessage::NewQuestion { .. })
    }

    async fn stored(f: &Fixture) -> DuelMatch {
        DuelMatchRepository::find_by_id(f.store.as_ref(), f.duel.id())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_match_settles_ratings() {
        let f = fixture().await;
        let (p1, p2) = (f.duel.player1_id().clone(), f.duel.player2_id().clone());
        let mut s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let mut s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();

        let ready = until(&mut s1, |m| matches!(m, ServerMessage::MatchReady { .. })).await;
        assert!(matches!(ready, ServerMessage::MatchReady { starts_in: 3, total_rounds: 7, .. }));

        for round in 1..=7 {
            let ServerMessage::NewQuestion { round: r, question, .. } = until(&mut s1, new_question).await
            else {
                unreachable!()
            };
            assert_eq!(r, round);
            until(&mut s2, new_question).await;
            let answer = fixtures::correct(&f.questions[&question.id]);
            s1.send(ClientMessage::SubmitAnswer {
                question_id: question.id,
                answer_id: answer,
                time_taken_ms: 1_000,
            });
            s2.send(ClientMessage::SubmitAnswer {
                question_id: question.id,
                answer_id: answer,
                time_taken_ms: 5_000,
            });
            let complete = until(&mut s1, |m| matches!(m, ServerMessage::RoundComplete { .. })).await;
            assert!(matches!(
                complete,
                ServerMessage::RoundComplete { timed_out: false, player1_points_earned: 90, player2_points_earned: 50, .. }
            ));
        }

        let done = until(&mut s2, |m| matches!(m, ServerMessage::MatchComplete { .. })).await;
        let ServerMessage::MatchComplete {
            winner_id,
            player1_score,
            player2_score,
            player1_mmr_delta,
            player2_new_mmr,
            ..
        } = done
        else {
            unreachable!()
        };
        assert_eq!(winner_id, Some(p1.clone()));
        assert_eq!((player1_score, player2_score), (630, 350));
        assert_eq!(player1_mmr_delta, 16);
        assert_eq!(player2_new_mmr, 984);

        assert_eq!(stored(&f).await.status(), DuelStatus::Completed);
        let rating = PlayerRatingRepository::find(f.store.as_ref(), &p1).await.unwrap().unwrap();
        assert_eq!((rating.mmr, rating.wins), (1016, 1));
        until(&mut s1, |m| matches!(m, ServerMessage::MatchComplete { .. })).await;
        assert!(s1.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_rounds_time_out_into_a_draw() {
        let f = fixture().await;
        let (p1, p2) = (f.duel.player1_id().clone(), f.duel.player2_id().clone());
        let mut s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let _s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();

        let first = until(&mut s1, |m| matches!(m, ServerMessage::RoundComplete { .. })).await;
        assert!(matches!(first, ServerMessage::RoundComplete { round: 1, timed_out: true, next_round_in: 2, .. }));

        let done = until(&mut s1, |m| matches!(m, ServerMessage::MatchComplete { .. })).await;
        assert!(matches!(
            done,
            ServerMessage::MatchComplete { winner_id: None, player1_mmr_delta: 0, player2_mmr_delta: 0, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_answer_in_a_round_is_rejected() {
        let f = fixture().await;
        let (p1, p2) = (f.duel.player1_id().clone(), f.duel.player2_id().clone());
        let mut s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let _s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();

        let ServerMessage::NewQuestion { question, .. } = until(&mut s1, new_question).await else {
            unreachable!()
        };
        let answer = fixtures::wrong(&f.questions[&question.id]);
        for _ in 0..2 {
            s1.send(ClientMessage::SubmitAnswer {
                question_id: question.id,
                answer_id: answer,
                time_taken_ms: 2_000,
            });
        }
        until(&mut s1, |m| matches!(m, ServerMessage::AnswerResult { is_correct: false, .. })).await;
        let error = until(&mut s1, |m| matches!(m, ServerMessage::Error { .. })).await;
        assert!(matches!(error, ServerMessage::Error { message } if message.contains("already submitted")));

        s1.send(ClientMessage::SubmitAnswer {
            question_id: question.id,
            answer_id: answer,
            time_taken_ms: 100,
        });
        let ServerMessage::Error { message } = until(&mut s1, |m| matches!(m, ServerMessage::Error { .. })).await
        else {
            unreachable!()
        };
        assert!(message.contains("already submitted") || message.contains("time taken"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_player_forfeits_after_reconnect_window() {
        let f = fixture().await;
        let (p1, p2) = (f.duel.player1_id().clone(), f.duel.player2_id().clone());
        let mut s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let mut s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();
        until(&mut s2, new_question).await;
        drop(s2);

        let notice = until(&mut s1, |m| matches!(m, ServerMessage::OpponentDisconnected { .. })).await;
        assert!(matches!(notice, ServerMessage::OpponentDisconnected { reconnect_in: 30, .. }));

        let done = until(&mut s1, |m| matches!(m, ServerMessage::MatchComplete { .. })).await;
        let ServerMessage::MatchComplete { winner_id, forfeited_by, .. } = done else {
            unreachable!()
        };
        assert_eq!(winner_id, Some(p1));
        assert_eq!(forfeited_by, Some(p2));
        assert!(stored(&f).await.forfeited_by().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resumes_current_round() {
        let f = fixture().await;
        let (p1, p2) = (f.duel.player1_id().clone(), f.duel.player2_id().clone());
        let mut s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let mut s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();
        until(&mut s2, new_question).await;
        drop(s2);
        until(&mut s1, |m| matches!(m, ServerMessage::OpponentDisconnected { .. })).await;

        tokio::time::advance(Duration::from_secs(4)).await;
        let mut s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();
        until(&mut s1, |m| matches!(m, ServerMessage::OpponentReconnected { .. })).await;
        let resume = until(&mut s2, |m| matches!(m, ServerMessage::Resume { .. })).await;
        let ServerMessage::Resume { round, remaining_ms, question, .. } = resume else {
            unreachable!()
        };
        assert_eq!(round, 1);
        assert!(question.is_some());
        assert!(remaining_ms > 0 && remaining_ms <= 8_000);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(stored(&f).await.status(), DuelStatus::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_show_abandons_pending_match() {
        let f = fixture().await;
        let mut s1 = f.hub.connect(f.duel.id(), f.duel.player1_id()).await.unwrap();
        let message = until(&mut s1, |m| matches!(m, ServerMessage::MatchAbandoned { .. })).await;
        assert!(matches!(message, ServerMessage::MatchAbandoned { .. }));
        assert_eq!(stored(&f).await.status(), DuelStatus::Abandoned);

        let err = f.hub.connect(f.duel.id(), f.duel.player2_id()).await.err().unwrap();
        assert!(matches!(err, DomainError::StateViolation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lone_answer_scores_when_the_round_times_out() {
        let f = fixture().await;
        let (p1, p2) = (f.duel.player1_id().clone(), f.duel.player2_id().clone());
        let mut s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let mut s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();

        let ServerMessage::NewQuestion { question, .. } = until(&mut s1, new_question).await else {
            unreachable!()
        };
        let miss = fixtures::wrong(&f.questions[&question.id]);
        for session in [&s1, &s2] {
            session.send(ClientMessage::SubmitAnswer {
                question_id: question.id,
                answer_id: miss,
                time_taken_ms: 2_000,
            });
        }
        until(&mut s1, |m| matches!(m, ServerMessage::RoundComplete { round: 1, .. })).await;

        let ServerMessage::NewQuestion { round, question, .. } = until(&mut s1, new_question).await
        else {
            unreachable!()
        };
        assert_eq!(round, 2);
        s1.send(ClientMessage::SubmitAnswer {
            question_id: question.id,
            answer_id: fixtures::correct(&f.questions[&question.id]),
            time_taken_ms: 3_000,
        });
        let answered = until(&mut s2, |m| matches!(m, ServerMessage::AnswerResult { round: 2, .. })).await;
        assert!(matches!(answered, ServerMessage::AnswerResult { points_earned: 70, .. }));

        let complete = until(&mut s2, |m| matches!(m, ServerMessage::RoundComplete { round: 2, .. })).await;
        let ServerMessage::RoundComplete {
            timed_out,
            player1_points_earned,
            player2_points_earned,
            player1_score,
            player2_score,
            ..
        } = complete
        else {
            unreachable!()
        };
        assert!(timed_out);
        assert_eq!((player1_points_earned, player2_points_earned), (70, 0));
        assert_eq!((player1_score, player2_score), (70, 0));

        let ServerMessage::NewQuestion { round, .. } = until(&mut s2, new_question).await else {
            unreachable!()
        };
        assert_eq!(round, 3);
        assert_eq!(stored(&f).await.current_round(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_connect_is_not_announced_as_reconnect() {
        let f = fixture().await;
        let (p1, p2) = (f.duel.player1_id().clone(), f.duel.player2_id().clone());
        let mut s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let _s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();

        let mut seen = Vec::new();
        loop {
            let message = s1.recv().await.unwrap();
            let ready = matches!(message, ServerMessage::MatchReady { .. });
            seen.push(message);
            if ready {
                break;
            }
        }
        assert!(!seen
            .iter()
            .any(|m| matches!(m, ServerMessage::OpponentReconnected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_is_abandoned_only_after_both_windows_pass() {
        let f = fixture().await;
        let (p1, p2) = (f.duel.player1_id().clone(), f.duel.player2_id().clone());
        let s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let mut s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();
        until(&mut s2, new_question).await;

        drop(s2);
        tokio::time::sleep(Duration::from_secs(25)).await;
        drop(s1);

        // past the first window, well inside the second
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(stored(&f).await.status(), DuelStatus::InProgress);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(stored(&f).await.status(), DuelStatus::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_back_after_opponent_window_wins_by_forfeit() {
        let f = fixture().await;
        let (p1, p2) = (f.duel.player1_id().clone(), f.duel.player2_id().clone());
        let s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let mut s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();
        until(&mut s2, new_question).await;

        drop(s2);
        tokio::time::sleep(Duration::from_secs(25)).await;
        drop(s1);
        tokio::time::sleep(Duration::from_secs(15)).await;

        let mut s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let done = until(&mut s1, |m| matches!(m, ServerMessage::MatchComplete { .. })).await;
        let ServerMessage::MatchComplete { winner_id, forfeited_by, .. } = done else {
            unreachable!()
        };
        assert_eq!(winner_id, Some(p1));
        assert_eq!(forfeited_by, Some(p2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuilt_coordinator_reopens_the_current_round() {
        let f = fixture().await;
        let mut duel = stored(&f).await;
        duel.start(1_700_000_000).unwrap();
        DuelMatchRepository::save(f.store.as_ref(), &duel).await.unwrap();

        let (p1, p2) = (duel.player1_id().clone(), duel.player2_id().clone());
        let mut s1 = f.hub.connect(duel.id(), &p1).await.unwrap();
        let ServerMessage::NewQuestion { round, question, .. } = until(&mut s1, new_question).await
        else {
            unreachable!()
        };
        assert_eq!(round, 1);
        assert_eq!(Some(question.id), duel.question_id_for(1));

        // the opponent never comes back
        let done = until(&mut s1, |m| matches!(m, ServerMessage::MatchComplete { .. })).await;
        let ServerMessage::MatchComplete { forfeited_by, .. } = done else {
            unreachable!()
        };
        assert_eq!(forfeited_by, Some(p2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_match_advances_the_invitees_referral() {
        let f = fixture().await;
        let (p1, p2) = (f.duel.player1_id().clone(), f.duel.player2_id().clone());
        let referral = Referral::new(UserId::from_platform(9), p2.clone(), 1_700_000_000).unwrap();
        ReferralRepository::save(f.store.as_ref(), &referral).await.unwrap();

        let mut s1 = f.hub.connect(f.duel.id(), &p1).await.unwrap();
        let mut s2 = f.hub.connect(f.duel.id(), &p2).await.unwrap();
        until(&mut s1, new_question).await;
        s1.send(ClientMessage::Abandon);
        until(&mut s2, |m| matches!(m, ServerMessage::MatchComplete { .. })).await;

        let stored = ReferralRepository::find_by_invitee(f.store.as_ref(), &p2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.reached(), vec![Milestone::Registered, Milestone::ReachedSilver]);
        assert!(ReferralRepository::find_by_invitee(f.store.as_ref(), &p1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_strangers_cannot_join() {
        let f = fixture().await;
        let err = f
            .hub
            .connect(f.duel.id(), &UserId::from_platform(99))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[test]
    fn test_protocol_shapes() {
        let message: ClientMessage = serde_json::from_str(
            r#"{"type":"submit_answer","questionId":"7f1c7a1e-57f1-4c53-9d2f-51f0e2a4f3a1","answerId":"0b6cf1a8-5d2e-4d3b-8a59-6d8f5b4b2c11","timeTakenMs":1500}"#,
        )
        .unwrap();
        assert!(matches!(message, ClientMessage::SubmitAnswer { time_taken_ms: 1500, .. }));

        let json = serde_json::to_value(ServerMessage::OpponentDisconnected {
            player_id: UserId::from_platform(5),
            reconnect_in: 30,
        })
        .unwrap();
        assert_eq!(json["type"], "opponent_disconnected");
        assert_eq!(json["reconnectIn"], 30);
        assert_eq!(serde_json::to_value(ServerMessage::Pong).unwrap()["type"], "pong");
    }
}
