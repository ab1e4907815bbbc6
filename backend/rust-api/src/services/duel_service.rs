use std::sync::Arc;

use crate::error::{DomainError, DomainResult};
use crate::metrics::DUEL_MATCHES_TOTAL;
use crate::models::duel::QUESTIONS_PER_DUEL;
use crate::models::dto::{
    leaderboard_limit, ChallengeResponse, ChallengeView, ClaimReferralResponse, DuelHistoryEntry,
    DuelLeaderboard, DuelLeaderboardEntries, DuelLeaderboardEntry, DuelLeaderboardKind,
    DuelMatchView, DuelResult, DuelStatusView, QueueView, RatingView, ReferralLeaderboardEntry,
    ReferralView, ReferralsView, RematchResponse,
};
use crate::models::{
    Challenge, ChallengeId, ChallengeKind, DomainEvent, DuelMatch, DuelMatchId, DuelStatus,
    Milestone, PlayerRating, Referral, ReferralSide, Season, UserId, Wallet,
};
use crate::services::duel_progress::load_rating;
use crate::services::event_bus::EventBus;
use crate::services::matchmaking::{MatchmakingQueue, QueueEntry};
use crate::services::question_selector::QuestionSelector;
use crate::services::repositories::{
    ChallengeRepository, DuelMatchRepository, PlayerRatingRepository, ReferralRepository,
    Repositories,
};
use crate::services::user_service::UserService;
use crate::utils::time::Clock;

/// Queue, challenges and queries around duel matches. Live rounds belong to the coordinator.
pub struct DuelService {
    duels: Arc<dyn DuelMatchRepository>,
    challenges: Arc<dyn ChallengeRepository>,
    ratings: Arc<dyn PlayerRatingRepository>,
    referrals: Arc<dyn ReferralRepository>,
    selector: QuestionSelector,
    queue: Arc<dyn MatchmakingQueue>,
    users: UserService,
    events: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    bot_username: String,
}

impl DuelService {
    pub fn new(
        repos: &Repositories,
        users: UserService,
        queue: Arc<dyn MatchmakingQueue>,
        events: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        bot_username: impl Into<String>,
    ) -> Self {
        Self {
            duels: repos.duel_matches.clone(),
            challenges: repos.challenges.clone(),
            ratings: repos.ratings.clone(),
            referrals: repos.referrals.clone(),
            selector: QuestionSelector::new(repos.questions.clone()),
            queue,
            users,
            events,
            clock,
            bot_username: bot_username.into(),
        }
    }

    pub async fn rating(&self, player_id: &UserId) -> DomainResult<PlayerRating> {
        load_rating(
            self.ratings.as_ref(),
            self.events.as_ref(),
            player_id,
            self.clock.now(),
        )
        .await
    }

    /// Takes a ticket and waits for an opponent; pairs immediately when one fits.
    pub async fn join_queue(&self, player_id: &UserId) -> DomainResult<QueueView> {
        if self.queue.contains(player_id).await? {
            return Err(DomainError::conflict("already in the matchmaking queue"));
        }
        self.ensure_not_in_match(player_id).await?;

        let rating = self.rating(player_id).await?;
        let wallet = self.users.consume_ticket(player_id).await?;
        let entry = QueueEntry::new(player_id.clone(), rating.mmr, self.clock.now_millis());
        match self.queue.join(entry).await {
            Ok(true) => {}
            Ok(false) => {
                self.users.refund_ticket(player_id).await?;
                return Err(DomainError::conflict("already in the matchmaking queue"));
            }
            Err(e) => {
                self.users.refund_ticket(player_id).await?;
                return Err(e);
            }
        }
        tracing::info!("{} joined the duel queue with MMR {}", player_id, rating.mmr);
        self.events.publish(DomainEvent::PlayerJoinedQueue {
            player_id: player_id.clone(),
            mmr: rating.mmr,
            at: self.clock.now(),
        });

        let created = self.sweep_queue().await?;
        let match_id = created
            .iter()
            .find(|duel| duel.is_participant(player_id))
            .map(DuelMatch::id);

        Ok(QueueView {
            in_queue: match_id.is_none(),
            queue_size: self.queue.size().await?,
            tickets: wallet.tickets,
            match_id,
        })
    }

    /// Leaves the queue and refunds the ticket. Leaving twice is harmless.
    pub async fn leave_queue(&self, player_id: &UserId) -> DomainResult<QueueView> {
        let wallet = match self.withdraw_from_queue(player_id).await? {
            Some(wallet) => wallet,
            None => self.users.wallet(player_id).await?,
        };
        Ok(QueueView {
            in_queue: false,
            queue_size: self.queue.size().await?,
            tickets: wallet.tickets,
            match_id: None,
        })
    }

    /// Pairs every compatible couple currently waiting.
    pub async fn sweep_queue(&self) -> DomainResult<Vec<DuelMatch>> {
        let mut created = Vec::new();
        while let Some((first, second)) = self.queue.find_pair(self.clock.now_millis()).await? {
            match self
                .create_match(first.player_id.clone(), second.player_id.clone(), None)
                .await
            {
                Ok(duel) => created.push(duel),
                Err(e) => {
                    tracing::error!(
                        "Could not create duel for {} and {}: {}",
                        first.player_id,
                        second.player_id,
                        e
                    );
                    for entry in [first, second] {
                        self.queue.join(entry).await?;
                    }
                    break;
                }
            }
        }
        Ok(created)
    }

    pub async fn create_match(
        &self,
        player1_id: UserId,
        player2_id: UserId,
        rematch_of: Option<DuelMatchId>,
    ) -> DomainResult<DuelMatch> {
        let question_ids = self.selector.select_random_ids(QUESTIONS_PER_DUEL).await?;
        let mut duel = DuelMatch::new(player1_id, player2_id, question_ids, self.clock.now())?;
        if let Some(previous) = rematch_of {
            duel = duel.with_rematch_of(previous);
        }
        self.duels.save(&duel).await?;
        self.events.publish_all(duel.take_events());
        DUEL_MATCHES_TOTAL.with_label_values(&["created"]).inc();
        tracing::info!(
            "Duel {} created for {} vs {}",
            duel.id(),
            duel.player1_id(),
            duel.player2_id()
        );
        Ok(duel)
    }

    pub async fn send_challenge(
        &self,
        player_id: &UserId,
        friend_id: &UserId,
    ) -> DomainResult<ChallengeView> {
        if player_id == friend_id {
            return Err(DomainError::invalid("you cannot challenge yourself"));
        }
        self.users.get_profile(friend_id).await?;
        self.ensure_not_in_match(player_id).await?;
        if self.active_match(friend_id).await?.is_some() {
            return Err(DomainError::conflict("your friend is already in a duel"));
        }

        let mut challenge = Challenge::direct(player_id.clone(), friend_id.clone(), self.clock.now())?;
        self.save_challenge(&mut challenge).await?;
        tracing::info!("{} challenged {}", player_id, friend_id);
        Ok(self.challenge_view(&challenge))
    }

    pub async fn create_challenge_link(&self, player_id: &UserId) -> DomainResult<ChallengeView> {
        let mut challenge = Challenge::link(player_id.clone(), self.clock.now());
        self.save_challenge(&mut challenge).await?;
        tracing::info!("{} created challenge link {}", player_id, challenge.token());
        Ok(self.challenge_view(&challenge))
    }

    pub async fn respond_challenge(
        &self,
        player_id: &UserId,
        challenge_id: ChallengeId,
        accept: bool,
    ) -> DomainResult<ChallengeResponse> {
        let challenge = self
            .challenges
            .find_by_id(challenge_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("challenge {}", challenge_id)))?;
        self.respond(player_id, challenge, accept).await
    }

    /// Accepts a shared link by its token.
    pub async fn accept_link(&self, player_id: &UserId, token: &str) -> DomainResult<ChallengeResponse> {
        let token = token.trim().trim_start_matches("duel_");
        let challenge = self
            .challenges
            .find_by_token(token)
            .await?
            .filter(|c| c.kind() == ChallengeKind::Link)
            .ok_or_else(|| DomainError::not_found(format!("challenge link {}", token)))?;
        self.respond(player_id, challenge, true).await
    }

    async fn respond(
        &self,
        player_id: &UserId,
        mut challenge: Challenge,
        accept: bool,
    ) -> DomainResult<ChallengeResponse> {
        let now = self.clock.now();
        if challenge.refresh_expiry(now) {
            self.save_challenge(&mut challenge).await?;
            return Err(DomainError::not_available("challenge has expired"));
        }

        if !accept {
            challenge.decline(player_id, now)?;
            self.save_challenge(&mut challenge).await?;
            tracing::info!("{} declined challenge {}", player_id, challenge.id());
            return Ok(ChallengeResponse {
                challenge: self.challenge_view(&challenge),
                duel: None,
            });
        }

        challenge.accept(player_id, now)?;
        self.ensure_not_in_match(player_id).await?;
        if self.active_match(challenge.challenger_id()).await?.is_some() {
            return Err(DomainError::conflict("the challenger is already in a duel"));
        }
        if challenge.kind() == ChallengeKind::Link {
            self.bind_referral(challenge.challenger_id(), player_id).await?;
        }
        // a challenge match replaces any queue ticket either side holds
        for id in [challenge.challenger_id(), player_id] {
            self.withdraw_from_queue(id).await?;
        }

        let duel = self
            .create_match(
                challenge.challenger_id().clone(),
                player_id.clone(),
                challenge.rematch_of(),
            )
            .await?;
        challenge.bind_match(duel.id(), now)?;
        self.save_challenge(&mut challenge).await?;
        tracing::info!("{} accepted challenge {}", player_id, challenge.id());
        Ok(ChallengeResponse {
            challenge: self.challenge_view(&challenge),
            duel: Some(DuelMatchView::from(&duel)),
        })
    }

    /// Asks for a rematch; when the opponent already asked, the new match starts right away.
    pub async fn request_rematch(
        &self,
        player_id: &UserId,
        match_id: DuelMatchId,
    ) -> DomainResult<RematchResponse> {
        let duel = self
            .duels
            .find_by_id(match_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("duel {}", match_id)))?;
        let opponent = duel
            .opponent_of(player_id)
            .cloned()
            .ok_or_else(|| DomainError::unauthorized("player is not part of this duel"))?;
        let now = self.clock.now();
        if !duel.can_rematch(now) {
            return Err(DomainError::not_available("rematch window is closed"));
        }

        if let Some(pending) = self.challenges.find_pending_rematch(match_id, &opponent).await? {
            let response = self.respond(player_id, pending, true).await?;
            return Ok(RematchResponse {
                duel: response.duel,
                challenge: Some(response.challenge),
            });
        }

        if let Some(mut own) = self.challenges.find_pending_rematch(match_id, player_id).await? {
            if !own.refresh_expiry(now) {
                return Ok(RematchResponse {
                    duel: None,
                    challenge: Some(self.challenge_view(&own)),
                });
            }
            self.save_challenge(&mut own).await?;
        }

        self.ensure_not_in_match(player_id).await?;
        let mut challenge = Challenge::rematch(player_id.clone(), opponent, match_id, now)?;
        self.save_challenge(&mut challenge).await?;
        tracing::info!("{} requested a rematch of {}", player_id, match_id);
        Ok(RematchResponse {
            duel: None,
            challenge: Some(self.challenge_view(&challenge)),
        })
    }

    pub async fn status(&self, player_id: &UserId) -> DomainResult<DuelStatusView> {
        let rating = self.rating(player_id).await?;
        let wallet = self.users.wallet(player_id).await?;
        let active = self.active_match(player_id).await?;

        let now = self.clock.now();
        let mut pending = Vec::new();
        for mut challenge in self.challenges.find_pending_for(player_id).await? {
            if challenge.refresh_expiry(now) {
                self.save_challenge(&mut challenge).await?;
            } else {
                pending.push(self.challenge_view(&challenge));
            }
        }

        Ok(DuelStatusView {
            rating: RatingView::from(&rating),
            tickets: wallet.tickets,
            in_queue: self.queue.contains(player_id).await?,
            queue_size: self.queue.size().await?,
            active_match: active.as_ref().map(DuelMatchView::from),
            pending_challenges: pending,
        })
    }

    pub async fn history(
        &self,
        player_id: &UserId,
        limit: Option<usize>,
    ) -> DomainResult<Vec<DuelHistoryEntry>> {
        let duels: Vec<DuelMatch> = self
            .duels
            .find_by_player(player_id, leaderboard_limit(limit))
            .await?
            .into_iter()
            .filter(|d| d.status().is_terminal())
            .collect();
        let opponents: Vec<UserId> = duels
            .iter()
            .filter_map(|d| d.opponent_of(player_id).cloned())
            .collect();
        let names = self.users.display_names(&opponents).await?;

        let mut entries = Vec::with_capacity(duels.len());
        for duel in &duels {
            let Some(opponent) = duel.opponent_of(player_id) else {
                continue;
            };
            let result = match (duel.status(), duel.winner_id()) {
                (DuelStatus::Abandoned, _) => DuelResult::Abandoned,
                (_, None) => DuelResult::Draw,
                (_, Some(winner)) if winner == player_id => DuelResult::Win,
                _ => DuelResult::Loss,
            };
            let mmr_delta = duel.mmr_delta().map(|delta| {
                if duel.player1_id() == player_id {
                    delta.player1
                } else {
                    delta.player2
                }
            });
            entries.push(DuelHistoryEntry {
                match_id: duel.id(),
                opponent_id: opponent.clone(),
                opponent_username: names.get(opponent).cloned().unwrap_or_default(),
                my_score: duel.score_of(player_id),
                opponent_score: duel.score_of(opponent),
                result,
                mmr_delta,
                finished_at: duel.finished_at(),
            });
        }
        Ok(entries)
    }

    /// Seasonal, all-time or referral standings. `viewer` gets their own rank filled in.
    pub async fn leaderboard(
        &self,
        kind: DuelLeaderboardKind,
        limit: Option<usize>,
        viewer: Option<&UserId>,
    ) -> DomainResult<DuelLeaderboard> {
        let limit = leaderboard_limit(limit);
        let season = Season::at(self.clock.now());
        let (entries, player_rank) = match kind {
            DuelLeaderboardKind::Seasonal => {
                let top = self.ratings.find_top_in_season(&season.id, limit).await?;
                let rank = match viewer {
                    Some(id) => self.ratings.rank_in_season(id, &season.id).await?,
                    None => None,
                };
                (DuelLeaderboardEntries::Ratings(self.rating_entries(top).await?), rank)
            }
            DuelLeaderboardKind::AllTime => {
                let top = self.ratings.find_top(limit).await?;
                let rank = viewer.and_then(|id| {
                    top.iter()
                        .position(|r| r.player_id == *id)
                        .map(|i| i as u32 + 1)
                });
                (DuelLeaderboardEntries::Ratings(self.rating_entries(top).await?), rank)
            }
            DuelLeaderboardKind::Referrals => {
                let rows = self.referrals.leaderboard(limit).await?;
                let rank = match viewer {
                    Some(id) => self.referrals.rank_of(id).await?,
                    None => None,
                };
                let ids: Vec<UserId> = rows.iter().map(|r| r.inviter_id.clone()).collect();
                let names = self.users.display_names(&ids).await?;
                let entries = rows
                    .into_iter()
                    .enumerate()
                    .map(|(i, row)| ReferralLeaderboardEntry {
                        rank: i as u32 + 1,
                        username: names.get(&row.inviter_id).cloned().unwrap_or_default(),
                        total_referrals: row.total,
                        active_referrals: row.active,
                        player_id: row.inviter_id,
                    })
                    .collect();
                (DuelLeaderboardEntries::Referrals(entries), rank)
            }
        };
        Ok(DuelLeaderboard {
            kind,
            season_id: season.id,
            ends_at: season.ends_at,
            entries,
            player_rank,
        })
    }

    async fn rating_entries(&self, top: Vec<PlayerRating>) -> DomainResult<Vec<DuelLeaderboardEntry>> {
        let ids: Vec<UserId> = top.iter().map(|r| r.player_id.clone()).collect();
        let names = self.users.display_names(&ids).await?;
        Ok(top
            .into_iter()
            .enumerate()
            .map(|(i, rating)| DuelLeaderboardEntry {
                rank: i as u32 + 1,
                username: names.get(&rating.player_id).cloned().unwrap_or_default(),
                mmr: rating.mmr,
                league: rating.league(),
                division: rating.division(),
                wins: rating.wins,
                losses: rating.losses,
                draws: rating.draws,
                player_id: rating.player_id,
            })
            .collect())
    }

    /// Friends the player brought in, plus who invited them.
    pub async fn referrals(&self, player_id: &UserId) -> DomainResult<ReferralsView> {
        let invited = self.referrals.find_by_inviter(player_id).await?;
        let invited_by = self.referrals.find_by_invitee(player_id).await?;

        let mut ids: Vec<UserId> = invited.iter().map(|r| r.invitee_id().clone()).collect();
        if let Some(referral) = &invited_by {
            ids.push(referral.inviter_id().clone());
        }
        let names = self.users.display_names(&ids).await?;
        let view = |referral: &Referral, side: ReferralSide| {
            let friend_id = match side {
                ReferralSide::Inviter => referral.invitee_id(),
                ReferralSide::Invitee => referral.inviter_id(),
            };
            ReferralView {
                referral_id: referral.id(),
                friend_id: friend_id.clone(),
                friend_username: names.get(friend_id).cloned().unwrap_or_default(),
                milestones: referral.reached(),
                pending_rewards: referral.pending(side),
                created_at: referral.created_at(),
            }
        };

        Ok(ReferralsView {
            total_referrals: invited.len() as u32,
            active_referrals: invited.iter().filter(|r| r.is_active()).count() as u32,
            leaderboard_rank: self.referrals.rank_of(player_id).await?,
            referrals: invited
                .iter()
                .map(|r| view(r, ReferralSide::Inviter))
                .collect(),
            invited_by: invited_by.as_ref().map(|r| view(r, ReferralSide::Invitee)),
        })
    }

    /// Claims the player's reward for `milestone` of the referral shared with `friend_id`.
    pub async fn claim_referral_reward(
        &self,
        player_id: &UserId,
        friend_id: &UserId,
        milestone: Milestone,
    ) -> DomainResult<ClaimReferralResponse> {
        let mut referral = match self.referrals.find_by_invitee(friend_id).await? {
            Some(r) if r.inviter_id() == player_id => r,
            _ => self
                .referrals
                .find_by_invitee(player_id)
                .await?
                .filter(|r| r.inviter_id() == friend_id)
                .ok_or_else(|| DomainError::not_found(format!("referral with {}", friend_id)))?,
        };
        let unclaimed = referral.clone();
        let reward = referral.claim(player_id, milestone, self.clock.now())?;
        self.referrals.save(&referral).await?;

        let wallet = match self.users.grant(player_id, reward.coins, reward.tickets).await {
            Ok(wallet) => wallet,
            Err(e) => {
                tracing::warn!(
                    "Reopening {} reward of referral {}: {}",
                    milestone.as_str(),
                    referral.id(),
                    e
                );
                self.referrals.save(&unclaimed).await?;
                return Err(e);
            }
        };
        self.events.publish_all(referral.take_events());
        tracing::info!(
            "{} claimed {} of referral {}: {} coins, {} tickets",
            player_id,
            milestone.as_str(),
            referral.id(),
            reward.coins,
            reward.tickets
        );
        Ok(ClaimReferralResponse {
            milestone,
            tickets: reward.tickets,
            coins: reward.coins,
            cosmetic: reward.cosmetic,
            wallet_coins: wallet.coins,
            wallet_tickets: wallet.tickets,
        })
    }

    /// Records `invitee` as brought in by `inviter` when they have never dueled before.
    async fn bind_referral(&self, inviter: &UserId, invitee: &UserId) -> DomainResult<()> {
        if self.referrals.find_by_invitee(invitee).await?.is_some() {
            return Ok(());
        }
        let veteran = self
            .ratings
            .find(invitee)
            .await?
            .is_some_and(|rating| rating.games_played > 0);
        if veteran {
            return Ok(());
        }
        let mut referral = Referral::new(inviter.clone(), invitee.clone(), self.clock.now())?;
        match self.referrals.save(&referral).await {
            Ok(()) => {
                self.events.publish_all(referral.take_events());
                tracing::info!("{} joined through a link from {}", invitee, inviter);
                Ok(())
            }
            Err(DomainError::Conflict(_)) => {
                tracing::debug!("{} was referred concurrently", invitee);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_not_in_match(&self, player_id: &UserId) -> DomainResult<()> {
        if let Some(active) = self.active_match(player_id).await? {
            tracing::warn!("{} is still in duel {}", player_id, active.id());
            return Err(DomainError::conflict("finish your current duel first"));
        }
        Ok(())
    }

    /// The player's live match. A pending match past its ready deadline is abandoned on read.
    async fn active_match(&self, player_id: &UserId) -> DomainResult<Option<DuelMatch>> {
        let Some(mut duel) = self.duels.find_active_by_player(player_id).await? else {
            return Ok(None);
        };
        let now = self.clock.now();
        if !duel.ready_expired(now) {
            return Ok(Some(duel));
        }
        duel.abandon(now)?;
        self.duels.save(&duel).await?;
        self.events.publish_all(duel.take_events());
        DUEL_MATCHES_TOTAL.with_label_values(&["abandoned"]).inc();
        tracing::info!("Duel {} abandoned: players never got ready", duel.id());
        Ok(None)
    }

    /// Takes the player out of the queue and refunds the ticket; `None` when not queued.
    async fn withdraw_from_queue(&self, player_id: &UserId) -> DomainResult<Option<Wallet>> {
        if !self.queue.leave(player_id).await? {
            return Ok(None);
        }
        tracing::info!("{} left the duel queue", player_id);
        self.events.publish(DomainEvent::PlayerLeftQueue {
            player_id: player_id.clone(),
            at: self.clock.now(),
        });
        self.users.refund_ticket(player_id).await.map(Some)
    }

    async fn save_challenge(&self, challenge: &mut Challenge) -> DomainResult<()> {
        self.challenges.save(challenge).await?;
        self.events.publish_all(challenge.take_events());
        Ok(())
    }

    fn challenge_view(&self, challenge: &Challenge) -> ChallengeView {
        ChallengeView::new(challenge, &self.bot_username)
    }
}
