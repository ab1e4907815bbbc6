use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{DomainError, DomainResult};
use crate::models::events::DomainEvent;
use crate::models::ids::{ReferralId, UserId};
use crate::models::rating::League;

/// Duels the invitee must finish before the referral counts as active.
pub const ACTIVE_AFTER_DUELS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    Registered,
    #[serde(rename = "played_5_duels")]
    PlayedFiveDuels,
    ReachedSilver,
    ReachedGold,
    ReachedPlatinum,
}

impl Milestone {
    pub const ALL: [Milestone; 5] = [
        Milestone::Registered,
        Milestone::PlayedFiveDuels,
        Milestone::ReachedSilver,
        Milestone::ReachedGold,
        Milestone::ReachedPlatinum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Milestone::Registered => "registered",
            Milestone::PlayedFiveDuels => "played_5_duels",
            Milestone::ReachedSilver => "reached_silver",
            Milestone::ReachedGold => "reached_gold",
            Milestone::ReachedPlatinum => "reached_platinum",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == value.trim())
            .ok_or_else(|| DomainError::invalid(format!("unknown referral milestone '{value}'")))
    }

    fn league(&self) -> Option<League> {
        match self {
            Milestone::ReachedSilver => Some(League::Silver),
            Milestone::ReachedGold => Some(League::Gold),
            Milestone::ReachedPlatinum => Some(League::Platinum),
            _ => None,
        }
    }

    pub fn reward(&self, side: ReferralSide) -> ReferralReward {
        let (tickets, coins, cosmetic) = match (self, side) {
            (Milestone::Registered, _) => (3, 100, None),
            (Milestone::PlayedFiveDuels, ReferralSide::Inviter) => (5, 300, None),
            (Milestone::PlayedFiveDuels, ReferralSide::Invitee) => (0, 200, None),
            (Milestone::ReachedSilver, ReferralSide::Inviter) => (10, 500, Some("badge:mentor")),
            (Milestone::ReachedSilver, ReferralSide::Invitee) => (0, 300, None),
            (Milestone::ReachedGold, ReferralSide::Inviter) => {
                (20, 1000, Some("avatar:exclusive_referrer"))
            }
            (Milestone::ReachedGold, ReferralSide::Invitee) => (0, 500, None),
            (Milestone::ReachedPlatinum, ReferralSide::Inviter) => {
                (50, 3000, Some("title:legendary_mentor"))
            }
            (Milestone::ReachedPlatinum, ReferralSide::Invitee) => (0, 1000, None),
        };
        ReferralReward {
            tickets,
            coins,
            cosmetic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralSide {
    Inviter,
    Invitee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferralReward {
    pub tickets: u32,
    pub coins: u32,
    /// Cosmetic unlock as `kind:name`.
    pub cosmetic: Option<&'static str>,
}

/// A friend brought in through a challenge link. Milestones follow the
/// invitee's duel career; both sides claim a reward per reached milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    #[serde(rename = "_id")]
    id: ReferralId,
    inviter_id: UserId,
    invitee_id: UserId,
    reached: BTreeSet<Milestone>,
    inviter_claimed: BTreeSet<Milestone>,
    invitee_claimed: BTreeSet<Milestone>,
    created_at: i64,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl Referral {
    pub fn new(inviter_id: UserId, invitee_id: UserId, now: i64) -> DomainResult<Self> {
        if inviter_id == invitee_id {
            return Err(DomainError::invalid("players cannot refer themselves"));
        }
        let id = ReferralId::new();
        let mut referral = Self {
            id,
            inviter_id,
            invitee_id,
            reached: BTreeSet::new(),
            inviter_claimed: BTreeSet::new(),
            invitee_claimed: BTreeSet::new(),
            created_at: now,
            events: Vec::new(),
        };
        referral.events.push(DomainEvent::ReferralCreated {
            referral_id: id,
            inviter_id: referral.inviter_id.clone(),
            invitee_id: referral.invitee_id.clone(),
            at: now,
        });
        referral.reach(Milestone::Registered, now);
        Ok(referral)
    }

    fn reach(&mut self, milestone: Milestone, now: i64) -> bool {
        if !self.reached.insert(milestone) {
            return false;
        }
        self.events.push(DomainEvent::ReferralMilestoneReached {
            referral_id: self.id,
            inviter_id: self.inviter_id.clone(),
            invitee_id: self.invitee_id.clone(),
            milestone,
            at: now,
        });
        true
    }

    /// Records what the invitee has achieved; returns milestones newly reached.
    pub fn update_progress(&mut self, duels_played: u32, league: League, now: i64) -> Vec<Milestone> {
        Milestone::ALL
            .into_iter()
            .filter(|m| match m.league() {
                Some(needed) => league >= needed,
                None => *m != Milestone::PlayedFiveDuels || duels_played >= ACTIVE_AFTER_DUELS,
            })
            .filter(|m| self.reach(*m, now))
            .collect()
    }

    pub fn side_of(&self, player_id: &UserId) -> Option<ReferralSide> {
        if *player_id == self.inviter_id {
            Some(ReferralSide::Inviter)
        } else if *player_id == self.invitee_id {
            Some(ReferralSide::Invitee)
        } else {
            None
        }
    }

    pub fn claim(
        &mut self,
        player_id: &UserId,
        milestone: Milestone,
        now: i64,
    ) -> DomainResult<ReferralReward> {
        let side = self
            .side_of(player_id)
            .ok_or_else(|| DomainError::unauthorized("not part of this referral"))?;
        if !self.reached.contains(&milestone) {
            return Err(DomainError::state(format!(
                "milestone {} is not reached yet",
                milestone.as_str()
            )));
        }
        let claimed = match side {
            ReferralSide::Inviter => &mut self.inviter_claimed,
            ReferralSide::Invitee => &mut self.invitee_claimed,
        };
        if !claimed.insert(milestone) {
            return Err(DomainError::conflict(format!(
                "reward for {} was already claimed",
                milestone.as_str()
            )));
        }
        let reward = milestone.reward(side);
        self.events.push(DomainEvent::ReferralRewardClaimed {
            referral_id: self.id,
            player_id: player_id.clone(),
            milestone,
            tickets: reward.tickets,
            coins: reward.coins,
            at: now,
        });
        Ok(reward)
    }

    /// Reached milestones `side` has not claimed, in milestone order.
    pub fn pending(&self, side: ReferralSide) -> Vec<Milestone> {
        let claimed = match side {
            ReferralSide::Inviter => &self.inviter_claimed,
            ReferralSide::Invitee => &self.invitee_claimed,
        };
        self.reached.difference(claimed).copied().collect()
    }

    pub fn is_active(&self) -> bool {
        self.reached.contains(&Milestone::PlayedFiveDuels)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn id(&self) -> ReferralId {
        self.id
    }

    pub fn inviter_id(&self) -> &UserId {
        &self.inviter_id
    }

    pub fn invitee_id(&self) -> &UserId {
        &self.invitee_id
    }

    pub fn reached(&self) -> Vec<Milestone> {
        self.reached.iter().copied().collect()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }
}
