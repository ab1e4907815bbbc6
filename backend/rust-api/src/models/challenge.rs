use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::models::events::DomainEvent;
use crate::models::ids::{ChallengeId, DuelMatchId, UserId};

pub const DIRECT_CHALLENGE_TTL_SECS: i64 = 60;
pub const LINK_CHALLENGE_TTL_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Direct,
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "_id")]
    id: ChallengeId,
    challenger_id: UserId,
    challenged_id: Option<UserId>,
    kind: ChallengeKind,
    status: ChallengeStatus,
    token: String,
    created_at: i64,
    expires_at: i64,
    match_id: Option<DuelMatchId>,
    rematch_of: Option<DuelMatchId>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl Challenge {
    fn build(
        challenger_id: UserId,
        challenged_id: Option<UserId>,
        kind: ChallengeKind,
        ttl: i64,
        now: i64,
    ) -> Self {
        let id = ChallengeId::new();
        let events = vec![DomainEvent::ChallengeSent {
            challenge_id: id,
            challenger_id: challenger_id.clone(),
            challenged_id: challenged_id.clone(),
            kind,
            at: now,
        }];
        Self {
            id,
            token: id.short(),
            challenger_id,
            challenged_id,
            kind,
            status: ChallengeStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            match_id: None,
            rematch_of: None,
            events,
        }
    }

    pub fn direct(challenger_id: UserId, challenged_id: UserId, now: i64) -> DomainResult<Self> {
        if challenger_id == challenged_id {
            return Err(DomainError::invalid("you cannot challenge yourself"));
        }
        Ok(Self::build(
            challenger_id,
            Some(challenged_id),
            ChallengeKind::Direct,
            DIRECT_CHALLENGE_TTL_SECS,
            now,
        ))
    }

    pub fn link(challenger_id: UserId, now: i64) -> Self {
        Self::build(
            challenger_id,
            None,
            ChallengeKind::Link,
            LINK_CHALLENGE_TTL_SECS,
            now,
        )
    }

    pub fn rematch(
        challenger_id: UserId,
        challenged_id: UserId,
        previous: DuelMatchId,
        now: i64,
    ) -> DomainResult<Self> {
        let mut challenge = Self::direct(challenger_id, challenged_id, now)?;
        challenge.rematch_of = Some(previous);
        Ok(challenge)
    }

    /// Moves a stale pending challenge to `expired`; returns true on that transition.
    pub fn refresh_expiry(&mut self, now: i64) -> bool {
        if self.status != ChallengeStatus::Pending || now < self.expires_at {
            return false;
        }
        self.status = ChallengeStatus::Expired;
        self.events.push(DomainEvent::ChallengeExpired {
            challenge_id: self.id,
            challenger_id: self.challenger_id.clone(),
            at: now,
        });
        true
    }

    fn ensure_pending(&mut self, now: i64) -> DomainResult<()> {
        self.refresh_expiry(now);
        match self.status {
            ChallengeStatus::Pending => Ok(()),
            ChallengeStatus::Expired => Err(DomainError::not_available("challenge has expired")),
            _ => Err(DomainError::state("challenge was already answered")),
        }
    }

    /// Binds the opponent; a link challenge goes to the first other user who accepts.
    pub fn accept(&mut self, by: &UserId, now: i64) -> DomainResult<()> {
        self.ensure_pending(now)?;
        match self.kind {
            ChallengeKind::Direct => {
                if self.challenged_id.as_ref() != Some(by) {
                    return Err(DomainError::unauthorized("challenge is addressed to someone else"));
                }
            }
            ChallengeKind::Link => {
                if by == &self.challenger_id {
                    return Err(DomainError::invalid("you cannot accept your own challenge"));
                }
                self.challenged_id = Some(by.clone());
            }
        }
        self.status = ChallengeStatus::Accepted;
        Ok(())
    }

    /// Records the match created for an accepted challenge.
    pub fn bind_match(&mut self, match_id: DuelMatchId, now: i64) -> DomainResult<()> {
        if self.status != ChallengeStatus::Accepted {
            return Err(DomainError::state("challenge is not accepted"));
        }
        let challenged_id = self
            .challenged_id
            .clone()
            .ok_or_else(|| DomainError::internal("accepted challenge has no opponent"))?;
        self.match_id = Some(match_id);
        self.events.push(DomainEvent::ChallengeAccepted {
            challenge_id: self.id,
            challenger_id: self.challenger_id.clone(),
            challenged_id,
            match_id,
            at: now,
        });
        Ok(())
    }

    pub fn decline(&mut self, by: &UserId, now: i64) -> DomainResult<()> {
        if self.kind == ChallengeKind::Link {
            return Err(DomainError::invalid("link challenges cannot be declined"));
        }
        self.ensure_pending(now)?;
        if self.challenged_id.as_ref() != Some(by) {
            return Err(DomainError::unauthorized("challenge is addressed to someone else"));
        }
        self.status = ChallengeStatus::Declined;
        self.events.push(DomainEvent::ChallengeDeclined {
            challenge_id: self.id,
            challenger_id: self.challenger_id.clone(),
            challenged_id: by.clone(),
            at: now,
        });
        Ok(())
    }

    pub fn share_link(&self, bot_username: &str) -> String {
        format!("https://t.me/{}?start=duel_{}", bot_username, self.token)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn id(&self) -> ChallengeId {
        self.id
    }

    pub fn challenger_id(&self) -> &UserId {
        &self.challenger_id
    }

    pub fn challenged_id(&self) -> Option<&UserId> {
        self.challenged_id.as_ref()
    }

    pub fn kind(&self) -> ChallengeKind {
        self.kind
    }

    pub fn status(&self) -> ChallengeStatus {
        self.status
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn match_id(&self) -> Option<DuelMatchId> {
        self.match_id
    }

    pub fn rematch_of(&self) -> Option<DuelMatchId> {
        self.rematch_of
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: i64) -> UserId {
        UserId::from_platform(id)
    }

    #[test]
    fn test_cannot_challenge_self() {
        assert!(Challenge::direct(p(1), p(1), 0).is_err());
    }

    #[test]
    fn test_direct_challenge_expires_on_access() {
        let mut challenge = Challenge::direct(p(1), p(2), 0).unwrap();
        let err = challenge.accept(&p(2), DIRECT_CHALLENGE_TTL_SECS).unwrap_err();
        assert!(matches!(err, DomainError::NotAvailable(_)));
        assert_eq!(challenge.status(), ChallengeStatus::Expired);
    }

    #[test]
    fn test_only_the_challenged_player_responds() {
        let mut challenge = Challenge::direct(p(1), p(2), 0).unwrap();
        assert!(matches!(
            challenge.accept(&p(3), 1),
            Err(DomainError::Unauthorized(_))
        ));
        challenge.decline(&p(2), 2).unwrap();
        assert_eq!(challenge.status(), ChallengeStatus::Declined);
        assert!(challenge.accept(&p(2), 3).is_err());
    }

    #[test]
    fn test_link_binds_first_acceptor() {
        let mut challenge = Challenge::link(p(1), 0);
        assert!(challenge.decline(&p(2), 1).is_err());
        assert!(challenge.accept(&p(1), 1).is_err());
        challenge.accept(&p(3), 2).unwrap();
        assert_eq!(challenge.challenged_id(), Some(&p(3)));
        assert!(challenge.accept(&p(4), 3).is_err());

        let match_id = DuelMatchId::new();
        challenge.bind_match(match_id, 4).unwrap();
        assert_eq!(challenge.match_id(), Some(match_id));
        assert_eq!(
            challenge.share_link("quizsprintbot"),
            format!("https://t.me/quizsprintbot?start=duel_{}", challenge.token())
        );
    }
}
