//! Season and referral bookkeeping shared by the duel service and match actors.

use crate::error::DomainResult;
use crate::models::{DomainEvent, PlayerRating, Season, UserId};
use crate::services::event_bus::EventBus;
use crate::services::repositories::{PlayerRatingRepository, ReferralRepository};

/// Loads the player's rating, moving it into the current season first.
pub async fn load_rating(
    ratings: &dyn PlayerRatingRepository,
    events: &dyn EventBus,
    player_id: &UserId,
    now: i64,
) -> DomainResult<PlayerRating> {
    let Some(mut rating) = ratings.find(player_id).await? else {
        return Ok(PlayerRating::new(player_id.clone(), now));
    };
    let season_id = Season::id_at(now);
    if let Some(previous) = rating.enter_season(&season_id, now) {
        ratings.save(&rating).await?;
        tracing::info!(
            "{} moved from season {} to {} at MMR {}",
            player_id,
            previous,
            season_id,
            rating.mmr
        );
        events.publish(DomainEvent::SeasonReset {
            player_id: player_id.clone(),
            previous_season_id: previous,
            season_id,
            mmr: rating.mmr,
            at: now,
        });
    }
    Ok(rating)
}

/// Advances the referral of an invitee after a finished duel.
pub async fn track_referral(
    referrals: &dyn ReferralRepository,
    events: &dyn EventBus,
    rating: &PlayerRating,
    now: i64,
) -> DomainResult<()> {
    let Some(mut referral) = referrals.find_by_invitee(&rating.player_id).await? else {
        return Ok(());
    };
    let reached = referral.update_progress(rating.games_played, rating.league(), now);
    if reached.is_empty() {
        return Ok(());
    }
    referrals.save(&referral).await?;
    events.publish_all(referral.take_events());
    tracing::info!(
        "Referral {} of {} reached {:?}",
        referral.id(),
        rating.player_id,
        reached
    );
    Ok(())
}
