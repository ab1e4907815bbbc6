use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::ids::UserId;
use crate::utils::time::{date_of, day_start};

pub const INITIAL_MMR: i32 = 1000;
pub const MIN_MMR: i32 = 100;
pub const ELO_K: f64 = 32.0;
const DIVISION_SPAN: i32 = 125;

/// A ranked season: one calendar month in UTC, identified as `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Season {
    pub id: String,
    pub starts_at: i64,
    pub ends_at: i64,
}

impl Season {
    pub fn at(now: i64) -> Self {
        let today = date_of(now);
        let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
        let next = first.checked_add_months(Months::new(1)).unwrap_or(first);
        Self {
            id: first.format("%Y-%m").to_string(),
            starts_at: day_start(first),
            ends_at: day_start(next),
        }
    }

    pub fn id_at(now: i64) -> String {
        Self::at(now).id
    }
}

/// Half of the distance to the starting rating is kept.
pub fn season_reset_mmr(mmr: i32) -> i32 {
    INITIAL_MMR + (mmr - INITIAL_MMR) / 2
}

/// Expected score of `mmr` against `opponent_mmr`.
pub fn expected_score(mmr: i32, opponent_mmr: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent_mmr - mmr) / 400.0))
}

/// Elo delta for a result: 1.0 win, 0.5 draw, 0.0 loss.
pub fn mmr_delta(mmr: i32, opponent_mmr: i32, score: f64) -> i32 {
    (ELO_K * (score - expected_score(mmr, opponent_mmr))).round() as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Win,
    Loss,
    Draw,
}

impl MatchOutcome {
    pub fn score(&self) -> f64 {
        match self {
            MatchOutcome::Win => 1.0,
            MatchOutcome::Draw => 0.5,
            MatchOutcome::Loss => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum League {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Legend,
}

impl League {
    const FLOORS: [(League, i32); 6] = [
        (League::Legend, 3000),
        (League::Diamond, 2500),
        (League::Platinum, 2000),
        (League::Gold, 1500),
        (League::Silver, 1000),
        (League::Bronze, 0),
    ];

    pub fn for_mmr(mmr: i32) -> Self {
        Self::FLOORS
            .iter()
            .find(|(_, floor)| mmr >= *floor)
            .map(|(league, _)| *league)
            .unwrap_or(League::Bronze)
    }

    pub fn floor(&self) -> i32 {
        Self::FLOORS
            .iter()
            .find(|(league, _)| league == self)
            .map(|(_, floor)| *floor)
            .unwrap_or(0)
    }

    /// Division IV..I inside the league, `None` for Legend.
    pub fn division(mmr: i32) -> Option<&'static str> {
        let league = Self::for_mmr(mmr);
        if league == League::Legend {
            return None;
        }
        let step = ((mmr - league.floor()) / DIVISION_SPAN).clamp(0, 3);
        Some(["IV", "III", "II", "I"][step as usize])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRating {
    #[serde(rename = "_id")]
    pub player_id: UserId,
    pub mmr: i32,
    pub peak_mmr: i32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub win_streak: u32,
    pub games_played: u32,
    #[serde(default)]
    pub season_id: String,
    #[serde(default)]
    pub season_wins: u32,
    #[serde(default)]
    pub season_losses: u32,
    pub updated_at: i64,
}

impl PlayerRating {
    pub fn new(player_id: UserId, now: i64) -> Self {
        Self {
            player_id,
            mmr: INITIAL_MMR,
            peak_mmr: INITIAL_MMR,
            wins: 0,
            losses: 0,
            draws: 0,
            win_streak: 0,
            games_played: 0,
            season_id: Season::id_at(now),
            season_wins: 0,
            season_losses: 0,
            updated_at: now,
        }
    }

    /// Moves the rating into `season_id`, softly resetting MMR when it comes
    /// from an earlier season. Returns the season left behind, if any.
    pub fn enter_season(&mut self, season_id: &str, now: i64) -> Option<String> {
        if self.season_id == season_id {
            return None;
        }
        let previous = std::mem::replace(&mut self.season_id, season_id.to_string());
        self.season_wins = 0;
        self.season_losses = 0;
        self.updated_at = now;
        if previous.is_empty() {
            return None;
        }
        self.mmr = season_reset_mmr(self.mmr);
        Some(previous)
    }

    /// Applies a finished match and returns the delta actually applied.
    pub fn apply(&mut self, outcome: MatchOutcome, delta: i32, now: i64) -> i32 {
        let before = self.mmr;
        self.mmr = (self.mmr + delta).max(MIN_MMR);
        self.peak_mmr = self.peak_mmr.max(self.mmr);
        self.games_played += 1;
        match outcome {
            MatchOutcome::Win => {
                self.wins += 1;
                self.season_wins += 1;
                self.win_streak += 1;
            }
            MatchOutcome::Loss => {
                self.losses += 1;
                self.season_losses += 1;
                self.win_streak = 0;
            }
            MatchOutcome::Draw => {
                self.draws += 1;
                self.win_streak = 0;
            }
        }
        self.updated_at = now;
        self.mmr - before
    }

    pub fn league(&self) -> League {
        League::for_mmr(self.mmr)
    }

    pub fn division(&self) -> Option<&'static str> {
        League::division(self.mmr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_ratings_split_k() {
        assert_eq!(mmr_delta(1000, 1000, 1.0), 16);
        assert_eq!(mmr_delta(1000, 1000, 0.0), -16);
        assert_eq!(mmr_delta(1000, 1000, 0.5), 0);
    }

    #[test]
    fn test_upset_pays_more() {
        let underdog = mmr_delta(1000, 1400, 1.0);
        let favourite = mmr_delta(1400, 1000, 1.0);
        assert!(underdog > favourite);
        assert_eq!(underdog, 29);
        assert_eq!(favourite, 3);
    }

    #[test]
    fn test_rating_floor_and_peak() {
        let mut rating = PlayerRating::new(UserId::from_platform(1), 0);
        rating.mmr = 110;
        let applied = rating.apply(MatchOutcome::Loss, -16, 1);
        assert_eq!(rating.mmr, MIN_MMR);
        assert_eq!(applied, -10);
        assert_eq!(rating.peak_mmr, INITIAL_MMR);

        rating.mmr = 1200;
        rating.apply(MatchOutcome::Win, 20, 2);
        assert_eq!(rating.peak_mmr, 1220);
        assert_eq!(rating.win_streak, 1);
        assert_eq!(rating.games_played, 2);
    }

    #[test]
    fn test_leagues_and_divisions() {
        assert_eq!(League::for_mmr(999), League::Bronze);
        assert_eq!(League::for_mmr(1000), League::Silver);
        assert_eq!(League::division(1000), Some("IV"));
        assert_eq!(League::division(1380), Some("I"));
        assert_eq!(League::for_mmr(3100), League::Legend);
        assert_eq!(League::division(3100), None);
    }

    #[test]
    fn test_season_is_the_utc_calendar_month() {
        // 2024-02-29T23:59:59Z
        let season = Season::at(1_709_251_199);
        assert_eq!(season.id, "2024-02");
        assert_eq!(season.starts_at, 1_706_745_600);
        assert_eq!(season.ends_at, 1_709_251_200);
        assert_eq!(Season::id_at(season.ends_at), "2024-03");
    }

    #[test]
    fn test_new_season_halves_distance_to_start() {
        assert_eq!(season_reset_mmr(1800), 1400);
        assert_eq!(season_reset_mmr(1000), 1000);
        assert_eq!(season_reset_mmr(700), 850);
        assert_eq!(season_reset_mmr(MIN_MMR), 550);

        let mut rating = PlayerRating::new(UserId::from_platform(1), 1_706_745_600);
        assert_eq!(rating.season_id, "2024-02");
        rating.mmr = 1800;
        rating.apply(MatchOutcome::Win, 10, 1_706_745_700);
        assert_eq!(rating.season_wins, 1);

        assert_eq!(rating.enter_season("2024-02", 1_706_745_800), None);
        assert_eq!(rating.mmr, 1810);

        let previous = rating.enter_season("2024-03", 1_709_251_200);
        assert_eq!(previous.as_deref(), Some("2024-02"));
        assert_eq!(rating.mmr, 1405);
        assert_eq!(rating.peak_mmr, 1810);
        assert_eq!(rating.season_wins, 0);
        assert_eq!(rating.wins, 1);
    }

    #[test]
    fn test_rating_without_season_adopts_it_without_reset() {
        let mut rating = PlayerRating::new(UserId::from_platform(2), 0);
        rating.season_id.clear();
        rating.mmr = 1600;
        assert_eq!(rating.enter_season("2024-03", 10), None);
        assert_eq!(rating.season_id, "2024-03");
        assert_eq!(rating.mmr, 1600);
    }
}
