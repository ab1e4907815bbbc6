use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::models::ids::UserId;

const MAX_USERNAME: usize = 100;
const MAX_EMAIL: usize = 255;
const MAX_AVATAR_URL: usize = 500;
pub const ANONYMOUS: &str = "anonymous";

lazy_static! {
    static ref TELEGRAM_USERNAME: Regex =
        Regex::new(r"^[A-Za-z0-9_]{5,32}$").expect("telegram username pattern is valid");
    static ref EMAIL: Regex = Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$")
        .expect("email pattern is valid");
    static ref LANGUAGE_CODE: Regex =
        Regex::new(r"^[a-z]{2}$").expect("language code pattern is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Coins,
    Ad,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Coins => "coins",
            PaymentMethod::Ad => "ad",
        }
    }
}

pub fn validate_username(username: &str) -> DomainResult<String> {
    let username = username.trim();
    if username.chars().count() > MAX_USERNAME {
        return Err(DomainError::invalid("username is too long"));
    }
    Ok(username.to_string())
}

pub fn validate_telegram_username(username: &str) -> DomainResult<String> {
    let username = username.trim().trim_start_matches('@');
    if !TELEGRAM_USERNAME.is_match(username) {
        return Err(DomainError::invalid(
            "telegram username must be 5-32 letters, digits or underscores",
        ));
    }
    Ok(username.to_string())
}

pub fn validate_email(email: &str) -> DomainResult<String> {
    let email = email.trim();
    if email.len() > MAX_EMAIL || !EMAIL.is_match(email) {
        return Err(DomainError::invalid("email address is not valid"));
    }
    Ok(email.to_lowercase())
}

pub fn validate_avatar_url(avatar_url: &str) -> DomainResult<String> {
    let avatar_url = avatar_url.trim();
    if avatar_url.len() > MAX_AVATAR_URL {
        return Err(DomainError::invalid("avatar url is too long"));
    }
    let parsed = url::Url::parse(avatar_url)
        .map_err(|_| DomainError::invalid("avatar url is not a valid url"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DomainError::invalid("avatar url must use http or https"));
    }
    Ok(avatar_url.to_string())
}

pub fn validate_language_code(code: &str) -> DomainResult<String> {
    let code = code.trim().to_lowercase();
    // platform clients send regional tags such as "en-US"
    let primary = code.split(['-', '_']).next().unwrap_or_default();
    if !LANGUAGE_CODE.is_match(primary) {
        return Err(DomainError::invalid("language code must be ISO 639-1"));
    }
    Ok(primary.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub username: String,
    pub telegram_username: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub language_code: String,
    pub is_blocked: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Optional profile fields; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub username: Option<String>,
    pub telegram_username: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub language_code: Option<String>,
}

impl User {
    pub fn new(id: UserId, username: &str, now: i64) -> DomainResult<Self> {
        Ok(Self {
            id,
            username: validate_username(username)?,
            telegram_username: None,
            email: None,
            avatar_url: None,
            language_code: "en".to_string(),
            is_blocked: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply(&mut self, changes: ProfileChanges, now: i64) -> DomainResult<()> {
        if let Some(username) = changes.username {
            self.username = validate_username(&username)?;
        }
        if let Some(telegram) = changes.telegram_username {
            self.telegram_username = Some(validate_telegram_username(&telegram)?);
        }
        if let Some(email) = changes.email {
            self.email = Some(validate_email(&email)?);
        }
        if let Some(avatar_url) = changes.avatar_url {
            self.avatar_url = Some(validate_avatar_url(&avatar_url)?);
        }
        if let Some(language_code) = changes.language_code {
            self.language_code = validate_language_code(&language_code)?;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        if self.username.is_empty() {
            ANONYMOUS
        } else {
            &self.username
        }
    }
}

/// Coin and ticket balance of a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    #[serde(rename = "_id")]
    pub player_id: UserId,
    pub coins: u32,
    pub tickets: u32,
    pub updated_at: i64,
}

impl Wallet {
    pub fn new(player_id: UserId, coins: u32, tickets: u32, now: i64) -> Self {
        Self {
            player_id,
            coins,
            tickets,
            updated_at: now,
        }
    }

    pub fn debit_coins(&mut self, amount: u32, now: i64) -> DomainResult<()> {
        if self.coins < amount {
            return Err(DomainError::exhausted(format!(
                "insufficient coins: {} needed, {} available",
                amount, self.coins
            )));
        }
        self.coins -= amount;
        self.updated_at = now;
        Ok(())
    }

    pub fn credit_coins(&mut self, amount: u32, now: i64) {
        self.coins = self.coins.saturating_add(amount);
        self.updated_at = now;
    }

    pub fn consume_ticket(&mut self, now: i64) -> DomainResult<()> {
        if self.tickets == 0 {
            return Err(DomainError::exhausted("no duel tickets left"));
        }
        self.tickets -= 1;
        self.updated_at = now;
        Ok(())
    }

    pub fn refund_ticket(&mut self, now: i64) {
        self.credit_tickets(1, now);
    }

    pub fn credit_tickets(&mut self, amount: u32, now: i64) {
        self.tickets = self.tickets.saturating_add(amount);
        self.updated_at = now;
    }
}
