use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DomainError, DomainResult};
use crate::middlewares::auth::AuthenticatedPlayer;
use crate::models::user::{validate_language_code, ProfileChanges, ANONYMOUS};
use crate::models::{DomainEvent, User, UserId, Wallet};
use crate::services::event_bus::EventBus;
use crate::services::repositories::{UserRepository, WalletRepository};
use crate::utils::time::Clock;

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserRepository>,
    wallets: Arc<dyn WalletRepository>,
    events: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    starting_coins: u32,
    starting_tickets: u32,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        wallets: Arc<dyn WalletRepository>,
        events: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            wallets,
            events,
            clock,
            starting_coins: 500,
            starting_tickets: 5,
        }
    }

    pub fn with_starting_balance(mut self, coins: u32, tickets: u32) -> Self {
        self.starting_coins = coins;
        self.starting_tickets = tickets;
        self
    }

    /// Creates the user on first sight, otherwise refreshes the platform fields.
    pub async fn register(&self, player: &AuthenticatedPlayer) -> DomainResult<(User, Wallet)> {
        let now = self.clock.now();
        let display = player
            .first_name
            .as_deref()
            .or(player.username.as_deref())
            .unwrap_or_default();

        let user = match self.users.find_by_id(&player.user_id).await? {
            Some(mut existing) => {
                let mut changes = ProfileChanges::default();
                if let Some(telegram) = player.username.as_deref() {
                    if existing.telegram_username.as_deref() != Some(telegram) {
                        changes.telegram_username = Some(telegram.to_string());
                    }
                }
                if changes.telegram_username.is_some() {
                    // platform usernames shorter than 5 chars are not searchable, keep the old one
                    if let Err(e) = existing.apply(changes, now) {
                        tracing::debug!("Ignoring platform username for {}: {}", existing.id, e);
                    } else {
                        self.users.save(&existing).await?;
                    }
                }
                existing
            }
            None => {
                let mut user = User::new(player.user_id.clone(), display, now)?;
                if let Some(code) = player.language_code.as_deref() {
                    if let Ok(code) = validate_language_code(code) {
                        user.language_code = code;
                    }
                }
                if let Some(telegram) = player.username.as_deref() {
                    let changes = ProfileChanges {
                        telegram_username: Some(telegram.to_string()),
                        ..Default::default()
                    };
                    if let Err(e) = user.apply(changes, now) {
                        tracing::debug!("Ignoring platform username for {}: {}", user.id, e);
                    }
                }
                self.users.save(&user).await?;
                tracing::info!("Registered user {}", user.id);
                self.events.publish(DomainEvent::UserRegistered {
                    user_id: user.id.clone(),
                    username: user.display_name().to_string(),
                    at: now,
                });
                user
            }
        };

        let wallet = self.wallet(&user.id).await?;
        Ok((user, wallet))
    }

    pub async fn get_profile(&self, user_id: &UserId) -> DomainResult<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("user {}", user_id)))
    }

    pub async fn update_profile(
        &self,
        caller: &UserId,
        user_id: &UserId,
        changes: ProfileChanges,
    ) -> DomainResult<User> {
        if caller != user_id {
            tracing::warn!("User {} tried to edit profile of {}", caller, user_id);
            return Err(DomainError::unauthorized("players can only edit their own profile"));
        }
        let mut user = self.get_profile(user_id).await?;
        user.apply(changes, self.clock.now())?;
        self.users.save(&user).await?;
        tracing::info!("Updated profile of {}", user.id);
        Ok(user)
    }

    pub async fn find_by_username(&self, username: &str) -> DomainResult<User> {
        let username = username.trim().trim_start_matches('@');
        self.users
            .find_by_telegram_username(username)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("user @{}", username)))
    }

    /// Loads the wallet, creating it with the starting balance on first access.
    pub async fn wallet(&self, player_id: &UserId) -> DomainResult<Wallet> {
        if let Some(wallet) = self.wallets.find(player_id).await? {
            return Ok(wallet);
        }
        let wallet = Wallet::new(
            player_id.clone(),
            self.starting_coins,
            self.starting_tickets,
            self.clock.now(),
        );
        self.wallets.save(&wallet).await?;
        tracing::debug!("Opened wallet for {}", player_id);
        Ok(wallet)
    }

    pub async fn debit_coins(&self, player_id: &UserId, amount: u32) -> DomainResult<Wallet> {
        let mut wallet = self.wallet(player_id).await?;
        wallet.debit_coins(amount, self.clock.now())?;
        self.wallets.save(&wallet).await?;
        Ok(wallet)
    }

    pub async fn credit_coins(&self, player_id: &UserId, amount: u32) -> DomainResult<Wallet> {
        let mut wallet = self.wallet(player_id).await?;
        wallet.credit_coins(amount, self.clock.now());
        self.wallets.save(&wallet).await?;
        Ok(wallet)
    }

    pub async fn consume_ticket(&self, player_id: &UserId) -> DomainResult<Wallet> {
        let mut wallet = self.wallet(player_id).await?;
        wallet.consume_ticket(self.clock.now())?;
        self.wallets.save(&wallet).await?;
        Ok(wallet)
    }

    pub async fn refund_ticket(&self, player_id: &UserId) -> DomainResult<Wallet> {
        let mut wallet = self.wallet(player_id).await?;
        wallet.refund_ticket(self.clock.now());
        self.wallets.save(&wallet).await?;
        Ok(wallet)
    }

    /// Credits a reward of coins and tickets in one wallet write.
    pub async fn grant(&self, player_id: &UserId, coins: u32, tickets: u32) -> DomainResult<Wallet> {
        let mut wallet = self.wallet(player_id).await?;
        let now = self.clock.now();
        wallet.credit_coins(coins, now);
        wallet.credit_tickets(tickets, now);
        self.wallets.save(&wallet).await?;
        Ok(wallet)
    }

    /// Display names for leaderboards; unknown players are "anonymous".
    pub async fn display_names(&self, ids: &[UserId]) -> DomainResult<HashMap<UserId, String>> {
        let users = self.users.find_by_ids(ids).await?;
        let mut names: HashMap<UserId, String> = users
            .into_iter()
            .map(|user| {
                let name = user.display_name().to_string();
                (user.id, name)
            })
            .collect();
        for id in ids {
            names
                .entry(id.clone())
                .or_insert_with(|| ANONYMOUS.to_string());
        }
        Ok(names)
    }
}
