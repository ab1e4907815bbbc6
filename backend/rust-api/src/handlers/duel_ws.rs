//! WebSocket bridge between a browser and its duel match coordinator.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::DomainError;
use crate::extractors::AppQuery;
use crate::handlers::ApiError;
use crate::metrics::DUEL_SESSIONS_ACTIVE;
use crate::middlewares::auth::{
    decode_init_data, parse_header, unauthorized, verify_init_data, AuthError,
};
use crate::models::{DuelMatchId, UserId};
use crate::services::duel_coordinator::{ClientMessage, DuelSession, ServerMessage};
use crate::services::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuelSocketQuery {
    pub player_id: String,
    /// Browsers cannot set headers on WebSocket requests, so init data may come here instead.
    pub init_data: Option<String>,
}

/// GET /ws/duel/{matchId}?playerId=…
pub async fn duel_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
    AppQuery(query): AppQuery<DuelSocketQuery>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    let match_id = DuelMatchId::parse(&match_id).map_err(|e| ApiError::from(e).into_response())?;
    let player_id = UserId::parse(&query.player_id).map_err(|e| ApiError::from(e).into_response())?;

    let raw = match query.init_data.as_deref() {
        Some(encoded) => decode_init_data(encoded),
        None => parse_header(&headers),
    }
    .map_err(|e| {
        tracing::warn!("Rejected duel socket: {}", e);
        unauthorized(e.to_string())
    })?;
    let player = verify_init_data(
        &raw,
        &state.config.telegram_bot_token,
        state.config.init_data_max_age_secs,
        state.clock.now(),
    )
    .map_err(|e: AuthError| {
        tracing::warn!("Duel socket init data validation failed: {}", e);
        unauthorized(e.to_string())
    })?;
    if player.user_id != player_id {
        tracing::warn!(
            "Player {} tried to join duel {} as {}",
            player.user_id,
            match_id,
            player_id
        );
        return Err(ApiError::from(DomainError::unauthorized(
            "playerId does not match the signed-in player",
        ))
        .into_response());
    }

    // seat before upgrading so refusals are plain HTTP errors
    let session = state
        .duel_hub
        .connect(match_id, &player_id)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;

    tracing::info!("Duel socket opened: {} in {}", player_id, match_id);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session)))
}

async fn handle_socket(mut socket: WebSocket, mut session: DuelSession) {
    DUEL_SESSIONS_ACTIVE.inc();

    loop {
        tokio::select! {
            outgoing = session.recv() => {
                let Some(message) = outgoing else {
                    // the match is over
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if send_json(&mut socket, &message).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(message) => session.send(message),
                            Err(e) => {
                                let error = ServerMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                };
                                if send_json(&mut socket, &error).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Duel socket error for {}: {}", session.player_id, e);
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(
        "Duel socket closed: {} in {}",
        session.player_id,
        session.match_id
    );
    DUEL_SESSIONS_ACTIVE.dec();
}

async fn send_json(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) })
            .to_string()
    });
    socket.send(Message::Text(text.into())).await
}
