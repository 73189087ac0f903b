use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use amora_types::api::{Claims, CreateThreadRequest, SendMessageRequest, SendMessageResponse};
use amora_types::events::GatewayEvent;
use amora_types::models::{EscrowTransition, Thread};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::run_db;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// `created_at` of the oldest item on the previous page.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

/// POST /threads: open (or reopen) the conversation with `peer_id`.
pub async fn create_thread(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateThreadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub;
    let thread = run_db(&state, move |db| db.get_or_create_thread(me, req.peer_id)).await?;
    Ok(Json(thread))
}

pub async fn list_threads(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub;
    let threads = run_db(&state, move |db| db.threads_for_user(me)).await?;
    Ok(Json(threads))
}

pub async fn get_thread(
    State(state): State<AppState>,
    ApiPath(thread_id): ApiPath<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let thread = load_own_thread(&state, thread_id, claims.sub).await?;
    Ok(Json(thread))
}

pub async fn get_messages(
    State(state): State<AppState>,
    ApiPath(thread_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    load_own_thread(&state, thread_id, claims.sub).await?;

    let messages = run_db(&state, move |db| {
        db.get_messages(thread_id, query.limit, query.before)
    })
    .await?;
    Ok(Json(messages))
}

/// POST /threads/{thread_id}/messages: the escrow send.
///
/// The sender is always the authenticated user. On success both
/// participants get the message, and every user whose balance moved gets a
/// balance update.
pub async fn send_message(
    State(state): State<AppState>,
    ApiPath(thread_id): ApiPath<Uuid>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sender_id = claims.sub;
    let fee = state.economy.message_fee;
    let outcome = run_db(&state, move |db| {
        db.send_message_with_escrow(thread_id, sender_id, &req.content, fee)
    })
    .await?;

    let participants = outcome.thread.participants;
    state
        .dispatcher
        .send_to_users(
            &participants,
            GatewayEvent::MessageCreate {
                message: outcome.message.clone(),
            },
        )
        .await;

    if outcome.transition != EscrowTransition::None {
        state
            .dispatcher
            .send_to_users(
                &participants,
                GatewayEvent::EscrowUpdate {
                    thread_id,
                    transition: outcome.transition,
                },
            )
            .await;
    }

    for change in &outcome.balances {
        state
            .dispatcher
            .send_to_user(
                change.user_id,
                GatewayEvent::BalanceUpdate {
                    token_type: change.token_type,
                    balance: change.balance,
                },
            )
            .await;
    }

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            message: outcome.message,
            escrow: outcome.transition,
            balances: outcome.balances,
        }),
    ))
}

/// Threads are only visible to their two participants.
async fn load_own_thread(state: &AppState, thread_id: Uuid, user_id: Uuid) -> Result<Thread, ApiError> {
    let thread = run_db(state, move |db| db.get_thread(thread_id))
        .await?
        .ok_or(ApiError::NotFound)?;

    if !thread.has_participant(user_id) {
        return Err(ApiError::Forbidden);
    }
    Ok(thread)
}
