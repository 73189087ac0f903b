use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use uuid::Uuid;

use amora_types::api::{Claims, TokenMutationRequest, TokenMutationResponse, WalletResponse};
use amora_types::events::GatewayEvent;
use amora_types::models::TokenTransaction;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::run_db;
use crate::threads::PageQuery;

pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let balances = run_db(&state, move |db| db.get_balances(user_id)).await?;
    Ok(Json(WalletResponse { user_id, balances }))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let transactions = run_db(&state, move |db| {
        db.list_transactions(user_id, query.limit, query.before)
    })
    .await?;
    Ok(Json(transactions))
}

pub async fn earn(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<TokenMutationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let description = req.description.unwrap_or_else(|| "Earned".into());
    let transaction = run_db(&state, move |db| {
        db.earn_tokens(user_id, req.token_type, req.amount, &description)
    })
    .await?;

    Ok(respond(&state, user_id, transaction).await)
}

pub async fn spend(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<TokenMutationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let description = req.description.unwrap_or_else(|| "Spent".into());
    let transaction = run_db(&state, move |db| {
        db.spend_tokens(user_id, req.token_type, req.amount, &description)
    })
    .await?;

    Ok(respond(&state, user_id, transaction).await)
}

/// POST /wallet/faucet: once per UTC day.
pub async fn claim_faucet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let amount = state.economy.faucet_amount;
    let today = chrono::Utc::now().date_naive();
    let transaction =
        run_db(&state, move |db| db.claim_daily_faucet(user_id, today, amount)).await?;

    Ok(respond(&state, user_id, transaction).await)
}

async fn respond(
    state: &AppState,
    user_id: Uuid,
    transaction: TokenTransaction,
) -> Json<TokenMutationResponse> {
    state
        .dispatcher
        .send_to_user(
            user_id,
            GatewayEvent::BalanceUpdate {
                token_type: transaction.token_type,
                balance: transaction.balance_after,
            },
        )
        .await;
    Json(TokenMutationResponse { transaction })
}
