pub mod auth;
pub mod error;
pub mod extract;
pub mod likes;
pub mod middleware;
pub mod threads;
pub mod wallet;

use axum::{
    Router,
    routing::{get, post, put},
};
use tracing::error;

use amora_db::Database;

use crate::auth::AppState;
use crate::error::ApiError;

/// All REST routes. Everything except registration and login sits behind
/// the bearer-token middleware.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/threads", get(threads::list_threads).post(threads::create_thread))
        .route("/threads/{thread_id}", get(threads::get_thread))
        .route(
            "/threads/{thread_id}/messages",
            get(threads::get_messages).post(threads::send_message),
        )
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route("/wallet/earn", post(wallet::earn))
        .route("/wallet/spend", post(wallet::spend))
        .route("/wallet/faucet", post(wallet::claim_faucet))
        .route("/likes", post(likes::like))
        .route("/likes/allowance", get(likes::allowance))
        .route("/matches", get(likes::list_matches))
        .route("/membership", put(likes::set_membership))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    public_routes.merge(protected_routes).with_state(state)
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> amora_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal("background task failed".into())
        })?
        .map_err(ApiError::from)
}
