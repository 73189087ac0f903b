use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use amora_types::api::{Claims, LikeRequest, LikeResponse, MatchSummary, SetMembershipRequest};
use amora_types::events::GatewayEvent;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::run_db;

pub async fn allowance(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let today = chrono::Utc::now().date_naive();
    let allowance = run_db(&state, move |db| db.can_user_like(user_id, today)).await?;
    Ok(Json(allowance))
}

/// POST /likes: counts against the daily limit; a mutual like notifies
/// both users of the match.
pub async fn like(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<LikeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let liker_id = claims.sub;
    let likee_id = req.likee_id;
    let today = chrono::Utc::now().date_naive();

    let (outcome, likee) = run_db(&state, move |db| {
        let outcome = db.record_like(liker_id, likee_id, today)?;
        let likee = if outcome.matched {
            db.get_user_by_id(likee_id)?
        } else {
            None
        };
        Ok((outcome, likee))
    })
    .await?;

    if let Some(likee) = likee {
        state
            .dispatcher
            .send_to_user(
                liker_id,
                GatewayEvent::MatchCreate {
                    user_id: likee_id,
                    username: likee.username,
                },
            )
            .await;
        state
            .dispatcher
            .send_to_user(
                likee_id,
                GatewayEvent::MatchCreate {
                    user_id: liker_id,
                    username: claims.username.clone(),
                },
            )
            .await;
    }

    Ok(Json(LikeResponse {
        matched: outcome.matched,
        allowance: outcome.allowance,
    }))
}

pub async fn list_matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    let matches = run_db(&state, move |db| db.list_matches(user_id)).await?;

    Ok(Json(
        matches
            .into_iter()
            .map(|(user_id, username)| MatchSummary { user_id, username })
            .collect::<Vec<_>>(),
    ))
}

/// PUT /membership: switch the caller's tier.
///
/// No payment is taken here; billing happens outside this service, which
/// only records the resulting tier. Deployments that expose this route
/// directly to clients give every user the premium like allowance.
pub async fn set_membership(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<SetMembershipRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.sub;
    run_db(&state, move |db| db.set_membership_tier(user_id, req.tier)).await?;
    Ok(StatusCode::NO_CONTENT)
}
