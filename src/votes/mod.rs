mod ledger;
mod service;
mod ws;

use axum::{debug_handler, extract::State, http::HeaderMap, routing::{get, post}, Json, Router};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::auth::{self, Identities, IdentityResolver};
use crate::realtime::SessionRegistry;
use crate::{AppError, AppResult, AppState};

use ledger::Direction;
use service::{RemovalResult, VoteTallyResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/up", post(upvote))
        .route("/down", post(downvote))
        .route("/remove", post(remove_vote))
        .route("/live", get(ws::live))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteBody {
    restaurant_id: Option<i64>,
    session_id: Option<i64>,
}

impl VoteBody {
    fn checked(self) -> AppResult<(i64, i64)> {
        let restaurant_id = self
            .restaurant_id
            .ok_or_else(|| AppError::Validation("missing restaurantId".to_owned()))?;
        let session_id = self
            .session_id
            .ok_or_else(|| AppError::Validation("missing sessionId".to_owned()))?;
        Ok((restaurant_id, session_id))
    }
}

#[debug_handler(state = AppState)]
async fn upvote(
    State(db_pool): State<SqlitePool>,
    State(registry): State<SessionRegistry>,
    State(identities): State<Identities>,
    headers: HeaderMap,
    Json(body): Json<VoteBody>,
) -> AppResult<Json<VoteTallyResult>> {
    let identity = identities.validate(auth::bearer_token(&headers)?).await?;
    let (restaurant_id, session_id) = body.checked()?;

    let result = service::cast(
        &db_pool, &registry, &identities,
        &identity.sub, restaurant_id, session_id, Direction::Up,
    )
    .await?;
    Ok(Json(result))
}

#[debug_handler(state = AppState)]
async fn downvote(
    State(db_pool): State<SqlitePool>,
    State(registry): State<SessionRegistry>,
    State(identities): State<Identities>,
    headers: HeaderMap,
    Json(body): Json<VoteBody>,
) -> AppResult<Json<VoteTallyResult>> {
    let identity = identities.validate(auth::bearer_token(&headers)?).await?;
    let (restaurant_id, session_id) = body.checked()?;

    let result = service::cast(
        &db_pool, &registry, &identities,
        &identity.sub, restaurant_id, session_id, Direction::Down,
    )
    .await?;
    Ok(Json(result))
}

#[debug_handler(state = AppState)]
async fn remove_vote(
    State(db_pool): State<SqlitePool>,
    State(registry): State<SessionRegistry>,
    State(identities): State<Identities>,
    headers: HeaderMap,
    Json(body): Json<VoteBody>,
) -> AppResult<Json<RemovalResult>> {
    let identity = identities.validate(auth::bearer_token(&headers)?).await?;
    let (restaurant_id, session_id) = body.checked()?;

    let result = service::remove(
        &db_pool, &registry, &identities,
        &identity.sub, restaurant_id, session_id,
    )
    .await?;
    Ok(Json(result))
}
