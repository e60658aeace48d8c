use futures_util::future::join_all;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::auth::IdentityResolver;
use crate::realtime::{SessionId, SessionRegistry};
use crate::AppResult;

use super::ledger::{self, Direction};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub id: String,
    pub image: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoteTallyResult {
    pub restaurant_id: i64,
    pub votes: i64,
    pub upvotes: Vec<Voter>,
    pub downvotes: Vec<Voter>,
}

/// Tally plus which direction just disappeared, so clients can reconcile the
/// removed vote without diffing voter lists.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RemovalResult {
    #[serde(flatten)]
    pub tally: VoteTallyResult,
    pub removed: Direction,
}

/// Full cast cycle: persist, recompute, enrich, fan out, and hand the same
/// tally back to the caller. The write is committed before anything else
/// happens, so a later failure never unwinds it.
pub async fn cast<I: IdentityResolver>(
    db_pool: &SqlitePool,
    registry: &SessionRegistry,
    identities: &I,
    user_id: &str,
    restaurant_id: i64,
    session_id: SessionId,
    direction: Direction,
) -> AppResult<VoteTallyResult> {
    ledger::cast_vote(db_pool, restaurant_id, session_id, user_id, direction).await?;

    let result = tally_result(db_pool, identities, restaurant_id, session_id).await?;
    registry.broadcast(session_id, &serde_json::to_string(&result)?);
    Ok(result)
}

/// Remove cycle. The prior direction is captured before the row is gone and
/// rides along in the broadcast. A NotFound from the ledger aborts the cycle
/// before any broadcast.
pub async fn remove<I: IdentityResolver>(
    db_pool: &SqlitePool,
    registry: &SessionRegistry,
    identities: &I,
    user_id: &str,
    restaurant_id: i64,
    session_id: SessionId,
) -> AppResult<RemovalResult> {
    let removed = ledger::remove_vote(db_pool, restaurant_id, session_id, user_id).await?;

    let tally = tally_result(db_pool, identities, restaurant_id, session_id).await?;
    let result = RemovalResult { tally, removed };
    registry.broadcast(session_id, &serde_json::to_string(&result)?);
    Ok(result)
}

async fn tally_result<I: IdentityResolver>(
    db_pool: &SqlitePool,
    identities: &I,
    restaurant_id: i64,
    session_id: SessionId,
) -> AppResult<VoteTallyResult> {
    let tally = ledger::tally(db_pool, restaurant_id, session_id).await?;
    let (upvotes, downvotes) = futures_util::join!(
        enrich(identities, tally.upvoters),
        enrich(identities, tally.downvoters),
    );

    Ok(VoteTallyResult {
        restaurant_id,
        votes: tally.votes,
        upvotes,
        downvotes,
    })
}

/// Resolves display identities concurrently, keeping cast order. A voter the
/// provider cannot resolve keeps null display fields instead of sinking the
/// whole tally.
async fn enrich<I: IdentityResolver>(identities: &I, voter_ids: Vec<String>) -> Vec<Voter> {
    join_all(voter_ids.into_iter().map(|id| async move {
        match identities.resolve(&id).await {
            Ok(info) => Voter {
                id,
                image: info.image,
                first_name: info.first_name,
                last_name: info.last_name,
            },
            Err(err) => {
                tracing::warn!(voter = %id, "identity lookup failed: {err}");
                Voter { id, image: None, first_name: None, last_name: None }
            }
        }
    }))
    .await
}
