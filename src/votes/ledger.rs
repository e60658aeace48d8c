use serde::Serialize;
use sqlx::SqlitePool;

use crate::{AppError, AppResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn is_upvote(self) -> bool {
        matches!(self, Direction::Up)
    }

    fn from_upvote(is_upvote: bool) -> Self {
        if is_upvote { Direction::Up } else { Direction::Down }
    }
}

/// Raw per-day aggregate for one restaurant in one session. Voter ids only;
/// display enrichment is the orchestrator's job.
#[derive(Debug, Default)]
pub struct Tally {
    pub votes: i64,
    pub upvoters: Vec<String>,
    pub downvoters: Vec<String>,
}

/// Records a user's stance. A repeated cast for the same (user, restaurant,
/// session, day) tuple overwrites the direction instead of duplicating; the
/// database resolves the race, not us.
pub async fn cast_vote(
    db_pool: &SqlitePool,
    restaurant_id: i64,
    session_id: i64,
    user_id: &str,
    direction: Direction,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO votes (restaurant_id,session_id,user_id,is_upvote) VALUES (?,?,?,?) \
         ON CONFLICT (user_id,restaurant_id,session_id,vote_date) \
         DO UPDATE SET is_upvote=excluded.is_upvote",
    )
    .bind(restaurant_id)
    .bind(session_id)
    .bind(user_id)
    .bind(direction.is_upvote())
    .execute(db_pool)
    .await?;

    Ok(())
}

/// Deletes today's vote and reports the direction it held. A missing vote is
/// a NotFound, never a silent no-op: the caller dereferences the prior
/// direction afterwards.
pub async fn remove_vote(
    db_pool: &SqlitePool,
    restaurant_id: i64,
    session_id: i64,
    user_id: &str,
) -> AppResult<Direction> {
    let removed: Option<(bool,)> = sqlx::query_as(
        "DELETE FROM votes \
         WHERE restaurant_id=? AND session_id=? AND user_id=? AND vote_date=date('now') \
         RETURNING is_upvote",
    )
    .bind(restaurant_id)
    .bind(session_id)
    .bind(user_id)
    .fetch_optional(db_pool)
    .await?;

    match removed {
        Some((is_upvote,)) => Ok(Direction::from_upvote(is_upvote)),
        None => Err(AppError::NotFound("vote")),
    }
}

/// Aggregates today's votes for a restaurant within a session: +1 per upvote,
/// -1 per downvote, voter ids partitioned by direction in cast order. No
/// votes means a zero tally, not an error.
pub async fn tally(
    db_pool: &SqlitePool,
    restaurant_id: i64,
    session_id: i64,
) -> AppResult<Tally> {
    let rows: Vec<(String, bool)> = sqlx::query_as(
        "SELECT user_id,is_upvote FROM votes \
         WHERE restaurant_id=? AND session_id=? AND vote_date=date('now') \
         ORDER BY rowid",
    )
    .bind(restaurant_id)
    .bind(session_id)
    .fetch_all(db_pool)
    .await?;

    let mut tally = Tally::default();
    for (user_id, is_upvote) in rows {
        if is_upvote {
            tally.votes += 1;
            tally.upvoters.push(user_id);
        } else {
            tally.votes -= 1;
            tally.downvoters.push(user_id);
        }
    }

    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn vote_rows(pool: &SqlitePool) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM votes")
            .fetch_one(pool)
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn flipping_direction_keeps_a_single_row() {
        let pool = test_pool().await;

        cast_vote(&pool, 7, 1, "alice", Direction::Up).await.unwrap();
        cast_vote(&pool, 7, 1, "alice", Direction::Down).await.unwrap();

        assert_eq!(vote_rows(&pool).await, 1);
        let tally = tally(&pool, 7, 1).await.unwrap();
        assert_eq!(tally.votes, -1);
        assert!(tally.upvoters.is_empty());
        assert_eq!(tally.downvoters, vec!["alice"]);
    }

    #[tokio::test]
    async fn repeated_cast_is_idempotent() {
        let pool = test_pool().await;

        cast_vote(&pool, 7, 1, "alice", Direction::Up).await.unwrap();
        cast_vote(&pool, 7, 1, "alice", Direction::Up).await.unwrap();

        assert_eq!(vote_rows(&pool).await, 1);
        assert_eq!(tally(&pool, 7, 1).await.unwrap().votes, 1);
    }

    #[tokio::test]
    async fn signed_sum_partitions_voters() {
        let pool = test_pool().await;

        for user in ["a", "b", "c"] {
            cast_vote(&pool, 7, 1, user, Direction::Up).await.unwrap();
        }
        for user in ["d", "e"] {
            cast_vote(&pool, 7, 1, user, Direction::Down).await.unwrap();
        }

        let tally = tally(&pool, 7, 1).await.unwrap();
        assert_eq!(tally.votes, 1);
        assert_eq!(tally.upvoters, vec!["a", "b", "c"]);
        assert_eq!(tally.downvoters, vec!["d", "e"]);
    }

    #[tokio::test]
    async fn no_votes_is_a_zero_tally() {
        let pool = test_pool().await;

        let tally = tally(&pool, 99, 1).await.unwrap();
        assert_eq!(tally.votes, 0);
        assert!(tally.upvoters.is_empty());
        assert!(tally.downvoters.is_empty());
    }

    #[tokio::test]
    async fn remove_returns_the_prior_direction() {
        let pool = test_pool().await;

        cast_vote(&pool, 7, 1, "alice", Direction::Down).await.unwrap();
        let removed = remove_vote(&pool, 7, 1, "alice").await.unwrap();

        assert_eq!(removed, Direction::Down);
        assert_eq!(vote_rows(&pool).await, 0);
    }

    #[tokio::test]
    async fn removing_a_missing_vote_is_not_found() {
        let pool = test_pool().await;

        let result = remove_vote(&pool, 7, 1, "alice").await;
        assert!(matches!(result, Err(AppError::NotFound("vote"))));
    }

    #[tokio::test]
    async fn other_days_do_not_leak_into_today() {
        let pool = test_pool().await;

        cast_vote(&pool, 7, 1, "alice", Direction::Up).await.unwrap();
        sqlx::query("UPDATE votes SET vote_date=date('now','-1 day')")
            .execute(&pool)
            .await
            .unwrap();

        // yesterday's vote neither counts today nor blocks a fresh one
        assert_eq!(tally(&pool, 7, 1).await.unwrap().votes, 0);
        cast_vote(&pool, 7, 1, "alice", Direction::Up).await.unwrap();
        assert_eq!(vote_rows(&pool).await, 2);

        let tally = tally(&pool, 7, 1).await.unwrap();
        assert_eq!(tally.votes, 1);
        assert_eq!(tally.upvoters, vec!["alice"]);
    }
}
