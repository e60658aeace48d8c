use sqlx::SqlitePool;

// vote_date defaults to the database clock on purpose: day scoping must not
// trust whatever time the caller thinks it is.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS votes (
    restaurant_id INTEGER NOT NULL,
    session_id INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    is_upvote INTEGER NOT NULL,
    vote_date TEXT NOT NULL DEFAULT (date('now')),
    UNIQUE (user_id, restaurant_id, session_id, vote_date)
);

CREATE TABLE IF NOT EXISTS restaurants (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    logourl TEXT,
    city TEXT,
    street TEXT
);

CREATE TABLE IF NOT EXISTS kitchens (
    id INTEGER PRIMARY KEY,
    description TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subkitchens (
    id INTEGER PRIMARY KEY,
    kitchen_id INTEGER NOT NULL REFERENCES kitchens(id),
    description TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS restaurants_subkitchens (
    restaurant_id INTEGER NOT NULL REFERENCES restaurants(id),
    subkitchen_id INTEGER NOT NULL REFERENCES subkitchens(id),
    UNIQUE (restaurant_id, subkitchen_id)
);

CREATE TABLE IF NOT EXISTS groups (
    uuid TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    mastergroup TEXT REFERENCES groups(uuid)
);

CREATE TABLE IF NOT EXISTS users_groups (
    user_id TEXT NOT NULL,
    group_id TEXT NOT NULL REFERENCES groups(uuid),
    role TEXT NOT NULL,
    UNIQUE (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS groups_invites (
    group_id TEXT NOT NULL UNIQUE REFERENCES groups(uuid),
    code TEXT NOT NULL UNIQUE,
    valid_until INTEGER NOT NULL
);
";

pub async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // a single connection keeps every query on the same in-memory database
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init(&pool).await.unwrap();
    pool
}
