use axum::{debug_handler, extract::{Query, State}, http::HeaderMap, routing::{get, post}, Json, Router};
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::{self, Identities, IdentityResolver};
use crate::{AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/groups", get(my_groups).post(create_group).delete(delete_group))
        .route("/groups/invite", get(invite_link))
        .route("/groups/invitation", get(invitation_infos))
        .route("/groups/join", post(join_group))
}

async fn add_member(
    db_pool: &SqlitePool,
    user_id: &str,
    group_id: &str,
    role: &str,
) -> AppResult<()> {
    sqlx::query("INSERT INTO users_groups (user_id,group_id,role) VALUES (?,?,?)")
        .bind(user_id)
        .bind(group_id)
        .bind(role)
        .execute(db_pool)
        .await
        .map_err(|err| match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                AppError::Conflict("user is already part of the group".to_owned())
            }
            _ => AppError::from(err),
        })?;
    Ok(())
}

#[derive(Deserialize)]
struct NewGroupBody {
    name: String,
    mastergroup: Option<Uuid>,
}

#[derive(Serialize)]
struct CreatedGroup {
    id: Uuid,
    name: String,
    mastergroup: Option<Uuid>,
}

#[debug_handler(state = AppState)]
async fn create_group(
    State(db_pool): State<SqlitePool>,
    State(identities): State<Identities>,
    headers: HeaderMap,
    Json(NewGroupBody { name, mastergroup }): Json<NewGroupBody>,
) -> AppResult<Json<CreatedGroup>> {
    let identity = identities.validate(auth::bearer_token(&headers)?).await?;

    if name.trim().is_empty() {
        return Err(AppError::Validation("missing group name".to_owned()));
    }

    let uuid = Uuid::now_v7();
    sqlx::query("INSERT INTO groups (uuid,name,mastergroup) VALUES (?,?,?)")
        .bind(uuid.to_string())
        .bind(&name)
        .bind(mastergroup.map(|m| m.to_string()))
        .execute(&db_pool)
        .await?;

    // only top-level groups attach their creator; subgroups inherit members
    if mastergroup.is_none() {
        add_member(&db_pool, &identity.sub, &uuid.to_string(), "admin").await?;
    }

    Ok(Json(CreatedGroup { id: uuid, name, mastergroup }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InviteQuery {
    group_id: Uuid,
}

#[derive(Serialize)]
struct InviteCode {
    code: String,
}

#[debug_handler(state = AppState)]
async fn invite_link(
    State(db_pool): State<SqlitePool>,
    State(identities): State<Identities>,
    headers: HeaderMap,
    Query(InviteQuery { group_id }): Query<InviteQuery>,
) -> AppResult<Json<InviteCode>> {
    identities.validate(auth::bearer_token(&headers)?).await?;

    let code = issue_invite(&db_pool, group_id).await?;
    Ok(Json(InviteCode { code }))
}

async fn issue_invite(db_pool: &SqlitePool, group_id: Uuid) -> AppResult<String> {
    let valid_until = (OffsetDateTime::now_utc() + Duration::days(1)).unix_timestamp();
    let fresh_code: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();

    // asking again refreshes the validity but keeps the existing code
    let (code,): (String,) = sqlx::query_as(
        "INSERT INTO groups_invites (group_id,code,valid_until) VALUES (?,?,?) \
         ON CONFLICT (group_id) DO UPDATE SET valid_until=excluded.valid_until \
         RETURNING code",
    )
    .bind(group_id.to_string())
    .bind(&fresh_code)
    .bind(valid_until)
    .fetch_one(db_pool)
    .await?;

    Ok(code)
}

/// Resolves a still-valid invite code to the group behind it.
async fn find_invitation(db_pool: &SqlitePool, code: &str) -> AppResult<Option<(String, String)>> {
    Ok(sqlx::query_as(
        "SELECT g.uuid, g.name FROM groups_invites gi \
         JOIN groups g ON g.uuid = gi.group_id \
         WHERE gi.code=? AND gi.valid_until > unixepoch('now')",
    )
    .bind(code)
    .fetch_optional(db_pool)
    .await?)
}

#[derive(Deserialize)]
struct InvitationQuery {
    code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvitationInfos {
    id: String,
    name: String,
}

/// What a prospective member sees before deciding to join.
#[debug_handler]
async fn invitation_infos(
    State(db_pool): State<SqlitePool>,
    Query(InvitationQuery { code }): Query<InvitationQuery>,
) -> AppResult<Json<InvitationInfos>> {
    match find_invitation(&db_pool, &code).await? {
        Some((id, name)) => Ok(Json(InvitationInfos { id, name })),
        None => Err(AppError::NotFound("invite")),
    }
}

#[derive(Deserialize)]
struct JoinBody {
    code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Joined {
    group_id: String,
}

#[debug_handler(state = AppState)]
async fn join_group(
    State(db_pool): State<SqlitePool>,
    State(identities): State<Identities>,
    headers: HeaderMap,
    Json(JoinBody { code }): Json<JoinBody>,
) -> AppResult<Json<Joined>> {
    let identity = identities.validate(auth::bearer_token(&headers)?).await?;

    let Some((group_id, _)) = find_invitation(&db_pool, &code).await? else {
        return Err(AppError::NotFound("invite"));
    };

    add_member(&db_pool, &identity.sub, &group_id, "regular").await?;

    Ok(Json(Joined { group_id }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteGroupBody {
    group_id: Uuid,
}

#[debug_handler(state = AppState)]
async fn delete_group(
    State(db_pool): State<SqlitePool>,
    State(identities): State<Identities>,
    headers: HeaderMap,
    Json(DeleteGroupBody { group_id }): Json<DeleteGroupBody>,
) -> AppResult<Json<Joined>> {
    identities.validate(auth::bearer_token(&headers)?).await?;

    delete_group_tree(&db_pool, &group_id.to_string()).await?;
    Ok(Json(Joined { group_id: group_id.to_string() }))
}

/// Deletes a group together with its whole subgroup tree: memberships and
/// invites first, then the groups themselves, all in one transaction.
async fn delete_group_tree(db_pool: &SqlitePool, group_id: &str) -> AppResult<()> {
    const GROUP_TREE: &str =
        "WITH RECURSIVE group_hierarchy AS ( \
             SELECT uuid FROM groups WHERE uuid=? \
             UNION ALL \
             SELECT g.uuid FROM groups g \
             JOIN group_hierarchy gh ON g.mastergroup = gh.uuid \
         )";

    let mut tx = db_pool.begin().await?;

    sqlx::query(&format!(
        "{GROUP_TREE} DELETE FROM users_groups WHERE group_id IN (SELECT uuid FROM group_hierarchy)"
    ))
    .bind(group_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(&format!(
        "{GROUP_TREE} DELETE FROM groups_invites WHERE group_id IN (SELECT uuid FROM group_hierarchy)"
    ))
    .bind(group_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(&format!(
        "{GROUP_TREE} DELETE FROM groups WHERE uuid IN (SELECT uuid FROM group_hierarchy)"
    ))
    .bind(group_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[derive(Serialize)]
struct Member {
    id: String,
    role: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Group {
    id: String,
    name: String,
    mastergroup: Option<String>,
    users: Vec<Member>,
}

#[debug_handler(state = AppState)]
async fn my_groups(
    State(db_pool): State<SqlitePool>,
    State(identities): State<Identities>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<Group>>> {
    let identity = identities.validate(auth::bearer_token(&headers)?).await?;

    let groups: Vec<(String, String, Option<String>)> = sqlx::query_as(
        "SELECT g.uuid, g.name, g.mastergroup FROM groups g \
         JOIN users_groups ug ON ug.group_id = g.uuid \
         WHERE ug.user_id = ?",
    )
    .bind(&identity.sub)
    .fetch_all(&db_pool)
    .await?;

    let mut result = Vec::with_capacity(groups.len());
    for (id, name, mastergroup) in groups {
        let members: Vec<(String, String)> =
            sqlx::query_as("SELECT user_id, role FROM users_groups WHERE group_id = ?")
                .bind(&id)
                .fetch_all(&db_pool)
                .await?;

        result.push(Group {
            id,
            name,
            mastergroup,
            users: members
                .into_iter()
                .map(|(id, role)| Member { id, role })
                .collect(),
        });
    }

    Ok(Json(result))
}
