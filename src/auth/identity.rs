use std::future::Future;

use serde_json::Value;

use crate::{AppError, AppResult, GetField};

/// The authenticated subject behind a bearer token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub sub: String,
}

/// Display identity for a voter. Fields are optional because a tally must
/// survive a provider that cannot resolve one of its voters.
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image: Option<String>,
}

/// The identity provider as the rest of the app sees it: validate a bearer
/// token, resolve an opaque user id to something displayable. No caching.
pub trait IdentityResolver: Send + Sync {
    fn validate(&self, token: &str) -> impl Future<Output = AppResult<Identity>> + Send;
    fn resolve(&self, user_id: &str) -> impl Future<Output = AppResult<UserInfo>> + Send;
}

/// reqwest-backed provider client speaking to a Keycloak-style realm.
#[derive(Clone)]
pub struct Identities {
    http: reqwest::Client,
    userinfo_url: String,
    users_url: String,
}

impl Identities {
    pub fn new(identity_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            userinfo_url: format!("{identity_url}/protocol/openid-connect/userinfo"),
            users_url: format!("{identity_url}/users"),
        }
    }
}

impl IdentityResolver for Identities {
    async fn validate(&self, token: &str) -> AppResult<Identity> {
        let resp = self.http
            .get(&self.userinfo_url)
            .bearer_auth(token)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AppError::Unauthorized);
        }

        let body: Value = resp.json().await?;
        Ok(Identity { sub: body.get_str_field("sub")? })
    }

    async fn resolve(&self, user_id: &str) -> AppResult<UserInfo> {
        let resp = self.http
            .get(format!("{}/{user_id}", self.users_url))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AppError::Upstream(anyhow::anyhow!(
                "identity lookup for {user_id} failed: {}",
                resp.status()
            )));
        }

        let body: Value = resp.json().await?;
        let str_field = |field: &str| {
            body.get(field).and_then(Value::as_str).map(str::to_owned)
        };
        Ok(UserInfo {
            first_name: str_field("firstName"),
            last_name: str_field("lastName"),
            image: str_field("image"),
        })
    }
}
