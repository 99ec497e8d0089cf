//! OneLogin identity directory.
//!
//! A refresh obtains a client-credentials token, lists every role and pages
//! through every user. Only active users are kept; their alias comes from a
//! custom user attribute.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use pubkeyd_core::{DirectoryListing, DirectoryProvider, ProviderError};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::OneLoginConfig;

use super::{classify, http_client};

/// OneLogin user status for an active account.
const STATUS_ACTIVE: i64 = 1;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    data: Vec<TokenData>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    access_token: String,
}

impl TokenResponse {
    fn into_token(self) -> Option<String> {
        self.access_token
            .or_else(|| self.data.into_iter().next().map(|d| d.access_token))
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    after_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleRecord {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub role_id: Option<Vec<u64>>,
    #[serde(default)]
    pub custom_attributes: Option<HashMap<String, Option<String>>>,
}

impl UserRecord {
    fn is_active(&self) -> bool {
        self.status == Some(STATUS_ACTIVE)
    }

    fn attribute(&self, name: &str) -> &str {
        self.custom_attributes
            .as_ref()
            .and_then(|attrs| attrs.get(name))
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .unwrap_or("")
    }
}

/// Build a listing from raw roles and users.
///
/// Inactive and nameless users are dropped. Users without the alias attribute
/// are kept with an empty alias. Membership follows user order; role ids
/// that do not name a listed role are ignored.
pub fn build_listing(
    roles: &[RoleRecord],
    users: &[UserRecord],
    alias_attribute: &str,
) -> DirectoryListing {
    let role_names: HashMap<u64, &str> = roles.iter().map(|r| (r.id, r.name.as_str())).collect();
    let mut listing = DirectoryListing::new();

    for user in users {
        let Some(username) = user.username.as_deref().filter(|u| !u.is_empty()) else {
            continue;
        };
        if !user.is_active() {
            tracing::trace!(identity = username, "Skipping inactive user");
            continue;
        }

        listing = listing.with_identity(username, user.attribute(alias_attribute));

        for role_id in user.role_id.iter().flatten() {
            match role_names.get(role_id) {
                Some(role) => listing = listing.with_member(*role, username),
                None => tracing::debug!(identity = username, role_id, "Ignoring unknown role id"),
            }
        }
    }

    listing
}

/// Identity directory backed by the OneLogin v1 API.
pub struct OneLoginDirectory {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    alias_attribute: String,
    timeout: Duration,
}

impl OneLoginDirectory {
    pub fn new(config: &OneLoginConfig) -> Result<Self, ProviderError> {
        if config.client_id.is_empty() || config.client_secret.is_empty() {
            return Err(ProviderError::Configuration(
                "OneLogin client credentials are required".into(),
            ));
        }
        Ok(Self {
            client: http_client(config.timeout())?,
            base_url: config.api_base(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            alias_attribute: config.alias_attribute.clone(),
            timeout: config.timeout(),
        })
    }

    async fn access_token(&self) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/auth/oauth2/token", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!(
                    "client_id:{}, client_secret:{}",
                    self.client_id, self.client_secret
                ),
            )
            .json(&serde_json::json!({ "grant_type": "client_credentials" }))
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "OneLogin token request rejected");
            return Err(ProviderError::Http(status.as_u16()));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| classify(e, self.timeout))?
            .into_token()
            .ok_or_else(|| ProviderError::parse("token response carried no access_token"))
    }

    /// Collect every page of a list endpoint.
    async fn list_all<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
    ) -> Result<Vec<T>, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&url)
                .header(reqwest::header::AUTHORIZATION, format!("bearer:{token}"));
            if let Some(after) = &cursor {
                request = request.query(&[("after_cursor", after.as_str())]);
            }

            let response = request.send().await.map_err(|e| classify(e, self.timeout))?;
            let status = response.status();
            if !status.is_success() {
                tracing::error!(path, status = status.as_u16(), "OneLogin list request failed");
                return Err(ProviderError::Http(status.as_u16()));
            }

            let page: Page<T> = response
                .json()
                .await
                .map_err(|e| classify(e, self.timeout))?;
            items.extend(page.data);

            let next = page
                .pagination
                .and_then(|p| p.after_cursor)
                .filter(|c| !c.is_empty());
            match next {
                // A repeated cursor would loop forever.
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl DirectoryProvider for OneLoginDirectory {
    async fn fetch_directory(&self) -> Result<DirectoryListing, ProviderError> {
        let token = self.access_token().await?;
        let roles: Vec<RoleRecord> = self.list_all(&token, "/api/1/roles").await?;
        let users: Vec<UserRecord> = self.list_all(&token, "/api/1/users").await?;

        tracing::debug!(
            roles = roles.len(),
            users = users.len(),
            "Fetched OneLogin directory"
        );
        Ok(build_listing(&roles, &users, &self.alias_attribute))
    }
}
