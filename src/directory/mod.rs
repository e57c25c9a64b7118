//! User directory: role resolution and display-name lookup.
//!
//! Role membership is stored on each user document (`users/{id}.role`).
//! Queries go through `In` filters, which the document database caps at
//! [`IN_QUERY_LIMIT`] values, so [`StoreRoleResolver`] chunks the role list
//! and merges the results before handing them back.

use async_trait::async_trait;
use futures::future::try_join_all;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DirectoryConfig;
use crate::store::{collections, Filter, RecordStore, StoreError, IN_QUERY_LIMIT};

#[cfg(test)]
use mockall::automock;

pub mod roles {
    pub const ENGINEER: &str = "engineer";
    pub const SALES: &str = "sales";
    pub const DIRECTOR: &str = "director";
    pub const CUTTING_ENGINEER: &str = "cutting-engineer";
    pub const DEPUTY_DIRECTOR: &str = "deputy-director";
    pub const ACCOUNTANT: &str = "accountant";
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("User store error: {0}")]
    Store(#[from] StoreError),

    #[error("No user holds role(s) {roles:?}")]
    NoHolder { roles: Vec<String> },
}

/// A user as seen by the workflow: identity, role and push destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "displayName")]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub fcm_token: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoleResolver: Send + Sync {
    /// Current holders of any of `roles`, de-duplicated.
    async fn resolve(&self, roles: &[String]) -> Result<Vec<UserRef>, DirectoryError>;
}

/// Pick the single assignee for a trigger: the first user of the resolved
/// set. Ordering is whatever the resolver returns.
pub async fn resolve_one(resolver: &dyn RoleResolver, role: &str) -> Result<UserRef, DirectoryError> {
    let roles = vec![role.to_string()];
    let holders = resolver.resolve(&roles).await?;
    holders
        .into_iter()
        .next()
        .ok_or(DirectoryError::NoHolder { roles })
}

pub struct StoreRoleResolver {
    store: Arc<dyn RecordStore>,
    batch_size: usize,
}

impl StoreRoleResolver {
    pub fn new(store: Arc<dyn RecordStore>, config: &DirectoryConfig) -> Self {
        let batch_size = config.in_query_batch_size.clamp(1, IN_QUERY_LIMIT);
        Self { store, batch_size }
    }
}

#[async_trait]
impl RoleResolver for StoreRoleResolver {
    async fn resolve(&self, roles: &[String]) -> Result<Vec<UserRef>, DirectoryError> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }

        let queries = roles.chunks(self.batch_size).map(|chunk| {
            let filter = Filter::any_of("role", chunk.iter().cloned());
            let store = Arc::clone(&self.store);
            async move { store.query(collections::USERS, &[filter]).await }
        });
        let batches = try_join_all(queries).await?;

        // Keyed by id: de-duplicates across chunks and gives a stable order.
        let mut users = BTreeMap::new();
        for document in batches.into_iter().flatten() {
            let mut user: UserRef = document.decode()?;
            user.id = document.id.clone();
            users.insert(document.id, user);
        }

        debug!(?roles, resolved = users.len(), "Resolved role holders");
        Ok(users.into_values().collect())
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>, DirectoryError>;
}

/// Display-name lookup fronted by a short-lived cache; the denormalizer
/// resolves the same handful of assignees over and over.
pub struct CachedUserLookup {
    store: Arc<dyn RecordStore>,
    cache: Cache<String, String>,
}

impl CachedUserLookup {
    pub fn new(store: Arc<dyn RecordStore>, config: &DirectoryConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.name_cache_capacity)
            .time_to_live(Duration::from_secs(config.name_cache_ttl_seconds))
            .build();
        Self { store, cache }
    }

    pub async fn invalidate(&self, user_id: &str) {
        self.cache.invalidate(user_id).await;
    }
}

#[async_trait]
impl UserLookup for CachedUserLookup {
    async fn display_name(&self, user_id: &str) -> Result<Option<String>, DirectoryError> {
        if let Some(name) = self.cache.get(user_id).await {
            return Ok(Some(name));
        }

        let Some(document) = self.store.get(collections::USERS, user_id).await? else {
            warn!(user_id = %user_id, "User not found for display name");
            return Ok(None);
        };
        let user: UserRef = document.decode()?;
        let name = if user.name.trim().is_empty() {
            user_id.to_string()
        } else {
            user.name
        };

        self.cache.insert(user_id.to_string(), name.clone()).await;
        Ok(Some(name))
    }
}
