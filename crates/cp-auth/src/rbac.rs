//! RBAC resolver (§4.4). Stateless and pure at its core; `resolve_cached`
//! adds the memoize-by-`(user_id, updated_at)` wrapper suggested in §9.

use std::sync::Arc;

use cp_core::error::{CoreError, CoreResult};
use cp_core::model::{Permission, User};
use cp_core::storage::Storage;
use dashmap::DashMap;

pub struct RbacResolver {
    storage: Arc<dyn Storage>,
    cache: DashMap<(String, i64), Vec<Permission>>,
}

impl RbacResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: DashMap::new(),
        }
    }

    /// Computes the union of the user's direct permissions and every
    /// permission of every role referenced by `role_ids`, de-duplicated
    /// and sorted (P1). Fails with `invalid-argument` if `user` is absent.
    pub async fn resolve(&self, user: Option<&User>) -> CoreResult<Vec<Permission>> {
        let user = user.ok_or_else(|| CoreError::InvalidArgument("user is absent".into()))?;
        let role_ids: Vec<String> = user.role_ids.iter().cloned().collect();
        let roles = self.storage.get_roles(&role_ids).await?;

        let mut permissions: Vec<Permission> = user
            .permissions
            .iter()
            .filter(|p| !p.is_empty())
            .cloned()
            .collect();
        for role in roles {
            permissions.extend(role.permissions.into_iter().filter(|p| !p.is_empty()));
        }
        permissions.sort();
        permissions.dedup();

        if permissions.is_empty() {
            return Err(CoreError::Unauthorized);
        }
        Ok(permissions)
    }

    /// Same as [`Self::resolve`], memoized by `(user_id, updated_at)` so a
    /// user whose roles haven't changed since their last resolve avoids a
    /// second `GetRoles` round-trip.
    pub async fn resolve_cached(&self, user: Option<&User>) -> CoreResult<Vec<Permission>> {
        let user = user.ok_or_else(|| CoreError::InvalidArgument("user is absent".into()))?;
        let key = (user.id.clone(), user.updated_at.timestamp());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }
        let resolved = self.resolve(Some(user)).await?;
        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }
}
