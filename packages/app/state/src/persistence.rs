//! Persistent client state: identity, admin session, local data set.
//!
//! The storage layer is the JSON-file store from `usermanager_session`;
//! this module wires it into [`AppState`] so the client id survives
//! restarts, admin sessions expire on schedule, and the admin's
//! locally-gated user data set outlives the page.

use std::{sync::Arc, time::Duration};

use usermanager_api::models::User;
use usermanager_session::{AdminSession, storage::Storage, storage::StorageKey};

use crate::{AppState, AppStateError};

impl AppState {
    /// Attaches persistent storage and loads the persisted identity from it.
    ///
    /// The client id is generated and persisted on first use; an existing
    /// admin session is restored unless it has expired.
    ///
    /// # Errors
    ///
    /// * If the storage fails
    pub async fn set_storage(&self, storage: Storage) -> Result<&Self, AppStateError> {
        let client_id = usermanager_session::get_or_init_client_id(&storage)?;
        let admin = usermanager_session::current_admin_session(&storage)?.is_some();

        log::debug!("set_storage: client_id={client_id} admin={admin}");

        self.client_id.write().await.replace(client_id);
        *self.is_admin.write().await = admin;
        self.storage.write().await.replace(Arc::new(storage));

        self.update_blocked().await;

        Ok(self)
    }

    /// Builder form of [`AppState::set_storage`].
    ///
    /// # Errors
    ///
    /// * If the storage fails
    pub async fn with_storage(self, storage: Storage) -> Result<Self, AppStateError> {
        self.set_storage(storage).await?;
        Ok(self)
    }

    #[must_use]
    pub async fn storage(&self) -> Option<Arc<Storage>> {
        self.storage.read().await.clone()
    }

    /// Creates a new admin session valid for `ttl` and unblocks the client.
    ///
    /// Call this after the (out-of-scope) UI has verified the operator's
    /// password.
    ///
    /// # Errors
    ///
    /// * If no storage is attached
    /// * If the storage fails
    pub async fn create_admin_session(
        &self,
        ttl: Duration,
    ) -> Result<AdminSession, AppStateError> {
        let storage = self
            .storage()
            .await
            .ok_or_else(|| AppStateError::unknown("Storage not set"))?;

        let session = usermanager_session::create_admin_session(&storage, ttl)?;

        *self.is_admin.write().await = true;
        self.update_blocked().await;

        Ok(session)
    }

    /// Drops the admin session and restores the server-data preference.
    ///
    /// If the backend is in local mode this re-evaluates the block, so the
    /// client ends up blocked like any other non-admin.
    ///
    /// # Errors
    ///
    /// * If the storage fails
    pub async fn logout_admin(&self) -> Result<(), AppStateError> {
        if let Some(storage) = self.storage().await {
            usermanager_session::clear_admin_session(&storage)?;
            storage.set(StorageKey::UseServerData, &true)?;
        }

        *self.is_admin.write().await = false;
        self.update_blocked().await;

        Ok(())
    }

    /// The admin's locally-gated user data set, empty if none was saved.
    ///
    /// # Errors
    ///
    /// * If the storage fails
    pub async fn local_users(&self) -> Result<Vec<User>, AppStateError> {
        let Some(storage) = self.storage().await else {
            return Ok(vec![]);
        };

        Ok(storage.get::<Vec<User>>(StorageKey::LocalUsers)?.unwrap_or_default())
    }

    /// Persists the admin's locally-gated user data set.
    ///
    /// # Errors
    ///
    /// * If no storage is attached
    /// * If the storage fails
    pub async fn save_local_users(&self, users: &[User]) -> Result<(), AppStateError> {
        let storage = self
            .storage()
            .await
            .ok_or_else(|| AppStateError::unknown("Storage not set"))?;

        storage.set(StorageKey::LocalUsers, users)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use usermanager_session::DEFAULT_SESSION_TTL;

    use super::*;

    fn temp_storage(temp: &tempfile::TempDir) -> Storage {
        Storage::new(temp.path().join("state.json")).unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_set_storage_initializes_a_stable_client_id() {
        let temp = tempfile::tempdir().unwrap();

        let state = AppState::new();
        state.set_storage(temp_storage(&temp)).await.unwrap();
        let first = state.client_id.read().await.clone().unwrap();

        let state = AppState::new();
        state.set_storage(temp_storage(&temp)).await.unwrap();
        let second = state.client_id.read().await.clone().unwrap();

        assert!(first.starts_with("client_"));
        assert_eq!(first, second);
    }

    #[test_log::test(tokio::test)]
    async fn test_admin_session_survives_restart_until_expiry() {
        let temp = tempfile::tempdir().unwrap();

        let state = AppState::new().with_storage(temp_storage(&temp)).await.unwrap();
        assert!(!state.admin().await);

        state.create_admin_session(DEFAULT_SESSION_TTL).await.unwrap();
        assert!(state.admin().await);

        let state = AppState::new().with_storage(temp_storage(&temp)).await.unwrap();
        assert!(state.admin().await);
    }

    #[test_log::test(tokio::test)]
    async fn test_expired_admin_session_is_not_restored() {
        let temp = tempfile::tempdir().unwrap();

        let state = AppState::new().with_storage(temp_storage(&temp)).await.unwrap();
        state.create_admin_session(Duration::ZERO).await.unwrap();

        let state = AppState::new().with_storage(temp_storage(&temp)).await.unwrap();
        assert!(!state.admin().await);
    }

    #[test_log::test(tokio::test)]
    async fn test_logout_admin_restores_server_data_preference() {
        let temp = tempfile::tempdir().unwrap();

        let state = AppState::new().with_storage(temp_storage(&temp)).await.unwrap();
        state.create_admin_session(DEFAULT_SESSION_TTL).await.unwrap();

        state.logout_admin().await.unwrap();

        assert!(!state.admin().await);
        let storage = state.storage().await.unwrap();
        assert_eq!(
            storage.get::<bool>(StorageKey::UseServerData).unwrap(),
            Some(true)
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_local_users_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let state = AppState::new().with_storage(temp_storage(&temp)).await.unwrap();

        let users = vec![User {
            id: 1,
            name: "Alice Carter".to_string(),
            email: "alice@example.com".to_string(),
            created_at: "2026-08-04T09:00:00Z".parse().unwrap(),
        }];

        state.save_local_users(&users).await.unwrap();

        assert_eq!(state.local_users().await.unwrap(), users);
    }
}
