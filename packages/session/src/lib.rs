//! Client-held session state for `UserManager`.
//!
//! A client has a persistent identity (its client id, generated once) and an
//! optional admin session that unlocks mode-switch privileges and bypasses the
//! local-mode block. Admin sessions expire after a TTL and are dropped on the
//! first read past their expiry.
//!
//! Both live in the JSON-file-backed [`storage::Storage`] under the
//! `UserManager` config directory.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod storage;

use storage::{Storage, StorageError, StorageKey};

/// How long a freshly created admin session stays valid.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// An expiring, client-held admin credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSession {
    pub session_id: String,
    pub created_at: u64,
    pub expires_at: u64,
}

impl AdminSession {
    /// Creates a new session valid for `ttl` from now.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let now = now_millis();

        Self {
            session_id: format!("admin_{}", nanoid!()),
            created_at: now,
            expires_at: now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_millis() >= self.expires_at
    }
}

/// Milliseconds since the unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |x| u64::try_from(x.as_millis()).unwrap_or(u64::MAX))
}

/// Gets this client's persistent identifier, generating and persisting one on
/// first use.
///
/// # Errors
///
/// * If the storage fails
pub fn get_or_init_client_id(storage: &Storage) -> Result<String, SessionError> {
    if let Some(client_id) = storage.get::<String>(StorageKey::ClientId)? {
        return Ok(client_id);
    }

    let client_id = format!("client_{}", nanoid!());
    log::debug!("get_or_init_client_id: generated new client_id={client_id}");
    storage.set(StorageKey::ClientId, &client_id)?;

    Ok(client_id)
}

/// Creates and persists a new admin session valid for `ttl`.
///
/// # Errors
///
/// * If the storage fails
pub fn create_admin_session(
    storage: &Storage,
    ttl: Duration,
) -> Result<AdminSession, SessionError> {
    let session = AdminSession::new(ttl);
    log::debug!(
        "create_admin_session: session_id={} expires_at={}",
        session.session_id,
        session.expires_at
    );
    storage.set(StorageKey::AdminSession, &session)?;

    Ok(session)
}

/// Returns the active admin session, if one exists and has not expired.
///
/// An expired session is removed from storage as a side effect.
///
/// # Errors
///
/// * If the storage fails
pub fn current_admin_session(storage: &Storage) -> Result<Option<AdminSession>, SessionError> {
    match storage.get::<AdminSession>(StorageKey::AdminSession)? {
        Some(session) if !session.is_expired() => Ok(Some(session)),
        Some(session) => {
            log::debug!(
                "current_admin_session: session_id={} expired, removing",
                session.session_id
            );
            storage.take::<AdminSession>(StorageKey::AdminSession)?;
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Removes the active admin session, returning it if one was stored.
///
/// # Errors
///
/// * If the storage fails
pub fn clear_admin_session(storage: &Storage) -> Result<Option<AdminSession>, SessionError> {
    Ok(storage.take(StorageKey::AdminSession)?)
}
