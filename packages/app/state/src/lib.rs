//! Application state for `UserManager` dashboard clients.
//!
//! [`AppState`] replaces the page-level globals of the original dashboard:
//! one instance owns the websocket connection, the current server mode, the
//! blocked flag, the reload guard, and the connected-client count. The UI
//! attaches through listener registries instead of poking shared variables.
//!
//! Data loads go through [`AppState::load_users`] / [`AppState::load_stats`],
//! which honor the block: while the backend is in local mode and this client
//! is not an admin, nothing touches the network and results are empty.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use thiserror::Error;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use usermanager_api::ApiClient;
use usermanager_api::models::{ApiStats, User};
use usermanager_app_ws::{ConnectWsError, ConnectionStatus, WebsocketSendError, WsHandle};
use usermanager_session::storage::{Storage, StorageError};
use usermanager_ws::models::{InboundPayload, ServerMode};

pub mod persistence;
pub mod ws;

#[derive(Debug, Error)]
pub enum AppStateError {
    #[error("Unknown({0})")]
    Unknown(String),
    #[error(transparent)]
    Api(#[from] usermanager_api::Error),
    #[error(transparent)]
    Session(#[from] usermanager_session::SessionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    WebsocketSend(#[from] WebsocketSendError),
    #[error(transparent)]
    ConnectWs(#[from] ConnectWsError),
}

impl AppStateError {
    fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown(message.into())
    }
}

type ModeChangedListener =
    Arc<dyn Fn(ServerMode) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
type BlockedChangedListener =
    Arc<dyn Fn(bool) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
type ReloadListener = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
type ClientsUpdatedListener =
    Arc<dyn Fn(u64) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
type ConnectionStatusListener =
    Arc<dyn Fn(ConnectionStatus) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct AppState {
    pub api_url: Arc<RwLock<Option<String>>>,
    pub ws_url: Arc<RwLock<Option<String>>>,
    pub client_id: Arc<RwLock<Option<String>>>,
    pub is_admin: Arc<RwLock<bool>>,
    pub current_mode: Arc<RwLock<ServerMode>>,
    pub connected_clients: Arc<RwLock<u64>>,
    /// `None` until the first connection attempt (the idle state).
    pub connection_status: Arc<RwLock<Option<ConnectionStatus>>>,
    pub blocked: Arc<AtomicBool>,
    reload_triggered: Arc<AtomicBool>,
    pub ws_token: Arc<RwLock<Option<CancellationToken>>>,
    pub ws_handle: Arc<RwLock<Option<WsHandle>>>,
    pub ws_join_handle: Arc<RwLock<Option<JoinHandle<Result<(), ConnectWsError>>>>>,
    pub ws_message_buffer: Arc<RwLock<Vec<InboundPayload>>>,
    pub storage: Arc<RwLock<Option<Arc<Storage>>>>,
    pub api: Arc<RwLock<Option<ApiClient>>>,
    on_mode_changed_listeners: Vec<ModeChangedListener>,
    on_blocked_changed_listeners: Vec<BlockedChangedListener>,
    on_reload_listeners: Vec<ReloadListener>,
    on_clients_updated_listeners: Vec<ClientsUpdatedListener>,
    on_connection_status_listeners: Vec<ConnectionStatusListener>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for server-mode changes.
    #[must_use]
    pub fn with_on_mode_changed_listener<F: Future<Output = ()> + Send + 'static>(
        mut self,
        listener: impl Fn(ServerMode) -> F + Send + Sync + 'static,
    ) -> Self {
        self.on_mode_changed_listeners
            .push(Arc::new(move |mode| Box::pin(listener(mode))));
        self
    }

    /// Registers a listener for block/unblock transitions.
    ///
    /// The listener receives `true` when the client becomes blocked and
    /// `false` when access is restored. Each transition fires exactly once.
    #[must_use]
    pub fn with_on_blocked_changed_listener<F: Future<Output = ()> + Send + 'static>(
        mut self,
        listener: impl Fn(bool) -> F + Send + Sync + 'static,
    ) -> Self {
        self.on_blocked_changed_listeners
            .push(Arc::new(move |blocked| Box::pin(listener(blocked))));
        self
    }

    /// Registers a listener for the (at most one) reload request.
    #[must_use]
    pub fn with_on_reload_listener<F: Future<Output = ()> + Send + 'static>(
        mut self,
        listener: impl Fn() -> F + Send + Sync + 'static,
    ) -> Self {
        self.on_reload_listeners
            .push(Arc::new(move || Box::pin(listener())));
        self
    }

    /// Registers a listener for connected-client count updates.
    #[must_use]
    pub fn with_on_clients_updated_listener<F: Future<Output = ()> + Send + 'static>(
        mut self,
        listener: impl Fn(u64) -> F + Send + Sync + 'static,
    ) -> Self {
        self.on_clients_updated_listeners
            .push(Arc::new(move |clients| Box::pin(listener(clients))));
        self
    }

    /// Registers a listener for websocket connection status transitions.
    #[must_use]
    pub fn with_on_connection_status_listener<F: Future<Output = ()> + Send + 'static>(
        mut self,
        listener: impl Fn(ConnectionStatus) -> F + Send + Sync + 'static,
    ) -> Self {
        self.on_connection_status_listeners
            .push(Arc::new(move |status| Box::pin(listener(status))));
        self
    }

    /// Points the state at a backend API root
    /// (e.g. `http://localhost:8068/api`).
    pub async fn set_api_url(&self, api_url: impl Into<String>) {
        let api_url = api_url.into();
        self.api.write().await.replace(ApiClient::new(api_url.clone()));
        self.api_url.write().await.replace(api_url);
    }

    #[must_use]
    pub async fn mode(&self) -> ServerMode {
        *self.current_mode.read().await
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    #[must_use]
    pub async fn admin(&self) -> bool {
        *self.is_admin.read().await
    }

    #[must_use]
    pub async fn clients(&self) -> u64 {
        *self.connected_clients.read().await
    }

    /// Loads the user list, honoring the block and the data mode.
    ///
    /// * blocked: returns an empty list without touching the network
    /// * local mode: the admin's locally-gated data set (empty for non-admins)
    /// * server mode: the backend, falling back to the local data set for
    ///   admins when the backend is unreachable
    ///
    /// # Errors
    ///
    /// * If the local data set fails to load
    pub async fn load_users(&self) -> Result<Vec<User>, AppStateError> {
        if self.is_blocked() {
            log::debug!("load_users: blocked, skipping data load");
            return Ok(vec![]);
        }

        let mode = self.mode().await;
        let admin = self.admin().await;

        if mode == ServerMode::Local {
            return if admin {
                self.local_users().await
            } else {
                Ok(vec![])
            };
        }

        let api = { self.api.read().await.clone() };
        let Some(api) = api else {
            log::debug!("load_users: missing API_URL");
            return Ok(vec![]);
        };

        match api.users().await {
            Ok(users) => Ok(users),
            Err(e) => {
                log::warn!("load_users: failed to fetch users from the backend: {e:?}");
                if admin {
                    self.local_users().await
                } else {
                    Ok(vec![])
                }
            }
        }
    }

    /// Loads dashboard statistics, honoring the block.
    ///
    /// Returns `None` while blocked. When the backend is unreachable an
    /// offline placeholder built from the local data set is returned instead.
    ///
    /// # Errors
    ///
    /// * If the local data set fails to load
    pub async fn load_stats(&self) -> Result<Option<ApiStats>, AppStateError> {
        if self.is_blocked() {
            log::debug!("load_stats: blocked, skipping data load");
            return Ok(None);
        }

        let api = { self.api.read().await.clone() };

        if let Some(api) = api {
            match api.stats().await {
                Ok(stats) => return Ok(Some(stats)),
                Err(e) => {
                    log::warn!("load_stats: failed to fetch stats from the backend: {e:?}");
                }
            }
        }

        let total_users = u64::try_from(self.local_users().await?.len()).unwrap_or(u64::MAX);

        Ok(Some(ApiStats {
            total_users,
            server_time: None,
            status: Some("offline".to_string()),
            version: None,
            mode: Some(self.mode().await),
            clients: None,
            uptime: None,
            memory_mb: None,
            message: None,
        }))
    }
}
