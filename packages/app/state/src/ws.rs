//! `WebSocket` connection management for `UserManager` application state.
//!
//! This module wires the websocket client into [`AppState`]: it derives the
//! websocket URL from the API URL, spawns the message loop, dispatches typed
//! server pushes (mode changes, reload commands, client counts), and keeps a
//! buffer of outbound messages for flushing once a connection is up.
//!
//! # Example
//!
//! ```no_run
//! # use usermanager_app_state::AppState;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let state = AppState::new();
//! state.set_api_url("http://localhost:8068/api").await;
//!
//! // Runs until the connection is torn down or retries are exhausted
//! state.start_ws_connection().await?;
//!
//! state.close_ws_connection().await?;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::module_name_repetitions)]

use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;
use usermanager_app_ws::{ConnectionStatus, WebsocketSender as _, WsClient, WsHandle, WsMessage};
use usermanager_ws::models::{
    DisconnectPayload, InboundPayload, OutboundPayload, PongPayload, ServerMode,
};

use crate::{AppState, AppStateError};

impl AppState {
    /// Establishes the websocket connection to the backend.
    ///
    /// Cancels any previous connection, spawns the message-dispatch loop, and
    /// runs the client's connect/reconnect loop until it is cancelled, the
    /// handshake is rejected, or the reconnect attempts are exhausted. The
    /// client sends the `connect` envelope and requests the current mode on
    /// every successful open; buffered messages are flushed right after.
    ///
    /// Returns `Ok(())` without connecting when no API URL is configured.
    ///
    /// # Errors
    ///
    /// * If the API URL is not an `http(s)` URL
    /// * If the websocket connection is `UNAUTHORIZED`
    /// * If the reconnect attempts are exhausted
    ///
    /// # Panics
    ///
    /// * If any of the relevant state `RwLock`s are poisoned
    pub async fn start_ws_connection(&self) -> Result<(), AppStateError> {
        log::debug!("start_ws_connection: attempting to connect to ws");
        {
            if self.api_url.as_ref().read().await.is_none() {
                log::debug!("start_ws_connection: missing API_URL");
                return Ok(());
            }
        }
        {
            let token = self.ws_token.read().await.clone();
            if let Some(token) = token {
                token.cancel();
            }
        }
        let token = {
            let token = CancellationToken::new();
            self.ws_token.write().await.replace(token.clone());
            token
        };

        let api_url = self.api_url.read().await.clone().unwrap();
        let ws_url = derive_ws_url(&api_url)?;
        {
            *self.ws_url.write().await = Some(ws_url.clone());
        }

        let client_id = {
            let client_id = self.client_id.read().await.clone();
            if let Some(client_id) = client_id {
                client_id
            } else {
                // no storage attached; fall back to an ephemeral identity
                let generated = format!("client_{}", nanoid::nanoid!());
                log::debug!("start_ws_connection: generated ephemeral client_id={generated}");
                self.client_id.write().await.replace(generated.clone());
                generated
            }
        };
        let is_admin = { *self.is_admin.read().await };

        let (client, handle) = WsClient::new(ws_url);

        self.ws_handle.write().await.replace(handle.clone());

        let client = client.with_cancellation_token(token.clone());

        let (tx, mut rx) = tokio::sync::mpsc::channel(100);

        tokio::spawn({
            let state = self.clone();
            let token = token.clone();
            async move {
                while let Some(m) = tokio::select! {
                    resp = rx.recv() => resp,
                    () = token.cancelled() => {
                        log::debug!("message loop cancelled");
                        None
                    }
                } {
                    match m {
                        WsMessage::TextMessage(message) => {
                            state.handle_ws_text(&message).await;
                        }
                        WsMessage::Message(bytes) => match String::from_utf8(bytes.into()) {
                            Ok(message) => {
                                state.handle_ws_text(&message).await;
                            }
                            Err(e) => {
                                log::error!("Failed to read ws message: {e:?}");
                            }
                        },
                        WsMessage::Ping => {
                            log::trace!("got ping");
                        }
                    }
                }
                log::debug!("Exiting ws message loop");
            }
        });

        let on_status = {
            let state = self.clone();
            move |status| {
                let state = state.clone();
                tokio::spawn(async move {
                    state.update_connection_status(status).await;
                });
            }
        };

        let on_open = {
            let state = self.clone();
            move || {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = state.flush_ws_message_buffer().await {
                        log::error!("Failed to flush WS message buffer: {e:?}");
                    }
                });
            }
        };

        Ok(client
            .start(client_id, is_admin, on_status, on_open, tx)
            .await?)
    }

    /// Closes the active websocket connection.
    ///
    /// Sends a best-effort `disconnect` notice with the client id, then
    /// cancels the connection; no reconnect is scheduled afterwards. Safe to
    /// call even if no connection is active.
    ///
    /// # Errors
    ///
    /// * If the disconnect notice fails to serialize
    pub async fn close_ws_connection(&self) -> Result<(), AppStateError> {
        log::debug!("close_ws_connection: attempting to close ws connection");

        let handle = self.ws_handle.read().await.clone();
        if let Some(handle) = handle {
            let client_id = self.client_id.read().await.clone();
            if let Some(client_id) = client_id {
                let notice = InboundPayload::Disconnect(DisconnectPayload { client_id });
                if let Err(e) = handle.send(&serde_json::to_string(&notice)?).await {
                    log::debug!("close_ws_connection: failed to send disconnect notice: {e:?}");
                }
            }

            handle.close();
        }

        let handle = self.ws_join_handle.write().await.take();
        if let Some(handle) = handle {
            handle.abort();
        }

        log::debug!("close_ws_connection: ws connection closed");

        Ok(())
    }

    /// Queues a websocket message for sending or buffers it if not connected.
    ///
    /// # Errors
    ///
    /// * If the websocket message fails to send
    pub async fn queue_ws_message(&self, message: InboundPayload) -> Result<(), AppStateError> {
        let handle = { self.ws_handle.read().await.clone() };

        if let Some(handle) = handle {
            self.send_ws_message(&handle, message).await?;
        } else {
            usermanager_logging::debug_or_trace!(
                ("queue_ws_message: pushing message to buffer: {message}"),
                ("queue_ws_message: pushing message to buffer: {message:?}")
            );
            self.ws_message_buffer.write().await.push(message);
        }

        Ok(())
    }

    /// Sends a websocket message to the server.
    ///
    /// # Errors
    ///
    /// * If the websocket message fails to serialize or send
    pub async fn send_ws_message(
        &self,
        handle: &WsHandle,
        message: InboundPayload,
    ) -> Result<(), AppStateError> {
        log::debug!("send_ws_message: message={message}");

        handle.send(&serde_json::to_string(&message)?).await?;

        Ok(())
    }

    /// Sends all buffered websocket messages to the server.
    ///
    /// Processes the messages that were queued while the websocket connection
    /// was not available. Called automatically when a connection is
    /// established.
    ///
    /// # Errors
    ///
    /// * If any websocket messages fail to send
    pub async fn flush_ws_message_buffer(&self) -> Result<(), AppStateError> {
        let handle = self.ws_handle.read().await.clone();

        if let Some(handle) = handle {
            let mut binding = self.ws_message_buffer.write().await;
            log::debug!(
                "flush_ws_message_buffer: Flushing {} ws messages from buffer",
                binding.len()
            );

            let messages = binding.drain(..).collect::<Vec<_>>();
            drop(binding);

            for message in messages {
                self.send_ws_message(&handle, message).await?;
            }
        } else {
            log::debug!("flush_ws_message_buffer: No WS_HANDLE");
        }

        Ok(())
    }

    pub(crate) async fn handle_ws_text(&self, message: &str) {
        match serde_json::from_str::<OutboundPayload>(message) {
            Ok(message) => {
                if let Err(e) = self.handle_ws_message(message).await {
                    log::error!("Failed to handle_ws_message: {e:?}");
                }
            }
            Err(e) => {
                // a malformed push never affects the connection
                log::error!("got invalid message: {message}: {e:?}");
            }
        }
    }

    /// Processes an incoming websocket message from the server.
    ///
    /// # Errors
    ///
    /// * If a reply fails to send
    pub async fn handle_ws_message(&self, message: OutboundPayload) -> Result<(), AppStateError> {
        log::debug!("handle_ws_message: {message:?}");

        match &message {
            OutboundPayload::Connected(payload) => {
                self.update_clients(payload.data.clients).await;
                if payload.data.is_admin {
                    // the backend recognized this client as an operator
                    *self.is_admin.write().await = true;
                }
                self.update_mode(payload.data.mode, false).await;
            }
            OutboundPayload::ModeInfo(payload) => {
                if let Some(clients) = payload.data.clients {
                    self.update_clients(clients).await;
                }
                self.update_mode(payload.data.mode, false).await;
            }
            OutboundPayload::ModeChanged(payload) => {
                if let Some(clients) = payload.data.clients {
                    self.update_clients(clients).await;
                }
                self.update_mode(payload.data.new_mode, payload.data.force_reload)
                    .await;
            }
            OutboundPayload::Ping(_) => {
                let pong = InboundPayload::Pong(PongPayload {
                    timestamp: usermanager_session::now_millis(),
                });
                self.queue_ws_message(pong).await?;
            }
            OutboundPayload::Pong(_) => {
                log::trace!("handle_ws_message: pong");
            }
            OutboundPayload::ForceReload(payload) => {
                self.trigger_reload(payload.data.as_ref().and_then(|x| x.reason.as_deref()))
                    .await;
            }
            OutboundPayload::ClientsUpdate(payload) => {
                self.update_clients(payload.data.clients).await;
            }
            OutboundPayload::Error(payload) => {
                log::error!("handle_ws_message: server error: {}", payload.message);
            }
        }

        Ok(())
    }

    async fn update_mode(&self, mode: ServerMode, force_reload: bool) {
        let changed = {
            let mut current = self.current_mode.write().await;
            let changed = *current != mode;
            *current = mode;
            changed
        };

        if changed {
            log::debug!("update_mode: mode={mode}");

            if let Some(storage) = self.storage().await {
                if let Err(e) =
                    storage.set(
                        usermanager_session::storage::StorageKey::UseServerData,
                        &(mode == ServerMode::Server),
                    )
                {
                    log::warn!("update_mode: failed to persist data-source preference: {e:?}");
                }
            }

            for listener in &self.on_mode_changed_listeners {
                listener(mode).await;
            }
        }

        self.update_blocked().await;

        if force_reload {
            self.trigger_reload(Some(&format!("mode_changed_to_{mode}")))
                .await;
        }
    }

    /// Re-evaluates the blocked flag from the current mode and admin state,
    /// firing the blocked-changed listeners only on a transition.
    pub(crate) async fn update_blocked(&self) {
        let mode = { *self.current_mode.read().await };
        let admin = { *self.is_admin.read().await };
        let blocked = mode == ServerMode::Local && !admin;

        let was_blocked = self.blocked.swap(blocked, Ordering::SeqCst);
        if was_blocked == blocked {
            return;
        }

        log::info!("update_blocked: blocked={blocked}");

        for listener in &self.on_blocked_changed_listeners {
            listener(blocked).await;
        }
    }

    async fn trigger_reload(&self, reason: Option<&str>) {
        // repeated reload commands must not stack reloads
        if self.reload_triggered.swap(true, Ordering::SeqCst) {
            log::debug!("trigger_reload: reload already triggered, ignoring");
            return;
        }

        log::info!("trigger_reload: reason={reason:?}");

        for listener in &self.on_reload_listeners {
            listener().await;
        }
    }

    async fn update_clients(&self, clients: u64) {
        let changed = {
            let mut current = self.connected_clients.write().await;
            let changed = *current != clients;
            *current = clients;
            changed
        };

        if changed {
            for listener in &self.on_clients_updated_listeners {
                listener(clients).await;
            }
        }
    }

    async fn update_connection_status(&self, status: ConnectionStatus) {
        {
            *self.connection_status.write().await = Some(status);
        }

        for listener in &self.on_connection_status_listeners {
            listener(status).await;
        }
    }
}

fn derive_ws_url(api_url: &str) -> Result<String, AppStateError> {
    let base = api_url.trim_end_matches('/').trim_end_matches("/api");

    if !base.starts_with("http") {
        return Err(AppStateError::unknown(format!(
            "Invalid API URL: {api_url}"
        )));
    }

    Ok(format!("ws{}/ws", &base[4..]))
}
