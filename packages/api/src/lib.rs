//! HTTP API client for the `UserManager` backend.
//!
//! Wraps the companion REST endpoints (`/api/status`, `/api/mode`,
//! `/api/stats`, `/api/users`, ...) behind typed methods. The backend itself
//! is an opaque collaborator; this crate only speaks its JSON shapes.
//!
//! Every `GET` carries a `_` cache-busting query parameter so intermediary
//! caches never serve a stale mode or user list. When an admin token is
//! configured it is attached as the `X-Admin-Token` header, which unlocks the
//! admin-gated routes and bypasses the local-mode block server-side.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error;
use usermanager_ws::models::ServerMode;

pub mod models;

use models::{
    ApiCheckMode, ApiClients, ApiErrorBody, ApiHealth, ApiMode, ApiStats, ApiStatus, CreateUser,
    SetModeRequest, SetModeResponse, UpdateUser, User,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Not found: {message}")]
    NotFound { message: String },
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Typed client for the `UserManager` backend API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    admin_token: Option<String>,
    client: reqwest::Client,
}

impl ApiClient {
    /// Creates a client for the API rooted at `base_url`
    /// (e.g. `http://localhost:8068/api`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            admin_token: None,
            client: reqwest::Client::new(),
        }
    }

    /// Attaches an admin token to every subsequent request.
    #[must_use]
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn apply_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.admin_token {
            request.header("X-Admin-Token", token)
        } else {
            request
        }
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, Error> {
        log::trace!("get: path={path} query={query:?}");

        let request = self
            .client
            .get(self.url(path))
            .query(&[("_", cache_buster().to_string())])
            .query(query);

        handle_response(self.apply_headers(request).send().await?).await
    }

    /// `GET /api/status`
    ///
    /// # Errors
    ///
    /// * If the request fails or the backend rejects it
    pub async fn status(&self) -> Result<ApiStatus, Error> {
        Ok(self.get("/status", &[]).await?.json().await?)
    }

    /// `GET /api/mode`
    ///
    /// # Errors
    ///
    /// * If the request fails or the backend rejects it
    pub async fn mode(&self) -> Result<ApiMode, Error> {
        Ok(self.get("/mode", &[]).await?.json().await?)
    }

    /// `GET /api/check-mode`
    ///
    /// `last_check` is the unix-seconds timestamp of the caller's previous
    /// check; the backend sets `needs_reload` when the mode changed since.
    ///
    /// # Errors
    ///
    /// * If the request fails or the backend rejects it
    pub async fn check_mode(&self, last_check: Option<u64>) -> Result<ApiCheckMode, Error> {
        let mut query = vec![];
        if let Some(last_check) = last_check {
            query.push(("last_check", last_check.to_string()));
        }

        Ok(self.get("/check-mode", &query).await?.json().await?)
    }

    /// `GET /api/stats`
    ///
    /// # Errors
    ///
    /// * If the request fails or the backend rejects it
    pub async fn stats(&self) -> Result<ApiStats, Error> {
        Ok(self.get("/stats", &[]).await?.json().await?)
    }

    /// `GET /api/health`
    ///
    /// # Errors
    ///
    /// * If the request fails or the backend rejects it
    pub async fn health(&self) -> Result<ApiHealth, Error> {
        Ok(self.get("/health", &[]).await?.json().await?)
    }

    /// `GET /api/users`
    ///
    /// # Errors
    ///
    /// * If the request fails or the backend rejects it
    /// * Returns [`Error::NotFound`] while the backend is in local mode and
    ///   the caller is not an admin
    pub async fn users(&self) -> Result<Vec<User>, Error> {
        Ok(self.get("/users", &[]).await?.json().await?)
    }

    /// `GET /api/users/{id}`
    ///
    /// # Errors
    ///
    /// * If the request fails or the backend rejects it
    /// * Returns [`Error::NotFound`] if no user has this id
    pub async fn user(&self, id: u64) -> Result<User, Error> {
        Ok(self.get(&format!("/users/{id}"), &[]).await?.json().await?)
    }

    /// `POST /api/users`
    ///
    /// # Errors
    ///
    /// * If the request fails or the backend rejects the user (missing name,
    ///   invalid email, ...)
    pub async fn create_user(&self, user: &CreateUser) -> Result<User, Error> {
        log::debug!("create_user: name={} email={}", user.name, user.email);

        let request = self.client.post(self.url("/users")).json(user);

        Ok(handle_response(self.apply_headers(request).send().await?)
            .await?
            .json()
            .await?)
    }

    /// `PUT /api/users/{id}`
    ///
    /// # Errors
    ///
    /// * If the request fails or the backend rejects the update
    /// * Returns [`Error::NotFound`] if no user has this id
    pub async fn update_user(&self, id: u64, user: &UpdateUser) -> Result<User, Error> {
        log::debug!("update_user: id={id} name={} email={}", user.name, user.email);

        let request = self.client.put(self.url(&format!("/users/{id}"))).json(user);

        Ok(handle_response(self.apply_headers(request).send().await?)
            .await?
            .json()
            .await?)
    }

    /// `DELETE /api/users/{id}`
    ///
    /// # Errors
    ///
    /// * If the request fails
    /// * Returns [`Error::NotFound`] if no user has this id
    pub async fn delete_user(&self, id: u64) -> Result<(), Error> {
        log::debug!("delete_user: id={id}");

        let request = self.client.delete(self.url(&format!("/users/{id}")));

        handle_response(self.apply_headers(request).send().await?).await?;

        Ok(())
    }

    /// `GET /api/clients` (admin-gated)
    ///
    /// # Errors
    ///
    /// * Returns [`Error::Unauthorized`] without a valid admin token
    pub async fn clients(&self) -> Result<ApiClients, Error> {
        Ok(self.get("/clients", &[]).await?.json().await?)
    }

    /// `POST /api/admin/mode` — switches the backend between `server` and
    /// `local` mode. Password-gated; the backend broadcasts the change to
    /// every connected websocket client.
    ///
    /// # Errors
    ///
    /// * Returns [`Error::Unauthorized`] if the password is wrong
    pub async fn set_mode(
        &self,
        mode: ServerMode,
        password: &str,
    ) -> Result<SetModeResponse, Error> {
        log::debug!("set_mode: mode={mode}");

        let body = SetModeRequest {
            mode,
            password: password.to_string(),
        };
        let request = self.client.post(self.url("/admin/mode")).json(&body);

        Ok(handle_response(self.apply_headers(request).send().await?)
            .await?
            .json()
            .await?)
    }
}

async fn handle_response(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ApiErrorBody>()
        .await
        .map_or_else(|_| status.to_string(), |body| body.error);

    log::debug!("handle_response: status={status} message={message}");

    Err(match status {
        reqwest::StatusCode::UNAUTHORIZED => Error::Unauthorized,
        reqwest::StatusCode::NOT_FOUND => Error::NotFound { message },
        _ => Error::Api {
            status: status.as_u16(),
            message,
        },
    })
}

/// Unix-millis value appended to every `GET` as the `_` query param.
fn cache_buster() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_url_joins_base_and_path() {
        let client = ApiClient::new("http://localhost:8068/api");

        assert_eq!(client.url("/users"), "http://localhost:8068/api/users");
        assert_eq!(client.url("/users/3"), "http://localhost:8068/api/users/3");
    }

    #[test]
    fn test_trailing_slash_on_base_url_is_trimmed() {
        let client = ApiClient::new("http://localhost:8068/api/");

        assert_eq!(client.url("/mode"), "http://localhost:8068/api/mode");
    }

    #[test]
    fn test_users_response_parses() {
        let body = r#"[
            {"id":1,"name":"Alice Carter","email":"alice@example.com","created_at":"2026-08-04T09:00:00Z"},
            {"id":2,"name":"Bob Reyes","email":"bob@example.com","created_at":"2026-08-05T09:00:00Z"}
        ]"#;

        let users: Vec<User> = serde_json::from_str(body).unwrap();

        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, 1);
        assert_eq!(users[1].email, "bob@example.com");
    }

    #[test]
    fn test_status_response_parses_blocked_shape() {
        let body = r#"{
            "mode": "local",
            "is_admin": false,
            "timestamp": 1700000000,
            "status": "blocked",
            "blocked": true,
            "clients": 2,
            "server_time": "2026-08-07 12:00:00",
            "uptime": "1h3m"
        }"#;

        let status: ApiStatus = serde_json::from_str(body).unwrap();

        assert_eq!(status.mode, ServerMode::Local);
        assert!(status.blocked);
        assert!(!status.is_admin);
    }

    #[test]
    fn test_stats_response_parses_hidden_local_shape() {
        let body = r#"{
            "total_users": 0,
            "server_time": "2026-08-07T12:00:00Z",
            "status": "local",
            "version": "1.0.0",
            "mode": "local",
            "message": "Data hidden while in local mode"
        }"#;

        let stats: ApiStats = serde_json::from_str(body).unwrap();

        assert_eq!(stats.total_users, 0);
        assert_eq!(stats.mode, Some(ServerMode::Local));
        assert!(stats.message.is_some());
    }

    #[test]
    fn test_check_mode_response_parses() {
        let body = r#"{"mode":"server","last_change":1700000000,"needs_reload":true,"timestamp":1700000100}"#;

        let check: ApiCheckMode = serde_json::from_str(body).unwrap();

        assert_eq!(check.mode, ServerMode::Server);
        assert!(check.needs_reload);
    }

    #[test]
    fn test_set_mode_request_serializes() {
        let request = SetModeRequest {
            mode: ServerMode::Local,
            password: "hunter2".to_string(),
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"mode": "local", "password": "hunter2"})
        );
    }
}
