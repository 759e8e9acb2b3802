//! HTTP façade over the attendance backend's session endpoints.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;
use shared::{
    domain::{Location, LocationId, SessionId, UserId},
    error::CredentialError,
    protocol::{
        decode_location_list, decode_worker_list, CurrentLocationResponse, EditSessionRequest,
        Statistic, Worker,
    },
};
use tracing::{debug, info, warn};

use crate::{coordinator::SessionOp, error::SessionError};

/// Source of bearer tokens. Called once per request; implementations own any
/// refresh logic, this crate never caches tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fresh_token(&self) -> Result<String, CredentialError>;
}

pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fresh_token(&self) -> Result<String, CredentialError> {
        if self.token.trim().is_empty() {
            return Err(CredentialError::new("configured token is empty"));
        }
        Ok(self.token.clone())
    }
}

pub struct MissingTokenProvider;

#[async_trait]
impl TokenProvider for MissingTokenProvider {
    async fn fresh_token(&self) -> Result<String, CredentialError> {
        Err(CredentialError::new("no credential provider configured"))
    }
}

/// Backend calls the attendance coordinator depends on.
#[async_trait]
pub trait SessionOps: Send + Sync {
    async fn clock_in(&self, location_id: LocationId) -> Result<(), SessionError>;
    async fn clock_out(&self) -> Result<(), SessionError>;
    async fn edit_session(
        &self,
        session_id: SessionId,
        location_id: LocationId,
        check_in: DateTime<Utc>,
        check_out: Option<DateTime<Utc>>,
    ) -> Result<(), SessionError>;
    async fn delete_session(&self, session_id: SessionId) -> Result<(), SessionError>;
    async fn current_location(&self, user_id: UserId) -> Result<Option<Location>, SessionError>;

    async fn execute(&self, op: &SessionOp) -> Result<(), SessionError> {
        match op {
            SessionOp::ClockIn(location_id) => self.clock_in(*location_id).await,
            SessionOp::ClockOut => self.clock_out().await,
            SessionOp::EditSession {
                session_id,
                location_id,
                check_in,
                check_out,
            } => {
                self.edit_session(*session_id, *location_id, *check_in, *check_out)
                    .await
            }
            SessionOp::DeleteSession(session_id) => self.delete_session(*session_id).await,
        }
    }
}

#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn fetch_locations(&self) -> Result<Vec<Location>, SessionError>;
}

pub struct SessionService {
    http: Client,
    server_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl SessionService {
    pub fn new(server_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_client(Client::new(), server_url, tokens)
    }

    pub fn with_timeout(
        server_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, server_url, tokens))
    }

    pub fn with_client(
        http: Client,
        server_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let server_url: String = server_url.into();
        Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    async fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder, SessionError> {
        let token = self.tokens.fresh_token().await.inspect_err(|err| {
            warn!(path, error = %err, "session: no fresh credential");
        })?;
        Ok(self
            .http
            .request(method, format!("{}{path}", self.server_url))
            .bearer_auth(token))
    }

    async fn dispatch(request: RequestBuilder) -> Result<Response, SessionError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Http {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn fetch_json(&self, path: &str) -> Result<Value, SessionError> {
        let response = Self::dispatch(self.authorized(Method::GET, path).await?).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn post_empty(&self, path: &str) -> Result<(), SessionError> {
        Self::dispatch(self.authorized(Method::POST, path).await?).await?;
        Ok(())
    }

    pub async fn fetch_statistics(&self, user_id: UserId) -> Result<Vec<Statistic>, SessionError> {
        let body = self
            .fetch_json(&format!("/app-request/statistics/{user_id}"))
            .await?;
        let stats: Vec<Statistic> = serde_json::from_value(body)?;
        debug!(user_id = user_id.0, count = stats.len(), "session: fetched statistics");
        Ok(stats)
    }

    pub async fn fetch_workers(&self) -> Result<Vec<Worker>, SessionError> {
        let body = self.fetch_json("/web/all-user-current-location").await?;
        Ok(decode_worker_list(body)?)
    }
}

#[async_trait]
impl SessionOps for SessionService {
    async fn clock_in(&self, location_id: LocationId) -> Result<(), SessionError> {
        info!(location_id = location_id.0, "session: clock in");
        self.post_empty(&format!("/session/clockIn/{location_id}"))
            .await
            .inspect_err(|err| warn!(location_id = location_id.0, error = %err, "session: clock in failed"))
    }

    async fn clock_out(&self) -> Result<(), SessionError> {
        info!("session: clock out");
        self.post_empty("/session/clockOut")
            .await
            .inspect_err(|err| warn!(error = %err, "session: clock out failed"))
    }

    async fn edit_session(
        &self,
        session_id: SessionId,
        location_id: LocationId,
        check_in: DateTime<Utc>,
        check_out: Option<DateTime<Utc>>,
    ) -> Result<(), SessionError> {
        info!(session_id = session_id.0, location_id = location_id.0, "session: edit");
        let body = EditSessionRequest {
            location: location_id,
            checkin_timestamp: check_in,
            checkout_timestamp: check_out,
        };
        let request = self
            .authorized(Method::PATCH, &format!("/session/{session_id}"))
            .await?
            .json(&body);
        Self::dispatch(request).await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), SessionError> {
        info!(session_id = session_id.0, "session: delete");
        let request = self
            .authorized(Method::DELETE, &format!("/session/{session_id}"))
            .await?;
        Self::dispatch(request).await?;
        Ok(())
    }

    async fn current_location(&self, user_id: UserId) -> Result<Option<Location>, SessionError> {
        let body = self
            .fetch_json(&format!("/web/user-current-location/{user_id}"))
            .await?;
        let response: CurrentLocationResponse = serde_json::from_value(body)?;
        Ok(response.into_location())
    }
}

#[async_trait]
impl LocationSource for SessionService {
    async fn fetch_locations(&self) -> Result<Vec<Location>, SessionError> {
        let body = self.fetch_json("/web/allLocations").await?;
        Ok(decode_location_list(body)?)
    }
}

#[cfg(test)]
#[path = "tests/session_service_tests.rs"]
mod tests;
