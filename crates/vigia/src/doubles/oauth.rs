//! OAuth2 authorization-code provider double.
//!
//! Three endpoints: `/authorize` redirects back with a one-time `code` (or
//! `error=access_denied` while denying), `/token` trades a code for a
//! bearer token exactly once, and `/userinfo` returns the seeded identity
//! for a valid token.

use super::server::DoubleServer;
use crate::fixture::Fixture;
use crate::result::{HarnessError, HarnessResult};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const NAME: &str = "oauth";

/// Identity returned from `/userinfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthIdentity {
    /// Subject id
    pub sub: String,
    /// Email address
    pub email: String,
    /// Display name
    pub name: String,
    /// Whether the provider vouches for the email
    #[serde(default)]
    pub email_verified: bool,
}

impl OAuthIdentity {
    /// Verified identity
    #[must_use]
    pub fn new(sub: impl Into<String>, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            email: email.into(),
            name: name.into(),
            email_verified: true,
        }
    }

    /// Unverified email
    pub fn unverified(mut self) -> Self {
        self.email_verified = false;
        self
    }
}

/// Registered client credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient {
    /// Client id
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
}

impl Default for OAuthClient {
    fn default() -> Self {
        Self {
            client_id: "vigia-client".into(),
            client_secret: "vigia-secret".into(),
        }
    }
}

#[derive(Debug, Default)]
struct OAuthState {
    identity: Option<OAuthIdentity>,
    denying: bool,
    codes: HashMap<String, OAuthIdentity>,
    tokens: HashMap<String, OAuthIdentity>,
    authorize_requests: usize,
    token_exchanges: usize,
}

#[derive(Debug, Clone)]
struct Shared {
    client: Arc<OAuthClient>,
    state: Arc<Mutex<OAuthState>>,
}

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    client_id: String,
    redirect_uri: String,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    grant_type: String,
    code: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

/// Body returned from `/token`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer token for `/userinfo`
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

/// OAuth2 provider double
#[derive(Debug)]
pub struct OAuthDouble {
    shared: Shared,
    server: Option<DoubleServer>,
}

impl Default for OAuthDouble {
    fn default() -> Self {
        Self::new(OAuthClient::default())
    }
}

impl OAuthDouble {
    /// Double accepting `client`
    #[must_use]
    pub fn new(client: OAuthClient) -> Self {
        Self {
            shared: Shared {
                client: Arc::new(client),
                state: Arc::new(Mutex::new(OAuthState::default())),
            },
            server: None,
        }
    }

    /// Accepted client
    #[must_use]
    pub fn client(&self) -> &OAuthClient {
        &self.shared.client
    }

    /// Authorize every following request as `identity`
    pub fn will_assert(&self, identity: OAuthIdentity) {
        self.with_state(|s| {
            s.identity = Some(identity);
            s.denying = false;
        });
    }

    /// Answer every following authorization with `access_denied`
    pub fn deny(&self) {
        self.with_state(|s| s.denying = true);
    }

    /// Stop denying
    pub fn allow(&self) {
        self.with_state(|s| s.denying = false);
    }

    /// Number of `/authorize` hits
    #[must_use]
    pub fn authorize_requests(&self) -> usize {
        self.with_state(|s| s.authorize_requests)
    }

    /// Number of successful code exchanges
    #[must_use]
    pub fn token_exchanges(&self) -> usize {
        self.with_state(|s| s.token_exchanges)
    }

    fn with_state<R: Default>(&self, f: impl FnOnce(&mut OAuthState) -> R) -> R {
        self.shared.state.lock().map(|mut s| f(&mut s)).unwrap_or_default()
    }

    /// Start listening; a second call is a no-op
    pub async fn start(&mut self) -> HarnessResult<()> {
        if self.server.is_some() {
            return Ok(());
        }
        let router = Router::new()
            .route("/authorize", get(authorize))
            .route("/token", post(token))
            .route("/userinfo", get(userinfo))
            .with_state(self.shared.clone());
        self.server = Some(DoubleServer::start(NAME, router).await?);
        Ok(())
    }

    /// Stop listening
    pub async fn stop(&mut self) -> HarnessResult<()> {
        if let Some(mut server) = self.server.take() {
            server.stop().await?;
        }
        Ok(())
    }

    /// Absolute URL of `path`, once started
    pub fn url(&self, path: &str) -> HarnessResult<String> {
        self.server
            .as_ref()
            .map(|s| s.url(path))
            .ok_or_else(|| HarnessError::double(NAME, "not started"))
    }

    /// Authorization URL the application would send the browser to
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> HarnessResult<String> {
        let mut url = url::Url::parse(&self.url("/authorize")?)
            .map_err(|e| HarnessError::double(NAME, e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.shared.client.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);
        Ok(url.into())
    }
}

fn error_json(status: StatusCode, error: &str) -> Response {
    (status, Json(serde_json::json!({ "error": error }))).into_response()
}

async fn authorize(State(shared): State<Shared>, Query(query): Query<AuthorizeQuery>) -> Response {
    let Ok(mut redirect) = url::Url::parse(&query.redirect_uri) else {
        return error_json(StatusCode::BAD_REQUEST, "invalid_request");
    };
    if query.client_id != shared.client.client_id {
        return error_json(StatusCode::BAD_REQUEST, "unauthorized_client");
    }

    let outcome = match shared.state.lock() {
        Ok(mut state) => {
            state.authorize_requests += 1;
            if state.denying {
                Err("access_denied")
            } else if let Some(identity) = state.identity.clone() {
                let code = uuid::Uuid::new_v4().simple().to_string();
                state.codes.insert(code.clone(), identity);
                Ok(code)
            } else {
                Err("server_error")
            }
        }
        Err(_) => Err("server_error"),
    };

    {
        let mut pairs = redirect.query_pairs_mut();
        match &outcome {
            Ok(code) => pairs.append_pair("code", code),
            Err(error) => pairs.append_pair("error", error),
        };
        if let Some(state) = &query.state {
            pairs.append_pair("state", state);
        }
    }
    tracing::debug!(granted = outcome.is_ok(), "oauth authorize");
    Redirect::to(redirect.as_str()).into_response()
}

async fn token(State(shared): State<Shared>, Form(form): Form<TokenForm>) -> Response {
    if form.grant_type != "authorization_code" {
        return error_json(StatusCode::BAD_REQUEST, "unsupported_grant_type");
    }
    let client = &shared.client;
    if form.client_id.as_deref() != Some(client.client_id.as_str())
        || form.client_secret.as_deref() != Some(client.client_secret.as_str())
    {
        return error_json(StatusCode::UNAUTHORIZED, "invalid_client");
    }

    let issued = shared.state.lock().ok().and_then(|mut state| {
        let identity = state.codes.remove(&form.code)?;
        let access_token = uuid::Uuid::new_v4().simple().to_string();
        state.tokens.insert(access_token.clone(), identity);
        state.token_exchanges += 1;
        Some(access_token)
    });

    match issued {
        Some(access_token) => Json(TokenResponse {
            access_token,
            token_type: "Bearer".into(),
            expires_in: 3600,
        })
        .into_response(),
        None => error_json(StatusCode::BAD_REQUEST, "invalid_grant"),
    }
}

async fn userinfo(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let identity = token.and_then(|t| {
        shared
            .state
            .lock()
            .ok()
            .and_then(|state| state.tokens.get(t).cloned())
    });
    match identity {
        Some(identity) => Json(identity).into_response(),
        None => error_json(StatusCode::UNAUTHORIZED, "invalid_token"),
    }
}

#[async_trait]
impl Fixture for OAuthDouble {
    async fn setup(&mut self) -> HarnessResult<()> {
        self.start().await
    }

    async fn teardown(&mut self) -> HarnessResult<()> {
        self.stop().await
    }

    fn name(&self) -> &str {
        "oauth double"
    }

    fn priority(&self) -> i32 {
        10
    }
}
