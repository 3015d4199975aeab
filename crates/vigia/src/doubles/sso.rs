//! DiscourseConnect-style SSO provider double.
//!
//! The application redirects the browser to
//! `/session/sso_provider?sso=<payload>&sig=<signature>`, where `payload` is
//! a base64 query string carrying `nonce` and `return_sso_url`, and
//! `signature` is the hex HMAC-SHA256 of the payload under the shared
//! secret. The double checks the signature, then redirects back to
//! `return_sso_url` with a signed payload asserting the seeded identity and
//! echoing the nonce.

use super::server::DoubleServer;
use crate::fixture::Fixture;
use crate::result::{HarnessError, HarnessResult};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type HmacSha256 = Hmac<Sha256>;

/// Path the application redirects to
pub const SSO_PROVIDER_PATH: &str = "/session/sso_provider";

const NAME: &str = "sso";

/// Hex HMAC-SHA256 of `payload` under `secret`
#[must_use]
pub fn sign(secret: &str, payload: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of `signature` against `payload`
#[must_use]
pub fn verify(secret: &str, payload: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Base64 of the form-encoded `fields`
#[must_use]
pub fn encode_payload<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();
    STANDARD.encode(query)
}

/// Inverse of [`encode_payload`]
pub fn decode_payload(payload: &str) -> HarnessResult<HashMap<String, String>> {
    let raw = STANDARD
        .decode(payload.trim())
        .map_err(|e| HarnessError::double(NAME, format!("payload is not base64: {e}")))?;
    Ok(url::form_urlencoded::parse(&raw).into_owned().collect())
}

/// Identity the double asserts on login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoIdentity {
    /// Stable id in the provider
    pub external_id: String,
    /// Email address
    pub email: String,
    /// Suggested username
    pub username: String,
    /// Display name
    pub name: Option<String>,
    /// Grant admin
    pub admin: bool,
    /// Group names
    pub groups: Vec<String>,
}

impl SsoIdentity {
    /// Identity with `external_id`, `email` and `username`
    #[must_use]
    pub fn new(
        external_id: impl Into<String>,
        email: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            email: email.into(),
            username: username.into(),
            name: None,
            admin: false,
            groups: Vec::new(),
        }
    }

    /// Display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark as admin
    pub fn admin(mut self) -> Self {
        self.admin = true;
        self
    }

    /// Group memberships
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    fn fields(&self, nonce: &str) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("nonce", nonce.to_string()),
            ("external_id", self.external_id.clone()),
            ("email", self.email.clone()),
            ("username", self.username.clone()),
            ("admin", self.admin.to_string()),
        ];
        if let Some(name) = &self.name {
            fields.push(("name", name.clone()));
        }
        if !self.groups.is_empty() {
            fields.push(("groups", self.groups.join(",")));
        }
        fields
    }
}

/// A login request the double received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoRequest {
    /// Nonce from the request payload
    pub nonce: Option<String>,
    /// Where the application wants the response
    pub return_sso_url: Option<String>,
    /// Whether the signature matched
    pub signature_valid: bool,
}

#[derive(Debug, Default)]
struct SsoState {
    identity: Option<SsoIdentity>,
    requests: Vec<SsoRequest>,
}

#[derive(Debug, Clone)]
struct Shared {
    secret: Arc<str>,
    state: Arc<Mutex<SsoState>>,
}

#[derive(Debug, Deserialize)]
struct ProviderQuery {
    sso: String,
    sig: String,
}

/// SSO identity provider double
#[derive(Debug)]
pub struct SsoDouble {
    shared: Shared,
    server: Option<DoubleServer>,
}

impl SsoDouble {
    /// Double sharing `secret` with the application
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        let secret: String = secret.into();
        Self {
            shared: Shared {
                secret: Arc::from(secret),
                state: Arc::new(Mutex::new(SsoState::default())),
            },
            server: None,
        }
    }

    /// Shared secret
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.shared.secret
    }

    /// Assert `identity` on every following login
    pub fn will_assert(&self, identity: SsoIdentity) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.identity = Some(identity);
        }
    }

    /// Login requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<SsoRequest> {
        self.shared
            .state
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }

    /// Start listening; a second call is a no-op
    pub async fn start(&mut self) -> HarnessResult<()> {
        if self.server.is_some() {
            return Ok(());
        }
        let router = Router::new()
            .route(SSO_PROVIDER_PATH, get(provider))
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

    /// Base URL, once started
    pub fn base_url(&self) -> HarnessResult<String> {
        self.server
            .as_ref()
            .map(DoubleServer::base_url)
            .ok_or_else(|| HarnessError::double(NAME, "not started"))
    }

    /// Provider endpoint the application should redirect to
    pub fn provider_url(&self) -> HarnessResult<String> {
        Ok(crate::config::join_url(&self.base_url()?, SSO_PROVIDER_PATH))
    }

    /// Signed login URL as the application would build it
    pub fn login_url(&self, nonce: &str, return_sso_url: &str) -> HarnessResult<String> {
        let payload = encode_payload([("nonce", nonce), ("return_sso_url", return_sso_url)]);
        let sig = sign(&self.shared.secret, &payload);
        let mut url = url::Url::parse(&self.provider_url()?)
            .map_err(|e| HarnessError::double(NAME, e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("sso", &payload)
            .append_pair("sig", &sig);
        Ok(url.into())
    }

    /// Verify and decode a response the application received
    pub fn decode_response(&self, sso: &str, sig: &str) -> HarnessResult<HashMap<String, String>> {
        if !verify(&self.shared.secret, sso, sig) {
            return Err(HarnessError::double(NAME, "response signature mismatch"));
        }
        decode_payload(sso)
    }
}

async fn provider(State(shared): State<Shared>, Query(query): Query<ProviderQuery>) -> Response {
    let signature_valid = verify(&shared.secret, &query.sso, &query.sig);
    let fields = decode_payload(&query.sso).unwrap_or_default();
    let request = SsoRequest {
        nonce: fields.get("nonce").cloned(),
        return_sso_url: fields.get("return_sso_url").cloned(),
        signature_valid,
    };

    let identity = match shared.state.lock() {
        Ok(mut state) => {
            state.requests.push(request.clone());
            state.identity.clone()
        }
        Err(_) => None,
    };

    if !signature_valid {
        tracing::warn!("sso request with bad signature");
        return (StatusCode::FORBIDDEN, "bad signature").into_response();
    }
    let (Some(nonce), Some(return_url)) = (request.nonce, request.return_sso_url) else {
        return (StatusCode::BAD_REQUEST, "payload needs nonce and return_sso_url").into_response();
    };
    let Some(identity) = identity else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no identity seeded").into_response();
    };
    let Ok(mut target) = url::Url::parse(&return_url) else {
        return (StatusCode::BAD_REQUEST, "return_sso_url is not a URL").into_response();
    };

    let fields = identity.fields(&nonce);
    let payload = encode_payload(fields.iter().map(|(k, v)| (*k, v.as_str())));
    let sig = sign(&shared.secret, &payload);
    target
        .query_pairs_mut()
        .append_pair("sso", &payload)
        .append_pair("sig", &sig);
    tracing::debug!(username = %identity.username, "sso asserting identity");
    Redirect::to(target.as_str()).into_response()
}

#[async_trait]
impl Fixture for SsoDouble {
    async fn setup(&mut self) -> HarnessResult<()> {
        self.start().await
    }

    async fn teardown(&mut self) -> HarnessResult<()> {
        self.stop().await
    }

    fn name(&self) -> &str {
        "sso double"
    }

    fn priority(&self) -> i32 {
        10
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod signature_tests {
        use super::*;

        #[test]
        fn test_sign_and_verify() {
            let payload = encode_payload([("nonce", "abc"), ("return_sso_url", "http://app/sso")]);
            let sig = sign("s3cret", &payload);
            assert_eq!(sig.len(), 64);
            assert!(verify("s3cret", &payload, &sig));
            assert!(!verify("other", &payload, &sig));
            assert!(!verify("s3cret", &payload, "not-hex"));
        }

        #[test]
        fn test_payload_decodes_to_fields() {
            let payload = encode_payload([("nonce", "n 1"), ("return_sso_url", "http://a/b?c=d")]);
            let fields = decode_payload(&payload).unwrap();
            assert_eq!(fields["nonce"], "n 1");
            assert_eq!(fields["return_sso_url"], "http://a/b?c=d");
            assert!(decode_payload("%%%").is_err());
        }

        #[test]
        fn test_identity_fields() {
            let identity = SsoIdentity::new("42", "bob@example.com", "bob")
                .with_name("Bob")
                .admin()
                .with_groups(["staff", "beta"]);
            let fields: HashMap<_, _> = identity.fields("xyz").into_iter().collect();
            assert_eq!(fields["nonce"], "xyz");
            assert_eq!(fields["admin"], "true");
            assert_eq!(fields["groups"], "staff,beta");
            assert_eq!(fields["name"], "Bob");
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[tokio::test]
        async fn test_urls_need_start() {
            let mut sso = SsoDouble::new("s");
            assert!(sso.provider_url().is_err());
            sso.start().await.unwrap();
            assert!(sso.provider_url().unwrap().ends_with(SSO_PROVIDER_PATH));
            sso.stop().await.unwrap();
            assert!(sso.base_url().is_err());
        }
    }
}
