//! Service doubles for the systems an application calls out to.
//!
//! Each double can be seeded ("assert this identity"), started and stopped
//! when the protocol needs a real HTTP round trip, and inspected
//! synchronously for what it received. All of them implement
//! [`Fixture`](crate::fixture::Fixture) so a scenario can own their
//! lifecycle.

mod jobs;
mod mail;
mod oauth;
mod server;
mod sso;

pub use jobs::{ImmediateGuard, Job, JobMode, JobQueue};
pub use mail::{extract_link, magic_link, Mail, MailCollector};
pub use oauth::{OAuthClient, OAuthDouble, OAuthIdentity, TokenResponse};
pub use server::DoubleServer;
pub use sso::{
    decode_payload, encode_payload, sign, verify, SsoDouble, SsoIdentity, SsoRequest,
    SSO_PROVIDER_PATH,
};
