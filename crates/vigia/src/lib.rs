//! Vigia: page objects, polling assertions and service doubles for browser
//! end-to-end tests.
//!
//! Vigia (Spanish/Portuguese: "watch, vigil") keeps a scenario's view of the
//! browser honest: every lookup and assertion is a polled condition with a
//! bounded timeout, every page and component is a value describing *where*
//! things are, and every scenario owns its browser contexts, fixtures and
//! setting overrides.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Scenario                                 │
//! │  fixtures ── setting overrides ── Session (actors → contexts)    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  PageObject / Component ──► Locator ──► Poller ──► Expectation   │
//! │                                 │                                │
//! │                           Window (handle)                        │
//! ├─────────────────────────────────┼────────────────────────────────┤
//! │          BrowserDriver: FakeBrowser │ CdpDriver (chromium)       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Service doubles: SSO · OAuth · mail · jobs (DoubleServer/axum)  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use vigia::prelude::*;
//!
//! let outcome = Scenario::builder("saves a site setting")
//!     .driver(driver)
//!     .config(HarnessConfig::default())
//!     .build()?
//!     .run(|ctx| async move {
//!         let window = ctx.current().await?;
//!         window.visit(&SiteSettings::category("required")).await?;
//!         window.fill(&Locator::new("#title"), "Staging").await?;
//!         window.click(&Locator::new(".save")).await?;
//!         window.expect(".saved").to_be_visible().await?;
//!         Ok(())
//!     })
//!     .await;
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

// Derive output refers to `::vigia::...`, including inside this crate's tests
extern crate self as vigia;

/// Harness configuration (YAML + environment)
pub mod config;

/// Browser automation seam and backends
pub mod driver;

/// Service doubles: SSO, OAuth, mail, jobs
pub mod doubles;

/// Scenario fixtures
pub mod fixture;

/// Structured logging setup
pub mod logging;

/// Scenario-scoped setting overrides
pub mod overrides;

/// Failure reports and scenario summaries
#[allow(clippy::format_push_string)]
pub mod report;

mod component;
mod expect;
mod locator;
mod page;
mod poller;
mod result;
mod scenario;
mod session;
mod window;

pub use component::{Component, Dropdown, DropdownParts, Expandable, Modal, Toasts};
pub use config::{BrowserSettings, HarnessConfig, LogConfig, LogFormat, WaitPolicy};
pub use driver::fake::{FakeBrowser, Node};
pub use driver::{BrowserDriver, ElementRef, ElementState, Key, Viewport};
pub use expect::Expectation;
pub use fixture::{Fixture, FixtureManager};
pub use locator::{Locator, LocatorOptions, Selector};
pub use page::{PageObject, PageObjectBuilder, RouteTemplate, SimplePageObject};
pub use poller::{try_until_success, Condition, MatchResult, Poller};
pub use report::{FailureReport, Reporter, ScenarioOutcome, ScenarioStatus};
pub use result::{HarnessError, HarnessResult};
pub use scenario::{Scenario, ScenarioBuilder, ScenarioContext};
pub use session::{CookieSignIn, Session, SignInStrategy, DEFAULT_ACTOR};
pub use window::Window;

#[cfg(feature = "browser")]
pub use driver::cdp::CdpDriver;

// Re-export derive macros when the `derive` feature is enabled
#[cfg(feature = "derive")]
pub use vigia_derive::{Component, PageObject};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::component::*;
    pub use super::config::*;
    pub use super::doubles::*;
    pub use super::driver::fake::*;
    pub use super::driver::{
        AuthenticatorId, AuthenticatorOptions, AuthenticatorTransport, BrowserDriver, ContextId,
        Cookie, ElementRef, ElementState, Key, Screenshot, Viewport, WindowId,
    };
    pub use super::expect::*;
    pub use super::fixture::*;
    pub use super::locator::*;
    pub use super::overrides::*;
    pub use super::page::*;
    pub use super::poller::*;
    pub use super::report::*;
    pub use super::result::*;
    pub use super::scenario::*;
    pub use super::session::*;
    pub use super::window::*;

    #[cfg(feature = "browser")]
    pub use super::driver::cdp::CdpDriver;

    #[cfg(feature = "derive")]
    pub use vigia_derive::{Component, PageObject};
}
