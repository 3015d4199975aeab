//! Window handles.
//!
//! A [`Window`] is one tab of one browser context. Page objects, components
//! and expectations take the window explicitly; there is no ambient
//! "current page". Windows are created only by the [`Session`](crate::Session).

use crate::config::{join_url, WaitPolicy};
use crate::driver::{
    AuthenticatorId, AuthenticatorOptions, BrowserDriver, ContextId, ElementRef, ElementState,
    Key, Screenshot, Viewport, WindowId,
};
use crate::expect::Expectation;
use crate::locator::{unwrap_lookup_timeout, Locator};
use crate::page::{shows, PageObject};
use crate::poller::{MatchResult, Poller};
use crate::result::{HarnessError, HarnessResult};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Resources that must be released when a session resets
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    pub(crate) authenticators: Vec<(WindowId, AuthenticatorId)>,
    pub(crate) clipboard: Vec<ContextId>,
}

/// One browser tab
#[derive(Debug, Clone)]
pub struct Window {
    driver: Arc<dyn BrowserDriver>,
    context: ContextId,
    id: WindowId,
    actor: String,
    base_url: String,
    policy: WaitPolicy,
    tracker: Arc<Mutex<Tracker>>,
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Window {}

impl Window {
    pub(crate) fn new(
        driver: Arc<dyn BrowserDriver>,
        context: ContextId,
        id: WindowId,
        actor: String,
        base_url: String,
        policy: WaitPolicy,
        tracker: Arc<Mutex<Tracker>>,
    ) -> Self {
        Self {
            driver,
            context,
            id,
            actor,
            base_url,
            policy,
            tracker,
        }
    }

    /// Driver behind this window
    #[must_use]
    pub fn driver(&self) -> &dyn BrowserDriver {
        self.driver.as_ref()
    }

    /// Window id
    #[must_use]
    pub const fn id(&self) -> &WindowId {
        &self.id
    }

    /// Browser context id
    #[must_use]
    pub const fn context(&self) -> &ContextId {
        &self.context
    }

    /// Name of the actor owning the context
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Base URL of the application
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Timing policy of this window
    #[must_use]
    pub const fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Implicit-wait poller
    #[must_use]
    pub fn poller(&self) -> Poller {
        Poller::from_policy(&self.policy)
    }

    /// Existence-probe poller
    #[must_use]
    pub fn probe_poller(&self) -> Poller {
        Poller::probe(&self.policy)
    }

    /// Absolute URL for an application path
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    // ---- navigation ----

    /// Navigate to `page` and wait for its ready signal.
    ///
    /// A missing ready signal is `NavigationTimeout`, not `Timeout`.
    pub async fn visit<P: PageObject + ?Sized>(&self, page: &P) -> HarnessResult<()> {
        let url = self.url_for(&page.path()?);
        tracing::info!(actor = %self.actor, page = page.page_name(), %url, "visiting");
        let ready = page.ready();
        let ready_ref = &ready;
        let timeout = page.load_timeout().unwrap_or_else(|| self.policy.navigation());
        let start = Instant::now();
        let navigated = tokio::time::timeout(timeout, self.driver.navigate(&self.id, &url)).await;
        let Ok(navigated) = navigated else {
            return Err(HarnessError::NavigationTimeout {
                page: page.page_name().to_string(),
                url,
                ready: ready.to_string(),
                elapsed: start.elapsed(),
            });
        };
        navigated?;

        let poller = self
            .poller()
            .with_timeout(timeout.saturating_sub(start.elapsed()));
        let result = poller
            .check(&format!("{} ready", page.page_name()), || async move {
                Ok(!ready_ref.resolve_all_once(self).await?.is_empty())
            })
            .await?;
        if result.ok {
            return Ok(());
        }
        Err(HarnessError::NavigationTimeout {
            page: page.page_name().to_string(),
            url,
            ready: ready.to_string(),
            elapsed: start.elapsed(),
        })
    }

    /// Navigate to an application path without waiting for anything
    pub async fn visit_path(&self, path: &str) -> HarnessResult<()> {
        let url = self.url_for(path);
        tracing::info!(actor = %self.actor, %url, "visiting path");
        self.driver.navigate(&self.id, &url).await
    }

    /// Whether the live URL shows `page`
    pub async fn is_on<P: PageObject + ?Sized>(&self, page: &P) -> HarnessResult<bool> {
        let url = self.current_url().await?;
        shows(page, &url)
    }

    /// Wait until the live URL shows `page`
    pub async fn expect_on<P: PageObject + ?Sized>(&self, page: &P) -> HarnessResult<MatchResult> {
        let label = format!("url to show {}", page.page_name());
        self.poller()
            .wait_until(&label, || async move { self.is_on(page).await })
            .await
    }

    /// Wait until the live URL contains `fragment`
    pub async fn expect_url(&self, fragment: &str) -> HarnessResult<MatchResult> {
        let label = format!("url to contain {fragment:?}");
        self.poller()
            .wait_until(&label, || async move {
                let url = self.current_url().await?;
                if url.contains(fragment) {
                    Ok(true)
                } else {
                    Err(HarnessError::assertion(format!("url is {url}")))
                }
            })
            .await
    }

    /// Current URL
    pub async fn current_url(&self) -> HarnessResult<String> {
        self.driver.current_url(&self.id).await
    }

    // ---- lookup ----

    /// Wait for exactly one match of `locator`
    pub async fn find(&self, locator: &Locator) -> HarnessResult<ElementRef> {
        locator.find(self).await
    }

    /// Snapshot of every match of `locator`
    pub async fn find_all(&self, locator: &Locator) -> HarnessResult<Vec<ElementRef>> {
        locator.find_all(self).await
    }

    /// Short-circuiting existence probe
    pub async fn exists(&self, locator: &Locator) -> HarnessResult<bool> {
        locator.exists(self).await
    }

    /// Number of current matches, without waiting
    pub async fn count(&self, locator: &Locator) -> HarnessResult<usize> {
        Ok(self.find_all(locator).await?.len())
    }

    /// Start an expectation on `locator`
    #[must_use]
    pub fn expect(&self, locator: impl Into<Locator>) -> Expectation<'_> {
        Expectation::new(self, locator.into())
    }

    async fn read<T, F>(&self, locator: &Locator, what: &str, f: F) -> HarnessResult<T>
    where
        F: Fn(ElementState) -> T,
    {
        let label = format!("{what} of {locator}");
        let f = &f;
        locator
            .poller_for(self)
            .retry(&label, || async move {
                let element = locator.resolve_one_once(self).await?;
                Ok(f(self.driver.element_state(&element).await?))
            })
            .await
            .map_err(unwrap_lookup_timeout)
    }

    /// Text content of the single match
    pub async fn text(&self, locator: &Locator) -> HarnessResult<String> {
        self.read(locator, "text", |s| s.text).await
    }

    /// Form value of the single match
    pub async fn value(&self, locator: &Locator) -> HarnessResult<Option<String>> {
        self.read(locator, "value", |s| s.value).await
    }

    /// Attribute of the single match
    pub async fn attribute(&self, locator: &Locator, name: &str) -> HarnessResult<Option<String>> {
        self.read(locator, "attribute", |s| s.attribute(name).map(str::to_string))
            .await
    }

    /// Visibility of the single match
    pub async fn is_visible(&self, locator: &Locator) -> HarnessResult<bool> {
        self.read(locator, "visibility", |s| s.visible).await
    }

    // ---- actions ----

    async fn actionable(&self, locator: &Locator) -> HarnessResult<ElementRef> {
        let element = locator.resolve_one_once(self).await?;
        let state = self.driver.element_state(&element).await?;
        let refuse = |reason: &str| HarnessError::NotInteractable {
            selector: locator.to_string(),
            reason: reason.to_string(),
        };
        if !state.visible {
            return Err(refuse("element is not visible"));
        }
        if !state.enabled {
            return Err(refuse("element is disabled"));
        }
        Ok(element)
    }

    async fn act<F, Fut>(&self, locator: &Locator, action: &str, op: F) -> HarnessResult<()>
    where
        F: Fn(ElementRef) -> Fut,
        Fut: Future<Output = HarnessResult<()>>,
    {
        let label = format!("{action} on {locator}");
        tracing::debug!(actor = %self.actor, action, locator = %locator, "action");
        let op = &op;
        locator
            .poller_for(self)
            .retry(&label, || async move {
                let element = self.actionable(locator).await?;
                op(element).await
            })
            .await
            .map_err(unwrap_lookup_timeout)
    }

    /// Click once the element is visible and enabled
    pub async fn click(&self, locator: &Locator) -> HarnessResult<()> {
        self.act(locator, "click", |el| async move { self.driver.click(&el).await })
            .await
    }

    /// Replace the element's value with `text`
    pub async fn fill(&self, locator: &Locator, text: &str) -> HarnessResult<()> {
        self.act(locator, "fill", |el| async move {
            self.driver.type_text(&el, text, true).await
        })
        .await
    }

    /// Type `text` after the element's current value
    pub async fn type_text(&self, locator: &Locator, text: &str) -> HarnessResult<()> {
        self.act(locator, "type", |el| async move {
            self.driver.type_text(&el, text, false).await
        })
        .await
    }

    /// Choose an option of a `<select>` by value or label
    pub async fn select(&self, locator: &Locator, value: &str) -> HarnessResult<()> {
        self.act(locator, "select", |el| async move {
            self.driver.select_option(&el, value).await
        })
        .await
    }

    /// Press a key in the focused element
    pub async fn press(&self, key: Key) -> HarnessResult<()> {
        self.driver.press_key(&self.id, key).await
    }

    /// Evaluate JavaScript in the page
    pub async fn evaluate(&self, script: &str) -> HarnessResult<serde_json::Value> {
        self.driver.evaluate(&self.id, script).await
    }

    /// Resize the viewport
    pub async fn resize(&self, width: u32, height: u32) -> HarnessResult<()> {
        self.driver
            .set_viewport(&self.id, Viewport::new(width, height))
            .await
    }

    /// Capture a screenshot
    pub async fn screenshot(&self) -> HarnessResult<Screenshot> {
        self.driver.screenshot(&self.id).await
    }

    pub(crate) async fn activate(&self) -> HarnessResult<()> {
        self.driver.activate_window(&self.id).await
    }

    // ---- browser features ----

    /// Grant clipboard read/write to this window's context until reset
    pub async fn grant_clipboard(&self) -> HarnessResult<()> {
        self.driver.grant_clipboard(&self.context).await?;
        let mut tracker = self
            .tracker
            .lock()
            .map_err(|_| HarnessError::driver("session tracker poisoned"))?;
        if !tracker.clipboard.contains(&self.context) {
            tracker.clipboard.push(self.context.clone());
        }
        Ok(())
    }

    /// Read the clipboard
    pub async fn read_clipboard(&self) -> HarnessResult<String> {
        self.driver.read_clipboard(&self.id).await
    }

    /// Write the clipboard
    pub async fn write_clipboard(&self, text: &str) -> HarnessResult<()> {
        self.driver.write_clipboard(&self.id, text).await
    }

    /// Register a virtual WebAuthn authenticator, removed again on reset
    pub async fn add_virtual_authenticator(
        &self,
        options: AuthenticatorOptions,
    ) -> HarnessResult<AuthenticatorId> {
        let id = self
            .driver
            .add_virtual_authenticator(&self.id, options)
            .await?;
        self.tracker
            .lock()
            .map_err(|_| HarnessError::driver("session tracker poisoned"))?
            .authenticators
            .push((self.id.clone(), id.clone()));
        tracing::debug!(window = %self.id, authenticator = %id, "added virtual authenticator");
        Ok(id)
    }
}
