//! Sessions: browser contexts, actors and windows.
//!
//! A [`Session`] owns every browser context a scenario uses. Each context
//! belongs to a named *actor* (the default actor plus any opened through
//! [`Session::using_session`] or [`Session::actor`]), and each actor has one
//! or more [`Window`]s. Exactly one window is active; it changes only through
//! `switch_to`, `within_window` and `using_session`.
//!
//! [`Session::reset`] releases everything a scenario acquired (virtual
//! authenticators, clipboard grants, storage, contexts) and reports every
//! failure instead of stopping at the first.

use crate::config::HarnessConfig;
use crate::driver::{BrowserDriver, ContextId, Cookie};
use crate::result::{HarnessError, HarnessResult};
use crate::window::{Tracker, Window};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

/// Name of the actor a session starts with
pub const DEFAULT_ACTOR: &str = "default";

/// How a session authenticates a user without going through the login UI
#[async_trait]
pub trait SignInStrategy: Send + Sync + fmt::Debug {
    /// Make `window`'s context authenticated as `username`
    async fn sign_in(&self, window: &Window, username: &str) -> HarnessResult<()>;
}

/// Sign in by installing a session cookie carrying the username
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSignIn {
    cookie: String,
}

impl Default for CookieSignIn {
    fn default() -> Self {
        Self::new("_vigia_user")
    }
}

impl CookieSignIn {
    /// Use `cookie` as the session cookie name
    #[must_use]
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
        }
    }

    /// Cookie name
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie
    }
}

#[async_trait]
impl SignInStrategy for CookieSignIn {
    async fn sign_in(&self, window: &Window, username: &str) -> HarnessResult<()> {
        let cookie = Cookie::new(self.cookie.clone(), username).http_only();
        window.driver().set_cookie(window.context(), cookie).await
    }
}

#[derive(Debug)]
struct Actor {
    name: String,
    context: ContextId,
    windows: Vec<Window>,
}

#[derive(Debug, Default)]
struct SessionState {
    actors: Vec<Actor>,
    active: Option<Window>,
}

impl SessionState {
    fn owns(&self, window: &Window) -> bool {
        self.actors.iter().any(|a| a.windows.contains(window))
    }
}

/// Owner of every context and window of a scenario
#[derive(Debug)]
pub struct Session {
    driver: Arc<dyn BrowserDriver>,
    config: HarnessConfig,
    sign_in: Arc<dyn SignInStrategy>,
    tracker: Arc<Mutex<Tracker>>,
    state: AsyncMutex<SessionState>,
}

impl Session {
    /// Validate `config` and open the default actor's context and window.
    pub async fn start(driver: Arc<dyn BrowserDriver>, config: HarnessConfig) -> HarnessResult<Self> {
        config.validate()?;
        let session = Self {
            driver,
            config,
            sign_in: Arc::new(CookieSignIn::default()),
            tracker: Arc::new(Mutex::new(Tracker::default())),
            state: AsyncMutex::new(SessionState::default()),
        };
        {
            let mut state = session.state.lock().await;
            let window = session.open_actor(&mut state, DEFAULT_ACTOR).await?;
            state.active = Some(window);
        }
        tracing::info!(driver = session.driver.name(), base_url = %session.config.base_url, "session started");
        Ok(session)
    }

    /// Use a different sign-in strategy
    #[must_use]
    pub fn with_sign_in(mut self, strategy: impl SignInStrategy + 'static) -> Self {
        self.sign_in = Arc::new(strategy);
        self
    }

    pub(crate) fn with_shared_sign_in(mut self, strategy: Arc<dyn SignInStrategy>) -> Self {
        self.sign_in = strategy;
        self
    }

    /// Driver behind the session
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn BrowserDriver> {
        &self.driver
    }

    /// Configuration the session was started with
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    async fn open_actor(&self, state: &mut SessionState, name: &str) -> HarnessResult<Window> {
        let context = self.driver.new_context().await?;
        let id = self.driver.new_window(&context).await?;
        let window = self.window_handle(context.clone(), id, name);
        tracing::info!(actor = name, context = %context, "created browser context");
        state.actors.push(Actor {
            name: name.to_string(),
            context,
            windows: vec![window.clone()],
        });
        Ok(window)
    }

    fn window_handle(&self, context: ContextId, id: crate::driver::WindowId, actor: &str) -> Window {
        Window::new(
            Arc::clone(&self.driver),
            context,
            id,
            actor.to_string(),
            self.config.base_url.clone(),
            self.config.wait,
            Arc::clone(&self.tracker),
        )
    }

    /// The active window
    pub async fn current(&self) -> HarnessResult<Window> {
        self.state
            .lock()
            .await
            .active
            .clone()
            .ok_or_else(|| HarnessError::BrowserClosed {
                message: "session has no active window".to_string(),
            })
    }

    /// First window of actor `name`, opening a fresh context if needed.
    ///
    /// Does not change the active window.
    pub async fn actor(&self, name: &str) -> HarnessResult<Window> {
        let mut state = self.state.lock().await;
        let existing = state.actors.iter().position(|a| a.name == name);
        let window = match existing {
            Some(index) => {
                let actor = &mut state.actors[index];
                if let Some(window) = actor.windows.first() {
                    return Ok(window.clone());
                }
                // every window was closed; the context and its cookies remain
                let id = self.driver.new_window(&actor.context).await?;
                let window = self.window_handle(actor.context.clone(), id, name);
                actor.windows.push(window.clone());
                window
            }
            None => self.open_actor(&mut state, name).await?,
        };
        // Opening a window focuses it in the browser; keep the session's view.
        if let Some(active) = &state.active {
            active.activate().await?;
        }
        Ok(window)
    }

    /// Names of the open actors, in creation order
    pub async fn actors(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .actors
            .iter()
            .map(|a| a.name.clone())
            .collect()
    }

    /// Authenticate the active context as `username`
    pub async fn sign_in(&self, username: &str) -> HarnessResult<()> {
        let window = self.current().await?;
        tracing::info!(actor = window.actor(), username, "signing in");
        self.sign_in.sign_in(&window, username).await
    }

    /// Drop the active context's cookies and storage
    pub async fn sign_out(&self) -> HarnessResult<()> {
        let window = self.current().await?;
        tracing::info!(actor = window.actor(), "signing out");
        self.driver.clear_storage(window.context()).await
    }

    /// Make `window` the active window
    pub async fn switch_to(&self, window: &Window) -> HarnessResult<()> {
        let mut state = self.state.lock().await;
        if !state.owns(window) {
            return Err(HarnessError::BrowserClosed {
                message: format!("window {} is not open in this session", window.id()),
            });
        }
        window.activate().await?;
        state.active = Some(window.clone());
        Ok(())
    }

    /// Open another window in the active context. The active window does not change.
    pub async fn open_new_window(&self) -> HarnessResult<Window> {
        let current = self.current().await?;
        let id = self.driver.new_window(current.context()).await?;
        let window = self.window_handle(current.context().clone(), id, current.actor());
        current.activate().await?;
        let mut state = self.state.lock().await;
        if let Some(actor) = state.actors.iter_mut().find(|a| &a.context == current.context()) {
            actor.windows.push(window.clone());
        }
        tracing::debug!(actor = current.actor(), window = %window.id(), "opened window");
        Ok(window)
    }

    /// Close `window`. Closing the active window activates a sibling, if any.
    pub async fn close_window(&self, window: &Window) -> HarnessResult<()> {
        let mut state = self.state.lock().await;
        if !state.owns(window) {
            return Err(HarnessError::BrowserClosed {
                message: format!("window {} is not open in this session", window.id()),
            });
        }
        self.driver.close_window(window.id()).await?;
        let mut sibling = None;
        for actor in &mut state.actors {
            actor.windows.retain(|w| w != window);
            if &actor.context == window.context() {
                sibling = actor.windows.first().cloned();
            }
        }
        if state.active.as_ref() == Some(window) {
            if let Some(next) = &sibling {
                next.activate().await?;
            }
            state.active = sibling;
        }
        Ok(())
    }

    async fn restore(&self, previous: Option<Window>) -> HarnessResult<()> {
        let mut state = self.state.lock().await;
        if let Some(window) = &previous {
            if state.owns(window) {
                window.activate().await?;
            }
        }
        state.active = previous;
        Ok(())
    }

    /// Run `body` with `window` active, then switch back even if it failed.
    pub async fn within_window<T, F, Fut>(&self, window: &Window, body: F) -> HarnessResult<T>
    where
        F: FnOnce(Window) -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
    {
        let previous = self.state.lock().await.active.clone();
        self.switch_to(window).await?;
        let result = body(window.clone()).await;
        let restored = self.restore(previous).await;
        let value = result?;
        restored?;
        Ok(value)
    }

    /// Run `body` as actor `name` in its own isolated context.
    ///
    /// The previously active window is restored afterward, even on error.
    pub async fn using_session<T, F, Fut>(&self, name: &str, body: F) -> HarnessResult<T>
    where
        F: FnOnce(Window) -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
    {
        let window = self.actor(name).await?;
        tracing::debug!(actor = name, "using session");
        self.within_window(&window, body).await
    }

    async fn teardown(&self) -> Vec<String> {
        let mut failures = Vec::new();
        let tracked = match self.tracker.lock() {
            Ok(mut tracker) => std::mem::take(&mut *tracker),
            Err(_) => {
                failures.push("session tracker poisoned".to_string());
                Tracker::default()
            }
        };

        for (window, id) in &tracked.authenticators {
            if let Err(e) = self.driver.remove_virtual_authenticator(window, id).await {
                failures.push(format!("remove authenticator {id}: {e}"));
            }
        }
        for context in &tracked.clipboard {
            if let Err(e) = self.driver.revoke_permissions(context).await {
                failures.push(format!("revoke permissions of {context}: {e}"));
            }
        }

        let mut state = self.state.lock().await;
        for actor in state.actors.drain(..) {
            if let Err(e) = self.driver.clear_storage(&actor.context).await {
                failures.push(format!("clear storage of {} ({}): {e}", actor.name, actor.context));
            }
            if let Err(e) = self.driver.close_context(&actor.context).await {
                failures.push(format!("close {} ({}): {e}", actor.name, actor.context));
            }
        }
        state.active = None;

        for failure in &failures {
            tracing::warn!(failure = %failure, "teardown step failed");
        }
        failures
    }

    /// Release everything and start over with a fresh default actor.
    ///
    /// Teardown failures are returned as `ContextTeardown` after the fresh
    /// actor has been created.
    pub async fn reset(&self) -> HarnessResult<()> {
        let failures = self.teardown().await;
        let mut state = self.state.lock().await;
        let window = self.open_actor(&mut state, DEFAULT_ACTOR).await?;
        state.active = Some(window);
        drop(state);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::ContextTeardown { failures })
        }
    }

    /// Release everything.
    pub async fn close(&self) -> HarnessResult<()> {
        let failures = self.teardown().await;
        tracing::info!(failures = failures.len(), "session closed");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::ContextTeardown { failures })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeBrowser, Node};
    use crate::driver::AuthenticatorOptions;
    use crate::locator::Locator;

    fn config() -> HarnessConfig {
        HarnessConfig {
            base_url: "http://forum.test".to_string(),
            ..HarnessConfig::default()
        }
    }

    async fn session() -> (FakeBrowser, Session) {
        let browser = FakeBrowser::new();
        browser
            .route_with("/", |req| {
                let who = req.cookie("_vigia_user").unwrap_or("anonymous").to_string();
                Node::new("body").child(Node::new("span").class("current-user").text(&who))
            })
            .unwrap();
        let session = Session::start(Arc::new(browser.clone()), config()).await.unwrap();
        (browser, session)
    }

    mod actor_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_start_opens_default_actor() {
            let (browser, session) = session().await;
            assert_eq!(session.actors().await, vec![DEFAULT_ACTOR.to_string()]);
            assert_eq!(browser.contexts().unwrap().len(), 1);
            let window = session.current().await.unwrap();
            assert_eq!(window.actor(), DEFAULT_ACTOR);
        }

        #[tokio::test(start_paused = true)]
        async fn test_start_rejects_invalid_config() {
            let mut bad = config();
            bad.wait.interval_ms = 0;
            let err = Session::start(Arc::new(FakeBrowser::new()), bad).await.unwrap_err();
            assert!(matches!(err, HarnessError::Config { .. }));
        }

        #[tokio::test(start_paused = true)]
        async fn test_actor_is_reused_and_does_not_switch() {
            let (browser, session) = session().await;
            let main = session.current().await.unwrap();
            let admin = session.actor("admin").await.unwrap();
            let again = session.actor("admin").await.unwrap();
            assert_eq!(admin, again);
            assert_ne!(admin.context(), main.context());
            assert_eq!(session.current().await.unwrap(), main);
            assert_eq!(browser.active_window().unwrap().as_ref(), Some(main.id()));
        }

        #[tokio::test(start_paused = true)]
        async fn test_actor_with_closed_windows_reopens_in_same_context() {
            let (browser, session) = session().await;
            let main = session.current().await.unwrap();
            let admin = session.actor("admin").await.unwrap();
            session.close_window(&admin).await.unwrap();

            let reopened = session.actor("admin").await.unwrap();
            assert_ne!(reopened, admin);
            assert_eq!(reopened.context(), admin.context());
            assert_eq!(session.actor("admin").await.unwrap(), reopened);
            assert_eq!(
                session.actors().await,
                vec![DEFAULT_ACTOR.to_string(), "admin".to_string()]
            );
            assert_eq!(browser.contexts().unwrap().len(), 2);
            assert_eq!(session.current().await.unwrap(), main);
            assert_eq!(browser.active_window().unwrap().as_ref(), Some(main.id()));
        }

        #[tokio::test(start_paused = true)]
        async fn test_concurrent_lookups_share_one_actor() {
            let (browser, session) = session().await;
            let (a, b) = tokio::join!(session.actor("guest"), session.actor("guest"));
            assert_eq!(a.unwrap(), b.unwrap());
            assert_eq!(session.actors().await.len(), 2);
            assert_eq!(browser.contexts().unwrap().len(), 2);
        }
    }

    mod sign_in_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_sign_in_before_navigation() {
            let (_browser, session) = session().await;
            session.sign_in("eviltrout").await.unwrap();
            let window = session.current().await.unwrap();
            window.visit_path("/").await.unwrap();
            assert_eq!(window.text(&Locator::new(".current-user")).await.unwrap(), "eviltrout");
        }

        #[tokio::test(start_paused = true)]
        async fn test_sign_out_clears_context() {
            let (_browser, session) = session().await;
            session.sign_in("eviltrout").await.unwrap();
            session.sign_out().await.unwrap();
            let window = session.current().await.unwrap();
            window.visit_path("/").await.unwrap();
            assert_eq!(window.text(&Locator::new(".current-user")).await.unwrap(), "anonymous");
        }

        #[tokio::test(start_paused = true)]
        async fn test_custom_cookie_name() {
            let browser = FakeBrowser::new();
            let session = Session::start(Arc::new(browser.clone()), config())
                .await
                .unwrap()
                .with_sign_in(CookieSignIn::new("_t"));
            session.sign_in("sam").await.unwrap();
            let ctx = session.current().await.unwrap().context().clone();
            let cookies = browser.cookies(&ctx).await.unwrap();
            assert_eq!(cookies[0].name, "_t");
            assert!(cookies[0].http_only);
        }
    }

    mod window_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_using_session_restores_active_window_on_error() {
            let (browser, session) = session().await;
            let main = session.current().await.unwrap();
            let err = session
                .using_session("moderator", |w| async move {
                    assert_eq!(w.actor(), "moderator");
                    Err::<(), _>(HarnessError::assertion("boom"))
                })
                .await
                .unwrap_err();
            assert!(matches!(err, HarnessError::AssertionFailed { .. }));
            assert_eq!(session.current().await.unwrap(), main);
            assert_eq!(browser.active_window().unwrap().as_ref(), Some(main.id()));
        }

        #[tokio::test(start_paused = true)]
        async fn test_contexts_do_not_share_cookies() {
            let (_browser, session) = session().await;
            session.sign_in("alice").await.unwrap();
            let seen = session
                .using_session("bob", |w| async move {
                    w.visit_path("/").await?;
                    w.text(&Locator::new(".current-user")).await
                })
                .await
                .unwrap();
            assert_eq!(seen, "anonymous");
        }

        #[tokio::test(start_paused = true)]
        async fn test_open_switch_and_close_windows() {
            let (_browser, session) = session().await;
            let main = session.current().await.unwrap();
            let popup = session.open_new_window().await.unwrap();
            assert_eq!(popup.context(), main.context());
            assert_eq!(session.current().await.unwrap(), main);

            session.switch_to(&popup).await.unwrap();
            assert_eq!(session.current().await.unwrap(), popup);

            session.close_window(&popup).await.unwrap();
            assert_eq!(session.current().await.unwrap(), main);
            assert!(session.switch_to(&popup).await.is_err());
        }

        #[tokio::test(start_paused = true)]
        async fn test_within_window_switches_back() {
            let (_browser, session) = session().await;
            let main = session.current().await.unwrap();
            let popup = session.open_new_window().await.unwrap();
            let id = session
                .within_window(&popup, |w| async move { Ok(w.id().clone()) })
                .await
                .unwrap();
            assert_eq!(&id, popup.id());
            assert_eq!(session.current().await.unwrap(), main);
        }
    }

    mod reset_tests {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_reset_releases_everything() {
            let (browser, session) = session().await;
            let main = session.current().await.unwrap();
            main.grant_clipboard().await.unwrap();
            main.add_virtual_authenticator(AuthenticatorOptions::default())
                .await
                .unwrap();
            session.actor("admin").await.unwrap();
            assert_eq!(browser.contexts().unwrap().len(), 2);

            session.reset().await.unwrap();

            let calls = browser.calls().unwrap();
            assert!(calls.iter().any(|c| c.starts_with("remove_virtual_authenticator")));
            assert!(calls.iter().any(|c| c.starts_with("revoke_permissions")));
            assert_eq!(browser.contexts().unwrap().len(), 1);
            assert_eq!(session.actors().await, vec![DEFAULT_ACTOR.to_string()]);
            assert_ne!(session.current().await.unwrap(), main);
        }

        #[tokio::test(start_paused = true)]
        async fn test_reset_collects_failures_and_still_recreates() {
            let (browser, session) = session().await;
            session.actor("admin").await.unwrap();
            browser.fail_next("close_context", "devtools hung up").unwrap();

            let err = session.reset().await.unwrap_err();
            match err {
                HarnessError::ContextTeardown { failures } => {
                    assert_eq!(failures.len(), 1);
                    assert!(failures[0].contains("devtools hung up"));
                }
                other => panic!("unexpected {other:?}"),
            }
            assert!(session.current().await.is_ok());
        }

        #[tokio::test(start_paused = true)]
        async fn test_close_leaves_no_window() {
            let (browser, session) = session().await;
            session.close().await.unwrap();
            assert!(browser.contexts().unwrap().is_empty());
            assert!(session.current().await.is_err());
        }
    }
}
