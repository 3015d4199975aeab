//! Scenario runner.
//!
//! A scenario sets up its fixtures, starts a [`Session`], runs the body, and
//! then always tears down: setting overrides first, then the session, then
//! fixtures in reverse order. A body failure is captured as a
//! [`FailureReport`] before anything is torn down. A teardown failure turns a
//! passing body into [`ScenarioStatus::Errored`](crate::ScenarioStatus).
//! A panicking body is torn down the same way before the panic resumes.
//!
//! ```ignore
//! let outcome = Scenario::builder("saves the site title")
//!     .driver(Arc::new(browser))
//!     .settings(Arc::new(store))
//!     .build()?
//!     .run(|ctx| async move {
//!         ctx.override_setting("title", "Old")?;
//!         let window = ctx.current().await?;
//!         window.visit(&SiteSettings::default()).await?;
//!         Ok(())
//!     })
//!     .await;
//! ```

use crate::config::HarnessConfig;
use crate::driver::BrowserDriver;
use crate::fixture::{Fixture, FixtureManager};
use crate::overrides::{SettingOverrides, SettingsStore};
use crate::report::{FailureReport, ScenarioOutcome};
use crate::result::{HarnessError, HarnessResult};
use crate::session::{CookieSignIn, Session, SignInStrategy};
use crate::window::Window;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

/// What a scenario body works with
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    name: String,
    session: Arc<Session>,
    fixtures: Arc<AsyncMutex<FixtureManager>>,
    overrides: Option<Arc<Mutex<SettingOverrides>>>,
}

impl ScenarioContext {
    /// Scenario name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session of this scenario
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Active window
    pub async fn current(&self) -> HarnessResult<Window> {
        self.session.current().await
    }

    /// Run `f` against the registered fixture of type `F`
    pub async fn with_fixture<F, R>(&self, f: impl FnOnce(&F) -> R) -> HarnessResult<R>
    where
        F: Fixture,
    {
        let fixtures = self.fixtures.lock().await;
        let fixture = fixtures.get::<F>().ok_or_else(|| {
            HarnessError::config(format!(
                "fixture {} is not registered",
                std::any::type_name::<F>()
            ))
        })?;
        Ok(f(fixture))
    }

    /// Override an application setting until the scenario ends
    pub fn override_setting(&self, name: &str, value: &str) -> HarnessResult<()> {
        self.overrides()?
            .lock()
            .map_err(|_| HarnessError::config("setting overrides poisoned"))?
            .set(name, value)
    }

    fn overrides(&self) -> HarnessResult<&Arc<Mutex<SettingOverrides>>> {
        self.overrides
            .as_ref()
            .ok_or_else(|| HarnessError::config("scenario has no settings store"))
    }
}

/// Builder for [`Scenario`]
#[derive(Debug)]
pub struct ScenarioBuilder {
    name: String,
    driver: Option<Arc<dyn BrowserDriver>>,
    config: HarnessConfig,
    fixtures: FixtureManager,
    settings: Option<Arc<dyn SettingsStore>>,
    sign_in: Arc<dyn SignInStrategy>,
}

impl ScenarioBuilder {
    /// Browser driver to run against (required)
    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn BrowserDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Harness configuration
    #[must_use]
    pub fn config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a fixture
    #[must_use]
    pub fn fixture<F: Fixture>(mut self, fixture: F) -> Self {
        self.fixtures.register(fixture);
        self
    }

    /// Application settings store, enabling `override_setting`
    #[must_use]
    pub fn settings(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    /// Sign-in strategy for the session
    #[must_use]
    pub fn sign_in(mut self, strategy: impl SignInStrategy + 'static) -> Self {
        self.sign_in = Arc::new(strategy);
        self
    }

    /// Finish the builder
    pub fn build(self) -> HarnessResult<Scenario> {
        let driver = self
            .driver
            .ok_or_else(|| HarnessError::config(format!("scenario '{}' has no driver", self.name)))?;
        self.config.validate()?;
        Ok(Scenario {
            name: self.name,
            driver,
            config: self.config,
            fixtures: self.fixtures,
            settings: self.settings,
            sign_in: self.sign_in,
        })
    }
}

/// One end-to-end scenario
#[derive(Debug)]
pub struct Scenario {
    name: String,
    driver: Arc<dyn BrowserDriver>,
    config: HarnessConfig,
    fixtures: FixtureManager,
    settings: Option<Arc<dyn SettingsStore>>,
    sign_in: Arc<dyn SignInStrategy>,
}

impl Scenario {
    /// Start building a scenario named `name`
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder {
            name: name.into(),
            driver: None,
            config: HarnessConfig::default(),
            fixtures: FixtureManager::new(),
            settings: None,
            sign_in: Arc::new(CookieSignIn::default()),
        }
    }

    /// Scenario name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `body` and tear everything down.
    pub async fn run<F, Fut>(self, body: F) -> ScenarioOutcome
    where
        F: FnOnce(ScenarioContext) -> Fut,
        Fut: Future<Output = HarnessResult<()>>,
    {
        let start = Instant::now();
        let name = self.name;
        tracing::info!(scenario = %name, "scenario started");

        let fixtures = Arc::new(AsyncMutex::new(self.fixtures));
        if let Err(e) = fixtures.lock().await.setup_all().await {
            let report = FailureReport::from_error(&name, &e, start.elapsed());
            tracing::warn!(scenario = %name, error = %e, "fixture setup failed");
            return ScenarioOutcome::new(name, start.elapsed(), Some(report), Vec::new());
        }

        let mut teardown_failures = Vec::new();
        let session = match Session::start(self.driver, self.config).await {
            Ok(session) => Arc::new(session.with_shared_sign_in(self.sign_in)),
            Err(e) => {
                let report = FailureReport::from_error(&name, &e, start.elapsed());
                collect(&mut teardown_failures, fixtures.lock().await.teardown_all().await);
                return ScenarioOutcome::new(name, start.elapsed(), Some(report), teardown_failures);
            }
        };

        let overrides = self
            .settings
            .map(|store| Arc::new(Mutex::new(SettingOverrides::new(store))));
        let ctx = ScenarioContext {
            name: name.clone(),
            session: Arc::clone(&session),
            fixtures: Arc::clone(&fixtures),
            overrides: overrides.clone(),
        };

        let (failure, panic) = match AssertUnwindSafe(body(ctx)).catch_unwind().await {
            Ok(Ok(())) => (None, None),
            Ok(Err(e)) => (Some(capture(&name, &session, &e, start).await), None),
            Err(payload) => {
                tracing::error!(scenario = %name, "scenario body panicked, tearing down");
                (None, Some(payload))
            }
        };

        if let Some(overrides) = overrides {
            match overrides.lock() {
                Ok(mut guard) => collect(&mut teardown_failures, guard.restore()),
                Err(_) => teardown_failures.push("setting overrides poisoned".to_string()),
            }
        }
        collect(&mut teardown_failures, session.close().await);
        collect(&mut teardown_failures, fixtures.lock().await.teardown_all().await);
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }

        let outcome = ScenarioOutcome::new(name, start.elapsed(), failure, teardown_failures);
        match &outcome.failure {
            Some(report) => tracing::warn!(scenario = %outcome.name, kind = %report.kind, "scenario failed"),
            None if outcome.passed() => tracing::info!(scenario = %outcome.name, "scenario passed"),
            None => tracing::warn!(
                scenario = %outcome.name,
                failures = outcome.teardown_failures.len(),
                "scenario passed but teardown failed"
            ),
        }
        outcome
    }
}

fn collect(failures: &mut Vec<String>, result: HarnessResult<()>) {
    match result {
        Ok(()) => {}
        Err(HarnessError::ContextTeardown { failures: steps }) => failures.extend(steps),
        Err(e) => failures.push(e.to_string()),
    }
}

/// Snapshot the active window for the failure report; missing pieces are left out.
async fn capture(name: &str, session: &Session, error: &HarnessError, start: Instant) -> FailureReport {
    let mut report = FailureReport::from_error(name, error, start.elapsed());
    if let Ok(window) = session.current().await {
        report = report.with_actor(window.actor());
        if let Ok(url) = window.current_url().await {
            report = report.with_url(url);
        }
        if let Ok(screenshot) = window.screenshot().await {
            report = report.with_screenshot(&screenshot);
        }
    }
    report
}
