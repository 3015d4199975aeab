//! Polling expectations on locators.
//!
//! Every matcher re-resolves its locator on each attempt, so a node replaced
//! mid-check is simply looked up again. Matchers return a [`MatchResult`];
//! a miss is an error unless the expectation is in soft mode, where misses
//! are collected and reported by [`Expectation::finalize`].
//!
//! ```ignore
//! window.expect(".saved").to_be_visible().await?;
//! window.expect("button.ok").within(Duration::from_secs(10)).to_be_enabled().await?;
//! window.expect(".error-banner").to_stay_absent().await?;
//! ```

use crate::driver::ElementState;
use crate::locator::Locator;
use crate::poller::{MatchResult, Poller};
use crate::result::{HarnessError, HarnessResult};
use crate::window::Window;
use std::future::Future;
use std::time::Duration;

/// Expectation builder for one locator
#[derive(Debug)]
pub struct Expectation<'w> {
    window: &'w Window,
    locator: Locator,
    poller: Poller,
    probe: Poller,
    soft_mode: bool,
    errors: Vec<String>,
}

impl<'w> Expectation<'w> {
    /// Create an expectation using the window's wait policy
    #[must_use]
    pub fn new(window: &'w Window, locator: Locator) -> Self {
        let poller = locator.poller_for(window);
        Self {
            window,
            locator,
            poller,
            probe: window.probe_poller(),
            soft_mode: false,
            errors: Vec::new(),
        }
    }

    /// Override the timeout
    #[must_use]
    pub const fn within(mut self, timeout: Duration) -> Self {
        self.poller = self.poller.with_timeout(timeout);
        self
    }

    /// Override the polling interval
    #[must_use]
    pub fn polling(mut self, interval: Duration) -> Self {
        self.poller = self.poller.with_interval(interval);
        self.probe = self.probe.with_interval(interval);
        self
    }

    /// Override the window `to_stay_absent` watches
    #[must_use]
    pub const fn probing(mut self, window: Duration) -> Self {
        self.probe = self.probe.with_timeout(window);
        self
    }

    /// Collect misses instead of failing on the first one
    #[must_use]
    pub fn soft(mut self) -> Self {
        self.soft_mode = true;
        self
    }

    /// Misses collected in soft mode
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Fail if any soft miss was collected
    pub fn finalize(&self) -> HarnessResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::assertion(format!(
                "{} expectation(s) failed:\n{}",
                self.errors.len(),
                self.errors.join("\n")
            )))
        }
    }

    fn settle(&mut self, result: HarnessResult<MatchResult>) -> HarnessResult<MatchResult> {
        match result {
            Err(HarnessError::Timeout {
                label,
                elapsed,
                last_failure,
                ..
            }) if self.soft_mode => {
                self.errors.push(format!("{label}: {last_failure}"));
                Ok(MatchResult {
                    ok: false,
                    label,
                    attempts: 0,
                    elapsed,
                    diagnostic: Some(last_failure),
                })
            }
            other => other,
        }
    }

    async fn poll<F, Fut>(&mut self, what: &str, predicate: F) -> HarnessResult<MatchResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HarnessResult<bool>>,
    {
        let label = format!("{} {what}", self.locator);
        let result = self.poller.wait_until(&label, predicate).await;
        self.settle(result)
    }

    /// Wait until the single match satisfies `check`, which explains a miss.
    async fn state_matches<F>(&mut self, what: &str, check: F) -> HarnessResult<MatchResult>
    where
        F: Fn(&ElementState) -> Result<(), String>,
    {
        let window = self.window;
        let locator = &self.locator;
        let check = &check;
        let label = format!("{locator} {what}");
        let result = self
            .poller
            .wait_until(&label, || async move {
                let element = locator.resolve_one_once(window).await?;
                let state = window.driver().element_state(&element).await?;
                check(&state).map(|()| true).map_err(HarnessError::assertion)
            })
            .await;
        self.settle(result)
    }

    /// At least one match exists
    pub async fn to_be_present(&mut self) -> HarnessResult<MatchResult> {
        let window = self.window;
        let locator = self.locator.clone();
        let locator = &locator;
        self.poll("to be present", || async move {
            Ok(!locator.resolve_all_once(window).await?.is_empty())
        })
        .await
    }

    /// No match exists (waits for it to go away)
    pub async fn to_be_absent(&mut self) -> HarnessResult<MatchResult> {
        let window = self.window;
        let locator = &self.locator;
        let label = format!("{locator} to be absent");
        let result = self
            .poller
            .wait_until_absent(&label, || async move {
                Ok(!locator.resolve_all_once(window).await?.is_empty())
            })
            .await;
        self.settle(result)
    }

    /// No match appears at any point during the probe window.
    ///
    /// Unlike `to_be_absent`, this watches for the element rendering late.
    pub async fn to_stay_absent(&mut self) -> HarnessResult<MatchResult> {
        let window = self.window;
        let locator = &self.locator;
        let label = format!("{locator} to stay absent");
        let seen = self
            .probe
            .check(&label, || async move {
                Ok(!locator.resolve_all_once(window).await?.is_empty())
            })
            .await?;
        if !seen.ok {
            return Ok(MatchResult {
                ok: true,
                label,
                attempts: seen.attempts,
                elapsed: seen.elapsed,
                diagnostic: None,
            });
        }
        let message = format!("appeared after {:.2}s", seen.elapsed.as_secs_f64());
        if self.soft_mode {
            self.errors.push(format!("{label}: {message}"));
            return Ok(MatchResult {
                ok: false,
                label,
                attempts: seen.attempts,
                elapsed: seen.elapsed,
                diagnostic: Some(message),
            });
        }
        Err(HarnessError::assertion(format!("{label}: {message}")))
    }

    /// The single match is visible
    pub async fn to_be_visible(&mut self) -> HarnessResult<MatchResult> {
        self.state_matches("to be visible", |s| {
            if s.visible {
                Ok(())
            } else {
                Err("element is hidden".to_string())
            }
        })
        .await
    }

    /// The match is hidden or gone
    pub async fn to_be_hidden(&mut self) -> HarnessResult<MatchResult> {
        let window = self.window;
        let locator = &self.locator;
        let label = format!("{locator} to be hidden");
        let result = self
            .poller
            .wait_until_absent(&label, || async move {
                let found = locator.resolve_all_once(window).await?;
                for element in &found {
                    if window.driver().element_state(element).await?.visible {
                        return Ok(true);
                    }
                }
                Ok(false)
            })
            .await;
        self.settle(result)
    }

    /// Text content contains `expected`
    pub async fn to_have_text(&mut self, expected: &str) -> HarnessResult<MatchResult> {
        self.state_matches(&format!("to have text {expected:?}"), |s| {
            if s.text.contains(expected) {
                Ok(())
            } else {
                Err(format!("text was {:?}", s.text))
            }
        })
        .await
    }

    /// Trimmed text content equals `expected`
    pub async fn to_have_exact_text(&mut self, expected: &str) -> HarnessResult<MatchResult> {
        self.state_matches(&format!("to have exact text {expected:?}"), |s| {
            if s.text.trim() == expected {
                Ok(())
            } else {
                Err(format!("text was {:?}", s.text))
            }
        })
        .await
    }

    /// Form value equals `expected`
    pub async fn to_have_value(&mut self, expected: &str) -> HarnessResult<MatchResult> {
        self.state_matches(&format!("to have value {expected:?}"), |s| {
            if s.value.as_deref() == Some(expected) {
                Ok(())
            } else {
                Err(format!("value was {:?}", s.value))
            }
        })
        .await
    }

    /// Attribute `name` equals `expected`
    pub async fn to_have_attribute(&mut self, name: &str, expected: &str) -> HarnessResult<MatchResult> {
        self.state_matches(&format!("to have {name}={expected:?}"), |s| {
            match s.attribute(name) {
                Some(v) if v == expected => Ok(()),
                other => Err(format!("{name} was {other:?}")),
            }
        })
        .await
    }

    /// The single match is enabled
    pub async fn to_be_enabled(&mut self) -> HarnessResult<MatchResult> {
        self.state_matches("to be enabled", |s| {
            if s.enabled {
                Ok(())
            } else {
                Err("element is disabled".to_string())
            }
        })
        .await
    }

    /// The single match is disabled
    pub async fn to_be_disabled(&mut self) -> HarnessResult<MatchResult> {
        self.state_matches("to be disabled", |s| {
            if s.enabled {
                Err("element is enabled".to_string())
            } else {
                Ok(())
            }
        })
        .await
    }

    /// Exactly `expected` matches exist
    pub async fn to_have_count(&mut self, expected: usize) -> HarnessResult<MatchResult> {
        let window = self.window;
        let locator = self.locator.clone();
        let locator = &locator;
        self.poll(&format!("to have count {expected}"), || async move {
            let count = locator.find_all(window).await?.len();
            if count == expected {
                Ok(true)
            } else {
                Err(HarnessError::assertion(format!("count was {count}")))
            }
        })
        .await
    }
}
