//! Failure reports and run summaries.
//!
//! A [`FailureReport`] is captured the moment a scenario body fails, while
//! the browser still shows the failing state: the error, the selectors it
//! names, the active URL and a screenshot. The [`Reporter`] collects one
//! [`ScenarioOutcome`] per scenario and renders text, JSON or JUnit XML.

use crate::driver::Screenshot;
use crate::result::{HarnessError, HarnessResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

/// What was on screen when a scenario failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Scenario name
    pub scenario: String,
    /// Error kind (`timeout`, `not_found`, ...)
    pub kind: String,
    /// Error message
    pub description: String,
    /// Selectors named by the error
    pub selectors: Vec<String>,
    /// Active URL, if it could be read
    pub url: Option<String>,
    /// Actor owning the active window
    pub actor: Option<String>,
    /// Screenshot size, if one was taken
    pub screenshot_bytes: Option<usize>,
    /// Time from scenario start to failure
    pub elapsed_ms: u64,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

impl FailureReport {
    /// Report for `error`, without browser state yet
    #[must_use]
    pub fn from_error(scenario: impl Into<String>, error: &HarnessError, elapsed: Duration) -> Self {
        Self {
            scenario: scenario.into(),
            kind: error.kind().to_string(),
            description: error.to_string(),
            selectors: error.selectors(),
            url: None,
            actor: None,
            screenshot_bytes: None,
            elapsed_ms: elapsed.as_millis() as u64,
            captured_at: Utc::now(),
        }
    }

    /// Attach the active URL
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Attach the active actor
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Attach a screenshot
    #[must_use]
    pub fn with_screenshot(mut self, screenshot: &Screenshot) -> Self {
        self.screenshot_bytes = Some(screenshot.size_bytes());
        self
    }

    /// Multi-line human-readable rendering
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("FAILED {} [{}]\n  {}\n", self.scenario, self.kind, self.description);
        for selector in &self.selectors {
            let _ = writeln!(out, "  selector: {selector}");
        }
        if let Some(url) = &self.url {
            let _ = writeln!(out, "  url: {url}");
        }
        if let Some(actor) = &self.actor {
            let _ = writeln!(out, "  actor: {actor}");
        }
        if let Some(bytes) = self.screenshot_bytes {
            let _ = writeln!(out, "  screenshot: {bytes} bytes");
        }
        let _ = writeln!(out, "  after {:.2}s", self.elapsed_ms as f64 / 1000.0);
        out
    }
}

/// Final state of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    /// Body and teardown succeeded
    Passed,
    /// Body failed
    Failed,
    /// Body passed but teardown did not
    Errored,
}

impl ScenarioStatus {
    /// Whether the scenario passed
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Result of one scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    /// Scenario name
    pub name: String,
    /// Final state
    pub status: ScenarioStatus,
    /// Wall time including teardown
    pub duration_ms: u64,
    /// Failure captured from the body
    pub failure: Option<FailureReport>,
    /// Teardown steps that failed
    pub teardown_failures: Vec<String>,
}

impl ScenarioOutcome {
    /// Outcome from the body result and teardown failures.
    ///
    /// A failed body wins; otherwise any teardown failure makes it `Errored`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        duration: Duration,
        failure: Option<FailureReport>,
        teardown_failures: Vec<String>,
    ) -> Self {
        let status = if failure.is_some() {
            ScenarioStatus::Failed
        } else if teardown_failures.is_empty() {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Errored
        };
        Self {
            name: name.into(),
            status,
            duration_ms: duration.as_millis() as u64,
            failure,
            teardown_failures,
        }
    }

    /// Whether the scenario passed
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.status.is_passed()
    }

    /// One-line description of what went wrong, if anything
    #[must_use]
    pub fn problem(&self) -> Option<String> {
        match (&self.failure, self.teardown_failures.is_empty()) {
            (Some(f), _) => Some(f.description.clone()),
            (None, false) => Some(format!("teardown failed: {}", self.teardown_failures.join("; "))),
            (None, true) => None,
        }
    }

    /// Convert to a `Result`, for scenarios used inside `#[tokio::test]`
    pub fn into_result(self) -> HarnessResult<()> {
        match self.status {
            ScenarioStatus::Passed => Ok(()),
            ScenarioStatus::Failed => Err(HarnessError::assertion(
                self.failure.map(|f| f.render()).unwrap_or_default(),
            )),
            ScenarioStatus::Errored => Err(HarnessError::ContextTeardown {
                failures: self.teardown_failures,
            }),
        }
    }
}

/// How the reporter reacts to a failing scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Stop at the first failure
    #[default]
    FailFast,
    /// Record everything
    CollectAll,
}

/// Collects scenario outcomes
#[derive(Debug, Default)]
pub struct Reporter {
    outcomes: Vec<ScenarioOutcome>,
    failure_mode: FailureMode,
    suite_name: String,
}

impl Reporter {
    /// Reporter that records every outcome
    #[must_use]
    pub fn new() -> Self {
        Self::collect_all()
    }

    /// Reporter that stops at the first failure
    #[must_use]
    pub fn fail_fast() -> Self {
        Self {
            failure_mode: FailureMode::FailFast,
            suite_name: "vigia".to_string(),
            ..Self::default()
        }
    }

    /// Reporter that records every outcome
    #[must_use]
    pub fn collect_all() -> Self {
        Self {
            failure_mode: FailureMode::CollectAll,
            suite_name: "vigia".to_string(),
            ..Self::default()
        }
    }

    /// Set the suite name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.suite_name = name.into();
        self
    }

    /// Record an outcome.
    ///
    /// In fail-fast mode a non-passing outcome is recorded and then returned as an error.
    pub fn record(&mut self, outcome: ScenarioOutcome) -> HarnessResult<()> {
        let problem = (!outcome.passed()).then(|| (outcome.name.clone(), outcome.problem()));
        self.outcomes.push(outcome);
        if self.failure_mode == FailureMode::FailFast {
            if let Some((name, problem)) = problem {
                return Err(HarnessError::assertion(format!(
                    "scenario '{name}' did not pass: {}",
                    problem.unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    /// Recorded outcomes
    #[must_use]
    pub fn outcomes(&self) -> &[ScenarioOutcome] {
        &self.outcomes
    }

    /// Number of passing scenarios
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    /// Number of non-passing scenarios
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.passed_count()
    }

    /// Whether every scenario passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }

    /// One-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        let errored = self
            .outcomes
            .iter()
            .filter(|o| o.status == ScenarioStatus::Errored)
            .count();
        format!(
            "{}: {}/{} passed, {} failed, {} errored",
            self.suite_name,
            self.passed_count(),
            self.outcomes.len(),
            self.failed_count() - errored,
            errored
        )
    }

    /// Summary followed by every failure report
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for outcome in self.outcomes.iter().filter(|o| !o.passed()) {
            match &outcome.failure {
                Some(report) => out.push_str(&report.render()),
                None => {
                    let _ = writeln!(out, "ERRORED {}", outcome.name);
                    for failure in &outcome.teardown_failures {
                        let _ = writeln!(out, "  {failure}");
                    }
                }
            }
        }
        out.push_str(&self.summary());
        out.push('\n');
        out
    }

    /// JSON document with every outcome
    pub fn render_json(&self) -> HarnessResult<String> {
        let doc = serde_json::json!({
            "suite": self.suite_name,
            "passed": self.passed_count(),
            "failed": self.failed_count(),
            "outcomes": self.outcomes,
        });
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// JUnit XML for CI
    #[must_use]
    pub fn render_junit(&self) -> String {
        let total: u64 = self.outcomes.iter().map(|o| o.duration_ms).sum();
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = writeln!(
            xml,
            r#"<testsuite name="{}" tests="{}" failures="{}" time="{:.3}">"#,
            escape_xml(&self.suite_name),
            self.outcomes.len(),
            self.failed_count(),
            total as f64 / 1000.0
        );
        for outcome in &self.outcomes {
            let _ = writeln!(
                xml,
                r#"  <testcase name="{}" time="{:.3}">"#,
                escape_xml(&outcome.name),
                outcome.duration_ms as f64 / 1000.0
            );
            if let Some(problem) = outcome.problem() {
                let tag = if outcome.status == ScenarioStatus::Errored {
                    "error"
                } else {
                    "failure"
                };
                let _ = writeln!(
                    xml,
                    r#"    <{tag} message="{}">{}</{tag}>"#,
                    escape_xml(&problem),
                    escape_xml(&problem)
                );
            }
            xml.push_str("  </testcase>\n");
        }
        xml.push_str("</testsuite>\n");
        xml
    }

    /// Write JUnit XML to `path`
    pub fn write_junit(&self, path: &Path) -> HarnessResult<()> {
        std::fs::write(path, self.render_junit())?;
        Ok(())
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
