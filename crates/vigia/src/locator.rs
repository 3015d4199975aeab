//! Locator abstraction for element selection.
//!
//! A [`Locator`] is an immutable description: a selector, an optional parent
//! scope and a few options. It holds no element handles; every query resolves
//! it again from the top of its scope chain, so a re-rendered node is simply
//! found afresh.

use crate::driver::ElementRef;
use crate::poller::Poller;
use crate::result::{HarnessError, HarnessResult};
use crate::window::Window;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Selector type for locating elements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// CSS selector (e.g., "button.primary")
    Css(String),
    /// XPath selector
    XPath(String),
    /// Text content selector (substring match)
    Text(String),
    /// Test ID selector (data-testid attribute)
    TestId(String),
    /// Accessible role, optionally with an accessible name
    Role {
        /// ARIA role
        role: String,
        /// Accessible name (substring match)
        name: Option<String>,
    },
    /// Combined selector with text filter
    CssWithText {
        /// Base CSS selector
        css: String,
        /// Text content to match
        text: String,
    },
}

impl Selector {
    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create an XPath selector
    #[must_use]
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }

    /// Create a test ID selector
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// Create a text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a role selector
    #[must_use]
    pub fn role(role: impl Into<String>, name: Option<&str>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.map(str::to_string),
        }
    }

    /// Parse a selector string with an optional engine prefix.
    ///
    /// `css=`, `xpath=`, `text=`, `testid=` and `role=<role>[name]` are
    /// recognised; strings starting with `//` are XPath; anything else is CSS.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Some(rest) = input.strip_prefix("css=") {
            Self::Css(rest.to_string())
        } else if let Some(rest) = input.strip_prefix("xpath=") {
            Self::XPath(rest.to_string())
        } else if let Some(rest) = input.strip_prefix("text=") {
            Self::Text(unquote(rest).to_string())
        } else if let Some(rest) = input.strip_prefix("testid=") {
            Self::TestId(unquote(rest).to_string())
        } else if let Some(rest) = input.strip_prefix("role=") {
            parse_role(rest)
        } else if input.starts_with("//") || input.starts_with("(//") {
            Self::XPath(input.to_string())
        } else {
            Self::Css(input.to_string())
        }
    }

    /// Human-readable description used in errors
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Css(s) => format!("css `{s}`"),
            Self::XPath(s) => format!("xpath `{s}`"),
            Self::Text(t) => format!("text `{t}`"),
            Self::TestId(id) => format!("test id `{id}`"),
            Self::Role { role, name: None } => format!("role `{role}`"),
            Self::Role {
                role,
                name: Some(name),
            } => format!("role `{role}` named `{name}`"),
            Self::CssWithText { css, text } => format!("css `{css}` with text `{text}`"),
        }
    }

    /// JavaScript expression evaluating to an array of matching elements under `root`.
    ///
    /// `root` is itself a JavaScript expression (`document` or an element).
    #[must_use]
    pub fn to_query_all(&self, root: &str) -> String {
        match self {
            Self::Css(s) => format!("Array.from({root}.querySelectorAll({s:?}))"),
            Self::XPath(s) => format!(
                "(() => {{ const r = document.evaluate({s:?}, {root}, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
                 const out = []; for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i)); return out; }})()"
            ),
            Self::Text(t) => format!(
                "Array.from({root}.querySelectorAll('*')).filter(el => el.textContent.includes({t:?}) && \
                 !Array.from(el.children).some(c => c.textContent.includes({t:?})))"
            ),
            Self::TestId(id) => format!(
                "Array.from({root}.querySelectorAll('[data-testid=' + JSON.stringify({id:?}) + ']'))"
            ),
            Self::Role { role, name } => {
                let name = name.as_deref().unwrap_or("");
                format!(
                    "Array.from({root}.querySelectorAll('*')).filter(el => window.__vigia.role(el) === {role:?} && \
                     window.__vigia.accessibleName(el).includes({name:?}))"
                )
            }
            Self::CssWithText { css, text } => format!(
                "Array.from({root}.querySelectorAll({css:?})).filter(el => el.textContent.includes({text:?}))"
            ),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')))
        .unwrap_or(s)
}

fn parse_role(rest: &str) -> Selector {
    match rest.split_once('[') {
        Some((role, tail)) => {
            let inner = tail.strip_suffix(']').unwrap_or(tail);
            let inner = inner.strip_prefix("name=").unwrap_or(inner);
            let name = unquote(inner);
            Selector::Role {
                role: role.trim().to_string(),
                name: (!name.is_empty()).then(|| name.to_string()),
            }
        }
        None => Selector::Role {
            role: rest.trim().to_string(),
            name: None,
        },
    }
}

/// Locator options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatorOptions {
    /// Take the first of several matches instead of failing
    pub lenient: bool,
    /// Only count visible elements
    pub visible_only: bool,
    /// Pick the n-th match (0-based) instead of requiring a single one
    pub nth: Option<usize>,
    /// Implicit wait override
    pub timeout: Option<Duration>,
}

/// A scoped, re-resolvable element description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    selector: Selector,
    parent: Option<Arc<Locator>>,
    options: LocatorOptions,
}

impl Locator {
    /// Create a locator from a selector string (see [`Selector::parse`])
    #[must_use]
    pub fn new(selector: &str) -> Self {
        Self::from_selector(Selector::parse(selector))
    }

    /// Create a locator from a selector
    #[must_use]
    pub fn from_selector(selector: Selector) -> Self {
        Self {
            selector,
            parent: None,
            options: LocatorOptions::default(),
        }
    }

    /// Shorthand for a test id locator
    #[must_use]
    pub fn test_id(id: &str) -> Self {
        Self::from_selector(Selector::test_id(id))
    }

    /// A locator resolved under this one
    #[must_use]
    pub fn child(&self, selector: impl Into<Selector>) -> Self {
        Self {
            selector: selector.into(),
            parent: Some(Arc::new(self.clone())),
            options: LocatorOptions::default(),
        }
    }

    /// Re-scope this locator under `parent`
    #[must_use]
    pub fn within(&self, parent: &Locator) -> Self {
        Self {
            selector: self.selector.clone(),
            parent: Some(Arc::new(parent.clone())),
            options: self.options.clone(),
        }
    }

    /// Narrow a CSS locator to elements containing `text`
    #[must_use]
    pub fn with_text(self, text: impl Into<String>) -> Self {
        let selector = match self.selector {
            Selector::Css(css) => Selector::CssWithText {
                css,
                text: text.into(),
            },
            Selector::CssWithText { css, .. } => Selector::CssWithText {
                css,
                text: text.into(),
            },
            other => other,
        };
        Self { selector, ..self }
    }

    /// Pick the n-th match (0-based)
    #[must_use]
    pub fn nth(mut self, index: usize) -> Self {
        self.options.nth = Some(index);
        self
    }

    /// Pick the first match
    #[must_use]
    pub fn first(self) -> Self {
        self.nth(0)
    }

    /// Ignore hidden elements
    #[must_use]
    pub fn visible_only(mut self) -> Self {
        self.options.visible_only = true;
        self
    }

    /// Enable or disable the single-match requirement
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.options.lenient = !strict;
        self
    }

    /// Override the implicit wait for this locator
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Get the selector
    #[must_use]
    pub const fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Parent scope
    #[must_use]
    pub fn parent(&self) -> Option<&Locator> {
        self.parent.as_deref()
    }

    /// Get the options
    #[must_use]
    pub const fn options(&self) -> &LocatorOptions {
        &self.options
    }

    /// Whether more than one match is an error
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        !self.options.lenient && self.options.nth.is_none()
    }

    /// Scope chain from the outermost ancestor down to `self`
    fn chain(&self) -> Vec<&Locator> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    fn describe_own(&self) -> String {
        let mut out = self.selector.describe();
        if let Some(n) = self.options.nth {
            out.push_str(&format!(" [nth={n}]"));
        }
        if self.options.visible_only {
            out.push_str(" [visible]");
        }
        out
    }

    async fn matches_in(
        &self,
        window: &Window,
        scope: Option<&ElementRef>,
    ) -> HarnessResult<Vec<ElementRef>> {
        let driver = window.driver();
        let mut found = driver.query(window.id(), &self.selector, scope).await?;
        if self.options.visible_only {
            let mut visible = Vec::with_capacity(found.len());
            for element in found {
                if driver.element_state(&element).await?.visible {
                    visible.push(element);
                }
            }
            found = visible;
        }
        if let Some(n) = self.options.nth {
            found = found.into_iter().nth(n).into_iter().collect();
        }
        Ok(found)
    }

    fn pick_one(&self, mut found: Vec<ElementRef>) -> HarnessResult<ElementRef> {
        match found.len() {
            0 => Err(HarnessError::NotFound {
                selector: self.describe_own(),
                scope: self.parent.as_ref().map(ToString::to_string),
                waited: None,
            }),
            1 => Ok(found.remove(0)),
            count if self.is_strict() => Err(HarnessError::AmbiguousMatch {
                selector: self.describe_own(),
                scope: self.parent.as_ref().map(ToString::to_string),
                count,
            }),
            _ => Ok(found.remove(0)),
        }
    }

    /// One resolution pass of every match, without waiting.
    pub async fn resolve_all_once(&self, window: &Window) -> HarnessResult<Vec<ElementRef>> {
        let chain = self.chain();
        let mut scope: Option<ElementRef> = None;
        for ancestor in &chain[..chain.len() - 1] {
            let found = ancestor.matches_in(window, scope.as_ref()).await?;
            scope = Some(ancestor.pick_one(found)?);
        }
        self.matches_in(window, scope.as_ref()).await
    }

    /// One resolution pass of the single match, without waiting.
    pub async fn resolve_one_once(&self, window: &Window) -> HarnessResult<ElementRef> {
        let found = self.resolve_all_once(window).await?;
        self.pick_one(found)
    }

    /// Poller honoring this locator's timeout override
    pub(crate) fn poller_for(&self, window: &Window) -> Poller {
        let poller = window.poller();
        match self.options.timeout {
            Some(timeout) => poller.with_timeout(timeout),
            None => poller,
        }
    }

    /// Wait for exactly one match and return it.
    ///
    /// Fails with `NotFound` or `AmbiguousMatch` once the implicit wait passes.
    pub async fn find(&self, window: &Window) -> HarnessResult<ElementRef> {
        let poller = self.poller_for(window);
        let label = format!("element {self}");
        poller
            .retry(&label, || self.resolve_one_once(window))
            .await
            .map_err(unwrap_lookup_timeout)
    }

    /// Snapshot of every current match. Never waits.
    pub async fn find_all(&self, window: &Window) -> HarnessResult<Vec<ElementRef>> {
        match self.resolve_all_once(window).await {
            Err(e) if e.is_absence() => Ok(Vec::new()),
            other => other,
        }
    }

    /// Whether the element shows up within the probe window.
    ///
    /// Returns `true` at the first sighting; only infrastructure failures are errors.
    pub async fn exists(&self, window: &Window) -> HarnessResult<bool> {
        let poller = window.probe_poller();
        let label = format!("presence of {self}");
        let result = poller
            .check(&label, || async move {
                Ok(!self.resolve_all_once(window).await?.is_empty())
            })
            .await?;
        Ok(result.ok)
    }
}

/// A lookup that timed out reports the cardinality error it kept seeing.
pub(crate) fn unwrap_lookup_timeout(err: HarnessError) -> HarnessError {
    match err {
        HarnessError::Timeout {
            cause: Some(cause),
            elapsed,
            ..
        } => match *cause {
            HarnessError::NotFound {
                selector, scope, ..
            } => HarnessError::NotFound {
                selector,
                scope,
                waited: Some(elapsed),
            },
            other => other,
        },
        other => other,
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.chain().iter().map(|l| l.describe_own()).collect();
        f.write_str(&parts.join(" >> "))
    }
}

impl From<Selector> for Locator {
    fn from(selector: Selector) -> Self {
        Self::from_selector(selector)
    }
}

impl From<&str> for Locator {
    fn from(selector: &str) -> Self {
        Self::new(selector)
    }
}
