//! In-memory browser for tests.
//!
//! `FakeBrowser` keeps one DOM tree per window, built by route handlers on
//! navigation and changed by scripted mutations and event listeners. Element
//! handles carry a node uid; once a node is removed or its document replaced,
//! the handle reports `StaleReference` like a real browser would.
//!
//! ```ignore
//! let browser = FakeBrowser::new();
//! browser.route("/u/:username", Node::new("body").child(Node::new("h1").text("Profile")))?;
//! browser.on_click("#save", |event| {
//!     let _ = event.browser.mutate(&event.window, |doc| doc.set_hidden(".saved", false));
//! })?;
//! ```

use super::css::{CssSelector, Dom};
use super::{
    AuthenticatorId, AuthenticatorOptions, BrowserDriver, ContextId, Cookie, ElementRef,
    ElementState, Key, Screenshot, Viewport, WindowId,
};
use crate::locator::Selector;
use crate::page::RouteTemplate;
use crate::result::{HarnessError, HarnessResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Declarative DOM subtree used to build fake pages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    value: Option<String>,
    hidden: bool,
    children: Vec<Node>,
}

impl Node {
    /// Create an element
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.retain(|(k, _)| k != name);
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    /// Set the `id` attribute
    #[must_use]
    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    /// Set the `class` attribute
    #[must_use]
    pub fn class(self, class: &str) -> Self {
        self.attr("class", class)
    }

    /// Set the `data-testid` attribute
    #[must_use]
    pub fn test_id(self, id: &str) -> Self {
        self.attr("data-testid", id)
    }

    /// Set own text
    #[must_use]
    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// Set form value
    #[must_use]
    pub fn value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    /// Render hidden (`display: none`)
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Add the `disabled` attribute
    #[must_use]
    pub fn disabled(self) -> Self {
        self.attr("disabled", "")
    }

    /// Append a child
    #[must_use]
    pub fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Append several children
    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }
}

#[derive(Debug, Clone)]
struct DomNode {
    uid: u64,
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    value: Option<String>,
    hidden: bool,
    parent: Option<usize>,
    children: Vec<usize>,
    attached: bool,
}

/// Live DOM of one fake window
#[derive(Debug, Clone)]
pub struct FakeDocument {
    nodes: Vec<DomNode>,
    root: usize,
}

impl Dom for FakeDocument {
    fn tag(&self, node: usize) -> &str {
        &self.nodes[node].tag
    }

    fn attribute(&self, node: usize, name: &str) -> Option<&str> {
        self.nodes[node].attrs.get(name).map(String::as_str)
    }

    fn parent(&self, node: usize) -> Option<usize> {
        self.nodes[node].parent
    }
}

fn invalid_css(css: &str, message: String) -> HarnessError {
    HarnessError::InvalidSelector {
        selector: format!("css `{css}`"),
        message,
    }
}

impl FakeDocument {
    /// Build a document from a root node (usually `body`)
    #[must_use]
    pub fn new(root: Node) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: 0,
        };
        doc.root = doc.insert(root, None);
        doc
    }

    fn insert(&mut self, node: Node, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        self.nodes.push(DomNode {
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            tag: node.tag,
            attrs: node.attrs.into_iter().collect(),
            text: node.text,
            value: node.value,
            hidden: node.hidden,
            parent,
            children: Vec::new(),
            attached: true,
        });
        for child in node.children {
            let c = self.insert(child, Some(index));
            self.nodes[index].children.push(c);
        }
        index
    }

    fn subtree(&self, of: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![of];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.nodes[n].children.iter().rev());
        }
        out
    }

    fn index_of(&self, uid: u64) -> Option<usize> {
        self.nodes.iter().position(|n| n.uid == uid && n.attached)
    }

    fn text_content(&self, node: usize) -> String {
        let mut out = self.nodes[node].text.clone();
        for &c in &self.nodes[node].children {
            out.push_str(&self.text_content(c));
        }
        out
    }

    fn is_visible(&self, node: usize) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if self.nodes[n].hidden {
                return false;
            }
            current = self.nodes[n].parent;
        }
        self.nodes[node].attached
    }

    fn form_value(&self, node: usize) -> Option<String> {
        let n = &self.nodes[node];
        match n.tag.as_str() {
            "input" | "textarea" => Some(n.value.clone().unwrap_or_default()),
            "select" => n.value.clone().or_else(|| {
                self.subtree(node)
                    .into_iter()
                    .find(|&o| self.nodes[o].tag == "option")
                    .map(|o| self.option_value(o))
            }),
            _ => None,
        }
    }

    fn option_value(&self, option: usize) -> String {
        self.nodes[option]
            .attrs
            .get("value")
            .cloned()
            .unwrap_or_else(|| self.text_content(option).trim().to_string())
    }

    fn role(&self, node: usize) -> String {
        let n = &self.nodes[node];
        if let Some(role) = n.attrs.get("role") {
            return role.clone();
        }
        let input_type = n.attrs.get("type").map_or("text", String::as_str);
        match (n.tag.as_str(), input_type) {
            ("button", _) | ("input", "submit" | "button") => "button",
            ("a", _) if n.attrs.contains_key("href") => "link",
            ("input", "checkbox") => "checkbox",
            ("input", "radio") => "radio",
            ("input", _) | ("textarea", _) => "textbox",
            ("select", _) => "combobox",
            ("h1" | "h2" | "h3" | "h4" | "h5" | "h6", _) => "heading",
            ("ul" | "ol", _) => "list",
            ("li", _) => "listitem",
            ("dialog", _) => "dialog",
            ("nav", _) => "navigation",
            ("main", _) => "main",
            ("table", _) => "table",
            ("img", _) => "img",
            ("form", _) => "form",
            _ => "",
        }
        .to_string()
    }

    fn accessible_name(&self, node: usize) -> String {
        self.nodes[node]
            .attrs
            .get("aria-label")
            .cloned()
            .unwrap_or_else(|| self.text_content(node).trim().to_string())
    }

    fn query(&self, selector: &Selector, scope: Option<usize>) -> HarnessResult<Vec<usize>> {
        let candidates: Vec<usize> = match scope {
            Some(s) => self.subtree(s).into_iter().skip(1).collect(),
            None => self.subtree(self.root),
        };
        let found = match selector {
            Selector::Css(css) => {
                let parsed = CssSelector::parse(css).map_err(|m| invalid_css(css, m))?;
                candidates
                    .into_iter()
                    .filter(|&n| parsed.matches(self, n))
                    .collect()
            }
            Selector::CssWithText { css, text } => {
                let parsed = CssSelector::parse(css).map_err(|m| invalid_css(css, m))?;
                candidates
                    .into_iter()
                    .filter(|&n| parsed.matches(self, n) && self.text_content(n).contains(text.as_str()))
                    .collect()
            }
            Selector::TestId(id) => candidates
                .into_iter()
                .filter(|&n| self.nodes[n].attrs.get("data-testid") == Some(id))
                .collect(),
            Selector::Text(text) => candidates
                .into_iter()
                .filter(|&n| {
                    self.text_content(n).contains(text.as_str())
                        && !self.nodes[n]
                            .children
                            .iter()
                            .any(|&c| self.text_content(c).contains(text.as_str()))
                })
                .collect(),
            Selector::Role { role, name } => candidates
                .into_iter()
                .filter(|&n| {
                    self.role(n) == *role
                        && name
                            .as_ref()
                            .map_or(true, |name| self.accessible_name(n).contains(name.as_str()))
                })
                .collect(),
            Selector::XPath(_) => {
                return Err(HarnessError::InvalidSelector {
                    selector: selector.describe(),
                    message: "xpath is not supported by the in-memory browser".to_string(),
                })
            }
        };
        Ok(found)
    }

    /// Attached nodes matching a CSS selector, in document order
    fn select(&self, css: &str) -> HarnessResult<Vec<usize>> {
        self.query(&Selector::Css(css.to_string()), None)
    }

    fn select_first(&self, css: &str) -> HarnessResult<usize> {
        self.select(css)?
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::NotFound {
                selector: format!("css `{css}`"),
                scope: None,
                waited: None,
            })
    }

    fn detach(&mut self, node: usize) {
        if let Some(parent) = self.nodes[node].parent {
            self.nodes[parent].children.retain(|&c| c != node);
        }
        for n in self.subtree(node) {
            self.nodes[n].attached = false;
        }
    }

    /// Append `node` as the last child of the first match
    pub fn append(&mut self, parent_css: &str, node: Node) -> HarnessResult<()> {
        let parent = self.select_first(parent_css)?;
        let child = self.insert(node, Some(parent));
        self.nodes[parent].children.push(child);
        Ok(())
    }

    /// Remove every match; returns how many were removed
    pub fn remove(&mut self, css: &str) -> HarnessResult<usize> {
        let matches: Vec<usize> = self
            .select(css)?
            .into_iter()
            .filter(|&n| n != self.root)
            .collect();
        let mut removed = 0;
        for n in matches {
            if self.nodes[n].attached {
                self.detach(n);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Replace the first match with a new subtree
    pub fn replace(&mut self, css: &str, node: Node) -> HarnessResult<()> {
        let old = self.select_first(css)?;
        let Some(parent) = self.nodes[old].parent else {
            let root = self.insert(node, None);
            self.detach(old);
            self.root = root;
            return Ok(());
        };
        let position = self.nodes[parent]
            .children
            .iter()
            .position(|&c| c == old)
            .unwrap_or(self.nodes[parent].children.len());
        self.detach(old);
        let new = self.insert(node, Some(parent));
        self.nodes[parent].children.insert(position, new);
        Ok(())
    }

    fn update_all(&mut self, css: &str, mut f: impl FnMut(&mut DomNode)) -> HarnessResult<usize> {
        let matches = self.select(css)?;
        for &n in &matches {
            f(&mut self.nodes[n]);
        }
        Ok(matches.len())
    }

    /// Set own text of every match
    pub fn set_text(&mut self, css: &str, text: &str) -> HarnessResult<usize> {
        self.update_all(css, |n| n.text = text.to_string())
    }

    /// Set an attribute on every match
    pub fn set_attr(&mut self, css: &str, name: &str, value: &str) -> HarnessResult<usize> {
        self.update_all(css, |n| {
            n.attrs.insert(name.to_string(), value.to_string());
        })
    }

    /// Remove an attribute from every match
    pub fn remove_attr(&mut self, css: &str, name: &str) -> HarnessResult<usize> {
        self.update_all(css, |n| {
            n.attrs.remove(name);
        })
    }

    /// Show or hide every match
    pub fn set_hidden(&mut self, css: &str, hidden: bool) -> HarnessResult<usize> {
        self.update_all(css, |n| n.hidden = hidden)
    }

    /// Set the form value of every match
    pub fn set_value(&mut self, css: &str, value: &str) -> HarnessResult<usize> {
        self.update_all(css, |n| n.value = Some(value.to_string()))
    }

    /// Text content of the first match
    pub fn text_of(&self, css: &str) -> HarnessResult<Option<String>> {
        Ok(self.select(css)?.first().map(|&n| self.text_content(n)))
    }

    /// Form value of the first match
    pub fn value_of(&self, css: &str) -> HarnessResult<Option<String>> {
        Ok(self.select(css)?.first().and_then(|&n| self.form_value(n)))
    }

    /// Number of matches
    pub fn count(&self, css: &str) -> HarnessResult<usize> {
        Ok(self.select(css)?.len())
    }
}

/// What a route handler sees
#[derive(Debug, Clone)]
pub struct RouteRequest {
    /// Full URL
    pub url: url::Url,
    /// Values of `:param` segments
    pub params: HashMap<String, String>,
    /// Cookies of the requesting context
    pub cookies: Vec<Cookie>,
    /// Requesting context
    pub context: ContextId,
}

impl RouteRequest {
    /// Cookie value by name
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Query string parameter
    #[must_use]
    pub fn query(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// DOM events listeners can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeEvent {
    /// Element clicked
    Click,
    /// Form value changed by typing or selecting
    Change,
    /// Key pressed while the element had focus
    Key,
}

/// What an event listener sees
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Browser, for follow-up mutations
    pub browser: FakeBrowser,
    /// Window the event happened in
    pub window: WindowId,
    /// Context of that window
    pub context: ContextId,
    /// Target element
    pub element: ElementRef,
    /// Pressed key, for `FakeEvent::Key`
    pub key: Option<Key>,
}

type RouteHandler = Arc<dyn Fn(&RouteRequest) -> Node + Send + Sync>;
type EventHandler = Arc<dyn Fn(EventContext) + Send + Sync>;
type Evaluator = Arc<dyn Fn(&WindowId, &str) -> serde_json::Value + Send + Sync>;

struct Route {
    template: RouteTemplate,
    handler: RouteHandler,
}

struct Listener {
    kind: FakeEvent,
    selector: CssSelector,
    handler: EventHandler,
}

#[derive(Debug, Default)]
struct ContextState {
    windows: Vec<WindowId>,
    cookies: Vec<Cookie>,
    local_storage: HashMap<String, String>,
    clipboard_granted: bool,
    clipboard: String,
}

#[derive(Debug)]
struct WindowState {
    context: ContextId,
    url: String,
    document: FakeDocument,
    viewport: Viewport,
    focused: Option<u64>,
    authenticators: HashMap<AuthenticatorId, AuthenticatorOptions>,
}

#[derive(Default)]
struct State {
    contexts: HashMap<ContextId, ContextState>,
    windows: HashMap<WindowId, WindowState>,
    active: Option<WindowId>,
    routes: Vec<Route>,
    listeners: Vec<Listener>,
    evaluator: Option<Evaluator>,
    calls: Vec<String>,
    stale_budget: usize,
    failures: HashMap<String, String>,
    stalls: HashMap<String, usize>,
    crashed: bool,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn window(&self, id: &WindowId) -> HarnessResult<&WindowState> {
        self.windows.get(id).ok_or_else(|| HarnessError::BrowserClosed {
            message: format!("window {id} is closed"),
        })
    }

    fn window_mut(&mut self, id: &WindowId) -> HarnessResult<&mut WindowState> {
        self.windows
            .get_mut(id)
            .ok_or_else(|| HarnessError::BrowserClosed {
                message: format!("window {id} is closed"),
            })
    }

    fn context_mut(&mut self, id: &ContextId) -> HarnessResult<&mut ContextState> {
        self.contexts
            .get_mut(id)
            .ok_or_else(|| HarnessError::BrowserClosed {
                message: format!("context {id} is closed"),
            })
    }

    fn take_stale(&mut self, element: &ElementRef) -> HarnessResult<()> {
        if self.stale_budget > 0 {
            self.stale_budget -= 1;
            return Err(stale(element));
        }
        Ok(())
    }

    /// Resolve a handle to its node index, or report it stale
    fn node(&self, element: &ElementRef) -> HarnessResult<(&WindowState, usize)> {
        let window = self.window(&element.window)?;
        let uid: u64 = element.id.parse().map_err(|_| stale(element))?;
        let index = window.document.index_of(uid).ok_or_else(|| stale(element))?;
        Ok((window, index))
    }

    fn listeners_for(
        &self,
        kind: FakeEvent,
        window: &WindowState,
        node: usize,
    ) -> Vec<EventHandler> {
        let doc = &window.document;
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(n) = current {
            path.push(n);
            current = doc.nodes[n].parent;
        }
        self.listeners
            .iter()
            .filter(|l| l.kind == kind && path.iter().any(|&n| l.selector.matches(doc, n)))
            .map(|l| Arc::clone(&l.handler))
            .collect()
    }
}

fn stale(element: &ElementRef) -> HarnessError {
    HarnessError::StaleReference {
        element: element.id.clone(),
    }
}

fn not_interactable(element: &ElementRef, reason: &str) -> HarnessError {
    HarnessError::NotInteractable {
        selector: format!("element {}", element.id),
        reason: reason.to_string(),
    }
}

/// In-memory [`BrowserDriver`]
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<State>>,
}

impl fmt::Debug for FakeBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeBrowser").finish_non_exhaustive()
    }
}

impl FakeBrowser {
    /// Create a browser with no routes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> HarnessResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| HarnessError::driver("fake browser state poisoned"))
    }

    /// Lock for a driver call: honors crash and scripted failures, records the call
    fn enter(&self, op: &str, detail: &str) -> HarnessResult<MutexGuard<'_, State>> {
        let mut state = self.lock()?;
        if state.crashed {
            return Err(HarnessError::BrowserClosed {
                message: "browser crashed".to_string(),
            });
        }
        if let Some(message) = state.failures.remove(op) {
            return Err(HarnessError::driver(message));
        }
        state.calls.push(format!("{op} {detail}").trim_end().to_string());
        Ok(state)
    }

    /// Serve `page` for every URL matching `pattern`
    pub fn route(&self, pattern: &str, page: Node) -> HarnessResult<()> {
        self.route_with(pattern, move |_| page.clone())
    }

    /// Serve a page built per request
    pub fn route_with<F>(&self, pattern: &str, handler: F) -> HarnessResult<()>
    where
        F: Fn(&RouteRequest) -> Node + Send + Sync + 'static,
    {
        let template = RouteTemplate::parse(pattern)?;
        self.lock()?.routes.push(Route {
            template,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Run `handler` after every event of `kind` on an element matching `css` or inside one
    pub fn on<F>(&self, kind: FakeEvent, css: &str, handler: F) -> HarnessResult<()>
    where
        F: Fn(EventContext) + Send + Sync + 'static,
    {
        let selector = CssSelector::parse(css).map_err(|m| invalid_css(css, m))?;
        self.lock()?.listeners.push(Listener {
            kind,
            selector,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    /// Shorthand for `on(FakeEvent::Click, ..)`
    pub fn on_click<F>(&self, css: &str, handler: F) -> HarnessResult<()>
    where
        F: Fn(EventContext) + Send + Sync + 'static,
    {
        self.on(FakeEvent::Click, css, handler)
    }

    /// Answer `evaluate` calls
    pub fn on_evaluate<F>(&self, evaluator: F) -> HarnessResult<()>
    where
        F: Fn(&WindowId, &str) -> serde_json::Value + Send + Sync + 'static,
    {
        self.lock()?.evaluator = Some(Arc::new(evaluator));
        Ok(())
    }

    /// Change the DOM of one window
    pub fn mutate<R>(
        &self,
        window: &WindowId,
        f: impl FnOnce(&mut FakeDocument) -> HarnessResult<R>,
    ) -> HarnessResult<R> {
        let mut state = self.lock()?;
        f(&mut state.window_mut(window)?.document)
    }

    /// Change the DOM of every window whose URL contains `url_part`; returns how many
    pub fn mutate_where(
        &self,
        url_part: &str,
        mut f: impl FnMut(&mut FakeDocument) -> HarnessResult<()>,
    ) -> HarnessResult<usize> {
        let mut state = self.lock()?;
        let mut touched = 0;
        for window in state.windows.values_mut() {
            if window.url.contains(url_part) {
                f(&mut window.document)?;
                touched += 1;
            }
        }
        Ok(touched)
    }

    /// Mutate a window after `delay` on the tokio clock
    pub fn schedule<F>(&self, window: &WindowId, delay: Duration, f: F)
    where
        F: FnOnce(&mut FakeDocument) -> HarnessResult<()> + Send + 'static,
    {
        let browser = self.clone();
        let window = window.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = browser.mutate(&window, f) {
                tracing::warn!(%window, error = %e, "scheduled mutation failed");
            }
        });
    }

    /// Read the DOM of one window
    pub fn inspect<R>(
        &self,
        window: &WindowId,
        f: impl FnOnce(&FakeDocument) -> R,
    ) -> HarnessResult<R> {
        let state = self.lock()?;
        Ok(f(&state.window(window)?.document))
    }

    /// Fail the next `n` element operations with `StaleReference`
    pub fn inject_stale(&self, n: usize) -> HarnessResult<()> {
        self.lock()?.stale_budget = n;
        Ok(())
    }

    /// Fail the next call of driver operation `op` (e.g. "close_context")
    pub fn fail_next(&self, op: &str, message: &str) -> HarnessResult<()> {
        self.lock()?
            .failures
            .insert(op.to_string(), message.to_string());
        Ok(())
    }

    /// Make the next `n` calls of `op` ("navigate" or "query") never return
    pub fn stall_next(&self, op: &str, n: usize) -> HarnessResult<()> {
        self.lock()?.stalls.insert(op.to_string(), n);
        Ok(())
    }

    async fn stall_if_scripted(&self, op: &str) -> HarnessResult<()> {
        let stalled = {
            let mut state = self.lock()?;
            match state.stalls.get_mut(op) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    /// Every later driver call fails with `BrowserClosed`
    pub fn crash(&self) -> HarnessResult<()> {
        self.lock()?.crashed = true;
        Ok(())
    }

    /// Recorded driver calls, oldest first
    pub fn calls(&self) -> HarnessResult<Vec<String>> {
        Ok(self.lock()?.calls.clone())
    }

    /// Open contexts
    pub fn contexts(&self) -> HarnessResult<Vec<ContextId>> {
        let mut out: Vec<_> = self.lock()?.contexts.keys().cloned().collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Open windows
    pub fn windows(&self) -> HarnessResult<Vec<WindowId>> {
        let mut out: Vec<_> = self.lock()?.windows.keys().cloned().collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Window brought to front last
    pub fn active_window(&self) -> HarnessResult<Option<WindowId>> {
        Ok(self.lock()?.active.clone())
    }

    /// Viewport of a window
    pub fn viewport(&self, window: &WindowId) -> HarnessResult<Viewport> {
        Ok(self.lock()?.window(window)?.viewport)
    }

    /// Number of virtual authenticators registered in a window
    pub fn authenticator_count(&self, window: &WindowId) -> HarnessResult<usize> {
        Ok(self.lock()?.window(window)?.authenticators.len())
    }

    /// Whether clipboard access is granted to a context
    pub fn clipboard_granted(&self, context: &ContextId) -> HarnessResult<bool> {
        Ok(self.lock()?.context_mut(context)?.clipboard_granted)
    }

    /// Put a value in a context's local storage
    pub fn set_local_storage(&self, context: &ContextId, key: &str, value: &str) -> HarnessResult<()> {
        self.lock()?
            .context_mut(context)?
            .local_storage
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Local storage value of a context
    pub fn local_storage(&self, context: &ContextId, key: &str) -> HarnessResult<Option<String>> {
        Ok(self
            .lock()?
            .context_mut(context)?
            .local_storage
            .get(key)
            .cloned())
    }

    async fn load(&self, window: &WindowId, target: &str) -> HarnessResult<()> {
        let url = url::Url::parse(target).map_err(|e| HarnessError::driver(format!("invalid url {target}: {e}")))?;
        let (handler, request) = {
            let mut state = self.lock()?;
            let context = state.window(window)?.context.clone();
            let cookies = state.context_mut(&context)?.cookies.clone();
            let route = state
                .routes
                .iter()
                .rev()
                .find_map(|r| r.template.extract_params(url.path()).map(|p| (Arc::clone(&r.handler), p)));
            match route {
                Some((handler, params)) => (
                    Some(handler),
                    RouteRequest {
                        url: url.clone(),
                        params,
                        cookies,
                        context,
                    },
                ),
                None => (
                    None,
                    RouteRequest {
                        url: url.clone(),
                        params: HashMap::new(),
                        cookies,
                        context,
                    },
                ),
            }
        };
        let page = match handler {
            Some(handler) => handler(&request),
            None => Node::new("body").child(Node::new("h1").class("not-found").text("Page Not Found")),
        };
        let mut state = self.lock()?;
        let w = state.window_mut(window)?;
        w.document = FakeDocument::new(page);
        w.url = url.to_string();
        w.focused = None;
        Ok(())
    }

    fn dispatch(&self, handlers: Vec<EventHandler>, ctx: EventContext) {
        for handler in handlers {
            handler(ctx.clone());
        }
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    fn name(&self) -> &str {
        "fake"
    }

    async fn new_context(&self) -> HarnessResult<ContextId> {
        let mut state = self.enter("new_context", "")?;
        let id = ContextId(state.next_id("ctx"));
        state.contexts.insert(id.clone(), ContextState::default());
        Ok(id)
    }

    async fn close_context(&self, context: &ContextId) -> HarnessResult<()> {
        let mut state = self.enter("close_context", &context.0)?;
        let closed = state.contexts.remove(context).ok_or_else(|| {
            HarnessError::driver(format!("context {context} does not exist"))
        })?;
        for window in closed.windows {
            state.windows.remove(&window);
            if state.active.as_ref() == Some(&window) {
                state.active = None;
            }
        }
        Ok(())
    }

    async fn new_window(&self, context: &ContextId) -> HarnessResult<WindowId> {
        let mut state = self.enter("new_window", &context.0)?;
        let id = WindowId(state.next_id("win"));
        state.context_mut(context)?.windows.push(id.clone());
        state.windows.insert(
            id.clone(),
            WindowState {
                context: context.clone(),
                url: "about:blank".to_string(),
                document: FakeDocument::new(Node::new("body")),
                viewport: Viewport::new(1400, 1400),
                focused: None,
                authenticators: HashMap::new(),
            },
        );
        state.active = Some(id.clone());
        Ok(id)
    }

    async fn close_window(&self, window: &WindowId) -> HarnessResult<()> {
        let mut state = self.enter("close_window", &window.0)?;
        let closed = state
            .windows
            .remove(window)
            .ok_or_else(|| HarnessError::driver(format!("window {window} does not exist")))?;
        if let Some(ctx) = state.contexts.get_mut(&closed.context) {
            ctx.windows.retain(|w| w != window);
        }
        if state.active.as_ref() == Some(window) {
            state.active = None;
        }
        Ok(())
    }

    async fn activate_window(&self, window: &WindowId) -> HarnessResult<()> {
        let mut state = self.enter("activate_window", &window.0)?;
        state.window(window)?;
        state.active = Some(window.clone());
        Ok(())
    }

    async fn navigate(&self, window: &WindowId, url: &str) -> HarnessResult<()> {
        drop(self.enter("navigate", &format!("{window} {url}"))?);
        self.stall_if_scripted("navigate").await?;
        self.load(window, url).await
    }

    async fn current_url(&self, window: &WindowId) -> HarnessResult<String> {
        let state = self.lock()?;
        Ok(state.window(window)?.url.clone())
    }

    async fn query(
        &self,
        window: &WindowId,
        selector: &Selector,
        scope: Option<&ElementRef>,
    ) -> HarnessResult<Vec<ElementRef>> {
        self.stall_if_scripted("query").await?;
        let state = self.lock()?;
        if state.crashed {
            return Err(HarnessError::BrowserClosed {
                message: "browser crashed".to_string(),
            });
        }
        let scope_index = match scope {
            Some(element) => Some(state.node(element)?.1),
            None => None,
        };
        let doc = &state.window(window)?.document;
        Ok(doc
            .query(selector, scope_index)?
            .into_iter()
            .map(|n| ElementRef::new(doc.nodes[n].uid.to_string(), window.clone()))
            .collect())
    }

    async fn element_state(&self, element: &ElementRef) -> HarnessResult<ElementState> {
        let mut state = self.lock()?;
        if state.crashed {
            return Err(HarnessError::BrowserClosed {
                message: "browser crashed".to_string(),
            });
        }
        state.take_stale(element)?;
        let (window, n) = state.node(element)?;
        let doc = &window.document;
        let node = &doc.nodes[n];
        Ok(ElementState {
            tag: node.tag.clone(),
            text: doc.text_content(n),
            value: doc.form_value(n),
            visible: doc.is_visible(n),
            enabled: !node.attrs.contains_key("disabled"),
            attributes: node.attrs.clone().into_iter().collect(),
        })
    }

    async fn click(&self, element: &ElementRef) -> HarnessResult<()> {
        let (handlers, ctx, href) = {
            let mut state = self.enter("click", &element.id)?;
            state.take_stale(element)?;
            let (window, n) = state.node(element)?;
            let doc = &window.document;
            if !doc.is_visible(n) {
                return Err(not_interactable(element, "element is not visible"));
            }
            if doc.nodes[n].attrs.contains_key("disabled") {
                return Err(not_interactable(element, "element is disabled"));
            }
            let mut href = None;
            let mut current = Some(n);
            while let Some(c) = current {
                if doc.nodes[c].tag == "a" {
                    href = doc.nodes[c].attrs.get("href").cloned();
                    break;
                }
                current = doc.nodes[c].parent;
            }
            let handlers = state.listeners_for(FakeEvent::Click, window, n);
            let ctx = EventContext {
                browser: self.clone(),
                window: element.window.clone(),
                context: window.context.clone(),
                element: element.clone(),
                key: None,
            };
            let uid = doc.nodes[n].uid;
            state.window_mut(&element.window)?.focused = Some(uid);
            let base = state.window(&element.window)?.url.clone();
            let href = href.and_then(|h| url::Url::parse(&base).ok()?.join(&h).ok());
            (handlers, ctx, href)
        };
        self.dispatch(handlers, ctx);
        if let Some(target) = href {
            self.load(&element.window, target.as_str()).await?;
        }
        Ok(())
    }

    async fn type_text(&self, element: &ElementRef, text: &str, clear: bool) -> HarnessResult<()> {
        let (handlers, ctx) = {
            let mut state = self.enter("type_text", &format!("{} {text:?}", element.id))?;
            state.take_stale(element)?;
            let (window, n) = state.node(element)?;
            let doc = &window.document;
            let editable = matches!(doc.nodes[n].tag.as_str(), "input" | "textarea")
                || doc.nodes[n].attrs.get("contenteditable").is_some_and(|v| v != "false");
            if !editable {
                return Err(not_interactable(element, "element is not editable"));
            }
            if !doc.is_visible(n) {
                return Err(not_interactable(element, "element is not visible"));
            }
            if doc.nodes[n].attrs.contains_key("disabled") {
                return Err(not_interactable(element, "element is disabled"));
            }
            let handlers = state.listeners_for(FakeEvent::Change, window, n);
            let ctx = EventContext {
                browser: self.clone(),
                window: element.window.clone(),
                context: window.context.clone(),
                element: element.clone(),
                key: None,
            };
            let w = state.window_mut(&element.window)?;
            let node = &mut w.document.nodes[n];
            let current = if clear {
                String::new()
            } else {
                node.value.clone().unwrap_or_default()
            };
            node.value = Some(current + text);
            w.focused = Some(node.uid);
            (handlers, ctx)
        };
        self.dispatch(handlers, ctx);
        Ok(())
    }

    async fn select_option(&self, element: &ElementRef, value: &str) -> HarnessResult<()> {
        let (handlers, ctx) = {
            let mut state = self.enter("select_option", &format!("{} {value:?}", element.id))?;
            state.take_stale(element)?;
            let (window, n) = state.node(element)?;
            let doc = &window.document;
            if doc.nodes[n].tag != "select" {
                return Err(not_interactable(element, "element is not a select"));
            }
            let chosen = doc
                .subtree(n)
                .into_iter()
                .filter(|&o| doc.nodes[o].tag == "option")
                .map(|o| doc.option_value(o))
                .zip(
                    doc.subtree(n)
                        .into_iter()
                        .filter(|&o| doc.nodes[o].tag == "option")
                        .map(|o| doc.text_content(o).trim().to_string()),
                )
                .find(|(v, label)| v == value || label == value)
                .map(|(v, _)| v)
                .ok_or_else(|| not_interactable(element, &format!("no option {value:?}")))?;
            let handlers = state.listeners_for(FakeEvent::Change, window, n);
            let ctx = EventContext {
                browser: self.clone(),
                window: element.window.clone(),
                context: window.context.clone(),
                element: element.clone(),
                key: None,
            };
            state.window_mut(&element.window)?.document.nodes[n].value = Some(chosen);
            (handlers, ctx)
        };
        self.dispatch(handlers, ctx);
        Ok(())
    }

    async fn press_key(&self, window: &WindowId, key: Key) -> HarnessResult<()> {
        let dispatch = {
            let mut state = self.enter("press_key", &format!("{window} {}", key.key()))?;
            let w = state.window_mut(window)?;
            let focused = w.focused.and_then(|uid| w.document.index_of(uid));
            match focused {
                Some(n) => {
                    if let Key::Char(c) = key {
                        let node = &mut w.document.nodes[n];
                        if matches!(node.tag.as_str(), "input" | "textarea") {
                            node.value.get_or_insert_with(String::new).push(c);
                        }
                    }
                    let element = ElementRef::new(w.document.nodes[n].uid.to_string(), window.clone());
                    let context = w.context.clone();
                    let w = state.window(window)?;
                    let handlers = state.listeners_for(FakeEvent::Key, w, n);
                    Some((
                        handlers,
                        EventContext {
                            browser: self.clone(),
                            window: window.clone(),
                            context,
                            element,
                            key: Some(key),
                        },
                    ))
                }
                None => None,
            }
        };
        if let Some((handlers, ctx)) = dispatch {
            self.dispatch(handlers, ctx);
        }
        Ok(())
    }

    async fn evaluate(&self, window: &WindowId, script: &str) -> HarnessResult<serde_json::Value> {
        let evaluator = {
            let state = self.enter("evaluate", script)?;
            state.window(window)?;
            state.evaluator.clone()
        };
        Ok(evaluator.map_or(serde_json::Value::Null, |e| e(window, script)))
    }

    async fn set_viewport(&self, window: &WindowId, viewport: Viewport) -> HarnessResult<()> {
        let mut state = self.enter(
            "set_viewport",
            &format!("{window} {}x{}", viewport.width, viewport.height),
        )?;
        state.window_mut(window)?.viewport = viewport;
        Ok(())
    }

    async fn screenshot(&self, window: &WindowId) -> HarnessResult<Screenshot> {
        let state = self.enter("screenshot", &window.0)?;
        state.window(window)?;
        Ok(Screenshot::new(PNG_SIGNATURE.to_vec()))
    }

    async fn set_cookie(&self, context: &ContextId, cookie: Cookie) -> HarnessResult<()> {
        let mut state = self.enter("set_cookie", &format!("{context} {}", cookie.name))?;
        let ctx = state.context_mut(context)?;
        ctx.cookies
            .retain(|c| !(c.name == cookie.name && c.path == cookie.path));
        ctx.cookies.push(cookie);
        Ok(())
    }

    async fn cookies(&self, context: &ContextId) -> HarnessResult<Vec<Cookie>> {
        let mut state = self.enter("cookies", &context.0)?;
        Ok(state.context_mut(context)?.cookies.clone())
    }

    async fn clear_storage(&self, context: &ContextId) -> HarnessResult<()> {
        let mut state = self.enter("clear_storage", &context.0)?;
        let ctx = state.context_mut(context)?;
        ctx.cookies.clear();
        ctx.local_storage.clear();
        Ok(())
    }

    async fn grant_clipboard(&self, context: &ContextId) -> HarnessResult<()> {
        let mut state = self.enter("grant_clipboard", &context.0)?;
        state.context_mut(context)?.clipboard_granted = true;
        Ok(())
    }

    async fn revoke_permissions(&self, context: &ContextId) -> HarnessResult<()> {
        let mut state = self.enter("revoke_permissions", &context.0)?;
        state.context_mut(context)?.clipboard_granted = false;
        Ok(())
    }

    async fn read_clipboard(&self, window: &WindowId) -> HarnessResult<String> {
        let mut state = self.enter("read_clipboard", &window.0)?;
        let context = state.window(window)?.context.clone();
        let ctx = state.context_mut(&context)?;
        if !ctx.clipboard_granted {
            return Err(HarnessError::PermissionDenied {
                permission: "clipboard-read".to_string(),
            });
        }
        Ok(ctx.clipboard.clone())
    }

    async fn write_clipboard(&self, window: &WindowId, text: &str) -> HarnessResult<()> {
        let mut state = self.enter("write_clipboard", &window.0)?;
        let context = state.window(window)?.context.clone();
        let ctx = state.context_mut(&context)?;
        if !ctx.clipboard_granted {
            return Err(HarnessError::PermissionDenied {
                permission: "clipboard-write".to_string(),
            });
        }
        ctx.clipboard = text.to_string();
        Ok(())
    }

    async fn add_virtual_authenticator(
        &self,
        window: &WindowId,
        options: AuthenticatorOptions,
    ) -> HarnessResult<AuthenticatorId> {
        let mut state = self.enter("add_virtual_authenticator", &window.0)?;
        let id = AuthenticatorId(state.next_id("auth"));
        state
            .window_mut(window)?
            .authenticators
            .insert(id.clone(), options);
        Ok(id)
    }

    async fn remove_virtual_authenticator(
        &self,
        window: &WindowId,
        authenticator: &AuthenticatorId,
    ) -> HarnessResult<()> {
        let mut state = self.enter(
            "remove_virtual_authenticator",
            &format!("{window} {authenticator}"),
        )?;
        state
            .window_mut(window)?
            .authenticators
            .remove(authenticator)
            .map(|_| ())
            .ok_or_else(|| HarnessError::driver(format!("authenticator {authenticator} does not exist")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn settings_page() -> Node {
        Node::new("body").child(
            Node::new("div").class("admin-detail").children([
                Node::new("h2").text("Site Settings"),
                Node::new("div")
                    .class("row setting")
                    .attr("data-setting", "title")
                    .children([
                        Node::new("input").attr("name", "title").value("Forum"),
                        Node::new("button").class("ok").text("Save"),
                    ]),
                Node::new("span").class("saved").text("Saved!").hidden(),
                Node::new("a").attr("href", "/latest").text("Latest"),
                Node::new("select").attr("name", "locale").children([
                    Node::new("option").attr("value", "en").text("English"),
                    Node::new("option").attr("value", "fr").text("Français"),
                ]),
            ]),
        )
    }

    async fn open(browser: &FakeBrowser, url: &str) -> WindowId {
        let ctx = browser.new_context().await.unwrap();
        let win = browser.new_window(&ctx).await.unwrap();
        browser.navigate(&win, url).await.unwrap();
        win
    }

    async fn one(browser: &FakeBrowser, win: &WindowId, css: &str) -> ElementRef {
        let mut found = browser.query(win, &Selector::css(css), None).await.unwrap();
        assert_eq!(found.len(), 1, "expected one match for {css}");
        found.remove(0)
    }

    mod document_tests {
        use super::*;

        #[test]
        fn test_text_content_and_visibility() {
            let doc = FakeDocument::new(settings_page());
            let saved = doc.select_first(".saved").unwrap();
            assert_eq!(doc.text_content(saved), "Saved!");
            assert!(!doc.is_visible(saved));
            assert_eq!(doc.value_of("select").unwrap().as_deref(), Some("en"));
        }

        #[test]
        fn test_remove_and_replace_detach_nodes() {
            let mut doc = FakeDocument::new(settings_page());
            let button = doc.select_first("button.ok").unwrap();
            let uid = doc.nodes[button].uid;
            doc.replace("button.ok", Node::new("button").class("ok").text("Save"))
                .unwrap();
            assert!(doc.index_of(uid).is_none());
            assert_eq!(doc.count("button.ok").unwrap(), 1);
            assert_eq!(doc.remove(".row").unwrap(), 1);
            assert_eq!(doc.count("button.ok").unwrap(), 0);
        }

        #[test]
        fn test_roles_and_text_selectors() {
            let doc = FakeDocument::new(settings_page());
            let buttons = doc.query(&Selector::role("button", Some("Save")), None).unwrap();
            assert_eq!(buttons.len(), 1);
            let links = doc.query(&Selector::role("link", None), None).unwrap();
            assert_eq!(links.len(), 1);
            let text = doc.query(&Selector::text("Site Settings"), None).unwrap();
            assert_eq!(text.len(), 1);
            assert_eq!(doc.nodes[text[0]].tag, "h2");
        }

        #[test]
        fn test_xpath_is_invalid() {
            let doc = FakeDocument::new(settings_page());
            assert!(matches!(
                doc.query(&Selector::xpath("//h2"), None),
                Err(HarnessError::InvalidSelector { .. })
            ));
        }
    }

    mod driver_tests {
        use super::*;

        #[tokio::test]
        async fn test_navigation_uses_routes() {
            let browser = FakeBrowser::new();
            browser
                .route_with("/u/:username", |req| {
                    Node::new("body").child(Node::new("h1").text(&req.params["username"]))
                })
                .unwrap();
            let win = open(&browser, "http://forum.test/u/sam").await;
            let h1 = one(&browser, &win, "h1").await;
            assert_eq!(browser.element_state(&h1).await.unwrap().text, "sam");
            assert_eq!(browser.current_url(&win).await.unwrap(), "http://forum.test/u/sam");

            browser.navigate(&win, "http://forum.test/nowhere").await.unwrap();
            assert!(browser.element_state(&h1).await.is_err());
            let missing = one(&browser, &win, ".not-found").await;
            assert!(browser.element_state(&missing).await.unwrap().visible);
        }

        #[tokio::test]
        async fn test_scoped_query() {
            let browser = FakeBrowser::new();
            browser.route("/admin", settings_page()).unwrap();
            let win = open(&browser, "http://forum.test/admin").await;
            let row = one(&browser, &win, ".row").await;
            let inside = browser
                .query(&win, &Selector::css("button"), Some(&row))
                .await
                .unwrap();
            assert_eq!(inside.len(), 1);
            let h2 = browser
                .query(&win, &Selector::css("h2"), Some(&row))
                .await
                .unwrap();
            assert!(h2.is_empty());
        }

        #[tokio::test]
        async fn test_typing_selecting_and_click_handlers() {
            let browser = FakeBrowser::new();
            browser.route("/admin", settings_page()).unwrap();
            browser
                .on_click("button.ok", |event| {
                    event
                        .browser
                        .mutate(&event.window, |doc| doc.set_hidden(".saved", false).map(|_| ()))
                        .unwrap();
                })
                .unwrap();
            let win = open(&browser, "http://forum.test/admin").await;

            let input = one(&browser, &win, "input[name=title]").await;
            browser.type_text(&input, "Meta", true).await.unwrap();
            browser.press_key(&win, Key::Char('!')).await.unwrap();
            assert_eq!(
                browser.element_state(&input).await.unwrap().value.as_deref(),
                Some("Meta!")
            );

            let select = one(&browser, &win, "select").await;
            browser.select_option(&select, "Français").await.unwrap();
            assert_eq!(
                browser.element_state(&select).await.unwrap().value.as_deref(),
                Some("fr")
            );
            assert!(browser.select_option(&select, "de").await.is_err());

            let saved = one(&browser, &win, ".saved").await;
            assert!(!browser.element_state(&saved).await.unwrap().visible);
            let button = one(&browser, &win, "button.ok").await;
            browser.click(&button).await.unwrap();
            assert!(browser.element_state(&saved).await.unwrap().visible);
        }

        #[tokio::test]
        async fn test_link_click_navigates() {
            let browser = FakeBrowser::new();
            browser.route("/admin", settings_page()).unwrap();
            browser
                .route("/latest", Node::new("body").child(Node::new("table").class("topic-list")))
                .unwrap();
            let win = open(&browser, "http://forum.test/admin").await;
            let link = one(&browser, &win, "a").await;
            browser.click(&link).await.unwrap();
            assert_eq!(browser.current_url(&win).await.unwrap(), "http://forum.test/latest");
            one(&browser, &win, ".topic-list").await;
        }

        #[tokio::test]
        async fn test_hidden_and_disabled_refuse_clicks() {
            let browser = FakeBrowser::new();
            browser
                .route(
                    "/",
                    Node::new("body").children([
                        Node::new("button").id("off").disabled(),
                        Node::new("button").id("ghost").hidden(),
                    ]),
                )
                .unwrap();
            let win = open(&browser, "http://forum.test/").await;
            for css in ["#off", "#ghost"] {
                let el = one(&browser, &win, css).await;
                assert!(matches!(
                    browser.click(&el).await,
                    Err(HarnessError::NotInteractable { .. })
                ));
            }
        }

        #[tokio::test]
        async fn test_stale_injection_and_crash() {
            let browser = FakeBrowser::new();
            browser.route("/admin", settings_page()).unwrap();
            let win = open(&browser, "http://forum.test/admin").await;
            let h2 = one(&browser, &win, "h2").await;
            browser.inject_stale(2).unwrap();
            assert!(browser.element_state(&h2).await.is_err());
            assert!(browser.element_state(&h2).await.is_err());
            assert!(browser.element_state(&h2).await.is_ok());

            browser.crash().unwrap();
            assert!(matches!(
                browser.query(&win, &Selector::css("h2"), None).await,
                Err(HarnessError::BrowserClosed { .. })
            ));
        }

        #[tokio::test]
        async fn test_contexts_are_isolated() {
            let browser = FakeBrowser::new();
            let a = browser.new_context().await.unwrap();
            let b = browser.new_context().await.unwrap();
            let wa = browser.new_window(&a).await.unwrap();
            let wb = browser.new_window(&b).await.unwrap();
            browser.set_cookie(&a, Cookie::new("_t", "alice")).await.unwrap();
            assert_eq!(browser.cookies(&a).await.unwrap().len(), 1);
            assert!(browser.cookies(&b).await.unwrap().is_empty());

            browser.grant_clipboard(&a).await.unwrap();
            browser.write_clipboard(&wa, "copied").await.unwrap();
            assert_eq!(browser.read_clipboard(&wa).await.unwrap(), "copied");
            assert!(matches!(
                browser.read_clipboard(&wb).await,
                Err(HarnessError::PermissionDenied { .. })
            ));

            browser.close_context(&a).await.unwrap();
            assert_eq!(browser.windows().unwrap(), vec![wb]);
            assert!(browser.close_context(&a).await.is_err());
        }

        #[tokio::test]
        async fn test_fail_next_and_call_log() {
            let browser = FakeBrowser::new();
            browser.fail_next("new_context", "no more profiles").unwrap();
            assert!(browser.new_context().await.is_err());
            let ctx = browser.new_context().await.unwrap();
            let calls = browser.calls().unwrap();
            assert_eq!(calls, vec!["new_context".to_string()]);
            assert_eq!(ctx.0, "ctx-1");
        }

        #[tokio::test(start_paused = true)]
        async fn test_scheduled_mutation() {
            let browser = FakeBrowser::new();
            browser.route("/admin", settings_page()).unwrap();
            let win = open(&browser, "http://forum.test/admin").await;
            browser.schedule(&win, Duration::from_millis(300), |doc| {
                doc.append(".admin-detail", Node::new("div").class("flash").text("Updated"))
            });
            assert_eq!(browser.inspect(&win, |d| d.count(".flash")).unwrap().unwrap(), 0);
            tokio::time::sleep(Duration::from_millis(301)).await;
            assert_eq!(browser.inspect(&win, |d| d.count(".flash")).unwrap().unwrap(), 1);
        }
    }
}
