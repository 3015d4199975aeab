//! Page Object Model support.
//!
//! A page object names one screen of the application: its route, the locator
//! that proves it has rendered, and the locators tests use on it. Building
//! one never touches the browser; [`Window::visit`](crate::Window::visit)
//! does the navigation.
//!
//! ```ignore
//! #[derive(PageObject)]
//! #[page(path = "/u/:username/activity", ready = ".user-main")]
//! struct UserActivity {
//!     username: String,
//! }
//! ```

use crate::locator::{Locator, Selector};
use crate::result::{HarnessError, HarnessResult};
use std::collections::HashMap;
use std::time::Duration;

/// A page of the application under test.
pub trait PageObject: Send + Sync {
    /// Route template, e.g. `/admin/site_settings/category/:category`
    fn route(&self) -> &str;

    /// Values for the route's `:param` segments
    fn params(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Concrete path of this page instance
    fn path(&self) -> HarnessResult<String> {
        RouteTemplate::parse(self.route())?.render(&self.params())
    }

    /// Locator whose presence means the page finished rendering
    fn ready(&self) -> Locator;

    /// Page name for logs and errors
    fn page_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Ready-signal timeout; `None` uses the configured navigation timeout
    fn load_timeout(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
    Parameter(String),
}

/// Path template with `:param` and `*` segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    pattern: String,
    segments: Vec<Segment>,
}

/// Path component of a URL or path, without query or fragment
fn path_of(input: &str) -> String {
    match url::Url::parse(input) {
        Ok(url) => url.path().to_string(),
        Err(_) => input.split(['?', '#']).next().unwrap_or_default().to_string(),
    }
}

impl RouteTemplate {
    /// Parse a template.
    ///
    /// Templates are absolute; `:name` segments capture one path segment and
    /// `*` matches one segment without capturing it.
    pub fn parse(pattern: &str) -> HarnessResult<Self> {
        if !pattern.starts_with('/') {
            return Err(HarnessError::config(format!(
                "route {pattern:?} must start with `/`"
            )));
        }
        let mut segments = Vec::new();
        for raw in pattern.split('/').filter(|s| !s.is_empty()) {
            let segment = if raw == "*" {
                Segment::Wildcard
            } else if let Some(name) = raw.strip_prefix(':') {
                if name.is_empty() {
                    return Err(HarnessError::config(format!(
                        "route {pattern:?} has an unnamed parameter"
                    )));
                }
                if segments.contains(&Segment::Parameter(name.to_string())) {
                    return Err(HarnessError::config(format!(
                        "route {pattern:?} repeats parameter `{name}`"
                    )));
                }
                Segment::Parameter(name.to_string())
            } else {
                Segment::Literal(raw.to_string())
            };
            segments.push(segment);
        }
        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    /// Get the original pattern
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Parameter names, in order
    #[must_use]
    pub fn params(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Parameter(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Captured parameters if `url` (a full URL or a path) matches.
    #[must_use]
    pub fn extract_params(&self, url: &str) -> Option<HashMap<String, String>> {
        let path = path_of(url);
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit != part => return None,
                Segment::Parameter(name) => {
                    params.insert(name.clone(), part.to_string());
                }
                _ => {}
            }
        }
        Some(params)
    }

    /// Whether `url` (a full URL or a path) matches.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.extract_params(url).is_some()
    }

    /// Fill in the parameters. A missing or empty parameter is an error.
    pub fn render(&self, params: &HashMap<String, String>) -> HarnessResult<String> {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Parameter(name) => match params.get(name) {
                    Some(value) if !value.is_empty() && !value.contains('/') => out.push_str(value),
                    Some(value) => {
                        return Err(HarnessError::config(format!(
                            "route {:?}: invalid value {value:?} for `{name}`",
                            self.pattern
                        )))
                    }
                    None => {
                        return Err(HarnessError::config(format!(
                            "route {:?}: missing parameter `{name}`",
                            self.pattern
                        )))
                    }
                },
                Segment::Wildcard => {
                    return Err(HarnessError::config(format!(
                        "route {:?} has a wildcard and cannot be visited",
                        self.pattern
                    )))
                }
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        Ok(out)
    }
}

/// Builder for creating page objects at runtime
#[derive(Debug, Clone)]
pub struct PageObjectBuilder {
    name: String,
    route: String,
    params: HashMap<String, String>,
    ready: Locator,
    locators: HashMap<String, Locator>,
    load_timeout: Option<Duration>,
}

impl Default for PageObjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PageObjectBuilder {
    /// Create a new page object builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "page".to_string(),
            route: "/".to_string(),
            params: HashMap::new(),
            ready: Locator::new("body"),
            locators: HashMap::new(),
            load_timeout: None,
        }
    }

    /// Set the page name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the route template
    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    /// Set a route parameter
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Set the ready signal
    #[must_use]
    pub fn with_ready(mut self, ready: impl Into<Locator>) -> Self {
        self.ready = ready.into();
        self
    }

    /// Add a locator with a name
    #[must_use]
    pub fn with_locator(mut self, name: impl Into<String>, selector: Selector) -> Self {
        self.locators
            .insert(name.into(), Locator::from_selector(selector));
        self
    }

    /// Set the load timeout
    #[must_use]
    pub const fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    /// Build a simple page object
    #[must_use]
    pub fn build(self) -> SimplePageObject {
        SimplePageObject {
            name: self.name,
            route: self.route,
            params: self.params,
            ready: self.ready,
            locators: self.locators,
            load_timeout: self.load_timeout,
        }
    }
}

/// A page object defined at runtime
#[derive(Debug, Clone)]
pub struct SimplePageObject {
    name: String,
    route: String,
    params: HashMap<String, String>,
    ready: Locator,
    locators: HashMap<String, Locator>,
    load_timeout: Option<Duration>,
}

impl SimplePageObject {
    /// Page at `route`, ready once `body` renders
    #[must_use]
    pub fn new(route: impl Into<String>) -> Self {
        PageObjectBuilder::new().with_route(route).build()
    }

    /// Get a locator by name
    #[must_use]
    pub fn locator(&self, name: &str) -> Option<&Locator> {
        self.locators.get(name)
    }

    /// Add a locator
    pub fn add_locator(&mut self, name: impl Into<String>, selector: Selector) {
        self.locators
            .insert(name.into(), Locator::from_selector(selector));
    }

    /// Get all locator names, sorted
    #[must_use]
    pub fn locator_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.locators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl PageObject for SimplePageObject {
    fn route(&self) -> &str {
        &self.route
    }

    fn params(&self) -> HashMap<String, String> {
        self.params.clone()
    }

    fn ready(&self) -> Locator {
        self.ready.clone()
    }

    fn page_name(&self) -> &str {
        &self.name
    }

    fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout
    }
}

/// Whether `url` shows `page`: route matches and every known param agrees.
pub(crate) fn shows<P: PageObject + ?Sized>(page: &P, url: &str) -> HarnessResult<bool> {
    let template = RouteTemplate::parse(page.route())?;
    let Some(found) = template.extract_params(url) else {
        return Ok(false);
    };
    Ok(page
        .params()
        .iter()
        .all(|(k, v)| found.get(k).is_some_and(|have| have == v)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    mod route_template_tests {
        use super::*;

        #[test]
        fn test_literal_route() {
            let t = RouteTemplate::parse("/latest").unwrap();
            assert!(t.matches("/latest"));
            assert!(t.matches("/latest/"));
            assert!(t.matches("http://forum.test/latest?order=views"));
            assert!(!t.matches("/top"));
            assert!(!t.matches("/latest/more"));
        }

        #[test]
        fn test_parameters() {
            let t = RouteTemplate::parse("/u/:username/activity").unwrap();
            let params = t.extract_params("http://forum.test/u/sam/activity").unwrap();
            assert_eq!(params.get("username").map(String::as_str), Some("sam"));
            assert_eq!(t.params(), vec!["username"]);
            assert!(t.extract_params("/u/sam/summary").is_none());
        }

        #[test]
        fn test_wildcard_matches_but_cannot_render() {
            let t = RouteTemplate::parse("/t/*/:id").unwrap();
            assert!(t.matches("/t/some-slug/42"));
            let params = HashMap::from([("id".to_string(), "42".to_string())]);
            assert!(t.render(&params).is_err());
        }

        #[test]
        fn test_render() {
            let t = RouteTemplate::parse("/admin/site_settings/category/:category").unwrap();
            let params = HashMap::from([("category".to_string(), "required".to_string())]);
            assert_eq!(
                t.render(&params).unwrap(),
                "/admin/site_settings/category/required"
            );
            let err = t.render(&HashMap::new()).unwrap_err();
            assert!(matches!(err, HarnessError::Config { .. }));
            assert!(err.to_string().contains("category"));
        }

        #[test]
        fn test_root_route() {
            let t = RouteTemplate::parse("/").unwrap();
            assert!(t.matches("http://forum.test/"));
            assert_eq!(t.render(&HashMap::new()).unwrap(), "/");
        }

        #[test]
        fn test_invalid_templates() {
            assert!(RouteTemplate::parse("latest").is_err());
            assert!(RouteTemplate::parse("/u/:").is_err());
            assert!(RouteTemplate::parse("/:a/:a").is_err());
        }

        proptest! {
            #[test]
            fn prop_render_then_extract(
                user in "[a-z][a-z0-9_]{0,15}",
                tab in "[a-z]{1,10}",
            ) {
                let t = RouteTemplate::parse("/u/:username/:tab").unwrap();
                let params = HashMap::from([
                    ("username".to_string(), user.clone()),
                    ("tab".to_string(), tab.clone()),
                ]);
                let path = t.render(&params).unwrap();
                prop_assert_eq!(t.extract_params(&path), Some(params));
            }
        }
    }

    mod page_object_builder_tests {
        use super::*;

        #[test]
        fn test_builder_basic() {
            let page = PageObjectBuilder::new()
                .with_name("login")
                .with_route("/login")
                .with_ready(".login-modal")
                .with_load_timeout(Duration::from_secs(5))
                .build();

            assert_eq!(page.route(), "/login");
            assert_eq!(page.page_name(), "login");
            assert_eq!(page.path().unwrap(), "/login");
            assert_eq!(page.ready(), Locator::new(".login-modal"));
            assert_eq!(page.load_timeout(), Some(Duration::from_secs(5)));
        }

        #[test]
        fn test_builder_with_locators() {
            let page = PageObjectBuilder::new()
                .with_route("/login")
                .with_locator("username", Selector::css("input[name='username']"))
                .with_locator("password", Selector::css("input[name='password']"))
                .build();

            assert!(page.locator("username").is_some());
            assert!(page.locator("nonexistent").is_none());
            assert_eq!(page.locator_names(), vec!["password", "username"]);
        }

        #[test]
        fn test_params_render_into_path() {
            let page = PageObjectBuilder::new()
                .with_route("/u/:username")
                .with_param("username", "eviltrout")
                .build();
            assert_eq!(page.path().unwrap(), "/u/eviltrout");
            assert!(shows(&page, "http://forum.test/u/eviltrout").unwrap());
            assert!(!shows(&page, "http://forum.test/u/sam").unwrap());
        }
    }

    mod simple_page_object_tests {
        use super::*;

        #[test]
        fn test_new() {
            let page = SimplePageObject::new("/dashboard");
            assert_eq!(page.route(), "/dashboard");
            assert_eq!(page.load_timeout(), None);
            assert_eq!(page.ready(), Locator::new("body"));
        }

        #[test]
        fn test_add_locator() {
            let mut page = SimplePageObject::new("/test");
            page.add_locator("button", Selector::css("button"));
            assert!(page.locator_names().contains(&"button"));
        }
    }
}
