//! Component objects.
//!
//! A component is a fragment of a page addressed through one root locator.
//! Children are resolved under that root, so two instances of the same
//! component (two dropdowns, one per row) never see each other's nodes.
//! Components compose the way the DOM nests: a component that contains
//! another hands it a root built from its own.

use crate::locator::{Locator, Selector};
use crate::poller::MatchResult;
use crate::result::HarnessResult;
use crate::window::Window;
use async_trait::async_trait;

/// A reusable fragment of a page
pub trait Component: Send + Sync {
    /// Locator of the component's outermost element
    fn root(&self) -> Locator;

    /// Locator resolved under [`root`](Self::root)
    fn child(&self, selector: &str) -> Locator {
        self.root().child(Selector::parse(selector))
    }

    /// Component name for logs and errors
    fn component_name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A component with a trigger that shows and hides some content.
///
/// `expand` and `collapse` are idempotent: the trigger is only clicked when
/// the content is in the other state.
#[async_trait]
pub trait Expandable: Component {
    /// Element that toggles the content
    fn trigger(&self) -> Locator;

    /// Element shown while expanded
    fn content(&self) -> Locator;

    /// Whether the content is currently shown
    async fn is_expanded(&self, window: &Window) -> HarnessResult<bool> {
        let content = self.content();
        let found = content.find_all(window).await?;
        for element in &found {
            if window.driver().element_state(element).await?.visible {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Show the content and wait for it to become visible
    async fn expand(&self, window: &Window) -> HarnessResult<MatchResult> {
        if !self.is_expanded(window).await? {
            tracing::debug!(component = self.component_name(), "expanding");
            window.click(&self.trigger()).await?;
        }
        window.expect(self.content()).to_be_visible().await
    }

    /// Hide the content and wait for it to go away
    async fn collapse(&self, window: &Window) -> HarnessResult<MatchResult> {
        if self.is_expanded(window).await? {
            tracing::debug!(component = self.component_name(), "collapsing");
            window.click(&self.trigger()).await?;
        }
        window.expect(self.content()).to_be_hidden().await
    }
}

/// A modal dialog
#[derive(Debug, Clone)]
pub struct Modal {
    root: Locator,
}

impl Default for Modal {
    fn default() -> Self {
        Self::new(".modal")
    }
}

impl Modal {
    /// Modal rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<Locator>) -> Self {
        Self { root: root.into() }
    }

    /// Title element
    #[must_use]
    pub fn title(&self) -> Locator {
        self.child(".modal-title")
    }

    /// Body element
    #[must_use]
    pub fn body(&self) -> Locator {
        self.child(".modal-body")
    }

    /// Footer button with the given label
    #[must_use]
    pub fn button(&self, label: &str) -> Locator {
        self.child(".modal-footer button").with_text(label)
    }

    /// Whether the modal is on screen right now
    pub async fn is_open(&self, window: &Window) -> HarnessResult<bool> {
        window.exists(&self.root).await
    }

    /// Click `trigger` and wait for the modal to appear
    pub async fn open_with(&self, window: &Window, trigger: &Locator) -> HarnessResult<MatchResult> {
        window.click(trigger).await?;
        window.expect(self.root()).to_be_visible().await
    }

    /// Text of the title
    pub async fn title_text(&self, window: &Window) -> HarnessResult<String> {
        Ok(window.text(&self.title()).await?.trim().to_string())
    }

    /// Click a footer button
    pub async fn click_button(&self, window: &Window, label: &str) -> HarnessResult<()> {
        window.click(&self.button(label)).await
    }

    /// Dismiss through the close button and wait for the modal to go away
    pub async fn close(&self, window: &Window) -> HarnessResult<MatchResult> {
        window.click(&self.child(".modal-close")).await?;
        window.expect(self.root()).to_be_absent().await
    }
}

impl Component for Modal {
    fn root(&self) -> Locator {
        self.root.clone()
    }
}

/// CSS parts of a dropdown, relative to its root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropdownParts {
    /// Header that opens the list and carries the selected `data-value`
    pub header: String,
    /// List container
    pub body: String,
    /// One option row, carrying `data-value` and `data-name`
    pub row: String,
}

impl Default for DropdownParts {
    fn default() -> Self {
        Self {
            header: ".select-kit-header".to_string(),
            body: ".select-kit-body".to_string(),
            row: ".select-kit-row".to_string(),
        }
    }
}

/// A select-style dropdown
#[derive(Debug, Clone)]
pub struct Dropdown {
    root: Locator,
    parts: DropdownParts,
}

impl Dropdown {
    /// Dropdown rooted at `root` with the default parts
    #[must_use]
    pub fn new(root: impl Into<Locator>) -> Self {
        Self {
            root: root.into(),
            parts: DropdownParts::default(),
        }
    }

    /// Use different part selectors
    #[must_use]
    pub fn with_parts(mut self, parts: DropdownParts) -> Self {
        self.parts = parts;
        self
    }

    /// Header element
    #[must_use]
    pub fn header(&self) -> Locator {
        self.child(&self.parts.header)
    }

    /// Row with the given value
    #[must_use]
    pub fn row_by_value(&self, value: &str) -> Locator {
        self.content()
            .child(Selector::css(format!("{}[data-value=\"{value}\"]", self.parts.row)))
    }

    /// Row with the given display name
    #[must_use]
    pub fn row_by_name(&self, name: &str) -> Locator {
        self.content()
            .child(Selector::css(format!("{}[data-name=\"{name}\"]", self.parts.row)))
    }

    /// Every row of the open list
    #[must_use]
    pub fn rows(&self) -> Locator {
        self.content().child(Selector::css(self.parts.row.clone()))
    }

    /// Expand, pick the row with `value`, and wait for the list to close
    pub async fn select_row_by_value(&self, window: &Window, value: &str) -> HarnessResult<()> {
        self.expand(window).await?;
        window.click(&self.row_by_value(value)).await?;
        self.collapse(window).await?;
        Ok(())
    }

    /// Expand, pick the row named `name`, and wait for the list to close
    pub async fn select_row_by_name(&self, window: &Window, name: &str) -> HarnessResult<()> {
        self.expand(window).await?;
        window.click(&self.row_by_name(name)).await?;
        self.collapse(window).await?;
        Ok(())
    }

    /// Currently selected value, from the header's `data-value`
    pub async fn value(&self, window: &Window) -> HarnessResult<Option<String>> {
        window.attribute(&self.header(), "data-value").await
    }

    /// Currently selected name, from the header's `data-name`
    pub async fn selected_name(&self, window: &Window) -> HarnessResult<Option<String>> {
        window.attribute(&self.header(), "data-name").await
    }
}

impl Component for Dropdown {
    fn root(&self) -> Locator {
        self.root.clone()
    }
}

impl Expandable for Dropdown {
    fn trigger(&self) -> Locator {
        self.header()
    }

    fn content(&self) -> Locator {
        self.child(&self.parts.body)
    }
}

/// Toast notifications
#[derive(Debug, Clone)]
pub struct Toasts {
    root: Locator,
}

impl Default for Toasts {
    fn default() -> Self {
        Self::new(".toasts")
    }
}

impl Toasts {
    /// Toast container at `root`
    #[must_use]
    pub fn new(root: impl Into<Locator>) -> Self {
        Self { root: root.into() }
    }

    /// Toast containing `message`
    #[must_use]
    pub fn toast(&self, message: &str) -> Locator {
        self.child(".toast").with_text(message).first()
    }

    /// Whether a toast with `message` shows up within the probe window
    pub async fn has_message(&self, window: &Window, message: &str) -> HarnessResult<bool> {
        window.exists(&self.toast(message)).await
    }

    /// Wait for a toast with `message`
    pub async fn expect_message(&self, window: &Window, message: &str) -> HarnessResult<MatchResult> {
        window.expect(self.toast(message)).to_be_visible().await
    }

    /// Close the toast with `message` and wait for it to disappear
    pub async fn dismiss(&self, window: &Window, message: &str) -> HarnessResult<MatchResult> {
        let toast = self.toast(message);
        window.click(&toast.child(".toast-close")).await?;
        window.expect(toast).to_be_absent().await
    }
}

impl Component for Toasts {
    fn root(&self) -> Locator {
        self.root.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row {
        index: usize,
    }

    impl Component for Row {
        fn root(&self) -> Locator {
            Locator::new("tr.user-row").nth(self.index)
        }
    }

    mod composition_tests {
        use super::*;

        #[test]
        fn test_children_scoped_to_root() {
            let first = Row { index: 0 };
            let second = Row { index: 1 };
            let a = first.child(".username");
            let b = second.child(".username");
            assert_ne!(a, b);
            assert_eq!(a.to_string(), "css `tr.user-row` [nth=0] >> css `.username`");
        }

        #[test]
        fn test_nested_component_uses_parent_root() {
            let row = Row { index: 2 };
            let dropdown = Dropdown::new(row.child(".user-actions"));
            let header = dropdown.header();
            assert_eq!(
                header.to_string(),
                "css `tr.user-row` [nth=2] >> css `.user-actions` >> css `.select-kit-header`"
            );
        }

        #[test]
        fn test_component_name_defaults_to_type() {
            assert!(Row { index: 0 }.component_name().ends_with("Row"));
        }
    }

    mod builtin_tests {
        use super::*;

        #[test]
        fn test_dropdown_rows() {
            let dropdown = Dropdown::new("#category-chooser");
            assert_eq!(
                dropdown.row_by_value("4").selector(),
                &Selector::css(".select-kit-row[data-value=\"4\"]")
            );
            assert_eq!(dropdown.trigger(), dropdown.header());
            assert_eq!(
                dropdown.content().to_string(),
                "css `#category-chooser` >> css `.select-kit-body`"
            );
        }

        #[test]
        fn test_custom_parts() {
            let dropdown = Dropdown::new(".picker").with_parts(DropdownParts {
                header: "summary".into(),
                body: "ul".into(),
                row: "li".into(),
            });
            assert_eq!(dropdown.rows().selector(), &Selector::css("li"));
        }

        #[test]
        fn test_modal_button() {
            let modal = Modal::default();
            assert_eq!(
                modal.button("Save").selector(),
                &Selector::CssWithText {
                    css: ".modal-footer button".into(),
                    text: "Save".into()
                }
            );
        }

        #[test]
        fn test_toast_picks_first() {
            let toast = Toasts::default().toast("Saved");
            assert!(!toast.is_strict());
        }
    }
}
