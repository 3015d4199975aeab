//! Browser automation seam.
//!
//! Everything above this module talks to the browser through [`BrowserDriver`].
//! Two backends ship with the crate:
//!
//! - [`FakeBrowser`](fake::FakeBrowser): in-memory DOM for unit and scenario tests
//! - `CdpDriver` (feature `browser`): Chromium over the DevTools protocol
//!
//! Element handles are plain ids. A backend reports a handle whose node left
//! the document as [`HarnessError::StaleReference`](crate::HarnessError), which
//! callers retry by re-resolving the locator.

pub mod css;
pub mod fake;

#[cfg(feature = "browser")]
pub mod cdp;

use crate::locator::Selector;
use crate::result::HarnessResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Isolated browser profile: cookies, storage, permissions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub String);

/// One tab inside a context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub String);

/// Registered virtual WebAuthn authenticator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthenticatorId(pub String);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for AuthenticatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a DOM element in one window
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    /// Backend-specific element id
    pub id: String,
    /// Window the element lives in
    pub window: WindowId,
}

impl ElementRef {
    /// Create a new element handle
    #[must_use]
    pub fn new(id: impl Into<String>, window: WindowId) -> Self {
        Self {
            id: id.into(),
            window,
        }
    }
}

/// Snapshot of an element's observable state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    /// Lowercase tag name
    pub tag: String,
    /// Rendered text content
    pub text: String,
    /// Form value, for inputs, textareas and selects
    pub value: Option<String>,
    /// Rendered and not hidden
    pub visible: bool,
    /// Not disabled
    pub enabled: bool,
    /// Attributes
    pub attributes: HashMap<String, String>,
}

impl ElementState {
    /// Attribute value
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Keyboard keys the harness can press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    /// Enter / Return
    Enter,
    /// Escape
    Escape,
    /// Tab
    Tab,
    /// Backspace
    Backspace,
    /// Arrow up
    ArrowUp,
    /// Arrow down
    ArrowDown,
    /// A printable character
    Char(char),
}

impl Key {
    /// DOM `KeyboardEvent.key` value
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Enter => "Enter".into(),
            Self::Escape => "Escape".into(),
            Self::Tab => "Tab".into(),
            Self::Backspace => "Backspace".into(),
            Self::ArrowUp => "ArrowUp".into(),
            Self::ArrowDown => "ArrowDown".into(),
            Self::Char(c) => c.to_string(),
        }
    }

    /// Windows virtual key code, used by CDP key events
    #[must_use]
    pub const fn virtual_key_code(&self) -> i64 {
        match self {
            Self::Enter => 13,
            Self::Escape => 27,
            Self::Tab => 9,
            Self::Backspace => 8,
            Self::ArrowUp => 38,
            Self::ArrowDown => 40,
            Self::Char(c) => c.to_ascii_uppercase() as i64,
        }
    }
}

/// Viewport size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in CSS pixels
    pub width: u32,
    /// Height in CSS pixels
    pub height: u32,
}

impl Viewport {
    /// Create a new viewport
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Screenshot data
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// Raw PNG data
    pub data: Vec<u8>,
    /// Timestamp when screenshot was taken
    pub taken_at: chrono::DateTime<chrono::Utc>,
}

impl Screenshot {
    /// Create a new screenshot
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            taken_at: chrono::Utc::now(),
        }
    }

    /// Size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Browser cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Domain; `None` means the base URL's host
    pub domain: Option<String>,
    /// Path
    pub path: String,
    /// HTTP only flag
    pub http_only: bool,
    /// Secure flag
    pub secure: bool,
}

impl Cookie {
    /// Create a new cookie scoped to `/`
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: "/".to_string(),
            http_only: false,
            secure: false,
        }
    }

    /// Set domain
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set HTTP only
    #[must_use]
    pub const fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }
}

/// Virtual authenticator transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticatorTransport {
    /// Platform authenticator (Touch ID, Windows Hello)
    #[default]
    Internal,
    /// Security key
    Usb,
}

/// Virtual WebAuthn authenticator options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatorOptions {
    /// Transport
    pub transport: AuthenticatorTransport,
    /// Supports resident keys (passkeys)
    pub resident_key: bool,
    /// Performs user verification
    pub user_verification: bool,
}

impl Default for AuthenticatorOptions {
    fn default() -> Self {
        Self {
            transport: AuthenticatorTransport::Internal,
            resident_key: true,
            user_verification: true,
        }
    }
}

/// Abstract browser automation backend
///
/// Implementations must be safe to share behind an `Arc` across every window
/// of a session.
#[async_trait]
pub trait BrowserDriver: Send + Sync + fmt::Debug {
    /// Backend name for logs and reports
    fn name(&self) -> &str;

    /// Create an isolated browser context
    async fn new_context(&self) -> HarnessResult<ContextId>;

    /// Dispose a context and all its windows
    async fn close_context(&self, context: &ContextId) -> HarnessResult<()>;

    /// Open a window in a context
    async fn new_window(&self, context: &ContextId) -> HarnessResult<WindowId>;

    /// Close a window
    async fn close_window(&self, window: &WindowId) -> HarnessResult<()>;

    /// Bring a window to the front
    async fn activate_window(&self, window: &WindowId) -> HarnessResult<()>;

    /// Navigate a window to an absolute URL
    async fn navigate(&self, window: &WindowId, url: &str) -> HarnessResult<()>;

    /// Current URL of a window
    async fn current_url(&self, window: &WindowId) -> HarnessResult<String>;

    /// Elements matching `selector`, optionally under `scope`, in document order
    async fn query(
        &self,
        window: &WindowId,
        selector: &Selector,
        scope: Option<&ElementRef>,
    ) -> HarnessResult<Vec<ElementRef>>;

    /// Observable state of an element
    async fn element_state(&self, element: &ElementRef) -> HarnessResult<ElementState>;

    /// Click an element
    async fn click(&self, element: &ElementRef) -> HarnessResult<()>;

    /// Type into an element, optionally clearing it first
    async fn type_text(&self, element: &ElementRef, text: &str, clear: bool) -> HarnessResult<()>;

    /// Choose an option of a `<select>` by value or label
    async fn select_option(&self, element: &ElementRef, value: &str) -> HarnessResult<()>;

    /// Press a key in the focused element
    async fn press_key(&self, window: &WindowId, key: Key) -> HarnessResult<()>;

    /// Evaluate JavaScript and return its JSON value
    async fn evaluate(&self, window: &WindowId, script: &str) -> HarnessResult<serde_json::Value>;

    /// Resize the viewport
    async fn set_viewport(&self, window: &WindowId, viewport: Viewport) -> HarnessResult<()>;

    /// Capture a PNG screenshot
    async fn screenshot(&self, window: &WindowId) -> HarnessResult<Screenshot>;

    /// Add a cookie to a context
    async fn set_cookie(&self, context: &ContextId, cookie: Cookie) -> HarnessResult<()>;

    /// Cookies of a context
    async fn cookies(&self, context: &ContextId) -> HarnessResult<Vec<Cookie>>;

    /// Clear cookies and web storage of a context
    async fn clear_storage(&self, context: &ContextId) -> HarnessResult<()>;

    /// Grant clipboard read/write to a context
    async fn grant_clipboard(&self, context: &ContextId) -> HarnessResult<()>;

    /// Revoke every granted permission of a context
    async fn revoke_permissions(&self, context: &ContextId) -> HarnessResult<()>;

    /// Read the clipboard as seen from a window
    async fn read_clipboard(&self, window: &WindowId) -> HarnessResult<String>;

    /// Write the clipboard from a window
    async fn write_clipboard(&self, window: &WindowId, text: &str) -> HarnessResult<()>;

    /// Register a virtual authenticator
    async fn add_virtual_authenticator(
        &self,
        window: &WindowId,
        options: AuthenticatorOptions,
    ) -> HarnessResult<AuthenticatorId>;

    /// Remove a virtual authenticator
    async fn remove_virtual_authenticator(
        &self,
        window: &WindowId,
        authenticator: &AuthenticatorId,
    ) -> HarnessResult<()>;
}
