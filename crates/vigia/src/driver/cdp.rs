//! Chromium backend over the DevTools protocol (chromiumoxide).
//!
//! Browser contexts map to CDP browser contexts and windows to page targets.
//! Element handles live in a per-document registry injected into the page
//! (`window.__vigia`); a navigation replaces the registry, so handles from an
//! earlier document come back as `StaleReference`.

#![allow(clippy::wildcard_imports)]

use super::*;
use crate::config::BrowserSettings;
use crate::result::HarnessError;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    BrowserContextId, GrantPermissionsParams, PermissionType, ResetPermissionsParams,
};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::{
    BringToFrontParams, CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::cdp::browser_protocol::storage::{
    ClearCookiesParams, GetCookiesParams, SetCookiesParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::browser_protocol::web_authn::{
    AddVirtualAuthenticatorParams, AuthenticatorId as CdpAuthenticatorId, AuthenticatorProtocol,
    AuthenticatorTransport as CdpTransport, EnableParams as WebAuthnEnableParams,
    RemoveVirtualAuthenticatorParams, VirtualAuthenticatorOptions,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Element registry installed on demand in every document
const BOOTSTRAP: &str = r"
if (!window.__vigia) {
  const doc = Math.random().toString(36).slice(2, 10);
  const els = new Map();
  let next = 0;
  const implicitRole = (el) => {
    const tag = el.tagName.toLowerCase();
    const type = (el.getAttribute('type') || 'text').toLowerCase();
    if (tag === 'button' || (tag === 'input' && (type === 'submit' || type === 'button'))) return 'button';
    if (tag === 'a' && el.hasAttribute('href')) return 'link';
    if (tag === 'input' && type === 'checkbox') return 'checkbox';
    if (tag === 'input' && type === 'radio') return 'radio';
    if (tag === 'input' || tag === 'textarea') return 'textbox';
    if (tag === 'select') return 'combobox';
    if (/^h[1-6]$/.test(tag)) return 'heading';
    const plain = { ul: 'list', ol: 'list', li: 'listitem', dialog: 'dialog', nav: 'navigation',
      main: 'main', table: 'table', img: 'img', form: 'form' };
    return plain[tag] || '';
  };
  window.__vigia = {
    track(list) {
      return list.map((el) => {
        if (!el.__vigiaId) { el.__vigiaId = doc + '-' + (++next); }
        els.set(el.__vigiaId, el);
        return el.__vigiaId;
      });
    },
    get(id) {
      const el = els.get(id);
      return el && el.isConnected ? el : null;
    },
    role(el) { return el.getAttribute('role') || implicitRole(el); },
    accessibleName(el) { return (el.getAttribute('aria-label') || el.textContent || '').trim(); },
    visible(el) {
      const style = getComputedStyle(el);
      const rect = el.getBoundingClientRect();
      return style.visibility !== 'hidden' && style.display !== 'none' && (rect.width > 0 || rect.height > 0);
    },
  };
}
const v = window.__vigia;
";

fn wrap(body: &str) -> String {
    format!("(async () => {{\n{BOOTSTRAP}\n{body}\n}})()")
}

fn js(s: &str) -> String {
    Value::from(s).to_string()
}

fn with_element(element: &ElementRef, body: &str) -> String {
    wrap(&format!(
        "const el = v.get({id});\nif (!el) return {{ stale: true }};\n{body}",
        id = js(&element.id)
    ))
}

fn query_script(selector: &Selector, scope: Option<&ElementRef>) -> String {
    let root = match scope {
        Some(s) => format!("v.get({})", js(&s.id)),
        None => "document".to_string(),
    };
    wrap(&format!(
        "const root = {root};\nif (!root) return {{ stale: true }};\nreturn {{ ok: v.track({}) }};",
        selector.to_query_all("root")
    ))
}

const STATE_BODY: &str = r"
const attributes = {};
for (const a of el.attributes) attributes[a.name] = a.value;
const value = typeof el.value === 'string' ? el.value : null;
return { ok: {
  tag: el.tagName.toLowerCase(),
  text: el.innerText ?? el.textContent ?? '',
  value,
  visible: v.visible(el),
  enabled: !el.disabled,
  attributes,
} };
";

const CLICK_BODY: &str = r"
if (!v.visible(el)) return { blocked: 'element is not visible' };
if (el.disabled) return { blocked: 'element is disabled' };
el.scrollIntoView({ block: 'center', inline: 'center' });
const rect = el.getBoundingClientRect();
return { ok: { x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 } };
";

fn focus_body(clear: bool) -> String {
    format!(
        r"
const editable = el.tagName === 'INPUT' || el.tagName === 'TEXTAREA' || el.isContentEditable;
if (!editable) return {{ blocked: 'element is not editable' }};
if (!v.visible(el)) return {{ blocked: 'element is not visible' }};
if (el.disabled || el.readOnly) return {{ blocked: 'element is disabled' }};
el.focus();
if ({clear}) {{
  if (typeof el.value === 'string') el.value = ''; else el.textContent = '';
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
}}
return {{ ok: true }};
"
    )
}

const CHANGED_BODY: &str = r"
el.dispatchEvent(new Event('change', { bubbles: true }));
return { ok: true };
";

fn select_body(value: &str) -> String {
    format!(
        r"
if (el.tagName !== 'SELECT') return {{ blocked: 'element is not a select' }};
const wanted = {wanted};
const option = Array.from(el.options).find((o) => o.value === wanted || o.label === wanted || o.text.trim() === wanted);
if (!option) return {{ blocked: 'no option ' + wanted }};
el.value = option.value;
el.dispatchEvent(new Event('input', {{ bubbles: true }}));
el.dispatchEvent(new Event('change', {{ bubbles: true }}));
return {{ ok: true }};
",
        wanted = js(value)
    )
}

fn unpack(reply: Value, element: Option<&ElementRef>) -> HarnessResult<Value> {
    let id = element.map_or_else(String::new, |e| e.id.clone());
    if reply.get("stale").is_some() {
        return Err(HarnessError::StaleReference { element: id });
    }
    if let Some(reason) = reply.get("blocked").and_then(Value::as_str) {
        return Err(HarnessError::NotInteractable {
            selector: format!("element {id}"),
            reason: reason.to_string(),
        });
    }
    if reply.get("denied").is_some() {
        return Err(HarnessError::PermissionDenied {
            permission: "clipboard".to_string(),
        });
    }
    reply
        .get("ok")
        .cloned()
        .ok_or_else(|| HarnessError::driver(format!("unexpected script reply: {reply}")))
}

fn cdp_err(e: impl std::fmt::Display) -> HarnessError {
    let message = e.to_string();
    if message.contains("closed") || message.contains("ChannelSendError") {
        HarnessError::BrowserClosed { message }
    } else {
        HarnessError::driver(message)
    }
}

#[derive(Debug, Default)]
struct Registry {
    contexts: HashMap<ContextId, BrowserContextId>,
    windows: HashMap<WindowId, (ContextId, Page)>,
}

/// [`BrowserDriver`] over a real Chromium
#[derive(Debug)]
pub struct CdpDriver {
    browser: tokio::sync::Mutex<Browser>,
    handler: tokio::task::JoinHandle<()>,
    registry: Mutex<Registry>,
    settings: BrowserSettings,
    base_url: String,
    next_id: AtomicU64,
}

impl CdpDriver {
    /// Launch Chromium with `settings`; cookies without a domain go to `base_url`
    pub async fn launch(settings: &BrowserSettings, base_url: &str) -> HarnessResult<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(settings.viewport_width, settings.viewport_height);
        if !settings.headless {
            builder = builder.with_head();
        }
        if !settings.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &settings.chromium_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(HarnessError::driver)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(cdp_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        tracing::info!(headless = settings.headless, "chromium launched");

        Ok(Self {
            browser: tokio::sync::Mutex::new(browser),
            handler,
            registry: Mutex::new(Registry::default()),
            settings: settings.clone(),
            base_url: base_url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Close Chromium
    pub async fn shutdown(&self) -> HarnessResult<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(cdp_err)?;
        self.handler.abort();
        Ok(())
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn registry(&self) -> HarnessResult<std::sync::MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| HarnessError::driver("driver registry poisoned"))
    }

    fn page(&self, window: &WindowId) -> HarnessResult<Page> {
        self.registry()?
            .windows
            .get(window)
            .map(|(_, page)| page.clone())
            .ok_or_else(|| HarnessError::driver(format!("unknown window {window}")))
    }

    fn browser_context(&self, context: &ContextId) -> HarnessResult<BrowserContextId> {
        self.registry()?
            .contexts
            .get(context)
            .cloned()
            .ok_or_else(|| HarnessError::driver(format!("unknown context {context}")))
    }

    fn pages_of(&self, context: &ContextId) -> HarnessResult<Vec<Page>> {
        Ok(self
            .registry()?
            .windows
            .values()
            .filter(|(c, _)| c == context)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn run(page: &Page, script: String) -> HarnessResult<Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(HarnessError::driver)?;
        let result = page.evaluate_expression(params).await.map_err(cdp_err)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn on_element(&self, element: &ElementRef, body: &str) -> HarnessResult<Value> {
        let page = self.page(&element.window)?;
        let reply = Self::run(&page, with_element(element, body)).await?;
        unpack(reply, Some(element))
    }

    async fn mouse(page: &Page, kind: DispatchMouseEventType, x: f64, y: f64) -> HarnessResult<()> {
        let params = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(HarnessError::driver)?;
        page.execute(params).await.map_err(cdp_err)?;
        Ok(())
    }
}

impl Drop for CdpDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn new_context(&self) -> HarnessResult<ContextId> {
        let created = {
            let browser = self.browser.lock().await;
            browser
                .execute(CreateBrowserContextParams::default())
                .await
                .map_err(cdp_err)?
        };
        let id = ContextId(self.next("ctx"));
        self.registry()?
            .contexts
            .insert(id.clone(), created.result.browser_context_id.clone());
        tracing::debug!(context = %id, "browser context created");
        Ok(id)
    }

    async fn close_context(&self, context: &ContextId) -> HarnessResult<()> {
        let cdp_id = {
            let mut registry = self.registry()?;
            registry.windows.retain(|_, (c, _)| c != context);
            registry.contexts.remove(context)
        };
        let Some(cdp_id) = cdp_id else {
            return Err(HarnessError::driver(format!("unknown context {context}")));
        };
        let browser = self.browser.lock().await;
        browser
            .execute(DisposeBrowserContextParams::new(cdp_id))
            .await
            .map_err(cdp_err)?;
        Ok(())
    }

    async fn new_window(&self, context: &ContextId) -> HarnessResult<WindowId> {
        let cdp_context = self.browser_context(context)?;
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(cdp_context)
            .build()
            .map_err(HarnessError::driver)?;
        let page = {
            let browser = self.browser.lock().await;
            browser.new_page(params).await.map_err(cdp_err)?
        };
        let id = WindowId(self.next("win"));
        self.registry()?
            .windows
            .insert(id.clone(), (context.clone(), page));
        self.set_viewport(
            &id,
            Viewport::new(self.settings.viewport_width, self.settings.viewport_height),
        )
        .await?;
        Ok(id)
    }

    async fn close_window(&self, window: &WindowId) -> HarnessResult<()> {
        let entry = self.registry()?.windows.remove(window);
        match entry {
            Some((_, page)) => page.close().await.map_err(cdp_err),
            None => Err(HarnessError::driver(format!("unknown window {window}"))),
        }
    }

    async fn activate_window(&self, window: &WindowId) -> HarnessResult<()> {
        let page = self.page(window)?;
        page.execute(BringToFrontParams::default())
            .await
            .map_err(cdp_err)?;
        Ok(())
    }

    async fn navigate(&self, window: &WindowId, url: &str) -> HarnessResult<()> {
        let page = self.page(window)?;
        page.goto(url).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn current_url(&self, window: &WindowId) -> HarnessResult<String> {
        let page = self.page(window)?;
        Ok(page.url().await.map_err(cdp_err)?.unwrap_or_default())
    }

    async fn query(
        &self,
        window: &WindowId,
        selector: &Selector,
        scope: Option<&ElementRef>,
    ) -> HarnessResult<Vec<ElementRef>> {
        let page = self.page(window)?;
        let reply = Self::run(&page, query_script(selector, scope)).await.map_err(|e| {
            match e {
                HarnessError::Driver { message, .. } if message.contains("SyntaxError") => {
                    HarnessError::InvalidSelector {
                        selector: selector.describe(),
                        message,
                    }
                }
                other => other,
            }
        })?;
        let ids: Vec<String> = serde_json::from_value(unpack(reply, scope)?)?;
        Ok(ids
            .into_iter()
            .map(|id| ElementRef::new(id, window.clone()))
            .collect())
    }

    async fn element_state(&self, element: &ElementRef) -> HarnessResult<ElementState> {
        let value = self.on_element(element, STATE_BODY).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn click(&self, element: &ElementRef) -> HarnessResult<()> {
        let point = self.on_element(element, CLICK_BODY).await?;
        let x = point.get("x").and_then(Value::as_f64).unwrap_or_default();
        let y = point.get("y").and_then(Value::as_f64).unwrap_or_default();
        let page = self.page(&element.window)?;
        Self::mouse(&page, DispatchMouseEventType::MousePressed, x, y).await?;
        Self::mouse(&page, DispatchMouseEventType::MouseReleased, x, y).await
    }

    async fn type_text(&self, element: &ElementRef, text: &str, clear: bool) -> HarnessResult<()> {
        self.on_element(element, &focus_body(clear)).await?;
        let page = self.page(&element.window)?;
        page.execute(InsertTextParams::new(text))
            .await
            .map_err(cdp_err)?;
        self.on_element(element, CHANGED_BODY).await?;
        Ok(())
    }

    async fn select_option(&self, element: &ElementRef, value: &str) -> HarnessResult<()> {
        self.on_element(element, &select_body(value)).await?;
        Ok(())
    }

    async fn press_key(&self, window: &WindowId, key: Key) -> HarnessResult<()> {
        let page = self.page(window)?;
        let text = match key {
            Key::Enter => Some("\r".to_string()),
            Key::Char(c) => Some(c.to_string()),
            _ => None,
        };
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut builder = DispatchKeyEventParams::builder()
                .r#type(kind.clone())
                .key(key.key())
                .windows_virtual_key_code(key.virtual_key_code());
            if matches!(kind, DispatchKeyEventType::KeyDown) {
                if let Some(text) = &text {
                    builder = builder.text(text.clone());
                }
            }
            let params = builder.build().map_err(HarnessError::driver)?;
            page.execute(params).await.map_err(cdp_err)?;
        }
        Ok(())
    }

    async fn evaluate(&self, window: &WindowId, script: &str) -> HarnessResult<Value> {
        let page = self.page(window)?;
        Self::run(&page, script.to_string()).await
    }

    async fn set_viewport(&self, window: &WindowId, viewport: Viewport) -> HarnessResult<()> {
        let page = self.page(window)?;
        let params = SetDeviceMetricsOverrideParams::new(
            i64::from(viewport.width),
            i64::from(viewport.height),
            1.0,
            false,
        );
        page.execute(params).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn screenshot(&self, window: &WindowId) -> HarnessResult<Screenshot> {
        let page = self.page(window)?;
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let shot = page.execute(params).await.map_err(cdp_err)?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(&shot.data)
            .map_err(|e| HarnessError::driver(format!("screenshot is not base64: {e}")))?;
        Ok(Screenshot::new(data))
    }

    async fn set_cookie(&self, context: &ContextId, cookie: Cookie) -> HarnessResult<()> {
        let cdp_context = self.browser_context(context)?;
        let mut builder = CookieParam::builder()
            .name(cookie.name)
            .value(cookie.value)
            .path(cookie.path)
            .http_only(cookie.http_only)
            .secure(cookie.secure);
        builder = match cookie.domain {
            Some(domain) => builder.domain(domain),
            None => builder.url(self.base_url.clone()),
        };
        let params = SetCookiesParams::builder()
            .cookie(builder.build().map_err(HarnessError::driver)?)
            .browser_context_id(cdp_context)
            .build()
            .map_err(HarnessError::driver)?;
        let browser = self.browser.lock().await;
        browser.execute(params).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn cookies(&self, context: &ContextId) -> HarnessResult<Vec<Cookie>> {
        let cdp_context = self.browser_context(context)?;
        let params = GetCookiesParams::builder()
            .browser_context_id(cdp_context)
            .build();
        let reply = {
            let browser = self.browser.lock().await;
            browser.execute(params).await.map_err(cdp_err)?
        };
        Ok(reply
            .result
            .cookies
            .iter()
            .map(|c| Cookie {
                name: c.name.clone(),
                value: c.value.clone(),
                domain: Some(c.domain.clone()),
                path: c.path.clone(),
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }

    async fn clear_storage(&self, context: &ContextId) -> HarnessResult<()> {
        let cdp_context = self.browser_context(context)?;
        let params = ClearCookiesParams::builder()
            .browser_context_id(cdp_context)
            .build();
        {
            let browser = self.browser.lock().await;
            browser.execute(params).await.map_err(cdp_err)?;
        }
        for page in self.pages_of(context)? {
            Self::run(
                &page,
                "try { localStorage.clear(); sessionStorage.clear(); } catch (e) {}".to_string(),
            )
            .await?;
        }
        Ok(())
    }

    async fn grant_clipboard(&self, context: &ContextId) -> HarnessResult<()> {
        let cdp_context = self.browser_context(context)?;
        let params = GrantPermissionsParams::builder()
            .permission(PermissionType::ClipboardReadWrite)
            .permission(PermissionType::ClipboardSanitizedWrite)
            .browser_context_id(cdp_context)
            .build()
            .map_err(HarnessError::driver)?;
        let browser = self.browser.lock().await;
        browser.execute(params).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn revoke_permissions(&self, context: &ContextId) -> HarnessResult<()> {
        let cdp_context = self.browser_context(context)?;
        let params = ResetPermissionsParams::builder()
            .browser_context_id(cdp_context)
            .build();
        let browser = self.browser.lock().await;
        browser.execute(params).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn read_clipboard(&self, window: &WindowId) -> HarnessResult<String> {
        let page = self.page(window)?;
        let reply = Self::run(
            &page,
            wrap("try { return { ok: await navigator.clipboard.readText() }; } catch (e) { return { denied: String(e) }; }"),
        )
        .await?;
        Ok(unpack(reply, None)?.as_str().unwrap_or_default().to_string())
    }

    async fn write_clipboard(&self, window: &WindowId, text: &str) -> HarnessResult<()> {
        let page = self.page(window)?;
        let reply = Self::run(
            &page,
            wrap(&format!(
                "try {{ await navigator.clipboard.writeText({}); return {{ ok: true }}; }} catch (e) {{ return {{ denied: String(e) }}; }}",
                js(text)
            )),
        )
        .await?;
        unpack(reply, None).map(|_| ())
    }

    async fn add_virtual_authenticator(
        &self,
        window: &WindowId,
        options: AuthenticatorOptions,
    ) -> HarnessResult<AuthenticatorId> {
        let page = self.page(window)?;
        page.execute(WebAuthnEnableParams::default())
            .await
            .map_err(cdp_err)?;
        let transport = match options.transport {
            AuthenticatorTransport::Internal => CdpTransport::Internal,
            AuthenticatorTransport::Usb => CdpTransport::Usb,
        };
        let cdp_options = VirtualAuthenticatorOptions::builder()
            .protocol(AuthenticatorProtocol::Ctap2)
            .transport(transport)
            .has_resident_key(options.resident_key)
            .has_user_verification(options.user_verification)
            .is_user_verified(options.user_verification)
            .automatic_presence_simulation(true)
            .build()
            .map_err(HarnessError::driver)?;
        let reply = page
            .execute(AddVirtualAuthenticatorParams::new(cdp_options))
            .await
            .map_err(cdp_err)?;
        Ok(AuthenticatorId(reply.result.authenticator_id.inner().clone()))
    }

    async fn remove_virtual_authenticator(
        &self,
        window: &WindowId,
        authenticator: &AuthenticatorId,
    ) -> HarnessResult<()> {
        let page = self.page(window)?;
        page.execute(RemoveVirtualAuthenticatorParams::new(
            CdpAuthenticatorId::new(authenticator.0.clone()),
        ))
        .await
        .map_err(cdp_err)?;
        Ok(())
    }
}
