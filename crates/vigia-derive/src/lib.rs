//! Vigia Derive Macros: Declarative Page and Component Objects
//!
//! Page objects are mostly a selector map plus a route. Writing the
//! `PageObject` / `Component` impls by hand repeats the same boilerplate in
//! every file, and a typo in a route parameter only shows up when a scenario
//! runs. These derives generate the impls from attributes and check the
//! selector placeholders against the struct's fields at compile time.
//!
//! # Available Macros
//!
//! - [`PageObject`] - route, ready signal and locator accessors
//! - [`Component`] - root (optionally scoped) and child locator accessors
//!
//! # Example
//!
//! ```ignore
//! use vigia::{Locator, PageObject, Component};
//!
//! #[derive(PageObject)]
//! #[page(path = "/admin/site_settings/category/:category", ready = "#site-settings")]
//! #[locator(save = ".admin-footer .save", setting = ".row.setting[data-setting='{name}']")]
//! struct SiteSettings {
//!     category: String,
//!     name: String,
//! }
//!
//! #[derive(Component)]
//! #[component(root = ".user-card")]
//! #[locator(username = ".username", bio = ".bio")]
//! struct UserCard {
//!     #[scope]
//!     scope: Locator,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Ident, LitInt, LitStr};

/// Derive `vigia::PageObject`.
///
/// # Attributes
///
/// - `#[page(path = "/users/:username", ready = ".user-main")]` - required
/// - `#[page(name = "...")]` - page name in logs (defaults to the type name)
/// - `#[page(load_timeout_ms = 10000)]` - ready-signal timeout override
/// - `#[locator(name = "selector", ...)]` - one `fn name(&self) -> Locator`
///   per entry
///
/// Every `:param` in the path and every `{field}` in a selector must name a
/// field of the struct; the field's `Display` value is substituted.
#[proc_macro_derive(PageObject, attributes(page, locator))]
pub fn derive_page_object(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_page_object(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Derive `vigia::Component`.
///
/// # Attributes
///
/// - `#[component(root = ".selector")]` - required
/// - `#[component(name = "...")]` - component name (defaults to the type name)
/// - `#[locator(name = "selector", ...)]` - child accessors resolved under the root
/// - `#[scope]` on a `Locator` field - the root is resolved inside it
#[proc_macro_derive(Component, attributes(component, locator, scope))]
pub fn derive_component(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_component(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

// ============================================================================
// PageObject
// ============================================================================

#[derive(Default)]
struct PageArgs {
    path: Option<LitStr>,
    ready: Option<LitStr>,
    name: Option<LitStr>,
    load_timeout_ms: Option<LitInt>,
}

fn parse_page_args(attrs: &[Attribute]) -> syn::Result<PageArgs> {
    let mut args = PageArgs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("page")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("path") {
                args.path = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("ready") {
                args.ready = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("name") {
                args.name = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("load_timeout_ms") {
                args.load_timeout_ms = Some(meta.value()?.parse()?);
            } else {
                return Err(meta.error("expected `path`, `ready`, `name` or `load_timeout_ms`"));
            }
            Ok(())
        })?;
    }
    Ok(args)
}

fn expand_page_object(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let fields = field_names(input)?;
    let args = parse_page_args(&input.attrs)?;

    let path = args.path.ok_or_else(|| {
        syn::Error::new_spanned(ident, "missing #[page(path = \"...\")]")
    })?;
    let ready = args.ready.ok_or_else(|| {
        syn::Error::new_spanned(ident, "missing #[page(ready = \"...\")]")
    })?;

    let params = route_params(&path.value());
    for param in &params {
        check_field(&fields, param, &path)?;
    }
    let param_inserts = params.iter().map(|p| {
        let field = format_ident!("{}", p);
        quote! {
            params.insert(#p.to_string(), self.#field.to_string());
        }
    });

    let ready_expr = selector_expr(&ready, &fields)?;
    let page_name = args
        .name
        .map_or_else(|| ident.to_string(), |n| n.value());
    let load_timeout = args.load_timeout_ms.map(|ms| {
        quote! {
            fn load_timeout(&self) -> ::std::option::Option<::std::time::Duration> {
                ::std::option::Option::Some(::std::time::Duration::from_millis(#ms))
            }
        }
    });
    let accessors = locator_accessors(&input.attrs, &fields, |expr| {
        quote! { ::vigia::Locator::new(&#expr) }
    })?;

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::vigia::PageObject for #ident #ty_generics #where_clause {
            fn route(&self) -> &str {
                #path
            }

            fn params(&self) -> ::std::collections::HashMap<::std::string::String, ::std::string::String> {
                #[allow(unused_mut)]
                let mut params = ::std::collections::HashMap::new();
                #(#param_inserts)*
                params
            }

            fn ready(&self) -> ::vigia::Locator {
                ::vigia::Locator::new(&#ready_expr)
            }

            fn page_name(&self) -> &str {
                #page_name
            }

            #load_timeout
        }

        impl #impl_generics #ident #ty_generics #where_clause {
            #(#accessors)*
        }
    })
}

// ============================================================================
// Component
// ============================================================================

#[derive(Default)]
struct ComponentArgs {
    root: Option<LitStr>,
    name: Option<LitStr>,
}

fn parse_component_args(attrs: &[Attribute]) -> syn::Result<ComponentArgs> {
    let mut args = ComponentArgs::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("component")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("root") {
                args.root = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("name") {
                args.name = Some(meta.value()?.parse()?);
            } else {
                return Err(meta.error("expected `root` or `name`"));
            }
            Ok(())
        })?;
    }
    Ok(args)
}

fn scope_field(input: &DeriveInput) -> syn::Result<Option<Ident>> {
    let Data::Struct(data) = &input.data else {
        return Ok(None);
    };
    let mut found = None;
    for field in &data.fields {
        if field.attrs.iter().any(|a| a.path().is_ident("scope")) {
            let Some(ident) = &field.ident else {
                return Err(syn::Error::new_spanned(field, "#[scope] needs a named field"));
            };
            if found.is_some() {
                return Err(syn::Error::new_spanned(field, "only one #[scope] field is allowed"));
            }
            found = Some(ident.clone());
        }
    }
    Ok(found)
}

fn expand_component(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let fields = field_names(input)?;
    let args = parse_component_args(&input.attrs)?;
    let root = args.root.ok_or_else(|| {
        syn::Error::new_spanned(ident, "missing #[component(root = \"...\")]")
    })?;
    let root_expr = selector_expr(&root, &fields)?;
    let root_body = match scope_field(input)? {
        Some(scope) => quote! { ::vigia::Locator::new(&#root_expr).within(&self.#scope) },
        None => quote! { ::vigia::Locator::new(&#root_expr) },
    };
    let component_name = args
        .name
        .map_or_else(|| ident.to_string(), |n| n.value());
    let accessors = locator_accessors(&input.attrs, &fields, |expr| {
        quote! { ::vigia::Component::child(self, &#expr) }
    })?;

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics ::vigia::Component for #ident #ty_generics #where_clause {
            fn root(&self) -> ::vigia::Locator {
                #root_body
            }

            fn component_name(&self) -> &str {
                #component_name
            }
        }

        impl #impl_generics #ident #ty_generics #where_clause {
            #(#accessors)*
        }
    })
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Named fields of the struct; unit structs have none
fn field_names(input: &DeriveInput) -> syn::Result<Vec<String>> {
    match &input.data {
        Data::Struct(data) => Ok(match &data.fields {
            Fields::Named(named) => named
                .named
                .iter()
                .filter_map(|f| f.ident.as_ref().map(ToString::to_string))
                .collect(),
            Fields::Unnamed(_) | Fields::Unit => Vec::new(),
        }),
        _ => Err(syn::Error::new_spanned(
            &input.ident,
            "page objects and components must be structs",
        )),
    }
}

fn check_field(fields: &[String], name: &str, lit: &LitStr) -> syn::Result<()> {
    if fields.iter().any(|f| f == name) {
        Ok(())
    } else {
        Err(syn::Error::new(
            lit.span(),
            format!("`{name}` is not a field of this struct"),
        ))
    }
}

/// `:param` names of a route template
fn route_params(path: &str) -> Vec<String> {
    path.split('/')
        .filter_map(|seg| seg.strip_prefix(':'))
        .filter(|p| !p.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// `{field}` placeholders of a selector, in order of first use.
///
/// `{{` and `}}` are literal braces, anything else inside braces is an error.
fn placeholders(selector: &str) -> Result<Vec<String>, String> {
    let mut found: Vec<String> = Vec::new();
    let mut chars = selector.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) if ch == '_' || ch.is_ascii_alphanumeric() => name.push(ch),
                        Some(ch) => return Err(format!("unexpected `{ch}` in placeholder")),
                        None => return Err("unclosed `{` in selector".to_string()),
                    }
                }
                if name.is_empty() || name.starts_with(|ch: char| ch.is_ascii_digit()) {
                    return Err(format!("`{{{name}}}` is not a field placeholder"));
                }
                if !found.contains(&name) {
                    found.push(name);
                }
            }
            '}' => return Err("unmatched `}` in selector".to_string()),
            _ => {}
        }
    }
    Ok(found)
}

/// Expression producing the selector string with fields substituted
fn selector_expr(lit: &LitStr, fields: &[String]) -> syn::Result<TokenStream2> {
    let value = lit.value();
    let names = placeholders(&value).map_err(|m| syn::Error::new(lit.span(), m))?;
    for name in &names {
        check_field(fields, name, lit)?;
    }
    if !value.contains(['{', '}']) {
        return Ok(quote! { #lit });
    }
    let args = names.iter().map(|n| {
        let field = Ident::new(n, Span::call_site());
        quote! { #field = self.#field }
    });
    Ok(quote! { ::std::format!(#lit, #(#args),*) })
}

/// One accessor per `name = "selector"` entry of every `#[locator(...)]`
fn locator_accessors(
    attrs: &[Attribute],
    fields: &[String],
    build: impl Fn(&TokenStream2) -> TokenStream2,
) -> syn::Result<Vec<TokenStream2>> {
    let mut out = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for attr in attrs.iter().filter(|a| a.path().is_ident("locator")) {
        attr.parse_nested_meta(|meta| {
            let name = meta
                .path
                .get_ident()
                .cloned()
                .ok_or_else(|| meta.error("expected `name = \"selector\"`"))?;
            if seen.contains(&name.to_string()) {
                return Err(meta.error(format!("duplicate locator `{name}`")));
            }
            seen.push(name.to_string());
            let lit: LitStr = meta.value()?.parse()?;
            let expr = selector_expr(&lit, fields)?;
            let body = build(&expr);
            let doc = format!("Locator for `{}`", lit.value());
            out.push(quote! {
                #[doc = #doc]
                #[must_use]
                pub fn #name(&self) -> ::vigia::Locator {
                    #body
                }
            });
            Ok(())
        })?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_params() {
        assert_eq!(
            route_params("/admin/site_settings/category/:category"),
            vec!["category"]
        );
        assert_eq!(route_params("/u/:username/activity/:filter"), vec!["username", "filter"]);
        assert!(route_params("/latest").is_empty());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders(".row[data-setting='{name}'] .{kind}").unwrap(),
            vec!["name", "kind"]
        );
        assert_eq!(placeholders("#a-{id}-{id}").unwrap(), vec!["id"]);
        assert!(placeholders(".plain").unwrap().is_empty());
        assert!(placeholders("{{literal}}").unwrap().is_empty());
        assert!(placeholders("{not closed").is_err());
        assert!(placeholders("{a b}").is_err());
        assert!(placeholders("{0}").is_err());
        assert!(placeholders("a}").is_err());
    }

    #[test]
    fn test_page_object_rejects_unknown_param() {
        let input: DeriveInput = syn::parse_quote! {
            #[page(path = "/u/:username", ready = ".user-main")]
            struct UserPage { name: String }
        };
        let err = expand_page_object(&input).unwrap_err();
        assert!(err.to_string().contains("`username` is not a field"));
    }

    #[test]
    fn test_page_object_rejects_unknown_placeholder() {
        let input: DeriveInput = syn::parse_quote! {
            #[page(path = "/t/:id", ready = ".topic")]
            #[locator(post = ".post[data-post-number='{number}']")]
            struct TopicPage { id: u64 }
        };
        assert!(expand_page_object(&input).is_err());
    }

    #[test]
    fn test_page_object_expands() {
        let input: DeriveInput = syn::parse_quote! {
            #[page(path = "/t/:id", ready = "#topic-{id}", load_timeout_ms = 9000)]
            #[locator(reply = ".reply", post = ".post[data-id='{id}']")]
            struct TopicPage { id: u64 }
        };
        let tokens = expand_page_object(&input).unwrap().to_string();
        assert!(tokens.contains("fn reply"));
        assert!(tokens.contains("fn post"));
        assert!(tokens.contains("load_timeout"));
    }

    #[test]
    fn test_component_requires_root() {
        let input: DeriveInput = syn::parse_quote! {
            #[locator(title = ".title")]
            struct Card;
        };
        assert!(expand_component(&input).is_err());
    }

    #[test]
    fn test_component_with_scope() {
        let input: DeriveInput = syn::parse_quote! {
            #[component(root = ".user-card")]
            struct UserCard { #[scope] scope: Locator }
        };
        let tokens = expand_component(&input).unwrap().to_string();
        assert!(tokens.contains("within"));
    }

    #[test]
    fn test_duplicate_locator_rejected() {
        let input: DeriveInput = syn::parse_quote! {
            #[component(root = ".card")]
            #[locator(title = ".a", title = ".b")]
            struct Card;
        };
        assert!(expand_component(&input).is_err());
    }
}
