//! Session-scoped cookie storage.
//!
//! The store is a plain insertion-ordered collection: `set` appends without
//! de-duplication, and consumers that need "latest wins" filter on read.
//! Presence checks ("does any cookie named X exist") are the only queries
//! the login and form pipelines rely on. A [`SessionJar`] wraps the store
//! for use as a reqwest cookie provider; one jar lives exactly as long as
//! one login+submit cycle.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderValue;
use reqwest::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Host suffix the cookie applies to. Empty until [`CookieStore::set`]
    /// scopes it to the issuing request's host.
    pub domain: String,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
}

impl Cookie {
    pub fn named(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: "/".to_string(),
            expires: None,
            secure: false,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }
}

/// Parse one `Set-Cookie` header value.
///
/// Only the attributes the engine cares about are kept; unknown attributes
/// are ignored and unparseable headers yield `None` rather than an error.
pub fn parse_set_cookie(raw: &str) -> Option<Cookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut cookie = Cookie::named(name, value.trim());
    for attr in parts {
        let attr = attr.trim();
        let (key, val) = match attr.split_once('=') {
            Some((key, val)) => (key.trim(), val.trim()),
            None => (attr, ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" => cookie.domain = val.trim_start_matches('.').to_string(),
            "path" if !val.is_empty() => cookie.path = val.to_string(),
            "expires" => {
                cookie.expires = DateTime::parse_from_rfc2822(val)
                    .ok()
                    .map(|at| at.with_timezone(&Utc));
            }
            "max-age" => {
                if let Ok(seconds) = val.parse::<i64>() {
                    cookie.expires = Some(Utc::now() + chrono::Duration::seconds(seconds));
                }
            }
            "secure" => cookie.secure = true,
            _ => {}
        }
    }
    Some(cookie)
}

#[derive(Debug, Default)]
pub struct CookieStore {
    cookies: Vec<Cookie>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append cookies issued by a response to `url`. A cookie without an
    /// explicit domain is scoped to the issuing host before storage.
    pub fn set(&mut self, url: &Url, cookies: impl IntoIterator<Item = Cookie>) {
        let host = url.host_str().unwrap_or_default();
        for mut cookie in cookies {
            if cookie.domain.is_empty() {
                cookie.domain = host.to_string();
            }
            self.cookies.push(cookie);
        }
    }

    /// All cookies whose domain is a suffix of the request's host, in
    /// insertion order. A cookie scoped to a parent domain applies to its
    /// subdomains; the reverse does not hold.
    pub fn cookies_for(&self, url: &Url) -> Vec<&Cookie> {
        let host = url.host_str().unwrap_or_default();
        self.cookies
            .iter()
            .filter(|cookie| host.ends_with(cookie.domain.as_str()))
            .collect()
    }

    /// All cookies with an exact name match, across domains.
    pub fn by_name(&self, name: &str) -> Vec<&Cookie> {
        self.cookies
            .iter()
            .filter(|cookie| cookie.name == name)
            .collect()
    }

    /// Render the matching cookies as a `Cookie` request header value.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let matched = self.cookies_for(url);
        if matched.is_empty() {
            return None;
        }
        Some(
            matched
                .iter()
                .map(|cookie| format!("{}={}", cookie.name, cookie.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// [`CookieStore`] behind a lock, pluggable into reqwest as the jar shared
/// by the redirecting and non-redirecting clients of one cycle.
#[derive(Debug, Default)]
pub struct SessionJar {
    store: RwLock<CookieStore>,
}

impl SessionJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_name(&self, name: &str) -> Vec<Cookie> {
        let store = self.store.read().unwrap_or_else(|err| err.into_inner());
        store.by_name(name).into_iter().cloned().collect()
    }

    pub fn cookies_for(&self, url: &Url) -> Vec<Cookie> {
        let store = self.store.read().unwrap_or_else(|err| err.into_inner());
        store.cookies_for(url).into_iter().cloned().collect()
    }
}

impl reqwest::cookie::CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let parsed: Vec<Cookie> = cookie_headers
            .filter_map(|header| header.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();
        if parsed.is_empty() {
            return;
        }
        let mut store = self.store.write().unwrap_or_else(|err| err.into_inner());
        store.set(url, parsed);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let store = self.store.read().unwrap_or_else(|err| err.into_inner());
        store
            .header_for(url)
            .and_then(|header| HeaderValue::from_str(&header).ok())
    }
}
