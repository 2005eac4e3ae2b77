//! Cookie folding between redirect attempts.
//!
//! Only name and value matter here: attributes such as `Path` or `Expires`
//! are the business of a full cookie store, which the host can plug in
//! through its own headers.

use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use tracing::trace;

/// Cookies collected across one logical request, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieSet {
    cookies: Vec<(String, String)>,
}

impl CookieSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, keeping the position of an earlier value.
    pub fn insert(&mut self, name: &str, value: &str) {
        match self.cookies.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, existing)) => value.clone_into(existing),
            None => self.cookies.push((name.to_owned(), value.to_owned())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.iter().find(|(existing, _)| existing == name).map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Folds every `Set-Cookie` of a response in; a later occurrence of a name wins.
    pub fn absorb_set_cookies(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            if let Some((name, value)) = parse_pair(value.split(';').next().unwrap_or_default()) {
                trace!(name, "cookie set by redirect response");
                self.insert(name, value);
            }
        }
    }

    /// Folds the pairs of a `Cookie` request header in.
    pub fn absorb_cookie_header(&mut self, headers: &HeaderMap) {
        for value in headers.get_all(COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for (name, value) in value.split(';').filter_map(parse_pair) {
                self.insert(name, value);
            }
        }
    }

    /// Renders the set as one `Cookie` header value.
    pub fn to_header_value(&self) -> Option<HeaderValue> {
        if self.cookies.is_empty() {
            return None;
        }
        let rendered = self.cookies.iter().map(|(name, value)| format!("{name}={value}")).collect::<Vec<_>>().join("; ");
        HeaderValue::try_from(rendered).ok()
    }
}

/// Merges `collected` into the `Cookie` header of `headers`; collected values win.
pub(crate) fn apply_cookies(headers: &mut HeaderMap, collected: &CookieSet) {
    if collected.is_empty() {
        return;
    }
    let mut merged = CookieSet::new();
    merged.absorb_cookie_header(headers);
    for (name, value) in &collected.cookies {
        merged.insert(name, value);
    }
    if let Some(value) = merged.to_header_value() {
        headers.insert(COOKIE, value);
    }
}

fn parse_pair(pair: &str) -> Option<(&str, &str)> {
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then(|| (name, value.trim().trim_matches('"')))
}
