//! Cookie input normalization and the in-memory cookie jar
//!
//! Cookies arrive either as a header-style string (`a=1; b=2`) or as a list of
//! `{name|key, value}` records exported from a browser. Both normalize into
//! the same canonical list, deduplicated by `name|domain|path` with the first
//! occurrence winning.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::LoginError;
use crate::http::COOKIE_DOMAIN;

/// One exported cookie record. `key` is accepted as an alias for `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    #[serde(alias = "key")]
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl CookieRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }
}

/// Raw cookie input in either supported shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieInput {
    Records(Vec<CookieRecord>),
    Header(String),
}

impl CookieInput {
    /// Interpret a raw string: a JSON array when it looks like one, otherwise
    /// a header string
    pub fn parse(raw: &str) -> Result<Self, LoginError> {
        let trimmed = raw.trim();
        if trimmed.starts_with('[') {
            let records: Vec<CookieRecord> = serde_json::from_str(trimmed)
                .map_err(|e| LoginError::Validation(format!("Invalid cookie JSON: {}", e)))?;
            return Ok(CookieInput::Records(records));
        }
        Ok(CookieInput::Header(trimmed.to_string()))
    }

    /// Canonical, deduplicated cookie list
    pub fn normalize(&self) -> Result<Vec<Cookie>, LoginError> {
        let candidates: Vec<Cookie> = match self {
            CookieInput::Records(records) => records
                .iter()
                .filter(|r| !r.name.trim().is_empty())
                .map(|r| {
                    Cookie::new(r.name.trim(), r.value.trim())
                        .with_domain(r.domain.as_deref())
                        .with_path(r.path.as_deref())
                })
                .collect(),
            CookieInput::Header(header) => header
                .split(';')
                .filter_map(|part| {
                    let (name, value) = part.split_once('=')?;
                    let name = name.trim();
                    (!name.is_empty()).then(|| Cookie::new(name, value.trim()))
                })
                .collect(),
        };

        if candidates.is_empty() {
            return Err(LoginError::Validation(
                "No cookie found. Enter cookie (whether JSON/header string)".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        Ok(candidates
            .into_iter()
            .filter(|c| seen.insert(c.identity()))
            .collect())
    }
}

impl From<&str> for CookieInput {
    fn from(header: &str) -> Self {
        CookieInput::Header(header.to_string())
    }
}

impl From<String> for CookieInput {
    fn from(header: String) -> Self {
        CookieInput::Header(header)
    }
}

impl From<Vec<CookieRecord>> for CookieInput {
    fn from(records: Vec<CookieRecord>) -> Self {
        CookieInput::Records(records)
    }
}

/// A cookie as stored in the jar and reported by `getAppState`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub key: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
    /// Set without a `Domain` attribute: sent to the exact host only
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub host_only: bool,
}

impl Cookie {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            domain: COOKIE_DOMAIN.to_string(),
            path: "/".to_string(),
            expires: None,
            host_only: false,
        }
    }

    /// Set the domain, always in leading-dot form
    pub fn with_domain(mut self, domain: Option<&str>) -> Self {
        if let Some(domain) = domain.map(str::trim).filter(|d| !d.is_empty()) {
            self.domain = if domain.starts_with('.') {
                domain.to_string()
            } else {
                format!(".{}", domain)
            };
            self.host_only = false;
        }
        self
    }

    /// Bind the cookie to exactly `host`
    pub fn with_host(mut self, host: &str) -> Self {
        self.domain = host.trim_start_matches('.').to_ascii_lowercase();
        self.host_only = true;
        self
    }

    pub fn with_path(mut self, path: Option<&str>) -> Self {
        if let Some(path) = path.map(str::trim).filter(|p| p.starts_with('/')) {
            self.path = path.to_string();
        }
        self
    }

    pub fn with_expires(mut self, expires: Option<DateTime<Utc>>) -> Self {
        self.expires = expires;
        self
    }

    /// Dedup identity: `name|domain|path`
    pub fn identity(&self) -> String {
        format!("{}|{}|{}", self.key, self.domain, self.path)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    fn covers(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        if self.host_only {
            return host == domain;
        }
        host == domain || host.ends_with(&format!(".{}", domain))
    }

    fn matches(&self, host: &str, path: &str) -> bool {
        self.covers(host) && path.starts_with(&self.path)
    }

    /// Same name and path, and one of the two is sent wherever the other is
    fn supersedes(&self, other: &Cookie) -> bool {
        self.key == other.key
            && self.path == other.path
            && (self.covers(other.domain.trim_start_matches('.'))
                || other.covers(self.domain.trim_start_matches('.')))
    }
}

/// Parse one `Set-Cookie` header. Without a `Domain` attribute the cookie is
/// host-only for `default_host`. A past expiry (or `Max-Age<=0`) yields an
/// expired cookie, which the jar treats as a deletion.
pub fn parse_set_cookie(header: &str, default_host: &str) -> Option<Cookie> {
    let mut parts = header.split(';');
    let (key, value) = parts.next()?.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let mut cookie = Cookie::new(key, value.trim()).with_host(default_host);
    let mut max_age: Option<i64> = None;

    for attr in parts {
        let (name, val) = attr.split_once('=').unwrap_or((attr, ""));
        let val = val.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "domain" => cookie = cookie.with_domain(Some(val)),
            "path" => cookie = cookie.with_path(Some(val)),
            "expires" => cookie.expires = parse_cookie_date(val),
            "max-age" => max_age = val.parse().ok(),
            _ => {}
        }
    }

    // Max-Age takes precedence over Expires
    if let Some(seconds) = max_age {
        cookie.expires = Some(Utc::now() + ChronoDuration::seconds(seconds));
    }
    Some(cookie)
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%a, %d-%b-%Y %H:%M:%S GMT", "%a, %d %b %Y %H:%M:%S GMT"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Lower-cased host and path of a URL. Unparseable input matches nothing.
fn split_url(url: &str) -> (String, String) {
    match Url::parse(url) {
        Ok(url) => (
            url.host_str().unwrap_or_default().to_ascii_lowercase(),
            url.path().to_string(),
        ),
        Err(_) => (String::new(), "/".to_string()),
    }
}

/// In-memory cookie store shared by the flow, the transport and handlers
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<Vec<Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Cookie>> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a cookie, replacing any stored one with the same name and path
    /// whose domain overlaps it. An already expired cookie only removes.
    pub fn set(&self, cookie: Cookie) {
        let mut cookies = self.lock();
        cookies.retain(|c| !cookie.supersedes(c));
        if !cookie.is_expired(Utc::now()) {
            cookies.push(cookie);
        }
    }

    /// Inject normalized cookies with a one-year expiry
    pub fn inject(&self, cookies: Vec<Cookie>) {
        let expires = Utc::now() + ChronoDuration::days(365);
        let count = cookies.len();
        for cookie in cookies {
            self.set(cookie.with_expires(Some(expires)));
        }
        debug!("Injected {} cookies", count);
    }

    /// First live cookie named `key` under the platform domain
    pub fn get(&self, key: &str) -> Option<Cookie> {
        let now = Utc::now();
        self.lock()
            .iter()
            .find(|c| c.key == key && !c.is_expired(now) && c.domain.ends_with("facebook.com"))
            .cloned()
    }

    /// Live cookies applicable to `url`
    pub fn cookies_for(&self, url: &str) -> Vec<Cookie> {
        let (host, path) = split_url(url);
        let now = Utc::now();
        self.lock()
            .iter()
            .filter(|c| !c.is_expired(now) && c.matches(&host, &path))
            .cloned()
            .collect()
    }

    /// `Cookie` header value for `url`
    pub fn header_for(&self, url: &str) -> Option<String> {
        let cookies = self.cookies_for(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.key, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Persist `Set-Cookie` headers received from `url`
    pub fn store_set_cookies<'a, I>(&self, headers: I, url: &str) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let (host, _) = split_url(url);
        let mut stored = 0;
        for header in headers {
            if let Some(cookie) = parse_set_cookie(header, &host) {
                self.set(cookie);
                stored += 1;
            }
        }
        if stored > 0 {
            debug!("Persisted {} cookies from {}", stored, host);
        }
        stored
    }

    /// Deduplicated live cookies for the platform domains
    pub fn snapshot(&self) -> Vec<Cookie> {
        let mut cookies = self.cookies_for("https://www.facebook.com/");
        cookies.extend(self.cookies_for("https://www.messenger.com/"));

        let mut seen = HashSet::new();
        cookies.retain(|c| seen.insert(c.identity()));
        cookies
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_records_normalize_identically() {
        let header = CookieInput::from("c_user=100000000000001; xs=abc%3Adef; fr=0x");
        let records = CookieInput::Records(vec![
            CookieRecord::new("c_user", "100000000000001"),
            CookieRecord::new("xs", "abc%3Adef"),
            CookieRecord::new("fr", "0x"),
        ]);

        assert_eq!(header.normalize().unwrap(), records.normalize().unwrap());
    }

    #[test]
    fn test_first_occurrence_wins() {
        let input = CookieInput::from("c_user=1; c_user=2; xs=a");
        let cookies = input.normalize().unwrap();

        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].key, "c_user");
        assert_eq!(cookies[0].value, "1");
    }

    #[test]
    fn test_parse_accepts_key_alias() {
        let input =
            CookieInput::parse(r#"[{"key":"c_user","value":"7","domain":"facebook.com"}]"#).unwrap();
        let cookies = input.normalize().unwrap();
        assert_eq!(cookies[0].key, "c_user");
        assert_eq!(cookies[0].domain, ".facebook.com");
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(matches!(
            CookieInput::from("   ").normalize(),
            Err(LoginError::Validation(_))
        ));
        assert!(CookieInput::Records(Vec::new()).normalize().is_err());
    }

    #[test]
    fn test_jar_header_for_platform_urls() {
        let jar = CookieJar::new();
        jar.inject(CookieInput::from("c_user=1; xs=2").normalize().unwrap());

        assert_eq!(
            jar.header_for("https://www.facebook.com/ajax/dtsg/?__a=true")
                .as_deref(),
            Some("c_user=1; xs=2")
        );
        assert!(jar.header_for("https://example.com/").is_none());
        assert_eq!(jar.get("c_user").map(|c| c.value), Some("1".to_string()));
    }

    #[test]
    fn test_set_cookie_updates_and_deletes() {
        let jar = CookieJar::new();
        jar.inject(CookieInput::from("xs=old; presence=p").normalize().unwrap());

        let stored = jar.store_set_cookies(
            [
                "xs=new; Domain=.facebook.com; Path=/; Secure; HttpOnly",
                "presence=; Max-Age=0; Domain=.facebook.com; Path=/",
            ],
            "https://www.facebook.com/",
        );

        assert_eq!(stored, 2);
        assert_eq!(jar.get("xs").map(|c| c.value), Some("new".to_string()));
        assert!(jar.get("presence").is_none());
    }

    #[test]
    fn test_parse_cookie_dates() {
        let cookie = parse_set_cookie(
            "a=b; expires=Wed, 21-Oct-2037 07:28:00 GMT",
            "www.facebook.com",
        )
        .unwrap();
        assert!(cookie.expires.is_some());
        assert_eq!(cookie.domain, "www.facebook.com");
        assert!(cookie.host_only);

        let scoped = parse_set_cookie("a=b; Domain=facebook.com", "www.facebook.com").unwrap();
        assert_eq!(scoped.domain, ".facebook.com");
        assert!(!scoped.host_only);
    }

    #[test]
    fn test_host_only_refresh_replaces_injected_cookie() {
        let jar = CookieJar::new();
        jar.inject(CookieInput::from("c_user=1; xs=old").normalize().unwrap());

        jar.store_set_cookies(["xs=new; Path=/; Secure; HttpOnly"], "https://www.facebook.com/");

        assert_eq!(
            jar.header_for("https://www.facebook.com/").as_deref(),
            Some("c_user=1; xs=new")
        );
        assert_eq!(jar.get("xs").map(|c| c.value), Some("new".to_string()));
        assert_eq!(jar.len(), 2);

        // Host-only cookies stay on their host
        assert_eq!(
            jar.header_for("https://m.facebook.com/").as_deref(),
            Some("c_user=1")
        );
    }

    #[test]
    fn test_other_paths_are_kept() {
        let jar = CookieJar::new();
        jar.inject(CookieInput::from("xs=root").normalize().unwrap());
        jar.store_set_cookies(["xs=ajax; Path=/ajax"], "https://www.facebook.com/");

        assert_eq!(jar.len(), 2);
        assert_eq!(
            jar.header_for("https://www.facebook.com/").as_deref(),
            Some("xs=root")
        );
    }

    #[test]
    fn test_snapshot_is_deduplicated() {
        let jar = CookieJar::new();
        jar.inject(CookieInput::from("c_user=1; xs=2").normalize().unwrap());
        let snapshot = jar.snapshot();
        assert_eq!(snapshot.len(), 2);
    }
}
