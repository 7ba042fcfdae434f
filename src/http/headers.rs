//! Default request headers and user-agent selection

use rand::seq::SliceRandom;
use rand::Rng;
use url::Url;

use crate::config::LoginOptions;
use crate::http::PLATFORM_ORIGIN;

pub const DEFAULT_USER_AGENT: &str = "facebookexternalhit/1.1";

const PLATFORMS: &[&str] = &[
    "Windows NT 10.0; Win64; x64",
    "Macintosh; Intel Mac OS X 14.7; rv:132.0",
];
const CHROME_VERSIONS: &[&str] = &["122.0.0.0", "121.0.0.0"];
const FIREFOX_VERSIONS: &[&str] = &["123.0", "122.0"];

const KNOWN_USER_AGENTS: &[&str] = &[
    DEFAULT_USER_AGENT,
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.12; rv:45.0) Gecko/20100101 Firefox/45.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:66.0) Gecko/20100101 Firefox/66.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/64.0.3282.140 Safari/537.3",
];

fn pick<'a>(items: &[&'a str]) -> &'a str {
    items
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DEFAULT_USER_AGENT)
}

/// A generated browser user agent, or one from a fixed list
pub fn random_user_agent() -> String {
    let mut rng = rand::thread_rng();
    if rng.gen_bool(0.5) {
        return pick(KNOWN_USER_AGENTS).to_string();
    }

    let platform = pick(PLATFORMS);
    if rng.gen_bool(0.5) {
        format!(
            "Mozilla/5.0 ({}) Gecko/20100101 Firefox/{}",
            platform,
            pick(FIREFOX_VERSIONS)
        )
    } else {
        format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
            platform,
            pick(CHROME_VERSIONS)
        )
    }
}

/// Explicit agent, then a random one when enabled, then the default
pub fn resolve_user_agent(options: &LoginOptions) -> String {
    match options.user_agent.as_deref().map(str::trim) {
        Some(ua) if !ua.is_empty() => ua.to_string(),
        _ if options.random_user_agent => random_user_agent(),
        _ => DEFAULT_USER_AGENT.to_string(),
    }
}

/// Headers sent with every platform request
pub fn default_headers(
    url: &str,
    user_agent: &str,
    region: Option<&str>,
    no_referer: bool,
) -> Vec<(String, String)> {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        (
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        ),
        ("origin".to_string(), PLATFORM_ORIGIN.to_string()),
        ("referer".to_string(), PLATFORM_ORIGIN.to_string()),
        ("connection".to_string(), "keep-alive".to_string()),
        ("Sec-Fetch-Site".to_string(), "same-origin".to_string()),
        ("Sec-Fetch-User".to_string(), "?1".to_string()),
        ("User-Agent".to_string(), user_agent.to_string()),
    ];

    if let Some(region) = region.filter(|r| !r.is_empty()) {
        headers.push(("X-MSGR-Region".to_string(), region.to_string()));
    }
    if no_referer {
        headers.retain(|(name, _)| name != "referer");
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_default_headers() {
        let headers = default_headers(
            "https://www.facebook.com/ajax/x?y=1",
            DEFAULT_USER_AGENT,
            Some("PRN"),
            false,
        );
        assert_eq!(find(&headers, "host"), Some("www.facebook.com"));
        assert_eq!(find(&headers, "referer"), Some(PLATFORM_ORIGIN));
        assert_eq!(find(&headers, "X-MSGR-Region"), Some("PRN"));
        assert_eq!(find(&headers, "User-Agent"), Some(DEFAULT_USER_AGENT));
    }

    #[test]
    fn test_no_referer_drops_header() {
        let headers = default_headers(PLATFORM_ORIGIN, "ua", None, true);
        assert!(find(&headers, "referer").is_none());
        assert!(find(&headers, "X-MSGR-Region").is_none());
    }

    #[test]
    fn test_host_ignores_credentials_and_port() {
        let headers = default_headers("https://u:p@www.messenger.com:8443/t/1", "ua", None, false);
        assert_eq!(find(&headers, "host"), Some("www.messenger.com"));

        let headers = default_headers("not a url", "ua", None, false);
        assert_eq!(find(&headers, "host"), Some(""));
    }

    #[test]
    fn test_user_agent_precedence() {
        let mut options = LoginOptions::default();
        assert_eq!(resolve_user_agent(&options), DEFAULT_USER_AGENT);

        options.random_user_agent = true;
        let ua = resolve_user_agent(&options);
        assert!(ua.starts_with("Mozilla/5.0") || ua == DEFAULT_USER_AGENT);

        options.user_agent = Some("custom/1.0".into());
        assert_eq!(resolve_user_agent(&options), "custom/1.0");
    }
}
