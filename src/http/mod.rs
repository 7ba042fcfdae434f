//! HTTP plumbing: the transport seam, default headers and the per-session
//! API client

pub mod api_client;
pub mod headers;
pub mod reqwest_transport;
pub mod transport;

pub use api_client::ApiClient;
pub use headers::{default_headers, random_user_agent, resolve_user_agent, DEFAULT_USER_AGENT};
pub use reqwest_transport::{ProxyConfig, ReqwestTransport};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method};

/// Platform web origin
pub const PLATFORM_ORIGIN: &str = "https://www.facebook.com";

/// Messenger web origin, whose cookies are part of the app state
pub const MESSENGER_ORIGIN: &str = "https://www.messenger.com";

/// Domain injected cookies are scoped to
pub const COOKIE_DOMAIN: &str = ".facebook.com";

/// `https://www.facebook.com[/endpoint]`
pub fn platform_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    if endpoint.is_empty() {
        PLATFORM_ORIGIN.to_string()
    } else {
        format!("{}/{}", PLATFORM_ORIGIN, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_url() {
        assert_eq!(platform_url(""), "https://www.facebook.com");
        assert_eq!(
            platform_url("/ajax/dtsg/?__a=true"),
            "https://www.facebook.com/ajax/dtsg/?__a=true"
        );
    }
}
