//! Per-session API client
//!
//! Attaches the session-derived parameters every platform call needs and
//! keeps the cookie jar in sync with responses.
//!
//! | param     | source                          |
//! |-----------|---------------------------------|
//! | `av`      | user id                         |
//! | `__user`  | user id                         |
//! | `__req`   | per-request counter, base 36    |
//! | `__rev`   | page revision                   |
//! | `__a`     | constant `1`                    |
//! | `fb_dtsg` | security token                  |
//! | `jazoest` | token checksum                  |

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::TransportError;
use crate::http::headers::default_headers;
use crate::http::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::session::{TokenMaterial, UserSessionContext};

pub type Params = Vec<(String, String)>;

pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    session: Arc<UserSessionContext>,
    user_agent: String,
    request_counter: AtomicU64,
    tokens: RwLock<TokenMaterial>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        session: Arc<UserSessionContext>,
        user_agent: String,
    ) -> Self {
        let tokens = session.tokens.clone();
        Self {
            transport,
            session,
            user_agent,
            request_counter: AtomicU64::new(1),
            tokens: RwLock::new(tokens),
        }
    }

    pub fn session(&self) -> &Arc<UserSessionContext> {
        &self.session
    }

    pub fn user_id(&self) -> &str {
        &self.session.user_id
    }

    /// Token material currently attached to requests
    pub fn tokens(&self) -> TokenMaterial {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the token material (after a refresh)
    pub fn set_token_material(&self, tokens: TokenMaterial) {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = tokens;
    }

    /// Required parameters followed by any extra keys from `overrides`.
    /// Overrides never replace a required key.
    pub fn build_params(&self, overrides: &[(String, String)]) -> Params {
        let counter = self.request_counter.fetch_add(1, Ordering::Relaxed);
        let tokens = self.tokens();
        let user_id = self.session.user_id.clone();

        let mut params: Params = vec![
            ("av".to_string(), user_id.clone()),
            ("__user".to_string(), user_id),
            ("__req".to_string(), to_base36(counter)),
        ];
        if let Some(rev) = &self.session.revision {
            params.push(("__rev".to_string(), rev.clone()));
        }
        params.push(("__a".to_string(), "1".to_string()));
        params.push(("fb_dtsg".to_string(), tokens.fb_dtsg));
        params.push(("jazoest".to_string(), tokens.jazoest));

        for (key, value) in overrides {
            if !params.iter().any(|(k, _)| k == key) {
                params.push((key.clone(), value.clone()));
            }
        }
        params
    }

    fn request(&self, url: &str) -> HttpRequest {
        let mut headers = default_headers(
            url,
            &self.user_agent,
            Some(self.session.region.as_str()),
            false,
        );
        if let Some(cookie) = self.session.cookies.header_for(url) {
            headers.push(("cookie".to_string(), cookie));
        }
        HttpRequest::new(url).headers(headers)
    }

    fn absorb(&self, response: HttpResponse) -> HttpResponse {
        self.session
            .cookies
            .store_set_cookies(response.set_cookies(), &response.url);
        response
    }

    pub async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<HttpResponse, TransportError> {
        let request = self.request(url).query(self.build_params(query));
        let response = self.transport.get(request).await?;
        Ok(self.absorb(response))
    }

    pub async fn post(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> Result<HttpResponse, TransportError> {
        let request = self.request(url).form(self.build_params(form));
        let response = self.transport.post(request).await?;
        Ok(self.absorb(response))
    }

    pub async fn post_form_data(
        &self,
        url: &str,
        form: &[(String, String)],
        query: &[(String, String)],
    ) -> Result<HttpResponse, TransportError> {
        let request = self
            .request(url)
            .form(self.build_params(form))
            .query(query.to_vec());
        let response = self.transport.post_form_data(request).await?;
        Ok(self.absorb(response))
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("user_id", &self.session.user_id)
            .field("requests", &self.request_counter.load(Ordering::Relaxed))
            .finish()
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CookieJar;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl HttpTransport for NullTransport {
        async fn get(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::InvalidRequest("offline".into()))
        }
        async fn post(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::InvalidRequest("offline".into()))
        }
        async fn post_form_data(
            &self,
            _request: HttpRequest,
        ) -> Result<HttpResponse, TransportError> {
            Err(TransportError::InvalidRequest("offline".into()))
        }
    }

    fn client() -> ApiClient {
        let session = UserSessionContext {
            endpoint: String::new(),
            region: "PRN".into(),
            user_id: "42".into(),
            device_id: None,
            client_id: None,
            session_id: 1,
            last_seq_id: None,
            app_id: None,
            revision: Some("1000".into()),
            cookies: Arc::new(CookieJar::new()),
            tokens: TokenMaterial::from_token("tok"),
        };
        ApiClient::new(Arc::new(NullTransport), Arc::new(session), "ua".into())
    }

    fn get<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_params_counter_increments() {
        let client = client();
        let first = client.build_params(&[]);
        let second = client.build_params(&[]);

        assert_eq!(get(&first, "__req"), Some("1"));
        assert_eq!(get(&second, "__req"), Some("2"));
        assert_eq!(get(&first, "av"), Some("42"));
        assert_eq!(get(&first, "__rev"), Some("1000"));
        assert_eq!(get(&first, "__a"), Some("1"));
    }

    #[test]
    fn test_overrides_cannot_replace_required() {
        let client = client();
        let params = client.build_params(&[
            ("fb_dtsg".into(), "forged".into()),
            ("doc_id".into(), "123".into()),
        ]);

        assert_eq!(get(&params, "fb_dtsg"), Some("tok"));
        assert_eq!(get(&params, "doc_id"), Some("123"));
    }

    #[test]
    fn test_token_override_applies_to_later_requests() {
        let client = client();
        client.set_token_material(TokenMaterial::from_token("fresh"));
        let params = client.build_params(&[]);
        assert_eq!(get(&params, "fb_dtsg"), Some("fresh"));
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let client = client();
        let err = client
            .get("https://www.facebook.com/x", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }
}
