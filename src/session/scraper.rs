//! Session derivation from the landing page markup
//!
//! [`SessionScraper`] is the seam the login flow calls into. [`PageScraper`]
//! is the default implementation: it reads the JSON `<script>` blobs the page
//! ships (`require` tables and `__bbox.define` entries) and falls back to
//! plain regex matches over the raw markup.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::LoginOptions;
use crate::error::LoginError;
use crate::http::{ApiClient, HttpTransport};
use crate::session::context::{TokenMaterial, UserSessionContext};
use crate::session::cookies::CookieJar;

/// Substring that identifies a security checkpoint page
pub const CHECKPOINT_MARKER: &str = "/checkpoint/block/?next";

/// Regions picked from when the page does not reveal one
pub const FALLBACK_REGIONS: &[&str] = &["prn", "pnb", "vll", "hkg", "sin", "ftw", "ash"];

/// Real-time host the endpoint is rebuilt against
pub const REALTIME_HOST: &str = "wss://edge-chat.messenger.com/chat";

/// Largest integer a double can hold exactly
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Collaborator that turns cookies and markup into a session
pub trait SessionScraper: Send + Sync {
    /// Identity cookie: `c_user`, falling back to `i_user`
    fn user_id(&self, jar: &CookieJar) -> Option<String> {
        jar.get("c_user")
            .or_else(|| jar.get("i_user"))
            .map(|c| c.value)
            .filter(|v| !v.is_empty())
    }

    fn is_checkpoint(&self, html: &str) -> bool {
        html.contains(CHECKPOINT_MARKER)
    }

    /// Derive endpoint, identifiers and tokens for an already identified user
    fn build_session_context(
        &self,
        html: &str,
        jar: Arc<CookieJar>,
        user_id: String,
        options: &LoginOptions,
    ) -> Result<UserSessionContext, LoginError>;

    /// Build the per-session API client
    fn create_api_client(
        &self,
        transport: Arc<dyn HttpTransport>,
        session: Arc<UserSessionContext>,
        user_agent: String,
    ) -> Result<ApiClient, LoginError> {
        if session.user_id.is_empty() {
            return Err(LoginError::ApiClient(
                "session context has no user id".to_string(),
            ));
        }
        Ok(ApiClient::new(transport, session, user_agent))
    }
}

/// Everything the page can tell us about the real-time connection
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RealtimeConfig {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub iris_seq_id: Option<String>,
    pub app_id: Option<String>,
}

/// Default markup scraper
pub struct PageScraper {
    script_blob: Regex,
    iris_seq_id: Regex,
    device_id: Regex,
    client_id: Regex,
    token: Regex,
    token_input: Regex,
    revision: Regex,
    endpoint_variants: Vec<Regex>,
}

impl PageScraper {
    pub fn new() -> Result<Self, LoginError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| LoginError::Session(format!("Regex error: {}", e)))
        };

        Ok(Self {
            script_blob: compile(r#"(?s)<script type="application/json"[^>]*>(.*?)</script>"#)?,
            iris_seq_id: compile(r#"irisSeqID:"(.+?)""#)?,
            device_id: compile(r#"\["AnalyticsCoreData",\[\],\{"device_id":"(.*?)""#)?,
            client_id: compile(r#"\["MqttWebDeviceID",\[\],\{"clientID":"(.*?)""#)?,
            token: compile(r#""token":"(.*?)""#)?,
            token_input: compile(r#"name="fb_dtsg" value="(.*?)""#)?,
            revision: compile(r#"revision":(\d+),"#)?,
            endpoint_variants: vec![
                compile(r#"irisSeqID:"(.+?)",appID:\d+,endpoint:"(.+?)""#)?,
                compile(r#"\{"app_id":"\d+","endpoint":"(.+?)","iris_seq_id":"(.+?)"\}"#)?,
                compile(r#"\["MqttWebConfig",\[\],\{"fbid":".*?","appID":\d+,"endpoint":"(.*?)""#)?,
            ],
        })
    }

    /// Parsed JSON `<script>` blobs. Unparseable blobs are skipped.
    pub fn script_blobs(&self, html: &str) -> Vec<Value> {
        self.script_blob
            .captures_iter(html)
            .filter_map(|caps| {
                let raw = caps.get(1)?.as_str();
                match serde_json::from_str(raw) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        debug!("Skipping unparseable script blob: {}", e);
                        None
                    }
                }
            })
            .collect()
    }

    fn capture(re: &Regex, html: &str) -> Option<String> {
        re.captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Security token, from the config blob or the raw markup
    pub fn security_token(&self, html: &str, blobs: &[Value]) -> Option<String> {
        find_config(blobs, "DTSGInitialData")
            .and_then(|data| data.get("token"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Self::capture(&self.token, html))
            .or_else(|| Self::capture(&self.token_input, html))
    }

    pub fn realtime_config(&self, html: &str, blobs: &[Value]) -> RealtimeConfig {
        let mut config = RealtimeConfig::default();

        if let Some(mqtt) = find_config(blobs, "MqttWebConfig") {
            config.endpoint = mqtt.get("endpoint").and_then(Value::as_str).map(unescape);
            config.app_id = mqtt.get("appID").and_then(value_to_string);
        }

        if config.endpoint.is_none() {
            for (idx, re) in self.endpoint_variants.iter().enumerate() {
                let Some(caps) = re.captures(html) else {
                    continue;
                };
                let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string());
                match idx {
                    0 => {
                        config.iris_seq_id = group(1);
                        config.endpoint = group(2).map(|e| unescape(&e));
                    }
                    1 => {
                        config.endpoint = group(1).map(|e| unescape(&e));
                        config.iris_seq_id = group(2);
                    }
                    _ => config.endpoint = group(1).map(|e| unescape(&e)),
                }
                break;
            }
        }

        if let Some(user) = find_config(blobs, "CurrentUserInitialData") {
            if let Some(app_id) = user.get("APP_ID").and_then(value_to_string) {
                config.app_id = Some(app_id);
            }
        }

        if config.iris_seq_id.is_none() {
            config.iris_seq_id = Self::capture(&self.iris_seq_id, html);
        }
        config.region = config.endpoint.as_deref().and_then(region_from_endpoint);
        config
    }

    pub fn device_id(&self, html: &str) -> Option<String> {
        Self::capture(&self.device_id, html)
    }

    pub fn client_id(&self, html: &str, blobs: &[Value]) -> Option<String> {
        find_config(blobs, "MqttWebDeviceID")
            .and_then(|data| data.get("clientID"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Self::capture(&self.client_id, html))
    }

    pub fn revision(&self, html: &str) -> Option<String> {
        Self::capture(&self.revision, html)
    }
}

impl SessionScraper for PageScraper {
    fn build_session_context(
        &self,
        html: &str,
        jar: Arc<CookieJar>,
        user_id: String,
        options: &LoginOptions,
    ) -> Result<UserSessionContext, LoginError> {
        let blobs = self.script_blobs(html);
        let realtime = self.realtime_config(html, &blobs);

        let tokens = match self.security_token(html, &blobs) {
            Some(token) => TokenMaterial::from_token(&token),
            None => {
                warn!("No security token found in page markup, API calls may be rejected");
                TokenMaterial::default()
            }
        };

        let region = match options.bypass_region.as_deref().map(str::trim) {
            Some(bypass) if !bypass.is_empty() => bypass.to_uppercase(),
            _ => match realtime.region.clone() {
                Some(region) => region,
                None => {
                    let region = random_region();
                    warn!(
                        "No region found for this account, using random region {}. This might raise suspicion",
                        region
                    );
                    region
                }
            },
        };

        let client_id = self.client_id(html, &blobs);
        let session_id = rand::thread_rng().gen_range(1..=MAX_SAFE_INTEGER);
        let endpoint = realtime_endpoint(&region, client_id.as_deref(), session_id);

        info!("Session context built for user {} in region {}", user_id, region);

        Ok(UserSessionContext {
            endpoint,
            region,
            user_id,
            device_id: self.device_id(html),
            client_id,
            session_id,
            last_seq_id: realtime.iris_seq_id,
            app_id: realtime.app_id,
            revision: self.revision(html),
            cookies: jar,
            tokens,
        })
    }
}

/// Look up `key` in the page's `require` tables
pub fn find_config<'a>(blobs: &'a [Value], key: &str) -> Option<&'a Value> {
    for blob in blobs {
        let Some(requires) = blob.get("require").and_then(Value::as_array) else {
            continue;
        };
        for req in requires.iter().filter_map(Value::as_array) {
            if req.first().and_then(Value::as_str) == Some(key) {
                if let Some(data) = req.get(2).filter(|v| !v.is_null()) {
                    return Some(data);
                }
            }

            let defines = req
                .get(3)
                .and_then(|v| v.get(0))
                .and_then(|v| v.get("__bbox"))
                .and_then(|v| v.get("define"))
                .and_then(Value::as_array);
            for def in defines.into_iter().flatten().filter_map(Value::as_array) {
                let name_matches = def
                    .first()
                    .and_then(Value::as_str)
                    .is_some_and(|name| name.ends_with(key));
                if name_matches {
                    if let Some(data) = def.get(2).filter(|v| !v.is_null()) {
                        return Some(data);
                    }
                }
            }
        }
    }
    None
}

/// `region` query parameter of an endpoint, upper-cased
pub fn region_from_endpoint(endpoint: &str) -> Option<String> {
    let url = Url::parse(endpoint).ok()?;
    let region = url
        .query_pairs()
        .find(|(k, _)| k == "region")
        .map(|(_, v)| v.to_uppercase())?;
    (!region.is_empty()).then_some(region)
}

pub fn realtime_endpoint(region: &str, client_id: Option<&str>, session_id: u64) -> String {
    match client_id {
        Some(cid) => format!(
            "{}?region={}&cid={}&sid={}",
            REALTIME_HOST, region, cid, session_id
        ),
        None => format!("{}?region={}&sid={}", REALTIME_HOST, region, session_id),
    }
}

fn random_region() -> String {
    FALLBACK_REGIONS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("prn")
        .to_uppercase()
}

fn unescape(raw: &str) -> String {
    raw.replace("\\/", "/")
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
