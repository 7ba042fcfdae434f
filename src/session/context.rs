//! User session context - the product of a successful login

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::cookies::CookieJar;

/// Security token plus its derived checksum
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMaterial {
    pub fb_dtsg: String,
    pub jazoest: String,
}

impl TokenMaterial {
    /// Derive the checksum: `"2"` followed by the decimal code of every
    /// UTF-16 unit of the token, concatenated
    pub fn from_token(token: &str) -> Self {
        let mut jazoest = String::from("2");
        for unit in token.encode_utf16() {
            jazoest.push_str(&unit.to_string());
        }
        Self {
            fb_dtsg: token.to_string(),
            jazoest,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fb_dtsg.is_empty()
    }
}

impl fmt::Debug for TokenMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenMaterial")
            .field("fb_dtsg", &if self.fb_dtsg.is_empty() { "" } else { "<redacted>" })
            .field("jazoest", &self.jazoest)
            .finish()
    }
}

/// Identifiers, endpoint and tokens derived from the landing page.
///
/// Built once per successful login and never mutated afterwards. Token
/// refreshes go through the API client, not through this struct.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSessionContext {
    /// Real-time endpoint (`wss://edge-chat.messenger.com/chat?...`)
    pub endpoint: String,
    pub region: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "deviceID")]
    pub device_id: Option<String>,
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
    #[serde(rename = "sessionID")]
    pub session_id: u64,
    pub last_seq_id: Option<String>,
    #[serde(rename = "appID")]
    pub app_id: Option<String>,
    /// Page revision (`__rev`)
    pub revision: Option<String>,
    #[serde(skip)]
    pub cookies: Arc<CookieJar>,
    #[serde(flatten)]
    pub tokens: TokenMaterial,
}
