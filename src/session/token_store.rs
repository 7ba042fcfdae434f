//! Security token refresh and its JSON side file
//!
//! The side file maps user id to the last refreshed `{fb_dtsg, jazoest}`:
//!
//! ```json
//! { "100000000000001": { "fb_dtsg": "...", "jazoest": "2..." } }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ApiError;
use crate::http::{platform_url, ApiClient};
use crate::session::context::TokenMaterial;

/// Default side file, relative to the working directory
pub const DEFAULT_TOKEN_FILE: &str = "fb_dtsg_data.json";

/// Endpoint that hands out a fresh security token
pub const DTSG_ENDPOINT: &str = "ajax/dtsg/?__a=true";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStore {
    path: PathBuf,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_FILE)
    }
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored entry. A missing file reads as empty.
    pub async fn load_all(&self) -> Result<BTreeMap<String, TokenMaterial>, ApiError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn load(&self, user_id: &str) -> Result<Option<TokenMaterial>, ApiError> {
        Ok(self.load_all().await?.remove(user_id))
    }

    /// Insert or replace the entry for `user_id`, keeping the others
    pub async fn save(&self, user_id: &str, tokens: &TokenMaterial) -> Result<(), ApiError> {
        let mut all = self.load_all().await?;
        all.insert(user_id.to_string(), tokens.clone());

        let raw = serde_json::to_string_pretty(&all)?;
        tokio::fs::write(&self.path, raw).await?;
        debug!("Saved token material for {} to {}", user_id, self.path.display());
        Ok(())
    }
}

/// Pull `payload.token` out of the refresh endpoint's body
pub fn parse_dtsg_payload(body: &str) -> Result<String, ApiError> {
    let cleaned = body.trim().trim_start_matches("for (;;);").trim();
    if cleaned.is_empty() {
        return Err(ApiError::InvalidResponse(
            "empty body from token refresh".to_string(),
        ));
    }

    let parsed: serde_json::Value = serde_json::from_str(cleaned)?;
    parsed
        .get("payload")
        .and_then(|p| p.get("token"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::InvalidResponse("token missing from refresh payload".to_string()))
}

/// Fetch a fresh token, install it on `client` and persist it when a store
/// is configured
pub async fn refresh_dtsg(
    client: &ApiClient,
    store: Option<&TokenStore>,
) -> Result<TokenMaterial, ApiError> {
    let response = client.get(&platform_url(DTSG_ENDPOINT), &[]).await?;
    if !response.is_success() {
        return Err(ApiError::InvalidResponse(format!(
            "token refresh returned status {}",
            response.status_code
        )));
    }

    let token = parse_dtsg_payload(&response.body)?;
    let tokens = TokenMaterial::from_token(&token);

    if let Some(store) = store {
        store.save(client.user_id(), &tokens).await?;
    }
    client.set_token_material(tokens.clone());

    info!("Refreshed security token for {}", client.user_id());
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        let token = parse_dtsg_payload(r#"for (;;);{"payload":{"token":"NAc:1"}}"#).unwrap();
        assert_eq!(token, "NAc:1");

        assert!(parse_dtsg_payload("for (;;);").is_err());
        assert!(parse_dtsg_payload(r#"{"payload":{}}"#).is_err());
    }

    #[tokio::test]
    async fn test_store_round_trip_keeps_other_users() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join(DEFAULT_TOKEN_FILE));

        assert!(store.load("1").await.unwrap().is_none());

        store.save("1", &TokenMaterial::from_token("a")).await.unwrap();
        store.save("2", &TokenMaterial::from_token("b")).await.unwrap();
        store.save("1", &TokenMaterial::from_token("c")).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["1"].fb_dtsg, "c");
        assert_eq!(all["2"].fb_dtsg, "b");
    }
}
