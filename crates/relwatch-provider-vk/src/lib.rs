// # VK Provider
//
// This crate provides a VK social-graph client for the relation watcher.
//
// ## Trust Level: Untrusted (Provider Client)
//
// The client makes exactly one HTTP request per call and reports the
// outcome:
// - no throttling (owned by `RateLimitedGateway`)
// - no retries (the next scheduler tick retries)
// - no caching (profiles are cached by `ProfileStore`)
// - no background tasks
//
// Every failure, whether transport, HTTP status, malformed body or a VK
// `error` object, is reported as `Error::ProviderUnavailable`. A failed
// listing is never turned into an empty one.
//
// ## Security Requirements
//
// - The access token never appears in logs or `Debug` output
// - The token is obtained out of band and supplied through configuration
// - Construction fails fast if the token is empty
//
// ## API Reference
//
// - Methods: https://dev.vk.com/method
// - `friends.get`: `{"response": {"count": N, "items": [id, ...]}}`
// - `users.getFollowers`: same shape as `friends.get`
// - `users.get`: `{"response": [{"id", "first_name", "last_name"}, ...]}`
// - Errors: `{"error": {"error_code": N, "error_msg": "..."}}`

use async_trait::async_trait;
use relwatch_core::config::ProviderConfig;
use relwatch_core::traits::{ConnectionPage, ProviderClient, RelationType, UserProfile};
use relwatch_core::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest page `friends.get` returns
pub const FRIENDS_PAGE_SIZE: usize = 5000;

/// Largest page `users.getFollowers` returns
pub const FOLLOWERS_PAGE_SIZE: usize = 1000;

/// Response envelope shared by every VK method
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: Option<T>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

/// `friends.get` / `users.getFollowers` payload
#[derive(Debug, Deserialize)]
struct IdList {
    count: usize,
    items: Vec<i64>,
}

/// `users.get` entry
#[derive(Debug, Deserialize)]
struct VkUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
}

impl<T> Envelope<T> {
    fn into_result(self, method: &str) -> Result<T> {
        if let Some(error) = self.error {
            return Err(Error::provider_unavailable(format!(
                "{} failed with VK error {}: {}",
                method, error.error_code, error.error_msg
            )));
        }
        self.response.ok_or_else(|| {
            Error::provider_unavailable(format!("{} returned neither response nor error", method))
        })
    }
}

impl From<IdList> for ConnectionPage {
    fn from(list: IdList) -> Self {
        ConnectionPage {
            total: list.count,
            ids: list.items,
        }
    }
}

impl From<VkUser> for UserProfile {
    fn from(user: VkUser) -> Self {
        UserProfile::new(user.id, user.first_name, user.last_name)
    }
}

/// VK API method and page size for a relation type
fn listing_method(relation_type: RelationType) -> (&'static str, usize) {
    match relation_type {
        RelationType::Friend => ("friends.get", FRIENDS_PAGE_SIZE),
        RelationType::Follower => ("users.getFollowers", FOLLOWERS_PAGE_SIZE),
    }
}

/// VK social-graph client
///
/// # Security
///
/// The Debug implementation does NOT expose the access token.
pub struct VkProviderClient {
    /// User access token
    /// ⚠️ NEVER log this value
    access_token: String,

    /// `v` parameter sent with every request
    api_version: String,

    /// Base URL, without trailing slash
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the access token
impl std::fmt::Debug for VkProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkProviderClient")
            .field("access_token", &"<REDACTED>")
            .field("api_version", &self.api_version)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl VkProviderClient {
    /// Create a new VK client
    ///
    /// # Parameters
    ///
    /// - `access_token`: User access token, obtained out of band
    /// - `api_version`: VK API version, e.g. `5.131`
    /// - `base_url`: Method endpoint root, e.g. `https://api.vk.com/method`
    ///
    /// # Errors
    ///
    /// `Error::Config` if the token is empty or the HTTP client cannot be
    /// built.
    pub fn new(
        access_token: impl Into<String>,
        api_version: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(Error::config("VK access token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            access_token,
            api_version: api_version.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Create a client from provider configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        config.validate()?;
        match config {
            ProviderConfig::Vk {
                access_token,
                api_version,
                base_url,
            } => Self::new(access_token.clone(), api_version.clone(), base_url.clone()),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// Call one VK method
    ///
    /// Parameters go in a form body so that long `user_ids` lists do not
    /// hit URL length limits.
    async fn call_method<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        tracing::debug!("Calling VK {}", method);

        let mut form: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        form.push(("access_token", self.access_token.as_str()));
        form.push(("v", self.api_version.as_str()));

        let response = self
            .client
            .post(self.method_url(method))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors may carry the URL, never the form body
                Error::provider_unavailable(format!("{}: HTTP request failed: {}", method, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::provider_unavailable(match status.as_u16() {
                429 => format!("{}: rate limit exceeded ({})", method, status),
                500..=599 => format!("{}: VK server error ({})", method, status),
                _ => format!("{}: unexpected HTTP status {}", method, status),
            }));
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            Error::provider_unavailable(format!("{}: malformed response: {}", method, e))
        })?;
        envelope.into_result(method)
    }
}

#[async_trait]
impl ProviderClient for VkProviderClient {
    async fn list_connections(
        &self,
        owner_id: i64,
        relation_type: RelationType,
        offset: usize,
    ) -> Result<ConnectionPage> {
        let (method, page_size) = listing_method(relation_type);
        let list: IdList = self
            .call_method(
                method,
                &[
                    ("user_id", owner_id.to_string()),
                    ("offset", offset.to_string()),
                    ("count", page_size.to_string()),
                ],
            )
            .await?;

        tracing::debug!(
            "VK {} for {}: {} ids at offset {} of {}",
            method,
            owner_id,
            list.items.len(),
            offset,
            list.count
        );
        Ok(list.into())
    }

    async fn fetch_profiles(&self, ids: &[i64]) -> Result<Vec<UserProfile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids = ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let users: Vec<VkUser> = self
            .call_method("users.get", &[("user_ids", user_ids)])
            .await?;

        Ok(users.into_iter().map(UserProfile::from).collect())
    }

    fn provider_name(&self) -> &'static str {
        "vk"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse<T: DeserializeOwned>(method: &str, body: &str) -> Result<T> {
        let envelope: Envelope<T> = serde_json::from_str(body).unwrap();
        envelope.into_result(method)
    }

    #[test]
    fn parses_friend_listing() {
        let list: IdList = parse(
            "friends.get",
            r#"{"response": {"count": 7, "items": [11, 12, 13]}}"#,
        )
        .unwrap();

        let page = ConnectionPage::from(list);
        assert_eq!(page.total, 7);
        assert_eq!(page.ids, vec![11, 12, 13]);
    }

    #[test]
    fn parses_empty_listing() {
        let list: IdList = parse("users.getFollowers", r#"{"response": {"count": 0, "items": []}}"#)
            .unwrap();
        assert_eq!(ConnectionPage::from(list), ConnectionPage::complete(Vec::new()));
    }

    #[test]
    fn parses_profiles_and_tolerates_missing_names() {
        let users: Vec<VkUser> = parse(
            "users.get",
            r#"{"response": [
                {"id": 1, "first_name": "Pavel", "last_name": "Durov", "can_access_closed": true},
                {"id": 2, "deactivated": "deleted"}
            ]}"#,
        )
        .unwrap();

        let profiles: Vec<UserProfile> = users.into_iter().map(UserProfile::from).collect();
        assert_eq!(profiles[0], UserProfile::new(1, "Pavel", "Durov"));
        assert_eq!(profiles[1], UserProfile::new(2, "", ""));
    }

    #[test]
    fn vk_error_is_provider_unavailable() {
        let result: Result<IdList> = parse(
            "friends.get",
            r#"{"error": {"error_code": 30, "error_msg": "This profile is private"}}"#,
        );

        match result {
            Err(Error::ProviderUnavailable(msg)) => {
                assert!(msg.contains("friends.get"));
                assert!(msg.contains("30"));
                assert!(msg.contains("private"));
            }
            other => panic!("expected ProviderUnavailable, got {:?}", other.map(|l| l.count)),
        }
    }

    #[test]
    fn empty_envelope_is_provider_unavailable() {
        let result: Result<Vec<VkUser>> = parse("users.get", "{}");
        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
    }

    #[test]
    fn relation_types_map_to_methods() {
        assert_eq!(listing_method(RelationType::Friend), ("friends.get", 5000));
        assert_eq!(
            listing_method(RelationType::Follower),
            ("users.getFollowers", 1000)
        );
    }

    #[test]
    fn empty_token_is_rejected() {
        let result = VkProviderClient::new("", "5.131", "https://api.vk.com/method");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn from_config_builds_client() {
        let config = ProviderConfig::Vk {
            access_token: "secret".to_string(),
            api_version: "5.131".to_string(),
            base_url: "https://api.vk.com/method/".to_string(),
        };

        let client = VkProviderClient::from_config(&config).unwrap();

        assert_eq!(client.provider_name(), "vk");
        assert_eq!(
            client.method_url("users.get"),
            "https://api.vk.com/method/users.get"
        );
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let config = ProviderConfig::Vk {
            access_token: "secret".to_string(),
            api_version: "5.131".to_string(),
            base_url: "ftp://api.vk.com".to_string(),
        };
        assert!(VkProviderClient::from_config(&config).is_err());
    }

    #[test]
    fn access_token_not_exposed_in_debug() {
        let client =
            VkProviderClient::new("super-secret-token", "5.131", "https://api.vk.com/method")
                .unwrap();

        let debug_output = format!("{:?}", client);

        assert!(!debug_output.contains("super-secret-token"));
        assert!(debug_output.contains("REDACTED"));
    }
}
