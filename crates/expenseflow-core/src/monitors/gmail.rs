//! Gmail REST mail session
//!
//! Talks to the Gmail v1 API with a bearer access token. The token is either
//! supplied directly or obtained by exchanging a stored OAuth refresh token;
//! the interactive consent flow that produces that refresh token is not part
//! of this crate.
//!
//! # Configuration
//!
//! For the alerts mailbox (prefix `GMAIL_`) and the receipts mailbox
//! (prefix `GMAIL_RECEIPTS_`):
//! - `{prefix}ACCESS_TOKEN`: ready-to-use token, or
//! - `{prefix}CLIENT_ID`, `{prefix}CLIENT_SECRET`, `{prefix}REFRESH_TOKEN`
//!
//! `GMAIL_API_BASE` overrides the API base URL for both.

use std::sync::Arc;

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::RawMessage;

use super::MailSession;

/// Default Gmail API base URL
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com";

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Gmail encodes bodies as URL-safe base64, with or without padding
const GMAIL_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Refresh margin before the reported expiry
const EXPIRY_SKEW_SECS: i64 = 60;

/// OAuth client credentials used to mint new access tokens
#[derive(Clone)]
struct RefreshCredentials {
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Authenticated Gmail mailbox
///
/// Sessions built from a refresh token renew their access token when it
/// expires, or when Gmail rejects it with 401, and retry the request once.
#[derive(Clone)]
pub struct GmailSession {
    http_client: Client,
    api_base: String,
    token: Arc<RwLock<AccessToken>>,
    refresh: Option<RefreshCredentials>,
    account: String,
}

impl GmailSession {
    /// Session from an access token
    pub fn new(api_base: &str, access_token: &str) -> Self {
        Self {
            http_client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: Arc::new(RwLock::new(AccessToken {
                value: access_token.to_string(),
                expires_at: None,
            })),
            refresh: None,
            account: "me".to_string(),
        }
    }

    /// Label the session for logs (e.g. "alerts", "receipts")
    pub fn with_account(mut self, account: &str) -> Self {
        self.account = account.to_string();
        self
    }

    /// Exchange a refresh token for an access token
    ///
    /// The credentials are kept so the token can be renewed later.
    pub async fn from_refresh_token(
        api_base: &str,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<Self> {
        let credentials = RefreshCredentials {
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            refresh_token: refresh_token.to_string(),
        };

        let session = Self {
            refresh: Some(credentials),
            ..Self::new(api_base, "")
        };
        session.renew_token().await?;
        Ok(session)
    }

    /// Build a session from environment variables with the given prefix
    ///
    /// Returns `Ok(None)` when no credentials are configured for the prefix.
    pub async fn from_env(prefix: &str) -> Result<Option<Self>> {
        let var = |name: &str| {
            std::env::var(format!("{}{}", prefix, name))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };
        let api_base = std::env::var("GMAIL_API_BASE").unwrap_or_else(|_| GMAIL_API_BASE.into());
        let account = prefix.trim_end_matches('_').to_lowercase();

        if let Some(token) = var("ACCESS_TOKEN") {
            return Ok(Some(Self::new(&api_base, &token).with_account(&account)));
        }

        match (var("CLIENT_ID"), var("CLIENT_SECRET"), var("REFRESH_TOKEN")) {
            (Some(id), Some(secret), Some(refresh)) => {
                let session =
                    Self::from_refresh_token(&api_base, TOKEN_URL, &id, &secret, &refresh).await?;
                info!(account = %account, "Authenticated with Gmail");
                Ok(Some(session.with_account(&account)))
            }
            _ => Ok(None),
        }
    }

    /// Exchange the stored refresh token and swap in the new access token
    async fn renew_token(&self) -> Result<String> {
        let Some(credentials) = self.refresh.as_ref() else {
            return Err(Error::Mail(
                "Access token rejected and no refresh token configured".to_string(),
            ));
        };

        let response = self
            .http_client
            .post(&credentials.token_url)
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("refresh_token", credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Mail(format!(
                "Token refresh failed ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        debug!(
            account = %self.account,
            expires_in = ?token.expires_in,
            "Refreshed Gmail access token"
        );

        let expires_at = token.expires_in.map(|secs| {
            Utc::now() + Duration::seconds(secs as i64) - Duration::seconds(EXPIRY_SKEW_SECS)
        });
        let mut current = self.token.write().await;
        *current = AccessToken {
            value: token.access_token.clone(),
            expires_at,
        };
        Ok(token.access_token)
    }

    /// Current access token, renewed first if it has expired
    async fn access_token(&self) -> Result<String> {
        let current = self.token.read().await.clone();
        if self.refresh.is_some() && current.is_expired(Utc::now()) {
            return self.renew_token().await;
        }
        Ok(current.value)
    }

    fn messages_url(&self) -> String {
        format!("{}/gmail/v1/users/me/messages", self.api_base)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self.access_token().await?;
        let mut response = self.send_get(url, query, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.refresh.is_some() {
            warn!(account = %self.account, "Gmail rejected access token, refreshing");
            let token = self.renew_token().await?;
            response = self.send_get(url, query, &token).await?;
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Mail(format!("Gmail returned {}: {}", status, body)));
        }

        Ok(response.json().await?)
    }

    async fn send_get(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> Result<reqwest::Response> {
        Ok(self
            .http_client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?)
    }
}

#[async_trait]
impl MailSession for GmailSession {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<String>> {
        let list: ListResponse = self
            .get_json(
                &self.messages_url(),
                &[
                    ("q", query.to_string()),
                    ("maxResults", max_results.to_string()),
                ],
            )
            .await?;

        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn fetch(&self, message_id: &str) -> Result<RawMessage> {
        let url = format!("{}/{}", self.messages_url(), message_id);
        let message: GmailMessage = self
            .get_json(&url, &[("format", "full".to_string())])
            .await?;

        let header = |name: &str| {
            message
                .payload
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
        };

        let received_at = message
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        Ok(RawMessage {
            message_id: message.id.clone(),
            subject: header("Subject").unwrap_or_else(|| "No Subject".to_string()),
            sender: header("From").unwrap_or_else(|| "Unknown".to_string()),
            body: strip_html(&extract_body(&message.payload)?)?,
            received_at,
        })
    }

    fn account(&self) -> &str {
        &self.account
    }
}

/// Body text of a message payload
///
/// The first `text/plain` part wins; otherwise the last `text/html` part is
/// used. Nested multiparts are searched in order.
fn extract_body(payload: &MessagePart) -> Result<String> {
    if payload.parts.is_empty() {
        return decode_part(payload);
    }

    let mut html = None;
    for part in &payload.parts {
        match part.mime_type.as_str() {
            "text/plain" if part.body.data.is_some() => return decode_part(part),
            "text/html" if part.body.data.is_some() => html = Some(decode_part(part)?),
            mime if mime.starts_with("multipart/") => {
                let nested = extract_body(part)?;
                if !nested.is_empty() {
                    return Ok(nested);
                }
            }
            _ => {}
        }
    }

    Ok(html.unwrap_or_default())
}

fn decode_part(part: &MessagePart) -> Result<String> {
    match part.body.data {
        Some(ref data) => {
            let bytes = GMAIL_BASE64
                .decode(data.trim())
                .map_err(|e| Error::Mail(format!("Invalid body encoding: {}", e)))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => Ok(String::new()),
    }
}

/// Reduce an HTML (or plain) body to single-spaced text
pub fn strip_html(body: &str) -> Result<String> {
    let tags = Regex::new(r"<[^>]+>")?;
    let whitespace = Regex::new(r"\s+")?;

    let text = tags.replace_all(body, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    Ok(whitespace.replace_all(&text, " ").trim().to_string())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    internal_date: Option<String>,
    payload: MessagePart,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct PartBody {
    data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockGmailServer, MockMail};

    fn encode(text: &str) -> String {
        GMAIL_BASE64.encode(text)
    }

    fn part(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: mime.to_string(),
            body: PartBody {
                data: Some(encode(text)),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_strip_html() {
        let text = strip_html("<p>Rs&nbsp;250.00</p>\n\n<b>spent</b>   at CAFE&amp;CO").unwrap();
        assert_eq!(text, "Rs 250.00 spent at CAFE&CO");
    }

    #[test]
    fn test_plain_part_preferred_over_html() {
        let payload = MessagePart {
            mime_type: "multipart/alternative".into(),
            parts: vec![part("text/html", "<b>html</b>"), part("text/plain", "plain")],
            ..Default::default()
        };
        assert_eq!(extract_body(&payload).unwrap(), "plain");
    }

    #[test]
    fn test_html_fallback_and_nested_parts() {
        let payload = MessagePart {
            mime_type: "multipart/mixed".into(),
            parts: vec![
                MessagePart {
                    mime_type: "multipart/alternative".into(),
                    parts: vec![part("text/html", "<p>nested</p>")],
                    ..Default::default()
                },
                part("application/pdf", "%PDF"),
            ],
            ..Default::default()
        };
        assert_eq!(extract_body(&payload).unwrap(), "<p>nested</p>");
    }

    #[test]
    fn test_padded_and_unpadded_bodies_decode() {
        let padded = MessagePart {
            body: PartBody {
                data: Some("aGk=".into()),
            },
            ..Default::default()
        };
        let unpadded = MessagePart {
            body: PartBody {
                data: Some("aGk".into()),
            },
            ..Default::default()
        };
        assert_eq!(decode_part(&padded).unwrap(), "hi");
        assert_eq!(decode_part(&unpadded).unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_search_and_fetch_against_mock_server() {
        let server = MockGmailServer::start(vec![MockMail::new(
            "18c1",
            "Credit transaction alert",
            "<html><body>INR 250.00 spent at <b>CAFE X</b></body></html>",
        )])
        .await;
        let session = GmailSession::new(&server.url(), "token-123");

        let ids = session.search("newer_than:7d", 50).await.unwrap();
        assert_eq!(ids, vec!["18c1".to_string()]);

        let message = session.fetch("18c1").await.unwrap();
        assert_eq!(message.subject, "Credit transaction alert");
        assert_eq!(message.sender, "alerts@bank.example");
        assert_eq!(message.body, "INR 250.00 spent at CAFE X");
        assert!(message.received_at.is_some());

        let queries = server.queries();
        assert_eq!(queries, vec!["newer_than:7d".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_message_is_mail_error() {
        let server = MockGmailServer::start(vec![]).await;
        let session = GmailSession::new(&server.url(), "token-123");

        let err = session.fetch("nope").await.unwrap_err();
        assert!(matches!(err, Error::Mail(_)));
    }

    #[tokio::test]
    async fn test_refresh_token_exchange() {
        let server = MockGmailServer::start(vec![]).await;
        let token_url = format!("{}/token", server.url());

        let session =
            GmailSession::from_refresh_token(&server.url(), &token_url, "id", "secret", "refresh")
                .await
                .unwrap();
        assert_eq!(session.access_token().await.unwrap(), "mock-access-token-1");
        assert_eq!(session.account(), "me");
        assert_eq!(server.token_requests(), 1);
    }

    #[tokio::test]
    async fn test_rejected_token_is_refreshed_and_retried() {
        let server = MockGmailServer::start(vec![MockMail::new("18c1", "Alert", "INR 10")]).await;
        server.reject_token("mock-access-token-1");
        let token_url = format!("{}/token", server.url());

        let session =
            GmailSession::from_refresh_token(&server.url(), &token_url, "id", "secret", "refresh")
                .await
                .unwrap();

        // Every cycle keeps working after the first token goes stale
        for _ in 0..3 {
            let ids = session.search("newer_than:7d", 50).await.unwrap();
            assert_eq!(ids, vec!["18c1".to_string()]);
        }
        assert_eq!(server.token_requests(), 2);
        assert_eq!(session.access_token().await.unwrap(), "mock-access-token-2");
    }

    #[tokio::test]
    async fn test_expired_token_is_renewed_before_request() {
        let server = MockGmailServer::start(vec![]).await;
        let token_url = format!("{}/token", server.url());
        let session =
            GmailSession::from_refresh_token(&server.url(), &token_url, "id", "secret", "refresh")
                .await
                .unwrap();

        session.token.write().await.expires_at = Some(Utc::now() - Duration::seconds(1));

        assert!(session.search("newer_than:7d", 50).await.unwrap().is_empty());
        assert_eq!(server.token_requests(), 2);
    }

    #[tokio::test]
    async fn test_rejected_token_without_refresh_is_mail_error() {
        let server = MockGmailServer::start(vec![]).await;
        server.reject_token("stale");
        let session = GmailSession::new(&server.url(), "stale");

        let err = session.search("newer_than:7d", 50).await.unwrap_err();
        assert!(matches!(err, Error::Mail(_)));
        assert_eq!(server.token_requests(), 0);
    }
}
