use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";
pub const GMAIL_SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("gmail token file `{path}` is missing; run `servyy gmail-authorize` first")]
    MissingToken { path: PathBuf },
    #[error("gmail token file `{path}` is unreadable: {message}")]
    InvalidToken { path: PathBuf, message: String },
    #[error("client secrets file `{path}` is unreadable: {message}")]
    InvalidClientSecrets { path: PathBuf, message: String },
    #[error("gmail token has expired and carries no refresh token")]
    NotRefreshable,
    #[error("token endpoint rejected the request: {0}")]
    TokenRefresh(String),
    #[error("gmail transport error: {0}")]
    Transport(String),
    #[error("gmail returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    Rejected(String),
}

/// A fully resolved message ready for delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Google "authorized user" credential file, as written by the installed-app
/// OAuth flow.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorizedUserToken {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl fmt::Debug for AuthorizedUserToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedUserToken")
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish()
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl AuthorizedUserToken {
    /// True when there is no access token, or it expires within a minute.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match (&self.token, self.expiry) {
            (None, _) => true,
            (Some(_), Some(expiry)) => expiry <= now + chrono::Duration::seconds(EXPIRY_MARGIN_SECS),
            (Some(_), None) => false,
        }
    }

    pub async fn load(path: &Path) -> Result<Self, MailError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(MailError::MissingToken { path: path.to_path_buf() })
            }
            Err(error) => {
                return Err(MailError::InvalidToken {
                    path: path.to_path_buf(),
                    message: error.to_string(),
                })
            }
        };
        serde_json::from_str(&raw).map_err(|error| MailError::InvalidToken {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }

    pub async fn store(&self, path: &Path) -> Result<(), MailError> {
        let encoded = serde_json::to_string_pretty(self).map_err(|error| {
            MailError::InvalidToken { path: path.to_path_buf(), message: error.to_string() }
        })?;
        tokio::fs::write(path, encoded).await.map_err(|error| MailError::InvalidToken {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// OAuth client description from a Google Cloud `credentials.json`.
#[derive(Clone, Debug, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<OAuthClient>,
    web: Option<OAuthClient>,
}

impl OAuthClient {
    pub async fn load(path: &Path) -> Result<Self, MailError> {
        let invalid = |message: String| MailError::InvalidClientSecrets {
            path: path.to_path_buf(),
            message,
        };
        let raw =
            tokio::fs::read_to_string(path).await.map_err(|error| invalid(error.to_string()))?;
        let file: ClientSecretsFile =
            serde_json::from_str(&raw).map_err(|error| invalid(error.to_string()))?;
        file.installed
            .or(file.web)
            .ok_or_else(|| invalid("expected an `installed` or `web` client".to_string()))
    }

    /// Consent URL for the send-only scope with offline access.
    pub fn consent_url(&self, redirect_uri: &str) -> Result<Url, MailError> {
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", GMAIL_SEND_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|error| MailError::Transport(format!("invalid auth_uri: {error}")))
    }

    pub async fn exchange_authorization_code(
        &self,
        http: &reqwest::Client,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizedUserToken, MailError> {
        let response = http
            .post(&self.token_uri)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|error| MailError::Transport(error.to_string()))?;

        let token = decode_token_response(response).await?;
        let expiry = token.expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        Ok(AuthorizedUserToken {
            token: Some(token.access_token),
            refresh_token: token.refresh_token,
            token_uri: self.token_uri.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scopes: scopes_or_default(token.scope),
            expiry,
        })
    }
}

fn scopes_or_default(scope: Option<String>) -> Vec<String> {
    match scope {
        Some(scope) if !scope.trim().is_empty() => {
            scope.split_whitespace().map(str::to_string).collect()
        }
        _ => vec![GMAIL_SEND_SCOPE.to_string()],
    }
}

async fn decode_token_response(response: reqwest::Response) -> Result<TokenResponse, MailError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MailError::TokenRefresh(format!("{status}: {body}")));
    }
    response.json::<TokenResponse>().await.map_err(|error| MailError::TokenRefresh(error.to_string()))
}

/// Sends through the Gmail REST API with a stored authorized-user token,
/// refreshing and persisting it when it is about to expire.
pub struct GmailTransport {
    http: reqwest::Client,
    token_path: PathBuf,
    send_url: String,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl GmailTransport {
    pub fn new(token_path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, MailError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| MailError::Transport(error.to_string()))?;
        Ok(Self {
            http,
            token_path: token_path.into(),
            send_url: GMAIL_SEND_URL.to_string(),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_send_url(mut self, send_url: impl Into<String>) -> Self {
        self.send_url = send_url.into();
        self
    }

    async fn access_token(&self) -> Result<String, MailError> {
        let _guard = self.refresh_lock.lock().await;
        let mut token = AuthorizedUserToken::load(&self.token_path).await?;

        if token.needs_refresh(Utc::now()) {
            self.refresh(&mut token).await?;
            token.store(&self.token_path).await?;
            info!(event_name = "agent.gmail.token_refreshed", "gmail access token refreshed");
        }

        token.token.ok_or(MailError::NotRefreshable)
    }

    async fn refresh(&self, token: &mut AuthorizedUserToken) -> Result<(), MailError> {
        let refresh_token = token.refresh_token.clone().ok_or(MailError::NotRefreshable)?;
        let response = self
            .http
            .post(&token.token_uri)
            .form(&[
                ("client_id", token.client_id.as_str()),
                ("client_secret", token.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|error| MailError::Transport(error.to_string()))?;

        let refreshed = decode_token_response(response).await?;
        token.token = Some(refreshed.access_token);
        token.expiry = refreshed.expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        if let Some(rotated) = refreshed.refresh_token {
            token.refresh_token = Some(rotated);
        }
        Ok(())
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let access_token = self.access_token().await?;
        let raw = URL_SAFE.encode(build_mime_message(email));

        let response = self
            .http
            .post(&self.send_url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map_err(|error| MailError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(event_name = "agent.gmail.send_failed", status = status.as_u16(), "gmail send failed");
            return Err(MailError::Status { status: status.as_u16(), body });
        }

        info!(
            event_name = "agent.gmail.sent",
            recipients = email.to.len() + email.cc.len(),
            "email dispatched"
        );
        Ok(())
    }
}

/// Single-part HTML message with a base64 body.
pub fn build_mime_message(email: &OutgoingEmail) -> String {
    let mut message = String::new();
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/html; charset=\"utf-8\"\r\n");
    message.push_str("Content-Transfer-Encoding: base64\r\n");
    message.push_str(&format!("To: {}\r\n", address_header(&email.to)));
    if !email.cc.is_empty() {
        message.push_str(&format!("Cc: {}\r\n", address_header(&email.cc)));
    }
    message.push_str(&format!("Subject: {}\r\n", encode_header(&email.subject)));
    message.push_str("\r\n");

    let body = STANDARD.encode(email.html_body.as_bytes());
    for line in body.as_bytes().chunks(76) {
        message.push_str(&String::from_utf8_lossy(line));
        message.push_str("\r\n");
    }
    message
}

// Longest base64 payload that keeps `=?utf-8?b?...?=` within 75 characters.
const ENCODED_WORD_MAX_BYTES: usize = 45;

fn address_header(addresses: &[String]) -> String {
    addresses
        .iter()
        .map(|address| address.replace(|c: char| c.is_control(), ""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn encode_header(value: &str) -> String {
    let single_line = value.replace(['\r', '\n'], " ");
    if single_line.is_ascii() {
        return single_line;
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in single_line.chars() {
        if chunk.len() + ch.len_utf8() > ENCODED_WORD_MAX_BYTES {
            words.push(format!("=?utf-8?b?{}?=", STANDARD.encode(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?utf-8?b?{}?=", STANDARD.encode(chunk.as_bytes())));
    }
    words.join("\r\n ")
}

/// In-process transport that records deliveries, optionally failing them.
#[derive(Default)]
pub struct RecordingMailTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
    failure: Option<String>,
}

impl RecordingMailTransport {
    pub fn failing(message: impl Into<String>) -> Self {
        Self { sent: Mutex::default(), failure: Some(message.into()) }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        if let Some(message) = &self.failure {
            return Err(MailError::Rejected(message.clone()));
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(email.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    use super::{
        build_mime_message, AuthorizedUserToken, MailError, OAuthClient, OutgoingEmail,
        GMAIL_SEND_SCOPE,
    };

    fn token(expiry: Option<chrono::DateTime<Utc>>) -> AuthorizedUserToken {
        AuthorizedUserToken {
            token: Some("ya29.access".to_string()),
            refresh_token: Some("1//refresh".to_string()),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            client_id: "client.apps.googleusercontent.com".to_string(),
            client_secret: "shh".to_string(),
            scopes: vec![GMAIL_SEND_SCOPE.to_string()],
            expiry,
        }
    }

    #[test]
    fn refresh_is_needed_inside_the_expiry_margin() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid time");

        assert!(token(Some(now + Duration::seconds(30))).needs_refresh(now));
        assert!(token(Some(now - Duration::seconds(1))).needs_refresh(now));
        assert!(!token(Some(now + Duration::minutes(30))).needs_refresh(now));
        assert!(!token(None).needs_refresh(now));

        let mut missing = token(None);
        missing.token = None;
        assert!(missing.needs_refresh(now));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let debug = format!("{:?}", token(None));
        assert!(!debug.contains("ya29.access"));
        assert!(!debug.contains("1//refresh"));
    }

    #[tokio::test]
    async fn token_file_in_google_format_loads_and_round_trips() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("token.json");
        tokio::fs::write(
            &path,
            r#"{"token": "ya29.a0", "refresh_token": "1//0g", "token_uri": "https://oauth2.googleapis.com/token",
                "client_id": "id", "client_secret": "secret",
                "scopes": ["https://www.googleapis.com/auth/gmail.send"],
                "universe_domain": "googleapis.com", "account": "",
                "expiry": "2026-01-01T10:00:00.123456Z"}"#,
        )
        .await
        .expect("write token");

        let loaded = AuthorizedUserToken::load(&path).await.expect("load token");
        assert_eq!(loaded.token.as_deref(), Some("ya29.a0"));
        assert!(loaded.expiry.is_some());

        loaded.store(&path).await.expect("store");
        let reloaded = AuthorizedUserToken::load(&path).await.expect("reload");
        assert_eq!(reloaded.expiry, loaded.expiry);
    }

    #[tokio::test]
    async fn missing_token_file_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let error = AuthorizedUserToken::load(&dir.path().join("absent.json"))
            .await
            .expect_err("missing file");
        assert!(matches!(error, MailError::MissingToken { .. }));
    }

    #[tokio::test]
    async fn installed_client_secrets_build_a_consent_url() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("credentials.json");
        tokio::fs::write(
            &path,
            r#"{"installed": {"client_id": "abc.apps.googleusercontent.com", "client_secret": "s",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "redirect_uris": ["http://localhost"]}}"#,
        )
        .await
        .expect("write secrets");

        let client = OAuthClient::load(&path).await.expect("load client");
        let url = client.consent_url("http://127.0.0.1:8765/").expect("url");

        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("scope".to_string(), GMAIL_SEND_SCOPE.to_string())));
        assert!(query.contains(&("access_type".to_string(), "offline".to_string())));
        assert!(query.contains(&("client_id".to_string(), "abc.apps.googleusercontent.com".to_string())));
    }

    #[test]
    fn mime_message_carries_headers_and_base64_body() {
        let email = OutgoingEmail {
            to: vec!["a@x.com".to_string(), "b@x.com".to_string()],
            cc: Vec::new(),
            subject: "Quick intro".to_string(),
            html_body: "<p>Hello</p>".to_string(),
        };

        let message = build_mime_message(&email);

        assert!(message.contains("To: a@x.com, b@x.com\r\n"));
        assert!(!message.contains("Cc:"));
        assert!(message.contains("Subject: Quick intro\r\n"));
        assert!(message.contains(&STANDARD.encode("<p>Hello</p>")));
    }

    #[test]
    fn non_ascii_subject_is_encoded_word() {
        let email = OutgoingEmail {
            to: vec!["a@x.com".to_string()],
            cc: vec!["c@x.com".to_string()],
            subject: "Café ☕".to_string(),
            html_body: String::new(),
        };

        let message = build_mime_message(&email);

        assert!(message.contains("Cc: c@x.com\r\n"));
        assert!(message.contains("Subject: =?utf-8?b?"));
    }

    #[test]
    fn long_non_ascii_subject_folds_into_short_encoded_words() {
        let subject = "Présentation de nos services de développement web ☕ pour l'équipe commerciale";
        let email = OutgoingEmail {
            to: vec!["a@x.com".to_string()],
            cc: Vec::new(),
            subject: subject.to_string(),
            html_body: String::new(),
        };

        let message = build_mime_message(&email);
        let header_start = message.find("Subject: ").expect("subject header") + "Subject: ".len();
        let header_end = message[header_start..].find("\r\n\r\n").expect("header end") + header_start;
        let words: Vec<&str> = message[header_start..header_end].split("\r\n ").collect();

        assert!(words.len() > 1);
        let mut decoded = Vec::new();
        for word in &words {
            assert!(word.len() <= 75, "{word}");
            let payload = word
                .strip_prefix("=?utf-8?b?")
                .and_then(|rest| rest.strip_suffix("?="))
                .expect("encoded word");
            decoded.extend(STANDARD.decode(payload).expect("base64"));
        }
        assert_eq!(String::from_utf8(decoded).expect("utf8"), subject);
    }

    #[test]
    fn address_headers_cannot_smuggle_extra_lines() {
        let email = OutgoingEmail {
            to: vec!["a@x.com\r\nBcc: hidden@evil.io".to_string()],
            cc: vec!["c@x.com\nX-Extra: 1".to_string()],
            subject: "Hi".to_string(),
            html_body: String::new(),
        };

        let message = build_mime_message(&email);

        assert!(!message.contains("\r\nBcc:"));
        assert!(!message.contains("\nX-Extra:"));
    }
}
