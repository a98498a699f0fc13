use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use mailscope_error::{AuthMechanism, MailError};

pub const IMAPS_PORT: u16 = 993;
pub const INBOX: &str = "INBOX";
pub const FALLBACK_ATTACHMENT_NAME: &str = "attachment";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gmail,
    Outlook,
    Generic(String),
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gmail => write!(f, "gmail"),
            Self::Outlook => write!(f, "outlook"),
            Self::Generic(host) => write!(f, "imap:{host}"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(host) = s.strip_prefix("imap:") {
            let host = host.trim();
            if host.is_empty() {
                return Err("generic provider needs a host, e.g. imap:mail.example.com".to_string());
            }
            return Ok(Self::Generic(host.to_string()));
        }
        match s.to_lowercase().as_str() {
            "gmail" | "google" => Ok(Self::Gmail),
            "outlook" | "office365" | "hotmail" => Ok(Self::Outlook),
            _ => Err(format!("unknown provider: {s}")),
        }
    }
}

/// Which credential variants a provider accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPolicy {
    BearerOnly,
    Any,
}

impl AuthPolicy {
    pub fn allows(self, credentials: &Credentials) -> bool {
        match self {
            Self::BearerOnly => matches!(credentials, Credentials::BearerToken { .. }),
            Self::Any => true,
        }
    }
}

/// Immutable description of one IMAP endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    kind: ProviderKind,
    host: String,
    port: u16,
    auth: AuthPolicy,
    timeout: Option<Duration>,
}

impl ProviderConfig {
    /// Endpoint table: adding a provider means adding a variant and a row here.
    pub fn for_provider(kind: ProviderKind) -> Self {
        let (host, auth) = match &kind {
            ProviderKind::Gmail => ("imap.gmail.com".to_string(), AuthPolicy::BearerOnly),
            ProviderKind::Outlook => ("outlook.office365.com".to_string(), AuthPolicy::Any),
            ProviderKind::Generic(host) => (host.clone(), AuthPolicy::Any),
        };
        Self {
            kind,
            host,
            port: IMAPS_PORT,
            auth,
            timeout: None,
        }
    }

    /// Deadline used for the TCP connect and for every socket read/write.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        self.auth
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn check_credentials(&self, credentials: &Credentials) -> Result<(), MailError> {
        if self.auth.allows(credentials) {
            return Ok(());
        }
        Err(MailError::config(format!(
            "{} accepts only OAuth bearer tokens, got {} credentials",
            self.kind,
            credentials.mechanism()
        )))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    BearerToken { email: String, token: String },
    PasswordLogin { username: String, password: String },
}

impl Credentials {
    pub fn bearer(email: impl Into<String>, token: impl Into<String>) -> Self {
        Self::BearerToken {
            email: email.into(),
            token: token.into(),
        }
    }

    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::PasswordLogin {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        match self {
            Self::BearerToken { email, .. } => email,
            Self::PasswordLogin { username, .. } => username,
        }
    }

    pub fn mechanism(&self) -> AuthMechanism {
        match self {
            Self::BearerToken { .. } => AuthMechanism::XOAuth2,
            Self::PasswordLogin { .. } => AuthMechanism::Login,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BearerToken { email, .. } => f
                .debug_struct("BearerToken")
                .field("email", email)
                .field("token", &"<redacted>")
                .finish(),
            Self::PasswordLogin { username, .. } => f
                .debug_struct("PasswordLogin")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// One full RFC 822 message exactly as the server returned it.
#[derive(Clone, PartialEq, Eq)]
pub struct RawMessage(Vec<u8>);

impl RawMessage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for RawMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for RawMessage {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawMessage({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedMessage {
    pub subject: String,
    pub from: String,
    pub to: String,
    /// Verbatim `Date` header, not validated.
    pub date: String,
    pub text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<Degradation>,
}

impl ParsedMessage {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }

    pub fn degraded(&self, field: DecodedField) -> bool {
        self.degradations.iter().any(|d| d.field == field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub size_kb: f64,
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            size_kb: size_kb(content.len()),
            content,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.filename.is_empty() {
            FALLBACK_ATTACHMENT_NAME
        } else {
            &self.filename
        }
    }

    /// Guessed from the filename extension only; the declared content type is ignored.
    pub fn mime_type(&self) -> String {
        mime_guess::from_path(self.display_name())
            .first_or_octet_stream()
            .to_string()
    }
}

/// `len / 1024` rounded to two decimals, ties to even (1 byte reports 0.0,
/// 128 bytes 0.12).
///
/// `len * 100 / 1024` is exact in binary, so the tie test sees the true value.
pub fn size_kb(len: usize) -> f64 {
    (len as f64 * 100.0 / 1024.0).round_ties_even() / 100.0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub field: DecodedField,
    pub issue: DecodeIssue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodedField {
    Subject,
    From,
    To,
    TextBody,
    HtmlBody,
    AttachmentName(usize),
    AttachmentContent(usize),
    Structure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeIssue {
    UnsupportedCharset(String),
    MalformedBytes(String),
    BadTransferEncoding(String),
    Unparseable(String),
}

impl fmt::Display for DecodeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedCharset(c) => write!(f, "unsupported charset '{c}'"),
            Self::MalformedBytes(c) => write!(f, "bytes invalid for charset '{c}'"),
            Self::BadTransferEncoding(d) => write!(f, "bad transfer encoding: {d}"),
            Self::Unparseable(d) => write!(f, "unparseable: {d}"),
        }
    }
}
