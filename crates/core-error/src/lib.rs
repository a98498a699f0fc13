use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("network error during {command}: {cause}")]
    Network { command: String, cause: String },

    #[error("authentication failed ({mechanism}): {response}")]
    Auth {
        mechanism: AuthMechanism,
        response: String,
    },

    #[error("cannot select mailbox '{mailbox}': {cause}")]
    Mailbox { mailbox: String, cause: String },

    #[error("fetch failed during {command}: {cause}")]
    Fetch { command: String, cause: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Network,
    Auth,
    Mailbox,
    Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuthMechanism {
    #[serde(rename = "XOAUTH2")]
    XOAuth2,
    #[serde(rename = "LOGIN")]
    Login,
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::XOAuth2 => write!(f, "XOAUTH2"),
            Self::Login => write!(f, "LOGIN"),
        }
    }
}

impl MailError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn network(command: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Network {
            command: command.into(),
            cause: cause.to_string(),
        }
    }

    pub fn auth(mechanism: AuthMechanism, response: impl fmt::Display) -> Self {
        Self::Auth {
            mechanism,
            response: response.to_string(),
        }
    }

    pub fn mailbox(mailbox: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Mailbox {
            mailbox: mailbox.into(),
            cause: cause.to_string(),
        }
    }

    pub fn fetch(command: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Fetch {
            command: command.into(),
            cause: cause.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Network { .. } => ErrorKind::Network,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Mailbox { .. } => ErrorKind::Mailbox,
            Self::Fetch { .. } => ErrorKind::Fetch,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
    pub retryable: bool,
}

impl From<&MailError> for ErrorResponse {
    fn from(err: &MailError) -> Self {
        let (code, suggestion, retryable) = match err {
            MailError::Config { .. } => (
                "CONFIG_ERROR",
                Some("Check the provider and credential pairing (Gmail requires an OAuth token)"),
                false,
            ),
            MailError::Network { .. } => (
                "NETWORK_ERROR",
                Some("Check internet connection and try again"),
                true,
            ),
            MailError::Auth { .. } => (
                "AUTH_ERROR",
                Some("Credentials were rejected. Refresh the access token or password"),
                false,
            ),
            MailError::Mailbox { .. } => (
                "MAILBOX_ERROR",
                Some("The account may lack IMAP access to INBOX"),
                false,
            ),
            MailError::Fetch { .. } => ("FETCH_ERROR", None, false),
        };
        Self {
            code,
            kind: err.kind(),
            message: err.to_string(),
            suggestion,
            retryable,
        }
    }
}

impl ErrorResponse {
    pub fn to_compact(&self) -> String {
        let mut parts = vec![format!("[{}] {}", self.code, self.message)];
        if let Some(s) = self.suggestion {
            parts.push(format!("Suggestion: {s}"));
        }
        if self.retryable {
            parts.push("(retryable)".to_string());
        }
        parts.join(" | ")
    }
}
