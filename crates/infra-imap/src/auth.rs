use std::cell::Cell;

/// SASL XOAUTH2 initial response; the imap crate base64-frames it.
pub(crate) struct XOAuth2 {
    response: String,
    sent: Cell<bool>,
}

impl XOAuth2 {
    pub(crate) fn new(email: &str, token: &str) -> Self {
        Self {
            response: initial_response(email, token),
            sent: Cell::new(false),
        }
    }
}

pub(crate) fn initial_response(email: &str, token: &str) -> String {
    format!("user={email}\x01auth=Bearer {token}\x01\x01")
}

impl imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&self, _challenge: &[u8]) -> Self::Response {
        // a second challenge carries the server's JSON error; answer empty so it sends NO
        if self.sent.replace(true) {
            String::new()
        } else {
            self.response.clone()
        }
    }
}
