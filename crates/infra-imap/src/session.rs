use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::num::NonZeroUsize;
use std::time::Duration;

use mailscope_domain::{
    Connector, Credentials, MailboxPort, ProviderConfig, ProviderKind, RawMessage, INBOX,
};
use mailscope_error::{AuthMechanism, MailError};
use tracing::{debug, info};

use crate::auth::XOAuth2;

pub type TlsStream = native_tls::TlsStream<TcpStream>;

/// Fetch query for the full RFC 822 payload; PEEK leaves `\Seen` untouched.
const FETCH_QUERY: &str = "BODY.PEEK[]";

/// Unauthenticated session. Construction validates the credential pairing
/// and performs no I/O.
#[derive(Debug)]
pub struct MailSession {
    config: ProviderConfig,
    credentials: Credentials,
}

/// Factory for the provider-agnostic capability set.
pub fn connector_for(
    config: ProviderConfig,
    credentials: Credentials,
) -> Result<Box<dyn Connector>, MailError> {
    Ok(Box::new(MailSession::new(config, credentials)?))
}

impl MailSession {
    pub fn new(config: ProviderConfig, credentials: Credentials) -> Result<Self, MailError> {
        config.check_credentials(&credentials)?;
        Ok(Self {
            config,
            credentials,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// TLS handshake, authenticate, select INBOX.
    ///
    /// Consumes the session: on failure there is nothing left to retry with.
    pub fn connect(self) -> Result<ReadySession<TlsStream>, MailError> {
        let client = open_tls(&self.config)?;
        info!(
            provider = %self.config.kind(),
            host = self.config.host(),
            "IMAP connected"
        );
        self.establish(client)
    }

    /// Authenticate and select over an already-greeted client, for any
    /// transport.
    pub fn establish<T: Read + Write>(
        self,
        client: imap::Client<T>,
    ) -> Result<ReadySession<T>, MailError> {
        let mut session = authenticate(client, &self.credentials)?;
        info!(
            user = self.credentials.user(),
            mechanism = %self.credentials.mechanism(),
            "IMAP authenticated"
        );

        let mailbox = session.select(INBOX).map_err(|e| match e {
            imap::Error::No(text) | imap::Error::Bad(text) => MailError::mailbox(INBOX, text),
            other => MailError::network(format!("SELECT {INBOX}"), other),
        })?;
        info!(mailbox = INBOX, exists = mailbox.exists, "mailbox selected");

        Ok(ReadySession {
            provider: self.config.kind().clone(),
            session,
        })
    }
}

impl Connector for MailSession {
    fn provider(&self) -> &ProviderKind {
        self.config.kind()
    }

    fn connect(self: Box<Self>) -> Result<Box<dyn MailboxPort>, MailError> {
        let ready = (*self).connect()?;
        Ok(Box::new(ready))
    }
}

fn open_tls(config: &ProviderConfig) -> Result<imap::Client<TlsStream>, MailError> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| MailError::network("TLS init", e))?;

    let tcp = tcp_connect(config.host(), config.port(), config.timeout())?;
    tcp.set_read_timeout(config.timeout())
        .and_then(|_| tcp.set_write_timeout(config.timeout()))
        .map_err(|e| MailError::network("socket setup", e))?;

    let stream = tls
        .connect(config.host(), tcp)
        .map_err(|e| MailError::network("TLS handshake", e))?;

    let mut client = imap::Client::new(stream);
    client
        .read_greeting()
        .map_err(|e| MailError::network("IMAP greeting", e))?;
    Ok(client)
}

fn tcp_connect(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream, MailError> {
    let Some(timeout) = timeout else {
        return TcpStream::connect((host, port))
            .map_err(|e| MailError::network(format!("connect {host}:{port}"), e));
    };

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| MailError::network(format!("resolve {host}"), e))?
        .collect();

    let mut last_err = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, "connect attempt failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(match last_err {
        Some(e) => MailError::network(format!("connect {host}:{port}"), e),
        None => MailError::network(format!("resolve {host}"), "no addresses found"),
    })
}

fn authenticate<T: Read + Write>(
    client: imap::Client<T>,
    credentials: &Credentials,
) -> Result<imap::Session<T>, MailError> {
    match credentials {
        Credentials::BearerToken { email, token } => client
            .authenticate("XOAUTH2", &XOAuth2::new(email, token))
            .map_err(|(e, _)| auth_error(AuthMechanism::XOAuth2, e)),
        Credentials::PasswordLogin { username, password } => client
            .login(username, password)
            .map_err(|(e, _)| auth_error(AuthMechanism::Login, e)),
    }
}

fn auth_error(mechanism: AuthMechanism, err: imap::Error) -> MailError {
    match err {
        imap::Error::No(text) | imap::Error::Bad(text) => MailError::auth(mechanism, text),
        other => MailError::network(mechanism.to_string(), other),
    }
}

/// Authenticated session with INBOX selected.
///
/// Not shareable: every call needs `&mut self`, so one owner drives the
/// stream. Dropping it attempts LOGOUT.
pub struct ReadySession<T: Read + Write> {
    provider: ProviderKind,
    session: imap::Session<T>,
}

impl<T: Read + Write> ReadySession<T> {
    pub fn provider(&self) -> &ProviderKind {
        &self.provider
    }

    /// The newest `n` messages by sequence number, ascending. Fewer than `n`
    /// in the mailbox returns all of them. Any bad response fails the call.
    pub fn fetch_latest(&mut self, n: NonZeroUsize) -> Result<Vec<RawMessage>, MailError> {
        let all = self
            .session
            .search("ALL")
            .map_err(|e| command_error("SEARCH ALL", e))?;
        let ids = latest_ids(all, n);

        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            let command = format!("FETCH {id} {FETCH_QUERY}");
            let fetches = self
                .session
                .fetch(id.to_string(), FETCH_QUERY)
                .map_err(|e| command_error(&command, e))?;
            let body = fetches
                .iter()
                .find(|f| f.message == *id)
                .and_then(|f| f.body())
                .ok_or_else(|| MailError::fetch(&command, "response carried no message body"))?;
            debug!(id, bytes = body.len(), "fetched message");
            messages.push(RawMessage::from(body));
        }

        info!(
            provider = %self.provider,
            requested = n.get(),
            fetched = messages.len(),
            "fetched latest messages"
        );
        Ok(messages)
    }

    pub fn close(self) {}
}

impl<T: Read + Write> Drop for ReadySession<T> {
    fn drop(&mut self) {
        match self.session.logout() {
            Ok(()) => debug!(provider = %self.provider, "IMAP logout"),
            Err(e) => debug!(provider = %self.provider, "IMAP logout failed: {e}"),
        }
    }
}

impl<T: Read + Write + Send> MailboxPort for ReadySession<T> {
    fn provider(&self) -> &ProviderKind {
        &self.provider
    }

    fn fetch_latest(&mut self, n: NonZeroUsize) -> Result<Vec<RawMessage>, MailError> {
        ReadySession::fetch_latest(self, n)
    }

    fn close(self: Box<Self>) {
        (*self).close();
    }
}

/// Transport failures (including read deadlines) stay retryable network
/// errors; anything the server said or sent malformed is a fetch error.
fn command_error(command: &str, err: imap::Error) -> MailError {
    match err {
        imap::Error::Io(_) | imap::Error::ConnectionLost => MailError::network(command, err),
        other => MailError::fetch(command, other),
    }
}

/// Server SEARCH results are unordered; sequence numbers grow with arrival.
fn latest_ids(ids: HashSet<u32>, n: NonZeroUsize) -> Vec<u32> {
    let mut ids: Vec<u32> = ids.into_iter().collect();
    ids.sort_unstable();
    let skip = ids.len().saturating_sub(n.get());
    ids.split_off(skip)
}
