use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use mailscope_domain::{
    Credentials, DecodeIssue, DecodedField, Degradation, ParsedMessage, ProviderConfig,
    ProviderKind, RawMessage,
};
use mailscope_error::MailError;
use tokio::task::JoinError;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Account {
    pub config: ProviderConfig,
    pub credentials: Credentials,
}

#[derive(Debug, Clone)]
pub struct FetchReport {
    pub provider: ProviderKind,
    pub messages: Vec<ParsedMessage>,
    pub elapsed: Duration,
}

/// One account per provider. Every fetch opens its own session on a
/// blocking thread, so accounts never share a connection.
pub struct InboxService {
    accounts: HashMap<ProviderKind, Account>,
}

impl Default for InboxService {
    fn default() -> Self {
        Self::new()
    }
}

impl InboxService {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        config: ProviderConfig,
        credentials: Credentials,
    ) -> Result<(), MailError> {
        config.check_credentials(&credentials)?;
        let provider = config.kind().clone();
        info!(%provider, user = credentials.user(), "registered account");
        self.accounts.insert(
            provider,
            Account {
                config,
                credentials,
            },
        );
        Ok(())
    }

    pub fn get(&self, provider: &ProviderKind) -> Result<&Account, MailError> {
        self.accounts
            .get(provider)
            .ok_or_else(|| MailError::config(format!("no account registered for {provider}")))
    }

    pub fn available_providers(&self) -> Vec<ProviderKind> {
        let mut providers: Vec<ProviderKind> = self.accounts.keys().cloned().collect();
        providers.sort_by_key(|p| p.to_string());
        providers
    }

    pub async fn fetch_latest(
        &self,
        provider: &ProviderKind,
        limit: usize,
    ) -> Result<FetchReport, MailError> {
        let n = fetch_count(limit)?;
        let account = self.get(provider)?.clone();
        fetch_account(account, n).await
    }

    /// Fetches every registered account concurrently; results are sorted by
    /// provider name and every account gets an entry.
    pub async fn fetch_all(
        &self,
        limit: usize,
    ) -> Result<Vec<(ProviderKind, Result<FetchReport, MailError>)>, MailError> {
        let n = fetch_count(limit)?;
        let mut accounts: Vec<Account> = self.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.config.kind().to_string());

        let handles: Vec<_> = accounts
            .into_iter()
            .map(|account| {
                let provider = account.config.kind().clone();
                (provider, tokio::spawn(fetch_account(account, n)))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (provider, handle) in handles {
            results.push(settle(provider, handle.await));
        }
        Ok(results)
    }
}

/// A task that died still reports against its provider.
fn settle(
    provider: ProviderKind,
    joined: Result<Result<FetchReport, MailError>, JoinError>,
) -> (ProviderKind, Result<FetchReport, MailError>) {
    let result = joined.unwrap_or_else(|e| {
        warn!(%provider, "fetch task failed: {e}");
        Err(MailError::fetch("session task", e))
    });
    (provider, result)
}

async fn fetch_account(account: Account, n: NonZeroUsize) -> Result<FetchReport, MailError> {
    let provider = account.config.kind().clone();
    let start = Instant::now();

    let raw = tokio::task::spawn_blocking(move || {
        let connector = mailscope_imap::connector_for(account.config, account.credentials)?;
        let mut mailbox = connector.connect()?;
        let result = mailbox.fetch_latest(n);
        mailbox.close();
        result
    })
    .await
    .map_err(|e| MailError::fetch("session task", e))??;

    let messages = decode_batch(raw).await;
    let elapsed = start.elapsed();
    info!(
        %provider,
        count = messages.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "fetched and decoded"
    );

    Ok(FetchReport {
        provider,
        messages,
        elapsed,
    })
}

/// Decodes each message on its own blocking task; output order matches input.
pub async fn decode_batch(raw: Vec<RawMessage>) -> Vec<ParsedMessage> {
    let handles: Vec<_> = raw
        .into_iter()
        .map(|msg| tokio::task::spawn_blocking(move || mailscope_mime::parse(msg.as_bytes())))
        .collect();

    let mut parsed = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(msg) => parsed.push(msg),
            Err(e) => {
                warn!("decode task failed: {e}");
                parsed.push(ParsedMessage {
                    degradations: vec![Degradation {
                        field: DecodedField::Structure,
                        issue: DecodeIssue::Unparseable(e.to_string()),
                    }],
                    ..Default::default()
                });
            }
        }
    }
    parsed
}

fn fetch_count(limit: usize) -> Result<NonZeroUsize, MailError> {
    NonZeroUsize::new(limit).ok_or_else(|| MailError::config("fetch count must be at least 1"))
}
