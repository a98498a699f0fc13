use std::num::NonZeroUsize;

use mailscope_error::MailError;

use crate::entities::{ProviderKind, RawMessage};

/// An authenticated mailbox with INBOX selected.
///
/// Implementations hold one protocol stream; callers needing shared access
/// must serialize through a single owner.
pub trait MailboxPort: Send {
    fn provider(&self) -> &ProviderKind;

    /// The newest `n` messages (or all, if fewer), oldest of the batch first.
    fn fetch_latest(&mut self, n: NonZeroUsize) -> Result<Vec<RawMessage>, MailError>;

    /// Best-effort LOGOUT, then drop the connection.
    fn close(self: Box<Self>);
}

/// An unauthenticated session for one provider.
///
/// `connect` consumes the connector: a failed attempt cannot be retried on
/// the same value.
pub trait Connector: Send {
    fn provider(&self) -> &ProviderKind;

    fn connect(self: Box<Self>) -> Result<Box<dyn MailboxPort>, MailError>;
}
