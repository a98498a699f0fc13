mod auth;
pub mod session;

pub use session::{connector_for, MailSession, ReadySession, TlsStream};
