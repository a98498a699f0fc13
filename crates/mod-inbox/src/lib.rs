pub mod format;
pub mod service;

pub use service::{decode_batch, Account, FetchReport, InboxService};
