//! Mail provider capability.

mod traits;

pub use traits::{
    MailProvider, MessagePage, OutgoingEmail, ProviderError, Result, WebhookPayload,
};
