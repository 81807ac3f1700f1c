// # Mail Transport Trait
//
// Defines the interface the Notifier uses to deliver mail.
//
// ## Implementations
//
// - SMTP via lettre: `ipwatch-notify-smtp` crate
//
// A transport opens one session per notification; the session sends one
// message per recipient and is closed afterwards.

use async_trait::async_trait;

use crate::config::Recipient;

/// A rendered message for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Sender address
    pub from: String,
    /// Recipient
    pub to: Recipient,
    /// Subject line
    pub subject: String,
    /// HTML body
    pub html_body: String,
}

/// An open mail session
#[async_trait]
pub trait MailSession: Send {
    /// Send one message
    async fn send(&mut self, message: MailMessage) -> Result<(), crate::Error>;

    /// Close the session
    async fn close(self: Box<Self>) -> Result<(), crate::Error>;
}

/// Trait for mail transport implementations
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Dial the transport and open a session
    async fn open(&self) -> Result<Box<dyn MailSession>, crate::Error>;
}
