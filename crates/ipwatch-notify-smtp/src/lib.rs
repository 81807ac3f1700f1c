// # SMTP Mail Transport
//
// Delivers notifier mail through an SMTP relay using lettre.
//
// ## Behavior
//
// - `open` dials the relay once and keeps that connection for the whole
//   session; port 465 uses implicit TLS, any other port upgrades with
//   STARTTLS when the server offers it
// - credentials are only sent when a username is configured
// - every message is sent as `text/html` with the recipient's display
//   name on the `To` header
// - `close` ends the session with QUIT; a relay that rejects it or has
//   already dropped the connection fails the close

use async_trait::async_trait;
use ipwatch_core::config::{Recipient, SmtpConfig};
use ipwatch_core::traits::{MailMessage, MailSession, MailTransport};
use ipwatch_core::{Error, Result};
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::Address;
use std::time::Duration;
use tracing::debug;

/// Port on which the relay expects TLS from the first byte
const IMPLICIT_TLS_PORT: u16 = 465;

const DIAL_TIMEOUT: Duration = Duration::from_secs(60);

/// SMTP relay transport
pub struct SmtpTransport {
    server: String,
    port: u16,
    username: String,
    password: String,
}

impl SmtpTransport {
    /// Create a transport for `server:port` authenticating as `username`
    pub fn new(
        server: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            port,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Create a transport from the smtp settings
    pub fn from_config(config: &SmtpConfig) -> Self {
        Self::new(
            config.server.clone(),
            config.port,
            config.username.clone(),
            config.password.clone(),
        )
    }

    async fn dial(&self) -> std::result::Result<AsyncSmtpConnection, lettre::transport::smtp::Error> {
        let hello = ClientId::default();
        let tls = TlsParameters::new(self.server.clone())?;
        let (wrapped, upgrade) = if self.port == IMPLICIT_TLS_PORT {
            (Some(tls), None)
        } else {
            (None, Some(tls))
        };

        let mut conn = AsyncSmtpConnection::connect_tokio1(
            (self.server.as_str(), self.port),
            Some(DIAL_TIMEOUT),
            &hello,
            wrapped,
            None,
        )
        .await?;

        if let Some(tls) = upgrade {
            if conn.can_starttls() {
                conn.starttls(tls, &hello).await?;
            }
        }

        if !self.username.is_empty() {
            let credentials = Credentials::new(self.username.clone(), self.password.clone());
            if let Err(e) = conn.auth(&[Mechanism::Plain, Mechanism::Login], &credentials).await {
                conn.abort().await;
                return Err(e);
            }
        }

        Ok(conn)
    }
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn open(&self) -> Result<Box<dyn MailSession>> {
        let conn = self.dial().await.map_err(|e| {
            Error::notifier(format!("could not dial {}:{}: {}", self.server, self.port, e))
        })?;

        debug!(server = %self.server, port = self.port, "smtp session opened");
        Ok(Box::new(SmtpSession { conn }))
    }
}

/// One SMTP connection shared by every message of a notification
struct SmtpSession {
    conn: AsyncSmtpConnection,
}

#[async_trait]
impl MailSession for SmtpSession {
    async fn send(&mut self, message: MailMessage) -> Result<()> {
        let recipient = message.to.address.clone();
        let email = build_message(message)?;

        self.conn
            .send(email.envelope(), &email.formatted())
            .await
            .map_err(|e| Error::notifier(format!("SMTP send: {}", e)))?;

        debug!(recipient = %recipient, "email sent");
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut conn = self.conn;
        if conn.has_broken() {
            return Err(Error::notifier("SMTP quit: connection already broken"));
        }

        conn.quit()
            .await
            .map_err(|e| Error::notifier(format!("SMTP quit: {}", e)))?;

        debug!("smtp session closed");
        Ok(())
    }
}

/// Build the lettre message for `message`
pub fn build_message(message: MailMessage) -> Result<Message> {
    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| Error::notifier(format!("invalid from address '{}': {}", message.from, e)))?;

    let to = recipient_mailbox(&message.to)?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject)
        .header(ContentType::TEXT_HTML)
        .body(message.html_body)
        .map_err(|e| Error::notifier(format!("build email: {}", e)))
}

fn recipient_mailbox(recipient: &Recipient) -> Result<Mailbox> {
    let address: Address = recipient.address.parse().map_err(|e| {
        Error::notifier(format!(
            "invalid recipient address '{}': {}",
            recipient.address, e
        ))
    })?;

    let name = (!recipient.name.is_empty()).then(|| recipient.name.clone());
    Ok(Mailbox::new(name, address))
}
