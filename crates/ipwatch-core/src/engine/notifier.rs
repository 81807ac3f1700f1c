//! Notifier
//!
//! Renders one HTML mail per recipient for an event and sends them over a
//! single transport session.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::dispatcher::DispatchContext;
use crate::config::{Recipient, SmtpConfig};
use crate::error::{ErrorKind, Result};
use crate::traits::{MailMessage, MailTransport};

/// Subject line of every notification
pub const SUBJECT: &str = "Update on your public address!";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sends event notifications to a static recipient list
pub struct Notifier {
    from: String,
    recipients: Vec<Recipient>,
    transport: Arc<dyn MailTransport>,
}

impl Notifier {
    /// Create a notifier
    pub fn new(from: impl Into<String>, recipients: Vec<Recipient>, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            from: from.into(),
            recipients,
            transport,
        }
    }

    /// Create a notifier from the smtp settings
    pub fn from_config(config: &SmtpConfig, transport: Arc<dyn MailTransport>) -> Self {
        Self::new(config.from_address.clone(), config.recipients.clone(), transport)
    }

    /// Configured recipients
    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Send one message per recipient for `ctx`
    ///
    /// A failed send is logged and the remaining recipients are still
    /// served. Failing to open or close the session is returned.
    pub async fn notify_mail(&self, ctx: &DispatchContext) -> Result<()> {
        let mut session = self
            .transport
            .open()
            .await
            .map_err(|e| e.reclassify(ErrorKind::Notifier))?;

        for recipient in &self.recipients {
            let message = MailMessage {
                from: self.from.clone(),
                to: recipient.clone(),
                subject: SUBJECT.to_string(),
                html_body: render(ctx, &recipient.name),
            };

            if let Err(e) = session.send(message).await {
                warn!(
                    recipient = %recipient.address,
                    error = %e,
                    "could not send email"
                );
            }
        }

        session
            .close()
            .await
            .map_err(|e| e.reclassify(ErrorKind::Notifier))?;

        debug!(event = %ctx.event_type(), recipients = self.recipients.len(), "notification sent");
        Ok(())
    }
}

/// Render the HTML body for `ctx` addressed to `name`
pub fn render(ctx: &DispatchContext, name: &str) -> String {
    match ctx {
        DispatchContext::Change {
            timestamp,
            previous_address,
            current_address,
            source,
        } => page(
            "Your Public IP Address Has Updated",
            &format!(
                "Hello <strong>{}</strong>, your public IP address has been changed. Here are the details:",
                name
            ),
            &[
                ("Previous Address", previous_address.to_string()),
                ("Current Address", current_address.to_string()),
                ("Updated at", format_timestamp(timestamp)),
                ("Information Source", source.clone()),
            ],
        ),
        DispatchContext::Match { timestamp, source } => page(
            "Your Public IP Address Has <strong>Not</strong> Changed",
            &format!(
                "Hello <strong>{}</strong>, your public IP address is still the same. Here are the details:",
                name
            ),
            &[
                ("At", format_timestamp(timestamp)),
                ("Information Source", source.clone()),
            ],
        ),
        DispatchContext::Error {
            timestamp, error, ..
        } => page(
            "Watcher Error",
            &format!(
                "Hello <strong>{}</strong>, an error occurred while watching your address. Here are the details:",
                name
            ),
            &[("At", format_timestamp(timestamp)), ("Error", error.clone())],
        ),
    }
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn page(title: &str, greeting: &str, details: &[(&str, String)]) -> String {
    let items: String = details
        .iter()
        .map(|(label, value)| format!("\n\t\t\t\t<li><strong>{}:</strong> {}</li>", label, value))
        .collect();

    format!(
        r#"<html>
	<head>
		<title>Watcher Report</title>
	</head>
	<body style="font-family: Arial, sans-serif;">
		<div style="background-color: #f0f0f0; padding: 20px;">
			<h1 style="color: #333;">{title}</h1>
			<p style="font-size: 16px;">{greeting}</p>
			<ul style="font-size: 16px;">{items}
			</ul>
		</div>
	</body>
	</html>"#
    )
}
