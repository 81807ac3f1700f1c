//! Event types, dispatch contexts and the event dispatcher
//!
//! The dispatcher maps an event to its configured handler and invokes the
//! Notifier and/or the Action Runner for it.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use super::executor::ActionRunner;
use super::notifier::Notifier;
use super::tasks::ErrorSink;
use crate::config::{EventHandlerConfig, EventsConfig};
use crate::error::{Error, ErrorKind};

/// Event types a handler can be configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Address differs from the last recorded one
    OnChange,
    /// Address equals the last recorded one
    OnMatch,
    /// A non-notifier failure occurred
    OnError,
}

impl EventType {
    /// Configuration key of the event
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::OnChange => "on_change",
            EventType::OnMatch => "on_match",
            EventType::OnError => "on_error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_change" => Ok(EventType::OnChange),
            "on_match" => Ok(EventType::OnMatch),
            "on_error" => Ok(EventType::OnError),
            other => Err(Error::config(format!("unknown event type '{}'", other))),
        }
    }
}

impl EventsConfig {
    /// Handler configured for `event`, if any
    pub fn handler(&self, event: EventType) -> Option<&EventHandlerConfig> {
        match event {
            EventType::OnChange => self.on_change.as_ref(),
            EventType::OnMatch => self.on_match.as_ref(),
            EventType::OnError => self.on_error.as_ref(),
        }
    }
}

/// Per-dispatch data, one variant per event type
///
/// The recipient name used by mail templates is supplied by the Notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchContext {
    /// The address changed
    Change {
        /// When the change was detected
        timestamp: DateTime<Utc>,
        /// Address recorded before this cycle
        previous_address: IpAddr,
        /// Address resolved in this cycle
        current_address: IpAddr,
        /// URL of the winning source
        source: String,
    },

    /// The address is unchanged
    Match {
        /// When the cycle ran
        timestamp: DateTime<Utc>,
        /// URL of the winning source
        source: String,
    },

    /// A component failed
    Error {
        /// When the error was consumed
        timestamp: DateTime<Utc>,
        /// Classification of the failure
        kind: ErrorKind,
        /// Rendered error message
        error: String,
    },
}

impl DispatchContext {
    /// Context for a detected change
    pub fn change(previous_address: IpAddr, current_address: IpAddr, source: impl Into<String>) -> Self {
        DispatchContext::Change {
            timestamp: Utc::now(),
            previous_address,
            current_address,
            source: source.into(),
        }
    }

    /// Context for an unchanged address
    pub fn matched(source: impl Into<String>) -> Self {
        DispatchContext::Match {
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// Context for a consumed error
    pub fn error(error: &Error) -> Self {
        DispatchContext::Error {
            timestamp: Utc::now(),
            kind: error.kind(),
            error: error.to_string(),
        }
    }

    /// The event this context belongs to
    pub fn event_type(&self) -> EventType {
        match self {
            DispatchContext::Change { .. } => EventType::OnChange,
            DispatchContext::Match { .. } => EventType::OnMatch,
            DispatchContext::Error { .. } => EventType::OnError,
        }
    }
}

/// Routes events to the configured handler
pub struct EventDispatcher {
    events: EventsConfig,
    notifier: Option<Arc<Notifier>>,
    runner: Option<ActionRunner>,
    errors: ErrorSink,
}

impl EventDispatcher {
    /// Create a dispatcher
    ///
    /// `notifier` and `runner` are `None` when notifications or action
    /// execution are disabled.
    pub fn new(
        events: EventsConfig,
        notifier: Option<Arc<Notifier>>,
        runner: Option<ActionRunner>,
        errors: ErrorSink,
    ) -> Self {
        Self {
            events,
            notifier,
            runner,
            errors,
        }
    }

    /// Dispatch one event
    ///
    /// Notifier failures are reported as notifier errors, which the error
    /// consumer logs without dispatching `on_error` again. Actions are
    /// submitted to the runner and not awaited.
    pub async fn dispatch(&self, ctx: DispatchContext) {
        let event = ctx.event_type();

        let Some(handler) = self.events.handler(event) else {
            debug!(event = %event, "no handler configured");
            return;
        };

        if handler.notify
            && let Some(notifier) = &self.notifier
        {
            match notifier.notify_mail(&ctx).await {
                Ok(()) => debug!(
                    event = %event,
                    recipients = notifier.recipients().len(),
                    "recipients notified"
                ),
                Err(e) => self.errors.report(e.reclassify(ErrorKind::Notifier)),
            }
        }

        if let Some(runner) = &self.runner {
            runner.execute_many(&handler.actions);
        }
    }
}
