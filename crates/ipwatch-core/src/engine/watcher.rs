//! Watcher: the periodic scheduler
//!
//! The Watcher drives two loops:
//! - a poll loop on a fixed interval timer: resolve → compare → persist →
//!   dispatch
//! - an error-consumption loop turning every non-notifier error into an
//!   `on_error` dispatch
//!
//! ## Cycle Flow
//!
//! 1. Resolve the current address; on failure report a fetch error
//! 2. Read the most recent history entry for the tracked version
//! 3. Empty history: record the address (address == previous), no dispatch
//! 4. Same address: dispatch `on_match`
//! 5. Different address: record the change, dispatch `on_change`
//!
//! Dispatches run as tracked background tasks and never delay the next
//! tick.
//!
//! ## Overruns
//!
//! Cycles run inline in the poll loop, so they never overlap. Ticks missed
//! while a cycle overran the interval collapse into a single immediate
//! cycle; later cycles stay aligned to the original schedule.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::dispatcher::{DispatchContext, EventDispatcher, EventType};
use super::executor::ActionRunner;
use super::notifier::Notifier;
use super::tasks::{ErrorSink, TaskTracker};
use crate::config::{IpVersion, WatcherConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::traits::{AddressEntry, AddressResolver, HistoryStore, MailTransport, NewEntry};

/// Lifecycle of a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Constructed, not started
    Idle,
    /// Poll loop and error consumer are running
    Running,
    /// Shutdown requested
    Stopping,
    /// Terminal
    Stopped,
}

/// Events emitted by the Watcher for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// Watcher started
    Started {
        version: IpVersion,
        interval: Duration,
    },

    /// A history entry was recorded
    EntryCreated {
        entry: AddressEntry,
    },

    /// An event was handed to the dispatcher
    Dispatched {
        event: EventType,
    },

    /// The error consumer received an error
    ErrorObserved {
        kind: ErrorKind,
        message: String,
    },

    /// Watcher stopped
    Stopped {
        reason: String,
    },
}

/// Periodic address watcher
///
/// ## Lifecycle
///
/// 1. Create with [`Watcher::new()`]
/// 2. Start with [`Watcher::run()`]
/// 3. The watcher runs until an interrupt is received
/// 4. Optionally call [`Watcher::drain()`] to wait for in-flight
///    dispatches and actions
///
/// Stopping does not wait for dispatches, notifications or actions that
/// are still running.
pub struct Watcher {
    resolver: Arc<dyn AddressResolver>,
    history: Arc<dyn HistoryStore>,
    dispatcher: Arc<EventDispatcher>,
    version: IpVersion,
    interval: Duration,
    errors: ErrorSink,
    error_rx: Mutex<Option<mpsc::UnboundedReceiver<Error>>>,
    tasks: TaskTracker,
    event_tx: mpsc::Sender<WatcherEvent>,
    state: watch::Sender<WatcherState>,
}

impl Watcher {
    /// Create a new watcher
    ///
    /// # Parameters
    ///
    /// - `config`: Validated watcher configuration
    /// - `resolver`: Address resolver
    /// - `history`: History store
    /// - `mail`: Mail transport, required for notifications
    ///
    /// The action runner exists only when `flags.exec` is set, the
    /// notifier only when `flags.notify` is set and a transport is given.
    ///
    /// # Returns
    ///
    /// A tuple of (watcher, event_receiver) where event_receiver yields
    /// watcher events
    pub fn new(
        config: &WatcherConfig,
        resolver: Arc<dyn AddressResolver>,
        history: Arc<dyn HistoryStore>,
        mail: Option<Arc<dyn MailTransport>>,
    ) -> Result<(Self, mpsc::Receiver<WatcherEvent>)> {
        config.validate()?;

        let (errors, error_rx) = ErrorSink::channel();
        let tasks = TaskTracker::new();
        let settings = &config.watcher;

        let runner = config.flags.exec.then(|| {
            ActionRunner::new(settings.max_execution_time(), errors.clone(), tasks.clone())
        });

        let notifier = match (config.flags.notify, &settings.smtp, mail) {
            (true, Some(smtp), Some(transport)) => {
                Some(Arc::new(Notifier::from_config(smtp, transport)))
            }
            (true, _, None) => {
                warn!("notifications enabled but no mail transport given, notifier disabled");
                None
            }
            _ => None,
        };

        let dispatcher = Arc::new(EventDispatcher::new(
            settings.events.clone(),
            notifier,
            runner,
            errors.clone(),
        ));

        let (event_tx, event_rx) = mpsc::channel(settings.event_channel_capacity);
        let (state, _) = watch::channel(WatcherState::Idle);

        let watcher = Self {
            resolver,
            history,
            dispatcher,
            version: config.flags.version,
            interval: Duration::from_secs(settings.interval_secs),
            errors,
            error_rx: Mutex::new(Some(error_rx)),
            tasks,
            event_tx,
            state,
        };

        Ok((watcher, event_rx))
    }

    /// Current lifecycle state
    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle changes
    pub fn subscribe_state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    /// Sink for errors raised outside the watcher's own components
    pub fn error_sink(&self) -> ErrorSink {
        self.errors.clone()
    }

    /// Run until SIGINT
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for interrupt");
            }
        })
        .await
    }

    /// Run until `shutdown_rx` fires or its sender is dropped
    pub async fn run_with_shutdown(&self, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        self.run_until(async {
            let _ = shutdown_rx.await;
        })
        .await
    }

    /// Run until `shutdown` completes
    ///
    /// A watcher runs once; calling this again returns an error.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let error_rx = self
            .error_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::Other("watcher has already been started".to_string()))?;

        self.state.send_replace(WatcherState::Running);
        info!(version = %self.version, interval = ?self.interval, "watcher service is now running");
        self.emit_event(WatcherEvent::Started {
            version: self.version,
            interval: self.interval,
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let consumer = tokio::spawn(consume_errors(
            error_rx,
            stop_rx,
            self.dispatcher.clone(),
            self.tasks.clone(),
            self.event_tx.clone(),
        ));

        // First cycle one interval after start, like a ticker
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = self.run_cycle() => {}
            }
        }

        warn!("received shutdown signal, stopping watcher");
        self.state.send_replace(WatcherState::Stopping);

        let _ = stop_tx.send(());
        if let Err(e) = consumer.await {
            error!(error = %e, "error consumer terminated abnormally");
        }

        self.state.send_replace(WatcherState::Stopped);
        self.emit_event(WatcherEvent::Stopped {
            reason: "Shutdown signal".to_string(),
        });
        info!(in_flight = self.tasks.len(), "watcher stopped");

        Ok(())
    }

    /// Wait for in-flight dispatches and actions, up to `timeout`
    ///
    /// Returns `false` if some tasks were still running at the deadline.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tasks.drain(timeout).await
    }

    /// Run one poll cycle
    ///
    /// Exposed so a single cycle can be driven without the timer.
    pub async fn run_cycle(&self) {
        let resolved = match self.resolver.request_address(self.version).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.errors.report(e.reclassify(ErrorKind::Fetch));
                return;
            }
        };

        let latest = match self.history.most_recent(self.version).await {
            Ok(latest) => latest,
            Err(e) => {
                self.errors.report(e.reclassify(ErrorKind::Database));
                return;
            }
        };

        let Some(latest) = latest else {
            info!(address = %resolved.address, "no history yet, recording first address");
            let entry = NewEntry::first(resolved.address, resolved.source, self.version);
            self.record(entry).await;
            return;
        };

        if latest.address == resolved.address {
            debug!(address = %resolved.address, "no address changes");
            self.dispatch(DispatchContext::matched(resolved.source));
            return;
        }

        info!(
            previous_address = %latest.address,
            current_address = %resolved.address,
            "detected address change"
        );

        let entry = NewEntry::change(
            latest.address,
            resolved.address,
            resolved.source.clone(),
            self.version,
        );
        if self.record(entry).await {
            self.dispatch(DispatchContext::change(
                latest.address,
                resolved.address,
                resolved.source,
            ));
        }
    }

    /// Persist `entry`; reports a database error and returns false on failure
    async fn record(&self, entry: NewEntry) -> bool {
        match self.history.create(entry).await {
            Ok(entry) => {
                debug!(id = entry.id, address = %entry.address, "history entry created");
                self.emit_event(WatcherEvent::EntryCreated { entry });
                true
            }
            Err(e) => {
                self.errors.report(e.reclassify(ErrorKind::Database));
                false
            }
        }
    }

    fn dispatch(&self, ctx: DispatchContext) {
        spawn_dispatch(&self.dispatcher, &self.tasks, &self.event_tx, ctx);
    }

    fn emit_event(&self, event: WatcherEvent) {
        emit(&self.event_tx, event);
    }
}

fn spawn_dispatch(
    dispatcher: &Arc<EventDispatcher>,
    tasks: &TaskTracker,
    event_tx: &mpsc::Sender<WatcherEvent>,
    ctx: DispatchContext,
) {
    emit(event_tx, WatcherEvent::Dispatched {
        event: ctx.event_type(),
    });
    let dispatcher = dispatcher.clone();
    tasks.spawn(async move { dispatcher.dispatch(ctx).await });
}

fn emit(event_tx: &mpsc::Sender<WatcherEvent>, event: WatcherEvent) {
    if let Err(mpsc::error::TrySendError::Full(_)) = event_tx.try_send(event) {
        warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
    }
}

/// Single consumer of the error sink
///
/// Runs until `stop_rx` fires, then closes the sink and logs whatever was
/// still queued.
async fn consume_errors(
    mut error_rx: mpsc::UnboundedReceiver<Error>,
    mut stop_rx: oneshot::Receiver<()>,
    dispatcher: Arc<EventDispatcher>,
    tasks: TaskTracker,
    event_tx: mpsc::Sender<WatcherEvent>,
) {
    loop {
        let err = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            err = error_rx.recv() => match err {
                Some(err) => err,
                None => break,
            },
        };

        let kind = err.kind();
        error!(kind = %kind, error = %err, "unexpected error");
        emit(&event_tx, WatcherEvent::ErrorObserved {
            kind,
            message: err.to_string(),
        });

        if kind.triggers_on_error() {
            spawn_dispatch(&dispatcher, &tasks, &event_tx, DispatchContext::error(&err));
        }
    }

    // Errors already queued are still logged, without dispatching
    error_rx.close();
    while let Ok(err) = error_rx.try_recv() {
        let kind = err.kind();
        error!(kind = %kind, error = %err, "unexpected error");
        emit(&event_tx, WatcherEvent::ErrorObserved {
            kind,
            message: err.to_string(),
        });
    }
    debug!("error sink closed");
}
