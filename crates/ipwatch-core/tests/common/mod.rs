//! Test doubles and common utilities for watcher contract tests
//!
//! The doubles are scripted in memory and count every call so tests can
//! assert on what the watcher did without any network or disk access.

#![allow(dead_code)]

use async_trait::async_trait;
use ipwatch_core::config::{
    EventHandlerConfig, EventsConfig, Recipient, SmtpConfig, SourceConfig, WatcherConfig,
};
use ipwatch_core::error::{Error, Result};
use ipwatch_core::traits::{
    AddressEntry, AddressResolver, HistoryStore, IpVersion, MailMessage, MailSession,
    MailTransport, NewEntry, ResolvedAddress,
};
use ipwatch_core::{MemoryHistoryStore, Watcher, WatcherEvent};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const SOURCE_URL: &str = "http://resolver.test/ip";

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Resolver returning scripted results in order
///
/// The last scripted result repeats once the script is exhausted.
pub struct ScriptedResolver {
    script: Mutex<VecDeque<std::result::Result<IpAddr, String>>>,
    last: Mutex<Option<std::result::Result<IpAddr, String>>>,
    delays: Mutex<VecDeque<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new(script: Vec<std::result::Result<IpAddr, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            delays: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always resolve to `address`
    pub fn fixed(address: IpAddr) -> Self {
        Self::new(vec![Ok(address)])
    }

    /// Always fail
    pub fn failing(message: &str) -> Self {
        Self::new(vec![Err(message.to_string())])
    }

    /// Sleep for the given durations on the first calls, in order
    pub fn with_delays(self, delays: Vec<Duration>) -> Self {
        *self.delays.lock().unwrap() = delays.into();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressResolver for ScriptedResolver {
    async fn request_address(&self, _version: IpVersion) -> Result<ResolvedAddress> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut script = self.script.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = script.pop_front() {
                *last = Some(next.clone());
            }
            last.clone().expect("resolver script is empty")
        };

        match next {
            Ok(address) => Ok(ResolvedAddress::new(address, SOURCE_URL)),
            Err(message) => Err(Error::fetch(message)),
        }
    }
}

/// Memory history store whose reads or writes can be made to fail
#[derive(Clone, Default)]
pub struct FaultyHistoryStore {
    inner: MemoryHistoryStore,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    creates: Arc<AtomicUsize>,
}

impl FaultyHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already holding one entry for `address`
    pub async fn seeded(address: IpAddr) -> Self {
        let store = Self::new();
        store
            .inner
            .create(NewEntry::first(address, SOURCE_URL, IpVersion::V4))
            .await
            .unwrap();
        store
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful create calls made through this double
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub async fn all(&self) -> Vec<AddressEntry> {
        self.inner.entries(None).await.unwrap()
    }
}

#[async_trait]
impl HistoryStore for FaultyHistoryStore {
    async fn create(&self, entry: NewEntry) -> Result<AddressEntry> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::database("disk full"));
        }
        let entry = self.inner.create(entry).await?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(entry)
    }

    async fn most_recent(&self, version: IpVersion) -> Result<Option<AddressEntry>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::database("connection lost"));
        }
        self.inner.most_recent(version).await
    }

    async fn entries(&self, version: Option<IpVersion>) -> Result<Vec<AddressEntry>> {
        self.inner.entries(version).await
    }
}

/// Mail transport recording every delivered message
#[derive(Clone, Default)]
pub struct RecordingMailTransport {
    delivered: Arc<Mutex<Vec<MailMessage>>>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    fail_open: Arc<AtomicBool>,
    fail_close: Arc<AtomicBool>,
    reject_address: Arc<Mutex<Option<String>>>,
    send_delay: Arc<Mutex<Option<Duration>>>,
}

impl RecordingMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Reject every message addressed to `address`
    pub fn reject(&self, address: &str) {
        *self.reject_address.lock().unwrap() = Some(address.to_string());
    }

    /// Sleep before every send
    pub fn delay_sends(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = Some(delay);
    }

    pub fn delivered(&self) -> Vec<MailMessage> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for RecordingMailTransport {
    async fn open(&self) -> Result<Box<dyn MailSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::notifier("dial tcp: connection refused"));
        }
        Ok(Box::new(RecordingSession {
            transport: self.clone(),
        }))
    }
}

struct RecordingSession {
    transport: RecordingMailTransport,
}

#[async_trait]
impl MailSession for RecordingSession {
    async fn send(&mut self, message: MailMessage) -> Result<()> {
        let delay = *self.transport.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rejected = self.transport.reject_address.lock().unwrap().clone();
        if rejected.as_deref() == Some(message.to.address.as_str()) {
            return Err(Error::notifier("550 mailbox unavailable"));
        }

        self.transport.delivered.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.transport.closes.fetch_add(1, Ordering::SeqCst);
        if self.transport.fail_close.load(Ordering::SeqCst) {
            return Err(Error::notifier("quit: broken pipe"));
        }
        Ok(())
    }
}

pub fn recipient(name: &str, address: &str) -> Recipient {
    Recipient {
        name: name.to_string(),
        address: address.to_string(),
    }
}

pub fn smtp(recipients: Vec<Recipient>) -> SmtpConfig {
    SmtpConfig {
        server: "smtp.test".to_string(),
        port: 587,
        username: "watcher".to_string(),
        password: "secret".to_string(),
        from_address: "watcher@example.com".to_string(),
        recipients,
    }
}

pub fn notify_only() -> Option<EventHandlerConfig> {
    Some(EventHandlerConfig {
        notify: true,
        actions: Vec::new(),
    })
}

/// Configuration with one v4 source, a 60s interval and the given events
pub fn config(events: EventsConfig) -> WatcherConfig {
    let mut config = WatcherConfig::new(vec![SourceConfig::text("test").with_v4(SOURCE_URL)], 60);
    config.watcher.events = events;
    config
}

/// Configuration with notifications enabled for two recipients
pub fn notifying_config(events: EventsConfig) -> WatcherConfig {
    let mut config = config(events);
    config.flags.notify = true;
    config.watcher.smtp = Some(smtp(vec![
        recipient("Alice", "alice@example.com"),
        recipient("Bob", "bob@example.com"),
    ]));
    config
}

/// A watcher running in the background
pub struct Running {
    pub watcher: Arc<Watcher>,
    pub events: mpsc::Receiver<WatcherEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl Running {
    pub fn start(watcher: Watcher, events: mpsc::Receiver<WatcherEvent>) -> Self {
        let watcher = Arc::new(watcher);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let runner = watcher.clone();
        let handle = tokio::spawn(async move { runner.run_with_shutdown(shutdown_rx).await });

        Self {
            watcher,
            events,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Wait for the first event matching `predicate`, returning every
    /// event received up to and including it
    pub async fn wait_for<P>(&mut self, predicate: P) -> Vec<WatcherEvent>
    where
        P: Fn(&WatcherEvent) -> bool,
    {
        let mut seen = Vec::new();
        let found = tokio::time::timeout(Duration::from_secs(3600), async {
            while let Some(event) = self.events.recv().await {
                let done = predicate(&event);
                seen.push(event);
                if done {
                    return true;
                }
            }
            false
        })
        .await;

        assert!(
            matches!(found, Ok(true)),
            "expected event never arrived, saw {:?}",
            seen
        );
        seen
    }

    /// Signal shutdown, wait for the run to end and return the remaining events
    pub async fn stop(&mut self) -> Vec<WatcherEvent> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let result = tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("watcher stops within 5 seconds")
                .expect("watcher task does not panic");
            assert!(result.is_ok(), "watcher run failed: {:?}", result);
        }

        let mut rest = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            rest.push(event);
        }
        rest
    }
}

pub fn is_dispatched(event: &WatcherEvent, expected: ipwatch_core::EventType) -> bool {
    matches!(event, WatcherEvent::Dispatched { event } if *event == expected)
}
