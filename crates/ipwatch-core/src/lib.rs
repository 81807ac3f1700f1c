// # ipwatch-core
//
// Core library for the public address watcher.
//
// ## Architecture Overview
//
// The watcher periodically resolves the host's public address, compares it
// with the last recorded value and reacts to the outcome:
// - **AddressResolver**: Trait for querying the current public address
// - **HistoryStore**: Trait for the append-only address history
// - **MailTransport**: Trait for outbound mail sessions
// - **ActionRunner**: Runs configured external commands with a deadline
// - **Notifier**: Renders and sends one mail per recipient
// - **EventDispatcher**: Maps an event to its configured handler
// - **Watcher**: Drives the poll loop and the error-consumption loop
//
// ## Design Principles
//
// 1. **Explicit configuration**: Every component receives its settings in
//    its constructor, nothing is read from globals
// 2. **Message passing**: Components report failures through one error
//    sink with a single consumer
// 3. **Typed events**: Each event carries exactly the fields its handler
//    needs

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod traits;

pub use config::{ActionConfig, EventHandlerConfig, SourceConfig, WatcherConfig};
pub use engine::{
    ActionRunner, DispatchContext, ErrorSink, EventDispatcher, EventType, Notifier, TaskTracker,
    Watcher, WatcherEvent,
};
pub use error::{Error, ErrorKind, Result};
pub use history::{FileHistoryStore, MemoryHistoryStore};
pub use traits::{AddressResolver, HistoryStore, IpVersion, MailTransport};
