//! Runtime core of the address watcher
//!
//! ## Architecture
//!
//! ```text
//!                  ┌─────────────────┐
//!                  │ AddressResolver │
//!                  └─────────────────┘
//!                           │ ResolvedAddress
//!                           ▼
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │ HistoryStore │◀──│   Watcher    │──▶│ EventDispatcher │
//! └──────────────┘   └──────────────┘   └─────────────────┘
//!                           ▲              │           │
//!                           │              ▼           ▼
//!                     ┌───────────┐  ┌──────────┐ ┌──────────────┐
//!                     │ ErrorSink │◀─│ Notifier │ │ ActionRunner │
//!                     └───────────┘  └──────────┘ └──────────────┘
//!                           ▲                            │
//!                           └────────────────────────────┘
//! ```
//!
//! Every failure funnels into the [`ErrorSink`]. Its single consumer, run
//! by the [`Watcher`], logs each error and dispatches `on_error` for every
//! kind except notifier errors.

pub mod dispatcher;
pub mod executor;
pub mod notifier;
pub mod tasks;
pub mod watcher;

pub use dispatcher::{DispatchContext, EventDispatcher, EventType};
pub use executor::ActionRunner;
pub use notifier::Notifier;
pub use tasks::{ErrorSink, TaskTracker};
pub use watcher::{Watcher, WatcherEvent, WatcherState};
