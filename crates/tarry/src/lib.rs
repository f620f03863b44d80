//! Tarry: Timeout-Bounded Condition Polling for Remote-Tree Test Clients
//!
//! Test clients that drive a remote, self-mutating tree (a browser page, a
//! device UI over marionette) constantly need to "wait until". Tarry provides
//! one poller that gets that right, and element waits on top of it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     TARRY Architecture                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────────┐        │
//! │   │  Waiter    │    │  Poller    │    │  RemoteClient  │        │
//! │   │ (element,  │───►│ (interval, │───►│ (find, display │        │
//! │   │  alert)    │    │  deadline) │    │  eval, timeout)│        │
//! │   └────────────┘    └────────────┘    └────────────────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tarry::prelude::*;
//!
//! let remote = Arc::new(MockRemote::new());
//! remote.schedule(Duration::from_millis(20), Mutation::insert("#banner"));
//!
//! let waiter = Waiter::new(remote.clone());
//! waiter
//!     .wait_for_element("#banner", &WaitOptions::new().with_interval(5).with_timeout(1_000))
//!     .unwrap();
//! ```

#![warn(missing_docs)]

mod alert;
mod ambient;
mod client;
mod config;
mod poll;
mod result;
#[cfg(feature = "async")]
mod task;
mod wait;

/// In-memory remote tree for tests
pub mod mock;

pub use alert::{AlertMatcher, ALERT_MESSAGE_SCRIPT};
pub use ambient::AmbientTimeoutGuard;
pub use client::{ClientError, ClientResult, ElementRef, ElementTarget, RemoteClient};
pub use config::{PollConfig, WaitOptions, DEFAULT_POLL_INTERVAL_MS, INHERIT_TIMEOUT};
pub use poll::{Check, IntoCheck, PollOutcome, Poller, Resolution, WaitResult};
pub use result::{TarryError, TarryResult};
#[cfg(feature = "async")]
pub use task::PollHandle;
pub use wait::{Condition, Visibility, Waiter};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::alert::*;
    pub use super::ambient::*;
    pub use super::client::*;
    pub use super::config::*;
    pub use super::mock::{MockRemote, Mutation};
    pub use super::poll::*;
    pub use super::result::*;
    #[cfg(feature = "async")]
    pub use super::task::*;
    pub use super::wait::*;
}
