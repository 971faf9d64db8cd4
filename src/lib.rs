//! # cohort-client
//!
//! Client SDK for cohortd, the cohort coordination daemon. cohortd owns
//! groups, actors, messages and context state; this crate speaks its
//! line-delimited JSON protocol over a local Unix domain socket or loopback
//! TCP, and verifies daemon compatibility by probing capabilities and
//! operations instead of trusting a bare version number.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cohort_client::{Client, Requirements, StreamOptions};
//!
//! let client = Client::discover();
//! client.assert_compatible(
//!     &Requirements::new()
//!         .capability("events_stream")
//!         .ops(["send", "inbox_list"]),
//! )?;
//!
//! client.send("g_1", "hello from rust", Default::default())?;
//!
//! for item in client.events_stream("g_1", "observer", StreamOptions::new())? {
//!     println!("{:?}", item?);
//! }
//! # Ok::<(), cohort_client::Error>(())
//! ```
//!
//! ## Protocol Overview
//!
//! All messages are NDJSON (newline-delimited JSON) over the discovered
//! endpoint:
//!
//! **Request:**
//! ```json
//! {"v":1,"op":"send","args":{"group_id":"g_1","text":"hi","by":"user"}}
//! ```
//!
//! **Response:**
//! ```json
//! {"ok":true,"result":{"event":{"id":"e_17"}}}
//! ```
//!
//! Unary calls open one connection per round trip. The `events_stream`
//! operation keeps its connection open after an initial handshake response
//! and pushes event/heartbeat lines until either side closes.
//!
//! The daemon's address comes from `~/.cohort/daemon/cohortd.addr.json`
//! (override the home with `COHORT_HOME`), falling back to the conventional
//! socket `~/.cohort/daemon/cohortd.sock`.

use std::time::Duration;

pub mod client;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod stream;
pub mod transport;

// Re-exports for convenience
pub use client::{ActorAddOptions, Client, MessageOptions, Requirements};
pub use endpoint::{default_home, Endpoint};
pub use error::{ApiError, Error, Result};
pub use protocol::{ErrorInfo, PingInfo, Request, Response, StreamItem};
pub use stream::{EventStream, StreamCloser, StreamOptions};

/// Protocol version this client speaks
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on any single protocol line, either direction
pub const MAX_LINE_BYTES: usize = 4_000_000;

/// Default per-call timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
