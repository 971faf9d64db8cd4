//! Streaming subscription protocol.
//!
//! A stream is one connection carrying one subscription: the client writes a
//! single `events_stream` request line, reads a handshake response line, and
//! then consumes an unbounded sequence of item lines until the daemon closes
//! or the caller cancels.
//!
//! Two timing regimes apply to the same socket. The connect and handshake
//! are bounded by the request timeout; once the handshake succeeds the read
//! timeout is lifted entirely, because heartbeats may be sparse and an idle
//! long-lived stream must not be torn down by a per-read deadline.
//!
//! Delivery is best-effort by design: blank lines are skipped and lines that
//! do not parse as a JSON object are dropped without ending the stream. The
//! `since_event_id`/`since_ts` resume cursors make losses recoverable, so
//! one corrupt heartbeat never invalidates a subscription. Do not tighten
//! this into a hard failure.

use std::collections::{BTreeSet, HashMap};
use std::io::{BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::endpoint::Endpoint;
use crate::error::{ApiError, Error, Result};
use crate::protocol::{Request, Response, StreamItem};
use crate::transport::{self, read_line_bounded, Connection};
use crate::MAX_LINE_BYTES;

/// Filters and overrides for an event subscription.
///
/// # Example
/// ```rust,no_run
/// use cohort_client::{Client, StreamOptions};
///
/// let client = Client::discover();
/// let opts = StreamOptions::new()
///     .kinds(["chat", "system"])
///     .since_event_id("e_1041");
/// for item in client.events_stream("g_1", "observer", opts)? {
///     println!("{:?}", item?);
/// }
/// # Ok::<(), cohort_client::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    kinds: Option<BTreeSet<String>>,
    since_event_id: Option<String>,
    since_ts: Option<DateTime<Utc>>,
    timeout: Option<Duration>,
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict delivery to the given event kinds. Duplicates and blank
    /// entries are discarded; the wire form is always sorted so identical
    /// filters produce identical request lines.
    pub fn kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = kinds
            .into_iter()
            .map(|k| k.into().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        self.kinds = Some(set);
        self
    }

    /// Resume after a known event id.
    pub fn since_event_id(mut self, id: impl Into<String>) -> Self {
        self.since_event_id = Some(id.into());
        self
    }

    /// Resume after a point in time.
    pub fn since_ts(mut self, ts: DateTime<Utc>) -> Self {
        self.since_ts = Some(ts);
        self
    }

    /// Override the client timeout for the connect + handshake phase of
    /// this subscription only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }

    /// Build the subscription `args` map. Omitted filters are absent from
    /// the map entirely ("no restriction").
    pub fn to_args(&self, group_id: &str, by: &str) -> HashMap<String, Value> {
        let mut args = HashMap::new();
        args.insert("group_id".to_string(), json!(group_id));
        args.insert("by".to_string(), json!(by));
        if let Some(kinds) = &self.kinds {
            // BTreeSet iteration order is the sorted wire order.
            let kinds: Vec<&str> = kinds.iter().map(String::as_str).collect();
            args.insert("kinds".to_string(), json!(kinds));
        }
        if let Some(id) = &self.since_event_id {
            args.insert("since_event_id".to_string(), json!(id));
        }
        if let Some(ts) = &self.since_ts {
            args.insert(
                "since_ts".to_string(),
                json!(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        args
    }
}

/// Cancellation handle for an [`EventStream`].
///
/// Cloneable and thread-safe. [`StreamCloser::close`] shuts the underlying
/// socket down, which unblocks a read in progress on another thread;
/// closing twice, or closing a stream the daemon already ended, is a no-op.
#[derive(Clone, Debug)]
pub struct StreamCloser {
    inner: Arc<CloserInner>,
}

#[derive(Debug)]
struct CloserInner {
    conn: Option<Connection>,
    closed: AtomicBool,
}

impl StreamCloser {
    fn new(conn: Option<Connection>) -> Self {
        Self {
            inner: Arc::new(CloserInner {
                conn,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Cancel the subscription by closing the socket. Safe at any time,
    /// from any thread, any number of times.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            if let Some(conn) = &self.inner.conn {
                let _ = conn.shutdown();
            }
        }
    }

    /// Whether [`close`](StreamCloser::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// A live event subscription: a lazy, unbounded, non-restartable sequence
/// of [`StreamItem`]s in daemon write order.
///
/// Iteration blocks on the next line with no timeout. The sequence ends
/// cleanly (`None`, no error) when the daemon closes the connection or the
/// stream is [closed](EventStream::close); a transport fault mid-stream
/// yields one final `Err` before ending. Dropping the stream closes it.
#[derive(Debug)]
pub struct EventStream {
    reader: Option<BufReader<Connection>>,
    closer: StreamCloser,
}

impl EventStream {
    /// Connect, subscribe, and complete the handshake.
    ///
    /// The timeout covers connect + handshake only. A daemon that accepts
    /// the connection but closes it without a handshake line produces an
    /// empty stream, not an error; a daemon that answers `ok:false` is
    /// surfaced as [`Error::Api`] so callers can distinguish a rejected
    /// filter from a mid-stream disconnect.
    pub fn open(endpoint: &Endpoint, request: &Request, timeout: Duration) -> Result<EventStream> {
        let mut conn = transport::connect(endpoint, timeout)?;
        debug!(op = %request.op, endpoint = %endpoint, "opening event stream");

        let line = request
            .to_ndjson_line()
            .map_err(|e| Error::unavailable(format!("cannot encode request: {e}")))?;
        conn.write_all(line.as_bytes())
            .and_then(|_| conn.flush())
            .map_err(|e| Error::unavailable(format!("write failed: {e}")))?;

        let closer = StreamCloser::new(conn.try_clone().ok());
        let mut reader = BufReader::new(conn);

        let first = read_line_bounded(&mut reader, MAX_LINE_BYTES)
            .map_err(|e| Error::unavailable(format!("handshake read failed: {e}")))?;
        let Some(first) = first else {
            // Daemon closed without a handshake: a valid, already-finished
            // stream.
            return Ok(EventStream {
                reader: None,
                closer,
            });
        };

        let text = String::from_utf8_lossy(&first);
        let handshake = Response::from_ndjson_line(&text)
            .map_err(|e| Error::unavailable(format!("invalid stream handshake (not json): {e}")))?;
        if !handshake.ok {
            return Err(Error::Api(ApiError::from_response(handshake)));
        }

        // Handshake done; reads are unbounded from here on.
        reader.get_ref().clear_read_timeout()?;

        Ok(EventStream {
            reader: Some(reader),
            closer,
        })
    }

    /// A cancellation handle usable from other threads.
    pub fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }

    /// Cancel the subscription. Equivalent to `self.closer().close()`.
    pub fn close(&self) {
        self.closer.close();
    }
}

impl Iterator for EventStream {
    type Item = Result<StreamItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            match read_line_bounded(reader, MAX_LINE_BYTES) {
                Ok(None) => {
                    self.reader = None;
                    return None;
                }
                Err(e) => {
                    self.reader = None;
                    if self.closer.is_closed() {
                        // Caller-initiated cancellation; not a fault.
                        return None;
                    }
                    return Some(Err(Error::unavailable(format!("stream read failed: {e}"))));
                }
                Ok(Some(raw)) => {
                    let text = String::from_utf8_lossy(&raw);
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let value: Value = match serde_json::from_str(text) {
                        Ok(v) => v,
                        Err(_) => {
                            trace!(bytes = raw.len(), "dropping non-json stream line");
                            continue;
                        }
                    };
                    if !value.is_object() {
                        trace!("dropping non-object stream line");
                        continue;
                    }
                    // Objects with an unknown or missing tag are tolerated
                    // as `Other` rather than dropped.
                    let item =
                        serde_json::from_value::<StreamItem>(value).unwrap_or(StreamItem::Other);
                    return Some(Ok(item));
                }
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.closer.close();
    }
}
