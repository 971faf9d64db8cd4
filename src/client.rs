//! Client for calling cohortd operations.
//!
//! [`Client`] holds a resolved endpoint and a timeout; it keeps no open
//! connection and no other mutable state. Every unary call and every event
//! stream opens its own connection, so independent calls may run
//! concurrently from separate threads without coordination. Construct
//! explicit clients and pass them where needed — there is no process-wide
//! singleton.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{ApiError, Error, Result};
use crate::protocol::{error_codes, PingInfo, Request, Response};
use crate::stream::{EventStream, StreamOptions};
use crate::transport;
use crate::DEFAULT_TIMEOUT;

/// Operations that must never be probed with empty arguments during
/// negotiation: they either have side effects (`shutdown`), hold the
/// connection open (`events_stream`, `term_attach`), or are the probe
/// vehicle itself (`ping`).
const PROBE_EXEMPT_OPS: [&str; 4] = ["ping", "shutdown", "events_stream", "term_attach"];

/// A cohortd client.
///
/// # Example
///
/// ```rust,no_run
/// use cohort_client::Client;
///
/// let client = Client::discover();
/// let pong = client.ping()?;
/// println!("daemon: {:?}", pong.get("server"));
///
/// let result = client.call("group_show", serde_json::json!({"group_id": "g_1"}))?;
/// println!("group: {:?}", result);
/// # Ok::<(), cohort_client::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    endpoint: Endpoint,
    timeout: Duration,
}

impl Client {
    /// Create a client for an already-resolved endpoint.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client by discovering the endpoint under the default home
    /// (`$COHORT_HOME` or `~/.cohort`).
    pub fn discover() -> Self {
        Self::new(Endpoint::discover(None))
    }

    /// Create a client by discovering the endpoint under an explicit home
    /// directory.
    pub fn from_home(home: impl AsRef<Path>) -> Self {
        Self::new(Endpoint::discover(Some(home.as_ref())))
    }

    /// Set the per-call timeout (default 30s). For streams this bounds the
    /// connect + handshake phase only.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call an operation with a raw args map and return the full response
    /// envelope.
    ///
    /// An `ok:false` answer is raised as [`Error::Api`]; the returned
    /// envelope therefore always has `ok == true`.
    pub fn call_raw(&self, op: &str, args: HashMap<String, Value>) -> Result<Response> {
        let request = Request::new(op, args);
        let response = transport::call_daemon(&self.endpoint, &request, self.timeout)?;
        if !response.ok {
            return Err(Error::Api(ApiError::from_response(response)));
        }
        Ok(response)
    }

    /// Call an operation and return only the `result` payload.
    ///
    /// `args` may be a JSON object (used as-is), `null` (no arguments), or
    /// any other value (wrapped under a `"value"` key).
    pub fn call(&self, op: &str, args: Value) -> Result<Map<String, Value>> {
        let args_map: HashMap<String, Value> = match args {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => HashMap::new(),
            other => {
                let mut map = HashMap::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Ok(self.call_raw(op, args_map)?.result_object())
    }

    // ------------------------------------------------------------------
    // Compatibility negotiation
    // ------------------------------------------------------------------

    /// Fail fast with [`Error::Incompatible`] if the connected daemon does
    /// not satisfy `requirements`.
    ///
    /// Version strings are too coarse across rolling daemon upgrades, so
    /// this probes behavior instead: it pings for `ipc_v` and capability
    /// flags, then issues an empty-args call per required operation and
    /// checks for the `unknown_op` rejection. Any other error code (e.g.
    /// `missing_group_id`) proves the operation is recognized.
    ///
    /// Probing assumes the daemon's contract that every operation outside
    /// the lifecycle set (`ping`, `shutdown`, `events_stream`,
    /// `term_attach`) validates empty arguments without side effects. The
    /// client cannot verify that assumption; a daemon that violates it may
    /// see spurious no-op requests during negotiation.
    ///
    /// The result is recomputed on every call — nothing is cached, so two
    /// negotiations against an unchanged daemon return identical
    /// [`PingInfo`] and the same outcome.
    pub fn assert_compatible(&self, requirements: &Requirements) -> Result<PingInfo> {
        let envelope = self.call_raw("ping", HashMap::new())?;
        let ping = PingInfo::from_result(envelope.result.as_ref());

        if ping.ipc_v < requirements.min_ipc_v {
            return Err(Error::Incompatible(format!(
                "daemon ipc_v={} (require ipc_v>={})",
                ping.ipc_v, requirements.min_ipc_v
            )));
        }

        for cap in &requirements.capabilities {
            if !ping.capability(cap) {
                return Err(Error::Incompatible(format!(
                    "daemon capability missing: {cap}"
                )));
            }
        }

        for op in &requirements.ops {
            let op = op.trim();
            if op.is_empty() || PROBE_EXEMPT_OPS.contains(&op) {
                continue;
            }
            debug!(op, "probing operation support");
            match self.call_raw(op, HashMap::new()) {
                Ok(_) => {}
                Err(Error::Api(e)) if e.code == error_codes::UNKNOWN_OP => {
                    return Err(Error::Incompatible(format!(
                        "daemon does not support op: {op}"
                    )));
                }
                // Any other rejection means the op exists but the empty
                // probe arguments were (expectedly) invalid.
                Err(Error::Api(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(ping)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Ping the daemon; returns its identity, `ipc_v`, and capabilities.
    pub fn ping(&self) -> Result<Map<String, Value>> {
        self.call("ping", Value::Null)
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// List all groups.
    pub fn groups(&self) -> Result<Map<String, Value>> {
        self.call("groups", Value::Null)
    }

    /// Show one group.
    pub fn group_show(&self, group_id: &str) -> Result<Map<String, Value>> {
        self.call("group_show", json!({"group_id": group_id}))
    }

    /// Create a group.
    pub fn group_create(&self, title: &str, topic: &str, by: &str) -> Result<Map<String, Value>> {
        self.call(
            "group_create",
            json!({"title": title, "topic": topic, "by": by}),
        )
    }

    /// Patch group metadata.
    pub fn group_update(
        &self,
        group_id: &str,
        patch: Value,
        by: &str,
    ) -> Result<Map<String, Value>> {
        self.call(
            "group_update",
            json!({"group_id": group_id, "by": by, "patch": patch}),
        )
    }

    /// Delete a group.
    pub fn group_delete(&self, group_id: &str, by: &str) -> Result<Map<String, Value>> {
        self.call("group_delete", json!({"group_id": group_id, "by": by}))
    }

    /// Bind a working path to a group.
    pub fn group_use(&self, group_id: &str, path: &str, by: &str) -> Result<Map<String, Value>> {
        self.call(
            "group_use",
            json!({"group_id": group_id, "path": path, "by": by}),
        )
    }

    /// Set a group's lifecycle state.
    pub fn group_set_state(
        &self,
        group_id: &str,
        state: &str,
        by: &str,
    ) -> Result<Map<String, Value>> {
        self.call(
            "group_set_state",
            json!({"group_id": group_id, "state": state, "by": by}),
        )
    }

    /// Patch group settings.
    pub fn group_settings_update(
        &self,
        group_id: &str,
        patch: Value,
        by: &str,
    ) -> Result<Map<String, Value>> {
        self.call(
            "group_settings_update",
            json!({"group_id": group_id, "by": by, "patch": patch}),
        )
    }

    /// Start all actors in a group.
    pub fn group_start(&self, group_id: &str, by: &str) -> Result<Map<String, Value>> {
        self.call("group_start", json!({"group_id": group_id, "by": by}))
    }

    /// Stop all actors in a group.
    pub fn group_stop(&self, group_id: &str, by: &str) -> Result<Map<String, Value>> {
        self.call("group_stop", json!({"group_id": group_id, "by": by}))
    }

    // ------------------------------------------------------------------
    // Actors
    // ------------------------------------------------------------------

    /// List the actors of a group.
    pub fn actor_list(&self, group_id: &str) -> Result<Map<String, Value>> {
        self.call("actor_list", json!({"group_id": group_id}))
    }

    /// Add an actor to a group.
    pub fn actor_add(&self, group_id: &str, opts: ActorAddOptions) -> Result<Map<String, Value>> {
        let mut args = Map::new();
        args.insert("group_id".to_string(), json!(group_id));
        args.insert("by".to_string(), json!(opts.by));
        args.insert("runner".to_string(), json!(opts.runner));
        insert_if_some(&mut args, "actor_id", opts.actor_id);
        insert_if_some(&mut args, "title", opts.title);
        insert_if_some(&mut args, "runtime", opts.runtime);
        insert_if_some(&mut args, "default_scope_key", opts.default_scope_key);
        insert_if_some(&mut args, "submit", opts.submit);
        if let Some(command) = opts.command {
            args.insert("command".to_string(), json!(command));
        }
        if let Some(env) = opts.env {
            args.insert("env".to_string(), json!(env));
        }
        self.call("actor_add", Value::Object(args))
    }

    /// Remove an actor from a group.
    pub fn actor_remove(
        &self,
        group_id: &str,
        actor_id: &str,
        by: &str,
    ) -> Result<Map<String, Value>> {
        self.call(
            "actor_remove",
            json!({"group_id": group_id, "actor_id": actor_id, "by": by}),
        )
    }

    /// Start one actor.
    pub fn actor_start(
        &self,
        group_id: &str,
        actor_id: &str,
        by: &str,
    ) -> Result<Map<String, Value>> {
        self.call(
            "actor_start",
            json!({"group_id": group_id, "actor_id": actor_id, "by": by}),
        )
    }

    /// Stop one actor.
    pub fn actor_stop(
        &self,
        group_id: &str,
        actor_id: &str,
        by: &str,
    ) -> Result<Map<String, Value>> {
        self.call(
            "actor_stop",
            json!({"group_id": group_id, "actor_id": actor_id, "by": by}),
        )
    }

    /// Restart one actor.
    pub fn actor_restart(
        &self,
        group_id: &str,
        actor_id: &str,
        by: &str,
    ) -> Result<Map<String, Value>> {
        self.call(
            "actor_restart",
            json!({"group_id": group_id, "actor_id": actor_id, "by": by}),
        )
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Send a message to a group.
    pub fn send(
        &self,
        group_id: &str,
        text: &str,
        opts: MessageOptions,
    ) -> Result<Map<String, Value>> {
        let mut args = opts.to_args();
        args.insert("group_id".to_string(), json!(group_id));
        args.insert("text".to_string(), json!(text));
        self.call("send", Value::Object(args))
    }

    /// Send a message from one group into another.
    pub fn send_cross_group(
        &self,
        group_id: &str,
        dst_group_id: &str,
        text: &str,
        opts: MessageOptions,
    ) -> Result<Map<String, Value>> {
        let mut args = opts.to_args();
        args.remove("path");
        args.insert("group_id".to_string(), json!(group_id));
        args.insert("dst_group_id".to_string(), json!(dst_group_id));
        args.insert("text".to_string(), json!(text));
        self.call("send_cross_group", Value::Object(args))
    }

    /// Reply to an existing event.
    pub fn reply(
        &self,
        group_id: &str,
        reply_to: &str,
        text: &str,
        opts: MessageOptions,
    ) -> Result<Map<String, Value>> {
        let mut args = opts.to_args();
        args.remove("path");
        args.insert("group_id".to_string(), json!(group_id));
        args.insert("reply_to".to_string(), json!(reply_to));
        args.insert("text".to_string(), json!(text));
        self.call("reply", Value::Object(args))
    }

    /// Acknowledge an attention message. The daemon only accepts self-acks,
    /// so `by` defaults to the acting actor.
    pub fn chat_ack(
        &self,
        group_id: &str,
        actor_id: &str,
        event_id: &str,
        by: Option<&str>,
    ) -> Result<Map<String, Value>> {
        self.call(
            "chat_ack",
            json!({
                "group_id": group_id,
                "actor_id": actor_id,
                "event_id": event_id,
                "by": by.unwrap_or(actor_id),
            }),
        )
    }

    // ------------------------------------------------------------------
    // Inbox
    // ------------------------------------------------------------------

    /// List an actor's inbox.
    pub fn inbox_list(
        &self,
        group_id: &str,
        actor_id: &str,
        by: &str,
        limit: u32,
        kind_filter: &str,
    ) -> Result<Map<String, Value>> {
        self.call(
            "inbox_list",
            json!({
                "group_id": group_id,
                "actor_id": actor_id,
                "by": by,
                "limit": limit,
                "kind_filter": kind_filter,
            }),
        )
    }

    /// Mark one inbox entry read.
    pub fn inbox_mark_read(
        &self,
        group_id: &str,
        actor_id: &str,
        event_id: &str,
        by: &str,
    ) -> Result<Map<String, Value>> {
        self.call(
            "inbox_mark_read",
            json!({
                "group_id": group_id,
                "actor_id": actor_id,
                "event_id": event_id,
                "by": by,
            }),
        )
    }

    /// Mark all matching inbox entries read.
    pub fn inbox_mark_all_read(
        &self,
        group_id: &str,
        actor_id: &str,
        by: &str,
        kind_filter: &str,
    ) -> Result<Map<String, Value>> {
        self.call(
            "inbox_mark_all_read",
            json!({
                "group_id": group_id,
                "actor_id": actor_id,
                "by": by,
                "kind_filter": kind_filter,
            }),
        )
    }

    /// Acknowledge a notification. Self-only, like [`chat_ack`](Client::chat_ack).
    pub fn notify_ack(
        &self,
        group_id: &str,
        actor_id: &str,
        notify_event_id: &str,
        by: Option<&str>,
    ) -> Result<Map<String, Value>> {
        self.call(
            "notify_ack",
            json!({
                "group_id": group_id,
                "actor_id": actor_id,
                "notify_event_id": notify_event_id,
                "by": by.unwrap_or(actor_id),
            }),
        )
    }

    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    /// Fetch a group's context document.
    pub fn context_get(&self, group_id: &str) -> Result<Map<String, Value>> {
        self.call("context_get", json!({"group_id": group_id}))
    }

    /// Apply a batch of context operations.
    pub fn context_sync(
        &self,
        group_id: &str,
        ops: Vec<Value>,
        by: &str,
        dry_run: bool,
    ) -> Result<Map<String, Value>> {
        self.call(
            "context_sync",
            json!({"group_id": group_id, "by": by, "ops": ops, "dry_run": dry_run}),
        )
    }

    // ------------------------------------------------------------------
    // Event stream
    // ------------------------------------------------------------------

    /// Subscribe to a group's push event stream.
    ///
    /// Returns a handle yielding events and heartbeats as the daemon writes
    /// them; see [`EventStream`] for the delivery and cancellation
    /// contract.
    pub fn events_stream(
        &self,
        group_id: &str,
        by: &str,
        opts: StreamOptions,
    ) -> Result<EventStream> {
        let timeout = opts.timeout_or(self.timeout);
        let request = Request::new("events_stream", opts.to_args(group_id, by));
        EventStream::open(&self.endpoint, &request, timeout)
    }
}

fn insert_if_some(args: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        args.insert(key.to_string(), json!(value));
    }
}

/// What a daemon must support for this client to proceed.
///
/// # Example
/// ```rust,no_run
/// use cohort_client::{Client, Requirements};
///
/// let client = Client::discover();
/// let ping = client.assert_compatible(
///     &Requirements::new()
///         .capability("events_stream")
///         .ops(["send", "reply", "inbox_list"]),
/// )?;
/// println!("daemon ipc_v={}", ping.ipc_v);
/// # Ok::<(), cohort_client::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Requirements {
    min_ipc_v: i64,
    capabilities: BTreeSet<String>,
    ops: Vec<String>,
}

impl Requirements {
    /// Requirements with `min_ipc_v = 1` and nothing else.
    pub fn new() -> Self {
        Self {
            min_ipc_v: 1,
            capabilities: BTreeSet::new(),
            ops: Vec::new(),
        }
    }

    /// Require a minimum `ipc_v`.
    pub fn min_ipc_v(mut self, v: i64) -> Self {
        self.min_ipc_v = v;
        self
    }

    /// Require a capability flag to be advertised truthy.
    pub fn capability(mut self, name: impl Into<String>) -> Self {
        self.capabilities.insert(name.into());
        self
    }

    /// Require an operation to be supported (verified by probing).
    pub fn op(mut self, name: impl Into<String>) -> Self {
        self.ops.push(name.into());
        self
    }

    /// Require several operations at once.
    pub fn ops<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ops.extend(names.into_iter().map(Into::into));
        self
    }
}

impl Default for Requirements {
    fn default() -> Self {
        Self::new()
    }
}

/// Optional fields shared by [`Client::send`], [`Client::reply`], and
/// [`Client::send_cross_group`].
#[derive(Debug, Clone)]
pub struct MessageOptions {
    /// Sending principal. Defaults to `"user"`.
    pub by: String,
    /// Explicit recipient actor ids; omitted means group-routed.
    pub to: Option<Vec<String>>,
    /// Delivery priority (`"normal"` or `"attention"`).
    pub priority: String,
    /// Ask recipients to reply; sent only when set.
    pub reply_required: bool,
    /// Scope path for the message; consumed by `send` only.
    pub path: Option<String>,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            by: "user".to_string(),
            to: None,
            priority: "normal".to_string(),
            reply_required: false,
            path: None,
        }
    }
}

impl MessageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by(mut self, by: impl Into<String>) -> Self {
        self.by = by.into();
        self
    }

    pub fn to<I, S>(mut self, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to = Some(to.into_iter().map(Into::into).collect());
        self
    }

    pub fn priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn reply_required(mut self, required: bool) -> Self {
        self.reply_required = required;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    fn to_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("by".to_string(), json!(self.by));
        args.insert("priority".to_string(), json!(self.priority));
        if let Some(to) = &self.to {
            args.insert("to".to_string(), json!(to));
        }
        if self.reply_required {
            args.insert("reply_required".to_string(), json!(true));
        }
        if let Some(path) = &self.path {
            args.insert("path".to_string(), json!(path));
        }
        args
    }
}

/// Optional fields for [`Client::actor_add`].
#[derive(Debug, Clone)]
pub struct ActorAddOptions {
    pub by: String,
    pub actor_id: Option<String>,
    pub title: Option<String>,
    pub runtime: Option<String>,
    /// Runner backend. Defaults to `"pty"`.
    pub runner: String,
    pub command: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,
    pub default_scope_key: Option<String>,
    pub submit: Option<String>,
}

impl Default for ActorAddOptions {
    fn default() -> Self {
        Self {
            by: "user".to_string(),
            actor_id: None,
            title: None,
            runtime: None,
            runner: "pty".to_string(),
            command: None,
            env: None,
            default_scope_key: None,
            submit: None,
        }
    }
}

impl ActorAddOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by(mut self, by: impl Into<String>) -> Self {
        self.by = by.into();
        self
    }

    pub fn actor_id(mut self, id: impl Into<String>) -> Self {
        self.actor_id = Some(id.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    pub fn runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = runner.into();
        self
    }

    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn default_scope_key(mut self, key: impl Into<String>) -> Self {
        self.default_scope_key = Some(key.into());
        self
    }

    pub fn submit(mut self, submit: impl Into<String>) -> Self {
        self.submit = Some(submit.into());
        self
    }
}
