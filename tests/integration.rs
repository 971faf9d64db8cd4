//! Integration tests for unary calls and compatibility negotiation.
//!
//! Runs the client against a scripted stub daemon on a real socket, so the
//! full path — connect, NDJSON framing, line bounds, error mapping — is
//! exercised exactly as against cohortd.

#![cfg(unix)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cohort_client::{
    Client, Endpoint, Error, MessageOptions, Request, Requirements, Response, MAX_LINE_BYTES,
};
use serde_json::{json, Value};
use tempfile::TempDir;

// ============================================================================
// Stub daemon
// ============================================================================

/// What the stub writes back for one request.
enum Reply {
    /// A well-formed response envelope.
    Envelope(Response),
    /// Arbitrary bytes, for malformed/oversized cases.
    Raw(Vec<u8>),
    /// Close the connection without answering.
    Close,
}

fn ok_reply(result: Value) -> Reply {
    Reply::Envelope(Response {
        ok: true,
        result: Some(result),
        error: None,
    })
}

fn err_reply(code: &str, message: &str) -> Reply {
    Reply::Envelope(Response {
        ok: false,
        result: None,
        error: Some(cohort_client::ErrorInfo {
            code: code.into(),
            message: message.into(),
            details: None,
        }),
    })
}

/// A stub daemon on a Unix socket: one request line per connection, replies
/// per the given responder, records every request it saw.
struct StubDaemon {
    socket_path: PathBuf,
    _home: TempDir,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl StubDaemon {
    fn start<F>(responder: F) -> Self
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let home = TempDir::new().unwrap();
        let socket_path = home.path().join("stub.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        let requests: Arc<Mutex<Vec<Request>>> = Arc::new(Mutex::new(Vec::new()));

        let seen = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(match stream.try_clone() {
                    Ok(s) => s,
                    Err(_) => continue,
                });
                let mut line = String::new();
                if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                    continue;
                }
                let Ok(request) = serde_json::from_str::<Request>(line.trim()) else {
                    continue;
                };
                seen.lock().unwrap().push(request.clone());
                match responder(&request) {
                    Reply::Envelope(resp) => {
                        let _ = stream.write_all(resp.to_ndjson_line().unwrap().as_bytes());
                    }
                    Reply::Raw(bytes) => {
                        let _ = stream.write_all(&bytes);
                    }
                    Reply::Close => {}
                }
            }
        });

        Self {
            socket_path,
            _home: home,
            requests,
        }
    }

    fn client(&self) -> Client {
        Client::new(Endpoint::Unix {
            path: self.socket_path.clone(),
        })
        .with_timeout(Duration::from_secs(5))
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

// ============================================================================
// Unary round trips
// ============================================================================

#[test]
fn test_unary_call_over_unix_socket() {
    let stub = StubDaemon::start(|req| match req.op.as_str() {
        "ping" => ok_reply(json!({"ipc_v": 1, "server": "stub"})),
        _ => err_reply("unknown_op", "no such op"),
    });

    let result = stub.client().ping().unwrap();
    assert_eq!(result["ipc_v"], json!(1));
    assert_eq!(result["server"], json!("stub"));
}

#[test]
fn test_unary_call_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let request: Request = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(request.op, "ping");
        stream
            .write_all(b"{\"ok\":true,\"result\":{\"pong\":true}}\n")
            .unwrap();
    });

    let client = Client::new(Endpoint::Tcp {
        host: "127.0.0.1".into(),
        port,
    })
    .with_timeout(Duration::from_secs(5));

    let result = client.ping().unwrap();
    assert_eq!(result["pong"], json!(true));
}

#[test]
fn test_request_envelope_round_trip() {
    // The stub echoes the decoded request back, proving the encoded line
    // carries op and args intact through a real socket.
    let stub = StubDaemon::start(|req| {
        ok_reply(json!({"op": req.op, "args": req.args, "v": req.v}))
    });

    let result = stub
        .client()
        .call("group_show", json!({"group_id": "g_42"}))
        .unwrap();
    assert_eq!(result["op"], json!("group_show"));
    assert_eq!(result["v"], json!(1));
    assert_eq!(result["args"]["group_id"], json!("g_42"));
}

#[test]
fn test_api_error_propagated_verbatim() {
    let stub = StubDaemon::start(|_| err_reply("missing_group_id", "group_id is required"));

    let err = stub.client().groups().unwrap_err();
    let Error::Api(api) = err else {
        panic!("expected Error::Api, got {err:?}");
    };
    assert_eq!(api.code, "missing_group_id");
    assert_eq!(api.message, "group_id is required");
}

#[test]
fn test_invalid_json_response_is_unavailable() {
    let stub = StubDaemon::start(|_| Reply::Raw(b"this is not json\n".to_vec()));

    let err = stub.client().ping().unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)), "got {err:?}");
}

#[test]
fn test_connection_closed_before_response_is_unavailable() {
    let stub = StubDaemon::start(|_| Reply::Close);

    let err = stub.client().ping().unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)), "got {err:?}");
}

#[test]
fn test_unavailable_endpoint_fails_immediately() {
    let client = Client::new(Endpoint::Unavailable);
    let err = client.ping().unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
}

#[test]
fn test_connect_refused_is_unavailable() {
    let home = TempDir::new().unwrap();
    let client = Client::new(Endpoint::Unix {
        path: home.path().join("nobody-listening.sock"),
    });
    let err = client.ping().unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)));
}

// ============================================================================
// Line size bound
// ============================================================================

/// A syntactically valid `ok` response line padded to exactly `total_len`
/// bytes (newline excluded).
fn padded_response_line(total_len: usize) -> Vec<u8> {
    let skeleton = br#"{"ok":true,"result":{"pad":""}}"#;
    let pad = total_len - skeleton.len();
    let mut line = Vec::with_capacity(total_len + 1);
    line.extend_from_slice(br#"{"ok":true,"result":{"pad":""#);
    line.extend(std::iter::repeat(b'x').take(pad));
    line.extend_from_slice(br#""}}"#);
    line.push(b'\n');
    assert_eq!(line.len(), total_len + 1);
    line
}

#[test]
fn test_response_at_exact_size_limit_parses() {
    let stub = StubDaemon::start(|_| Reply::Raw(padded_response_line(MAX_LINE_BYTES)));

    let result = stub.client().ping().unwrap();
    let pad = result["pad"].as_str().unwrap();
    assert_eq!(pad.len(), MAX_LINE_BYTES - 31);
}

#[test]
fn test_response_one_byte_over_limit_is_unavailable() {
    let stub = StubDaemon::start(|_| Reply::Raw(padded_response_line(MAX_LINE_BYTES + 1)));

    let err = stub.client().ping().unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)), "got {err:?}");
}

// ============================================================================
// Operation façade contract
// ============================================================================

#[test]
fn test_send_includes_attention_and_reply_required() {
    let stub = StubDaemon::start(|_| ok_reply(json!({"event": {"id": "e1"}})));

    stub.client()
        .send(
            "g_1",
            "hello",
            MessageOptions::new()
                .priority("attention")
                .reply_required(true),
        )
        .unwrap();

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.op, "send");
    assert_eq!(req.args["group_id"], json!("g_1"));
    assert_eq!(req.args["text"], json!("hello"));
    assert_eq!(req.args["by"], json!("user"));
    assert_eq!(req.args["priority"], json!("attention"));
    assert_eq!(req.args["reply_required"], json!(true));
}

#[test]
fn test_reply_carries_reply_to() {
    let stub = StubDaemon::start(|_| ok_reply(json!({"event": {"id": "e2"}})));

    stub.client()
        .reply(
            "g_1",
            "e_origin",
            "roger",
            MessageOptions::new().by("peer1").reply_required(true),
        )
        .unwrap();

    let req = &stub.requests()[0];
    assert_eq!(req.op, "reply");
    assert_eq!(req.args["reply_to"], json!("e_origin"));
    assert_eq!(req.args["by"], json!("peer1"));
    assert_eq!(req.args["reply_required"], json!(true));
    assert!(!req.args.contains_key("path"));
}

#[test]
fn test_send_cross_group_targets_both_groups() {
    let stub = StubDaemon::start(|_| {
        ok_reply(json!({"src_event": {"id": "s1"}, "dst_event": {"id": "d1"}}))
    });

    stub.client()
        .send_cross_group("g_src", "g_dst", "relay", MessageOptions::new())
        .unwrap();

    let req = &stub.requests()[0];
    assert_eq!(req.op, "send_cross_group");
    assert_eq!(req.args["group_id"], json!("g_src"));
    assert_eq!(req.args["dst_group_id"], json!("g_dst"));
    // unset optionals stay off the wire
    assert!(!req.args.contains_key("to"));
    assert!(!req.args.contains_key("reply_required"));
}

#[test]
fn test_chat_ack_defaults_by_to_actor() {
    let stub = StubDaemon::start(|_| ok_reply(json!({})));

    stub.client().chat_ack("g_1", "peer2", "e_9", None).unwrap();

    let req = &stub.requests()[0];
    assert_eq!(req.args["by"], json!("peer2"));
}

// ============================================================================
// Compatibility negotiation
// ============================================================================

/// A daemon advertising `ipc_v`/capabilities that rejects every non-ping op
/// with a validation error, except those listed as unknown.
fn negotiating_stub(ipc_v: i64, capabilities: Value, unknown_ops: &[&str]) -> StubDaemon {
    let unknown: Vec<String> = unknown_ops.iter().map(|s| s.to_string()).collect();
    StubDaemon::start(move |req| match req.op.as_str() {
        "ping" => ok_reply(json!({"ipc_v": ipc_v, "capabilities": capabilities.clone()})),
        op if unknown.iter().any(|u| u == op) => err_reply("unknown_op", "no such op"),
        _ => err_reply("missing_group_id", "group_id is required"),
    })
}

fn standard_requirements() -> Requirements {
    Requirements::new()
        .capability("events_stream")
        .ops(["groups", "send", "reply", "inbox_list", "context_sync"])
}

#[test]
fn test_negotiation_succeeds_on_validation_errors() {
    let stub = negotiating_stub(1, json!({"events_stream": true}), &[]);

    let ping = stub
        .client()
        .assert_compatible(&standard_requirements())
        .unwrap();
    assert_eq!(ping.ipc_v, 1);
    assert!(ping.capability("events_stream"));

    // one ping plus one probe per required op
    let ops: Vec<String> = stub.requests().iter().map(|r| r.op.clone()).collect();
    assert_eq!(
        ops,
        vec!["ping", "groups", "send", "reply", "inbox_list", "context_sync"]
    );
}

#[test]
fn test_negotiation_fails_on_unknown_op() {
    let stub = negotiating_stub(1, json!({"events_stream": true}), &["context_sync"]);

    let err = stub
        .client()
        .assert_compatible(&standard_requirements())
        .unwrap_err();
    let Error::Incompatible(reason) = err else {
        panic!("expected Error::Incompatible, got {err:?}");
    };
    assert!(reason.contains("context_sync"), "reason: {reason}");
}

#[test]
fn test_negotiation_fails_on_old_ipc_version() {
    let stub = negotiating_stub(0, json!({"events_stream": true}), &[]);

    let err = stub
        .client()
        .assert_compatible(&Requirements::new())
        .unwrap_err();
    assert!(matches!(err, Error::Incompatible(_)), "got {err:?}");

    // version gate fails before any probing
    assert_eq!(stub.requests().len(), 1);
}

#[test]
fn test_negotiation_fails_on_missing_capability() {
    let stub = negotiating_stub(1, json!({}), &[]);

    let err = stub
        .client()
        .assert_compatible(&Requirements::new().capability("events_stream"))
        .unwrap_err();
    let Error::Incompatible(reason) = err else {
        panic!("expected Error::Incompatible, got {err:?}");
    };
    assert!(reason.contains("events_stream"), "reason: {reason}");
}

#[test]
fn test_negotiation_ignores_falsy_capability_values() {
    let stub = negotiating_stub(1, json!({"events_stream": 0}), &[]);

    let err = stub
        .client()
        .assert_compatible(&Requirements::new().capability("events_stream"))
        .unwrap_err();
    assert!(matches!(err, Error::Incompatible(_)));
}

#[test]
fn test_negotiation_never_probes_lifecycle_ops() {
    // If any of these were probed the stub would answer unknown_op and the
    // negotiation would fail; it must skip them instead.
    let stub = negotiating_stub(
        1,
        json!({}),
        &["ping", "shutdown", "events_stream", "term_attach"],
    );

    stub.client()
        .assert_compatible(
            &Requirements::new().ops(["ping", "shutdown", "events_stream", "term_attach", " "]),
        )
        .unwrap();

    let ops: Vec<String> = stub.requests().iter().map(|r| r.op.clone()).collect();
    assert_eq!(ops, vec!["ping"]);
}

#[test]
fn test_negotiation_is_idempotent() {
    let stub = negotiating_stub(2, json!({"events_stream": true, "context_v2": 1}), &[]);
    let client = stub.client();

    let first = client.assert_compatible(&standard_requirements()).unwrap();
    let second = client.assert_compatible(&standard_requirements()).unwrap();
    assert_eq!(first, second);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_parallel_calls_share_no_state() {
    let stub = StubDaemon::start(|req| match req.op.as_str() {
        "ping" => ok_reply(json!({"ipc_v": 1})),
        op => ok_reply(json!({"echo": op})),
    });

    let client = stub.client();
    let mut handles = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        handles.push(thread::spawn(move || {
            let result = client
                .call(&format!("op_{i}"), Value::Null)
                .unwrap();
            assert_eq!(result["echo"], json!(format!("op_{i}")));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(stub.requests().len(), 8);
}

// keep the helper honest: HashMap args built through the public call path
#[test]
fn test_call_raw_with_explicit_args_map() {
    let stub = StubDaemon::start(|req| ok_reply(json!({"args": req.args})));

    let mut args = HashMap::new();
    args.insert("group_id".to_string(), json!("g_1"));
    let envelope = stub.client().call_raw("group_show", args).unwrap();
    assert!(envelope.ok);
    assert_eq!(envelope.result_object()["args"]["group_id"], json!("g_1"));
}
