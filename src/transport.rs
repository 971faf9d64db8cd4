//! Transport layer: connections and the unary call protocol.
//!
//! One connection per call. The unary path connects, writes one request
//! line, reads one response line, and drops the connection — there is no
//! connection pooling or pipelining. All transport-level failures (refused,
//! missing socket file, timeout, oversized or non-JSON response) surface as
//! [`Error::Unavailable`]; daemon-level rejections are not decided here.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::{debug, trace};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::protocol::{Request, Response};
use crate::MAX_LINE_BYTES;

/// A single stream connection to the daemon.
///
/// Owned exclusively by one call or one event stream; never shared across
/// calls. Read and write timeouts are both set to the connect timeout until
/// [`Connection::clear_read_timeout`] lifts the read side for streaming.
#[derive(Debug)]
pub struct Connection {
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Open a connection to `endpoint` with `timeout` applied to the connect
/// and to every read/write on the returned stream.
pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Connection> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let addr = (host.as_str(), *port)
                .to_socket_addrs()
                .map_err(|e| Error::unavailable(format!("cannot resolve {host}:{port}: {e}")))?
                .next()
                .ok_or_else(|| {
                    Error::unavailable(format!("cannot resolve {host}:{port}: no addresses"))
                })?;
            let stream = TcpStream::connect_timeout(&addr, timeout)
                .map_err(|e| Error::unavailable(format!("connect to {addr} failed: {e}")))?;
            let conn = Connection {
                inner: Inner::Tcp(stream),
            };
            conn.set_timeouts(timeout)?;
            Ok(conn)
        }
        #[cfg(unix)]
        Endpoint::Unix { path } => {
            let stream = UnixStream::connect(path).map_err(|e| {
                Error::unavailable(format!("connect to {} failed: {e}", path.display()))
            })?;
            let conn = Connection {
                inner: Inner::Unix(stream),
            };
            conn.set_timeouts(timeout)?;
            Ok(conn)
        }
        #[cfg(not(unix))]
        Endpoint::Unix { .. } => Err(Error::unavailable(
            "unix domain sockets are not supported on this platform",
        )),
        Endpoint::Unavailable => Err(Error::unavailable("daemon endpoint is not available")),
    }
}

impl Connection {
    fn set_timeouts(&self, timeout: Duration) -> Result<()> {
        let timeout = Some(timeout);
        let (r, w) = match &self.inner {
            Inner::Tcp(s) => (s.set_read_timeout(timeout), s.set_write_timeout(timeout)),
            #[cfg(unix)]
            Inner::Unix(s) => (s.set_read_timeout(timeout), s.set_write_timeout(timeout)),
        };
        r.and(w)
            .map_err(|e| Error::unavailable(format!("cannot set socket timeout: {e}")))
    }

    /// Lift the read timeout entirely. Streaming reads block indefinitely
    /// once the handshake has completed.
    pub fn clear_read_timeout(&self) -> Result<()> {
        match &self.inner {
            Inner::Tcp(s) => s.set_read_timeout(None),
            #[cfg(unix)]
            Inner::Unix(s) => s.set_read_timeout(None),
        }
        .map_err(|e| Error::unavailable(format!("cannot clear socket timeout: {e}")))
    }

    /// Clone the OS handle. Reads and writes on the clone share the
    /// underlying socket; used to shut the stream down from another thread.
    pub fn try_clone(&self) -> io::Result<Connection> {
        let inner = match &self.inner {
            Inner::Tcp(s) => Inner::Tcp(s.try_clone()?),
            #[cfg(unix)]
            Inner::Unix(s) => Inner::Unix(s.try_clone()?),
        };
        Ok(Connection { inner })
    }

    /// Shut down both directions, unblocking any in-flight read.
    pub fn shutdown(&self) -> io::Result<()> {
        match &self.inner {
            Inner::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Inner::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Inner::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Inner::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Inner::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Inner::Unix(s) => s.flush(),
        }
    }
}

/// Read one `\n`-terminated line, excluding the terminator, capped at `max`
/// bytes. Returns `Ok(None)` on EOF before any data; a trailing line with no
/// terminator is returned as-is. A line longer than `max` is an
/// `InvalidData` error — exactly `max` bytes is still accepted.
pub(crate) fn read_line_bounded<R: BufRead>(
    reader: &mut R,
    max: usize,
) -> io::Result<Option<Vec<u8>>> {
    let mut line: Vec<u8> = Vec::new();
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(if line.is_empty() { None } else { Some(line) });
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(i) => {
                if line.len() + i > max {
                    reader.consume(i + 1);
                    return Err(line_too_long(max));
                }
                line.extend_from_slice(&buf[..i]);
                reader.consume(i + 1);
                return Ok(Some(line));
            }
            None => {
                let n = buf.len();
                if line.len() + n > max {
                    reader.consume(n);
                    return Err(line_too_long(max));
                }
                line.extend_from_slice(buf);
                reader.consume(n);
            }
        }
    }
}

fn line_too_long(max: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line exceeds {max} bytes"),
    )
}

/// Send one request and return one response.
///
/// The connection is dropped on every exit path, including parse failure. A
/// response line that is not valid JSON is a transport failure
/// ([`Error::Unavailable`]), not a daemon-level error; interpreting `ok` is
/// left to the caller.
pub fn call_daemon(endpoint: &Endpoint, request: &Request, timeout: Duration) -> Result<Response> {
    let mut conn = connect(endpoint, timeout)?;
    debug!(op = %request.op, endpoint = %endpoint, "daemon call");

    let line = request
        .to_ndjson_line()
        .map_err(|e| Error::unavailable(format!("cannot encode request: {e}")))?;
    conn.write_all(line.as_bytes())
        .and_then(|_| conn.flush())
        .map_err(|e| Error::unavailable(format!("write failed: {e}")))?;

    let mut reader = BufReader::new(conn);
    let response = read_line_bounded(&mut reader, MAX_LINE_BYTES)
        .map_err(|e| Error::unavailable(format!("read failed: {e}")))?
        .ok_or_else(|| Error::unavailable("connection closed before response"))?;

    let text = String::from_utf8_lossy(&response);
    trace!(op = %request.op, bytes = response.len(), "daemon response line");
    Response::from_ndjson_line(&text)
        .map_err(|e| Error::unavailable(format!("invalid daemon response (not json): {e}")))
}
