//! Daemon endpoint discovery.
//!
//! cohortd publishes its listen address in `<home>/daemon/cohortd.addr.json`.
//! Discovery reads that descriptor and falls back to the conventional Unix
//! socket path when the file is absent or unusable. Nothing is verified
//! against the filesystem beyond the one descriptor read: a daemon that is
//! not actually listening surfaces later as a connect failure, not here.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;

/// Subdirectory of the cohort home holding daemon runtime files.
const DAEMON_DIR: &str = "daemon";
/// Address descriptor written by cohortd on startup.
const ADDR_FILE: &str = "cohortd.addr.json";
/// Conventional Unix socket path used when no descriptor is present.
const SOCK_FILE: &str = "cohortd.sock";

/// Resolved transport address for reaching cohortd.
///
/// Immutable once constructed; created by [`Endpoint::discover`] and held by
/// the client for its lifetime. TCP hosts are always loopback — discovery
/// normalizes empty, `localhost`, and wildcard hosts to `127.0.0.1` and
/// never returns a remote address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket.
    Unix { path: PathBuf },
    /// Loopback TCP.
    Tcp { host: String, port: u16 },
    /// No usable transport on this platform.
    Unavailable,
}

impl Endpoint {
    /// Discover the daemon endpoint (best-effort).
    ///
    /// - Prefer `<home>/daemon/cohortd.addr.json` if present and valid.
    /// - Fall back to the Unix socket `<home>/daemon/cohortd.sock` on
    ///   platforms that support it, without checking the file exists.
    ///
    /// `home` defaults to [`default_home`]. A missing or malformed
    /// descriptor file is a normal fallback path, never an error.
    pub fn discover(home: Option<&Path>) -> Endpoint {
        let home = home.map(Path::to_path_buf).unwrap_or_else(default_home);
        let daemon_dir = home.join(DAEMON_DIR);

        if let Some(endpoint) = from_descriptor(&daemon_dir.join(ADDR_FILE)) {
            return endpoint;
        }

        #[cfg(unix)]
        {
            Endpoint::Unix {
                path: daemon_dir.join(SOCK_FILE),
            }
        }
        #[cfg(not(unix))]
        {
            Endpoint::Unavailable
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix { path } => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp { host, port } => write!(f, "tcp:{}:{}", host, port),
            Endpoint::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Default cohort home: `$COHORT_HOME` if set (with `~` expansion), else
/// `~/.cohort`.
pub fn default_home() -> PathBuf {
    match std::env::var("COHORT_HOME") {
        Ok(raw) if !raw.trim().is_empty() => {
            PathBuf::from(shellexpand::tilde(raw.trim()).as_ref())
        }
        _ => PathBuf::from(shellexpand::tilde("~/.cohort").as_ref()),
    }
}

/// Parse the address descriptor, returning `None` on any shortfall so the
/// caller falls through to the conventional socket path.
fn from_descriptor(addr_path: &Path) -> Option<Endpoint> {
    let content = std::fs::read_to_string(addr_path).ok()?;
    let doc: Value = serde_json::from_str(&content).ok()?;
    let doc = doc.as_object()?;

    let transport = doc
        .get("transport")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match transport.as_str() {
        "tcp" => {
            let port = parse_port(doc.get("port"));
            if port == 0 {
                return None;
            }
            let host = doc.get("host").and_then(Value::as_str).unwrap_or("");
            Some(Endpoint::Tcp {
                host: normalize_tcp_host(host),
                port,
            })
        }
        "unix" => {
            let path = doc
                .get("path")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("");
            if path.is_empty() {
                return None;
            }
            Some(Endpoint::Unix {
                path: PathBuf::from(path),
            })
        }
        _ => None,
    }
}

/// Port out of the descriptor; 0 (invalid) on any parse failure.
fn parse_port(value: Option<&Value>) -> u16 {
    let port = match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    u16::try_from(port).unwrap_or(0)
}

/// Clients always dial loopback, even when the daemon bound a wildcard
/// address. IPv6 hosts collapse to loopback as well: the daemon IPC path is
/// AF_INET only.
fn normalize_tcp_host(raw: &str) -> String {
    let host = raw.trim();
    if host.is_empty() || host == "localhost" || host == "0.0.0.0" || host.contains(':') {
        "127.0.0.1".to_string()
    } else {
        host.to_string()
    }
}
