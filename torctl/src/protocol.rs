//! The control-protocol collaborator contract.
//!
//! Everything in this module is the *seam*, not the implementation: the
//! line-framed codec, cookie/password authentication, and the event
//! subscription primitives are deliberately out of scope. A real
//! control-protocol crate implements [`Controller`]; `torctl` only ever
//! talks to one through this trait, so any codec can be plugged in.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;

/// One asynchronous (`650`-coded) event pushed by the daemon.
///
/// `code` is almost always `650`; `lines` are the reply's body lines with
/// the leading `650[- ]` stripped but otherwise unparsed — it is the
/// subscriber's job to interpret them (consensus lines, `CONF_CHANGED`
/// keyword/value pairs, `STATUS_CLIENT` payloads, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncEvent {
    pub code: u16,
    pub lines: Vec<String>,
}

impl AsyncEvent {
    pub fn new(lines: Vec<String>) -> Self {
        Self { code: 650, lines }
    }

    /// The event's first line, which carries the event keyword and the
    /// rest of its first-line payload (e.g. `"STREAM 12 NEW 0 ..."`).
    pub fn first_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or_default()
    }
}

/// Event names `torctl` subscribes to. Kept as constants rather than an
/// enum because the wire value *is* the subscription token passed to
/// [`Controller::subscribe`] and to Tor's `SETEVENTS`.
pub mod event_kind {
    pub const STREAM: &str = "STREAM";
    pub const CIRC: &str = "CIRC";
    pub const NS: &str = "NS";
    pub const NEWCONSENSUS: &str = "NEWCONSENSUS";
    pub const ADDRMAP: &str = "ADDRMAP";
    pub const CONF_CHANGED: &str = "CONF_CHANGED";
    pub const STATUS_CLIENT: &str = "STATUS_CLIENT";
}

/// A `GETCONF` reply entry: a key with its value, or `None` if the key is
/// at its default (the daemon returns a bare keyword in that case).
pub type ConfEntry = (String, Option<String>);

/// The control-protocol collaborator.
///
/// Implementors own one control connection; all commands on it are
/// delivered in program order. `torctl` never constructs this itself —
/// it's handed one, already authenticated, by the caller or by
/// [`crate::launch::launch_tor`].
#[async_trait]
pub trait Controller: Send + Sync {
    /// `GETINFO <key>`, returning the raw value (without the `key=` prefix).
    async fn get_info(&self, key: &str) -> Result<String>;

    /// `GETINFO <key>`, but fed to `line_sink` one line at a time instead
    /// of being buffered — used by the consensus parser so `ns/all`
    /// doesn't have to be materialized in memory.
    async fn get_info_incremental(
        &self,
        key: &str,
        line_sink: &mut (dyn FnMut(&str) + Send),
    ) -> Result<()>;

    /// `GETCONF <key>`, parsed into keyword/value pairs.
    async fn get_conf(&self, key: &str) -> Result<Vec<ConfEntry>>;

    /// `GETCONF <key>`, returning the raw multiline reply body.
    async fn get_conf_raw(&self, key: &str) -> Result<String>;

    /// A single `SETCONF` call covering every `(key, value)` pair, atomic
    /// on the daemon side.
    async fn set_conf(&self, pairs: &[(String, String)]) -> Result<()>;

    /// Any other command (`EXTENDCIRCUIT`, `ATTACHSTREAM`, `CLOSESTREAM`,
    /// `CLOSECIRCUIT`, `SIGNAL`, `TAKEOWNERSHIP`, `RESETCONF`, ...),
    /// returning the reply body with the status line's `250 `/`250-`
    /// prefix stripped.
    async fn queue_command(&self, command: &str) -> Result<String>;

    /// Subscribe to one event kind (see [`event_kind`]); this implicitly
    /// performs the daemon-side `SETEVENTS` bookkeeping.
    fn subscribe(&self, event: &str) -> broadcast::Receiver<AsyncEvent>;

    /// `Some(pid)` once this connection has taken ownership of its tor
    /// process; `None` otherwise. A one-way setter, to break the
    /// supervisor/protocol ownership cycle.
    fn is_owned(&self) -> Option<u32>;

    /// Called exactly once by the supervisor after a successful connect,
    /// assigning the child's pid into the protocol.
    fn set_owned_pid(&self, pid: u32);
}
