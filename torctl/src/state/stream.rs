//! The `Stream` value.

/// Tor's stream-state vocabulary, as reported in `STREAM` events and
/// `stream-status` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    New,
    NewResolve,
    Remap,
    SentConnect,
    SentResolve,
    Succeeded,
    Failed,
    Closed,
    Detached,
}

impl StreamState {
    pub fn parse(raw: &str) -> Option<Self> {
        use StreamState::*;
        Some(match raw {
            "NEW" => New,
            "NEWRESOLVE" => NewResolve,
            "REMAP" => Remap,
            "SENTCONNECT" => SentConnect,
            "SENTRESOLVE" => SentResolve,
            "SUCCEEDED" => Succeeded,
            "FAILED" => Failed,
            "CLOSED" => Closed,
            "DETACHED" => Detached,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Failed)
    }
}

/// One stream, keyed by id in `TorState`.
#[derive(Debug, Clone)]
pub struct Stream {
    pub id: u32,
    pub target_host: String,
    pub target_port: u16,
    pub circuit_id: Option<u32>,
    pub state: StreamState,
}

impl Stream {
    pub fn new(id: u32, target_host: impl Into<String>, target_port: u16) -> Self {
        Self {
            id,
            target_host: target_host.into(),
            target_port,
            circuit_id: None,
            state: StreamState::New,
        }
    }

    /// Special exits (`<host>.exit`) are left for Tor to route itself —
    /// the attacher bridge ignores them.
    pub fn targets_special_exit(&self) -> bool {
        self.target_host.ends_with(".exit")
    }
}
