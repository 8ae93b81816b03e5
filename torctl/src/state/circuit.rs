//! The `Circuit` value.

use std::collections::HashSet;

/// Tor's own circuit-state vocabulary, as reported in `CIRC` events and
/// `circuit-status` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Launched,
    Built,
    Extended,
    Failed,
    Closed,
    GuardWait,
}

impl CircuitState {
    pub fn parse(raw: &str) -> Option<Self> {
        use CircuitState::*;
        Some(match raw {
            "LAUNCHED" => Launched,
            "BUILT" => Built,
            "EXTENDED" => Extended,
            "FAILED" => Failed,
            "CLOSED" => Closed,
            "GUARD_WAIT" => GuardWait,
            _ => return None,
        })
    }
}

/// One circuit, keyed by id in `TorState`.
#[derive(Debug, Clone)]
pub struct Circuit {
    pub id: u32,
    pub state: CircuitState,
    /// Router path, oldest (entry) hop first, as `id_hex` strings.
    pub path: Vec<String>,
    pub streams: HashSet<u32>,
}

impl Circuit {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            state: CircuitState::Launched,
            path: Vec::new(),
            streams: HashSet::new(),
        }
    }

    pub fn is_built(&self) -> bool {
        self.state == CircuitState::Built
    }

    /// Whether this circuit has left the live set: destroyed on
    /// transition to `CLOSED` or `FAILED`.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, CircuitState::Closed | CircuitState::Failed)
    }
}
