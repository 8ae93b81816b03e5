//! The `Router` value: one entry from the network consensus.

use std::collections::HashSet;

/// One router as last described by the consensus.
///
/// `id_hex` is the canonical key Tor and this crate use everywhere:
/// a `$`-prefixed identity digest, e.g. `$AAAA...`.
#[derive(Debug, Clone, PartialEq)]
pub struct Router {
    pub id_hex: String,
    pub nickname: String,
    pub identity_digest: String,
    pub descriptor_digest: String,
    /// `"<date> <time>"`, e.g. `"2024-05-01 12:00:00"`, as given by the
    /// consensus rather than parsed into a timestamp type — nothing in
    /// this crate does arithmetic on it.
    pub published: String,
    pub ip: String,
    pub or_port: u16,
    pub dir_port: u16,
    pub ipv6_addrs: Vec<String>,
    pub flags: HashSet<String>,
    pub bandwidth: Option<u64>,
    pub policy: Option<String>,
}

impl Router {
    /// A router known only by id, not yet (or never) seen in a
    /// consensus — `TorState::router_from_id`'s fallback.
    pub fn stub(id_hex: impl Into<String>) -> Self {
        Self {
            id_hex: id_hex.into(),
            nickname: String::new(),
            identity_digest: String::new(),
            descriptor_digest: String::new(),
            published: String::new(),
            ip: String::new(),
            or_port: 0,
            dir_port: 0,
            ipv6_addrs: Vec::new(),
            flags: HashSet::new(),
            bandwidth: None,
            policy: None,
        }
    }

    pub fn is_guard(&self) -> bool {
        self.flags.contains("Guard")
    }

    pub fn is_authority(&self) -> bool {
        self.flags.contains("Authority")
    }

    /// The identity digest with its leading `$` stripped, as accepted
    /// by `EXTENDCIRCUIT`'s path argument.
    pub fn bare_id(&self) -> &str {
        self.id_hex.strip_prefix('$').unwrap_or(&self.id_hex)
    }
}
