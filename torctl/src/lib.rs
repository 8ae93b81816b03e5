//! `torctl` — a coordination layer for speaking the Tor control
//! protocol to a running `tor` daemon.
//!
//! This crate does not speak the wire protocol itself (that's
//! [`protocol::Controller`], a trait any control-protocol codec can
//! implement); it owns the pieces that sit on top of a connection:
//! a typed configuration mirror ([`config::TorConfig`]), a live mirror
//! of routers/circuits/streams/address-mappings ([`state::TorState`]),
//! and a process supervisor for bringing a daemon up in the first
//! place ([`launch::launch_tor`]).

pub mod config;
pub mod error;
pub mod launch;
pub mod protocol;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::TorConfig;
pub use error::{Result, TorCtlError};
pub use protocol::Controller;
pub use state::TorState;
