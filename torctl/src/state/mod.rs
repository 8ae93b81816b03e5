//! The live state mirror: routers, circuits, streams, the address map,
//! and the stream attacher bridge.

mod addrmap;
mod attacher;
mod circuit;
mod consensus;
mod router;
mod stream;
mod torstate;

pub use addrmap::{AddrMap, AddrMapping};
pub use attacher::{dispatch, Attachment, AttacherFn};
pub use circuit::{Circuit, CircuitState};
pub use consensus::{parse_all, ConsensusParser, ConsensusResult};
pub use router::Router;
pub use stream::{Stream, StreamState};
pub use torstate::{CircuitHop, TorState};
