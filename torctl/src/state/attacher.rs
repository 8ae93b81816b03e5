//! Stream-to-circuit attacher bridge.
//!
//! The cooperative extension point: when Tor is configured to leave
//! streams unattached (`__LeaveStreamsUnattached=1`), this module asks
//! the application what to do with each newly observed stream and
//! turns the answer into an `ATTACHSTREAM` call. `Attachment` is a
//! closed sum type (`Ignore | Tor | Circuit | Pending`) rather than a
//! sentinel value compared by identity.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::{Result, TorCtlError};
use crate::protocol::Controller;
use crate::state::circuit::Circuit;
use crate::state::stream::Stream;

/// What the application wants done with a newly observed stream.
pub enum Attachment {
    /// Silently do nothing (the stream targeted a `.exit` host, or the
    /// attacher explicitly declined).
    Ignore,
    /// Let Tor pick (`ATTACHSTREAM <sid> 0`).
    Tor,
    /// Attach to this tracked, `BUILT` circuit.
    Circuit(u32),
    /// Resolve asynchronously to a circuit id (or fail).
    Pending(oneshot::Receiver<Result<u32>>),
}

/// User-supplied attach policy. Synchronous — asynchronous decisions
/// are expressed by returning `Attachment::Pending`, not by the
/// attacher itself being async.
pub type AttacherFn = Arc<dyn Fn(&Stream, &HashMap<u32, Circuit>) -> Attachment + Send + Sync>;

/// Run one stream through the bridge, issuing whatever `ATTACHSTREAM`
/// call (if any) the attacher's answer implies.
///
/// `circuit_lookup` is queried fresh at the point of attaching (rather
/// than reusing `circuits_snapshot`) so a `Pending` answer is checked
/// against the circuit's state *at resolution time*, not at dispatch
/// time.
pub async fn dispatch(
    stream_id: u32,
    stream: &Stream,
    circuits_snapshot: &HashMap<u32, Circuit>,
    attacher: &AttacherFn,
    controller: &dyn Controller,
    circuit_lookup: impl Fn(u32) -> Option<Circuit>,
) -> Result<()> {
    if stream.targets_special_exit() {
        return Ok(());
    }

    match attacher(stream, circuits_snapshot) {
        Attachment::Ignore => Ok(()),
        Attachment::Tor => {
            controller.queue_command(&format!("ATTACHSTREAM {stream_id} 0")).await?;
            Ok(())
        }
        Attachment::Circuit(circuit_id) => {
            attach_to_circuit(stream_id, circuit_id, &circuit_lookup, controller).await
        }
        Attachment::Pending(rx) => match rx.await {
            Ok(Ok(circuit_id)) => attach_to_circuit(stream_id, circuit_id, &circuit_lookup, controller).await,
            Ok(Err(e)) => {
                log::warn!("stream {stream_id}: attacher's pending resolution failed: {e}");
                Ok(())
            }
            Err(_) => {
                log::warn!("stream {stream_id}: attacher's pending resolution handle was dropped");
                Ok(())
            }
        },
    }
}

async fn attach_to_circuit(
    stream_id: u32,
    circuit_id: u32,
    circuit_lookup: &impl Fn(u32) -> Option<Circuit>,
    controller: &dyn Controller,
) -> Result<()> {
    let circuit = circuit_lookup(circuit_id)
        .ok_or_else(|| TorCtlError::Precondition(format!("circuit {circuit_id} is not tracked")))?;
    if !circuit.is_built() {
        return Err(TorCtlError::Precondition(format!(
            "circuit {circuit_id} is not BUILT (state {:?})",
            circuit.state
        )));
    }
    controller
        .queue_command(&format!("ATTACHSTREAM {stream_id} {circuit_id}"))
        .await?;
    Ok(())
}
