//! Integration test for `TorState::bootstrap` against a scripted
//! `Controller`, covering the bootstrap sequence end to end.

use std::sync::Arc;

use torctl::protocol::AsyncEvent;
use torctl::state::TorState;
use torctl::testing::MockController;

const CONSENSUS: &str = "r Guardy AAAA BBBB 2024-05-01 12:00:00 10.0.0.1 9001 0\n\
                          s Guard Fast Running\n\
                          w Bandwidth=1500\n\
                          p accept 80,443\n\
                          r Plain CCCC DDDD 2024-05-01 12:00:00 10.0.0.2 9002 0\n\
                          s Fast Running\n\
                          w Bandwidth=500\n\
                          p reject 1-65535\n";

fn mock_with_consensus() -> Arc<MockController> {
    let mock = Arc::new(MockController::new());
    mock.set_info("ns/all", CONSENSUS);
    mock.set_info("circuit-status", "");
    mock.set_info("stream-status", "");
    mock.set_info("address-mappings/all", "");
    mock.set_info("entry-guards", "$AAAA~Guardy up\n$EEEE~Ghost down\n");
    mock.set_info("process/pid", "4242");
    mock
}

#[tokio::test]
async fn bootstrap_populates_routers_guards_and_pid() {
    let mock = mock_with_consensus();
    let state = TorState::new();

    state.bootstrap(mock.clone()).await.unwrap();

    assert_eq!(state.router_count(), 2);
    assert!(state.router("$AAAA").is_some());

    let guards = state.guards();
    assert!(guards.contains_key("$AAAA"));
    assert!(!guards.contains_key("$EEEE"));
    assert_eq!(state.unusable_entry_guards(), vec!["$EEEE".to_string()]);

    assert_eq!(state.pid(), 4242);
}

#[tokio::test]
async fn circ_event_tracks_a_new_circuit_and_drops_it_on_close() {
    let mock = mock_with_consensus();
    let state = TorState::new();
    state.bootstrap(mock.clone()).await.unwrap();

    mock.emit(AsyncEvent::new(vec!["7 BUILT $AAAA~Guardy,$CCCC~Plain".to_string()]));
    // give the spawned listener a turn
    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let circuit = state.circuit(7).expect("circuit should be tracked after BUILT");
    assert!(circuit.is_built());
    assert_eq!(circuit.path, vec!["$AAAA".to_string(), "$CCCC".to_string()]);

    mock.emit(AsyncEvent::new(vec!["7 CLOSED".to_string()]));
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(state.circuit(7).is_none());
}

#[tokio::test]
async fn build_circuit_parses_extended_reply() {
    let mock = mock_with_consensus();
    mock.script_command("EXTENDCIRCUIT 0 AAAA,CCCC", "EXTENDED 9");
    let state = TorState::new();
    state.bootstrap(mock.clone()).await.unwrap();

    let guardy = state.router("$AAAA").unwrap();
    let plain = state.router("$CCCC").unwrap();
    let circuit = state
        .build_circuit(
            &[torctl::state::CircuitHop::Router(&guardy), torctl::state::CircuitHop::Router(&plain)],
            true,
        )
        .await
        .unwrap();
    assert_eq!(circuit.id, 9);
}

#[tokio::test]
async fn close_stream_sends_the_canonical_reason_code() {
    let mock = mock_with_consensus();
    let state = TorState::new();
    state.bootstrap(mock.clone()).await.unwrap();

    state.close_stream(42, "REASON_EXITPOLICY", &[("IfUnused", true)]).await.unwrap();
    assert!(mock.commands_received().contains(&"CLOSESTREAM 42 4 IfUnused".to_string()));
}
