//! `TorState`: a live mirror of a tor daemon's routers, circuits,
//! streams, address map, and entry guards.
//!
//! Directed bootstrap queries followed by event subscriptions, both
//! feeding the same per-entity update functions, plus the
//! `close_stream`/`close_circuit`/`build_circuit`/`router_from_id`
//! command helpers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Result, TorCtlError};
use crate::protocol::{event_kind, AsyncEvent, Controller};
use crate::state::addrmap::{AddrMap, AddrMapping};
use crate::state::attacher::{self, AttacherFn};
use crate::state::circuit::{Circuit, CircuitState};
use crate::state::consensus::ConsensusParser;
use crate::state::router::Router;
use crate::state::stream::{Stream, StreamState};

/// The fourteen canonical stream-close reasons.
const STREAM_CLOSE_REASONS: &[(&str, u8)] = &[
    ("REASON_MISC", 1),
    ("REASON_RESOLVEFAILED", 2),
    ("REASON_CONNECTREFUSED", 3),
    ("REASON_EXITPOLICY", 4),
    ("REASON_DESTROY", 5),
    ("REASON_DONE", 6),
    ("REASON_TIMEOUT", 7),
    ("REASON_NOROUTE", 8),
    ("REASON_HIBERNATING", 9),
    ("REASON_INTERNAL", 10),
    ("REASON_RESOURCELIMIT", 11),
    ("REASON_CONNRESET", 12),
    ("REASON_TORPROTOCOL", 13),
    ("REASON_NOTDIRECTORY", 14),
];

fn resolve_stream_close_reason(reason: &str) -> Result<u8> {
    if let Ok(code) = reason.parse::<u8>() {
        return Ok(code);
    }
    STREAM_CLOSE_REASONS
        .iter()
        .find(|(name, _)| *name == reason)
        .map(|(_, code)| *code)
        .ok_or_else(|| TorCtlError::InvalidArgument(format!("unknown stream close reason: {reason}")))
}

fn append_flags(command: &mut String, flags: &[(&str, bool)]) {
    for (name, set) in flags {
        if *set {
            command.push(' ');
            command.push_str(name);
        }
    }
}

/// One hop a caller can name when building a circuit via
/// `build_circuit`: either a known `Router` or a bare/`$`-prefixed id.
pub enum CircuitHop<'a> {
    Router(&'a Router),
    Id(&'a str),
}

impl<'a> CircuitHop<'a> {
    fn bare_id(&self) -> String {
        match self {
            CircuitHop::Router(r) => r.bare_id().to_string(),
            CircuitHop::Id(s) => s.strip_prefix('$').unwrap_or(s).to_string(),
        }
    }
}

type CircuitListener = Box<dyn Fn(&Circuit) + Send + Sync>;
type StreamListener = Box<dyn Fn(&Stream) + Send + Sync>;

struct Inner {
    controller: Option<Arc<dyn Controller>>,
    routers: HashMap<String, Router>,
    by_name: HashMap<String, String>,
    by_name_all: HashMap<String, Vec<String>>,
    guards: HashMap<String, Router>,
    unusable_entry_guards: Vec<String>,
    authorities: HashMap<String, Router>,
    circuits: HashMap<u32, Circuit>,
    streams: HashMap<u32, Stream>,
    seen_stream_ids: std::collections::HashSet<u32>,
    addr_map: AddrMap,
    attacher: Option<AttacherFn>,
    circuit_listeners: Vec<CircuitListener>,
    stream_listeners: Vec<StreamListener>,
    pid: u32,
    post_bootstrap_hook: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            controller: None,
            routers: HashMap::new(),
            by_name: HashMap::new(),
            by_name_all: HashMap::new(),
            guards: HashMap::new(),
            unusable_entry_guards: Vec::new(),
            authorities: HashMap::new(),
            circuits: HashMap::new(),
            streams: HashMap::new(),
            seen_stream_ids: Default::default(),
            addr_map: AddrMap::new(),
            attacher: None,
            circuit_listeners: Vec::new(),
            stream_listeners: Vec::new(),
            pid: 0,
            post_bootstrap_hook: None,
        }
    }

    fn reset_router_indices(&mut self) {
        self.routers.clear();
        self.by_name.clear();
        self.by_name_all.clear();
        self.guards.clear();
        self.authorities.clear();
    }

    fn apply_consensus_lines<'a>(&mut self, lines: impl Iterator<Item = &'a str>) -> Result<()> {
        self.reset_router_indices();
        let mut parser = ConsensusParser::new();
        for line in lines {
            parser.feed_line(line)?;
        }
        let result = parser.finish();
        for router in result.routers.values() {
            if router.is_guard() {
                self.guards.insert(router.id_hex.clone(), router.clone());
            }
            if router.is_authority() {
                self.authorities.insert(router.nickname.clone(), router.clone());
            }
        }
        self.routers = result.routers;
        self.by_name = result.by_name;
        self.by_name_all = result.by_name_all;
        Ok(())
    }
}

/// Live mirror of a tor daemon's state. Cheap to clone.
#[derive(Clone)]
pub struct TorState {
    inner: Arc<Mutex<Inner>>,
}

impl Default for TorState {
    fn default() -> Self {
        Self::new()
    }
}

impl TorState {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::new())) }
    }

    pub fn set_post_bootstrap_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.lock().unwrap().post_bootstrap_hook = Some(Arc::new(hook));
    }

    /// Run the full bootstrap sequence: fetch the consensus, circuit
    /// status, stream status, and address map, subscribe to the live
    /// event feed, resolve entry guards, and record the daemon's pid.
    pub async fn bootstrap(&self, controller: Arc<dyn Controller>) -> Result<()> {
        // 1. ns/all, line-incremental.
        let mut consensus_lines = Vec::new();
        controller
            .get_info_incremental("ns/all", &mut |line: &str| consensus_lines.push(line.to_string()))
            .await?;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.apply_consensus_lines(consensus_lines.iter().map(String::as_str))?;
        }

        // 2. circuit-status
        let circuit_status = controller.get_info("circuit-status").await?;
        {
            let mut inner = self.inner.lock().unwrap();
            for line in circuit_status.lines() {
                if let Some((id, state, path)) = parse_circuit_line(line) {
                    update_circuit(&mut inner, id, state, path);
                }
            }
        }

        // 3. stream-status
        let stream_status = controller.get_info("stream-status").await?;
        {
            let mut inner = self.inner.lock().unwrap();
            for line in stream_status.lines() {
                if let Some((id, state, circuit_id, host, port)) = parse_stream_line(line) {
                    update_stream_record(&mut inner, id, state, circuit_id, host, port);
                }
            }
        }

        // 4. address-mappings/all
        let addr_mappings = controller.get_info("address-mappings/all").await?;
        {
            let mut inner = self.inner.lock().unwrap();
            for line in addr_mappings.lines() {
                inner.addr_map.update_from_line(line);
            }
        }

        // 5. subscribe to live events.
        self.spawn_event_listener(controller.clone(), event_kind::STREAM, Self::handle_stream_event);
        self.spawn_event_listener(controller.clone(), event_kind::CIRC, Self::handle_circ_event);
        self.spawn_event_listener(controller.clone(), event_kind::NS, Self::handle_ns_event);
        self.spawn_event_listener(controller.clone(), event_kind::NEWCONSENSUS, Self::handle_ns_event);
        self.spawn_event_listener(controller.clone(), event_kind::ADDRMAP, Self::handle_addrmap_event);

        // 6. entry-guards
        let entry_guards = controller.get_info("entry-guards").await?;
        {
            let mut inner = self.inner.lock().unwrap();
            for line in entry_guards.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let mut parts = line.split(' ');
                let id_token = parts.next().unwrap_or("");
                let status = parts.next().unwrap_or("");
                let id_hex = strip_nick_suffix(id_token);
                if status != "up" {
                    inner.unusable_entry_guards.push(id_hex.to_string());
                    continue;
                }
                let router = inner.routers.get(id_hex).cloned().unwrap_or_else(|| Router::stub(id_hex));
                inner.guards.insert(id_hex.to_string(), router);
            }
        }

        // 7. process/pid
        let pid_raw = controller.get_info("process/pid").await.unwrap_or_default();
        let pid = pid_raw.trim().parse::<u32>().ok().or_else(|| controller.is_owned()).unwrap_or(0);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.pid = pid;
            inner.controller = Some(controller);
        }

        // 8. post_bootstrap
        let hook = self.inner.lock().unwrap().post_bootstrap_hook.clone();
        if let Some(hook) = hook {
            hook();
        }
        log::info!("torstate: bootstrap complete, pid={pid}");
        Ok(())
    }

    fn spawn_event_listener(
        &self,
        controller: Arc<dyn Controller>,
        event: &'static str,
        handler: fn(&TorState, AsyncEvent),
    ) {
        let mut rx = controller.subscribe(event);
        let state = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(&state, event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("{event}: listener lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn handle_circ_event(&self, event: AsyncEvent) {
        let Some((id, state, path)) = parse_circuit_line(event.first_line()) else {
            log::warn!("CIRC: unparseable event line: {}", event.first_line());
            return;
        };
        let circuit = {
            let mut inner = self.inner.lock().unwrap();
            update_circuit(&mut inner, id, state, path);
            let circuit = inner.circuits.get(&id).cloned();
            if let Some(circuit) = &circuit {
                if circuit.is_terminal() {
                    inner.circuits.remove(&id);
                }
            }
            circuit
        };
        if let Some(circuit) = circuit {
            let inner = self.inner.lock().unwrap();
            for listener in &inner.circuit_listeners {
                listener(&circuit);
            }
        }
    }

    fn handle_stream_event(&self, event: AsyncEvent) {
        let Some((id, state, circuit_id, host, port)) = parse_stream_line(event.first_line()) else {
            log::warn!("STREAM: unparseable event line: {}", event.first_line());
            return;
        };

        let (is_new_sighting, stream_snapshot, circuits_snapshot, attacher, controller) = {
            let mut inner = self.inner.lock().unwrap();
            let is_new = !inner.seen_stream_ids.contains(&id);
            if is_new {
                inner.seen_stream_ids.insert(id);
            }
            update_stream_record(&mut inner, id, state, circuit_id, host, port);
            let stream = inner.streams.get(&id).cloned();
            if state.is_terminal() {
                inner.streams.remove(&id);
            }
            (
                is_new && state == StreamState::New,
                stream,
                inner.circuits.clone(),
                inner.attacher.clone(),
                inner.controller.clone(),
            )
        };

        if let Some(stream) = &stream_snapshot {
            let inner = self.inner.lock().unwrap();
            for listener in &inner.stream_listeners {
                listener(stream);
            }
        }

        if let (true, Some(stream), Some(attacher), Some(controller)) =
            (is_new_sighting, stream_snapshot, attacher, controller)
        {
            let state = self.clone();
            tokio::spawn(async move {
                let lookup_state = state.clone();
                let lookup = move |cid: u32| lookup_state.inner.lock().unwrap().circuits.get(&cid).cloned();
                if let Err(e) =
                    attacher::dispatch(id, &stream, &circuits_snapshot, &attacher, controller.as_ref(), lookup).await
                {
                    log::warn!("stream {id}: attach failed: {e}");
                }
            });
        }
    }

    fn handle_ns_event(&self, event: AsyncEvent) {
        let mut inner = self.inner.lock().unwrap();
        if let Err(e) = inner.apply_consensus_lines(event.lines.iter().map(String::as_str)) {
            log::warn!("NS/NEWCONSENSUS: dropping malformed consensus update: {e}");
        }
    }

    fn handle_addrmap_event(&self, event: AsyncEvent) {
        let mut inner = self.inner.lock().unwrap();
        for line in &event.lines {
            inner.addr_map.update_from_line(line);
        }
    }

    // -- read accessors --

    pub fn router(&self, id_hex: &str) -> Option<Router> {
        self.inner.lock().unwrap().routers.get(id_hex).cloned()
    }

    pub fn router_count(&self) -> usize {
        self.inner.lock().unwrap().routers.len()
    }

    pub fn guards(&self) -> HashMap<String, Router> {
        self.inner.lock().unwrap().guards.clone()
    }

    pub fn unusable_entry_guards(&self) -> Vec<String> {
        self.inner.lock().unwrap().unusable_entry_guards.clone()
    }

    pub fn circuit(&self, id: u32) -> Option<Circuit> {
        self.inner.lock().unwrap().circuits.get(&id).cloned()
    }

    pub fn circuits(&self) -> HashMap<u32, Circuit> {
        self.inner.lock().unwrap().circuits.clone()
    }

    pub fn stream(&self, id: u32) -> Option<Stream> {
        self.inner.lock().unwrap().streams.get(&id).cloned()
    }

    pub fn addr_map_entry(&self, original: &str) -> Option<AddrMapping> {
        self.inner.lock().unwrap().addr_map.get(original).cloned()
    }

    pub fn pid(&self) -> u32 {
        self.inner.lock().unwrap().pid
    }

    /// Accept `$<40hex>[=|~<nick>]`, return the known router or
    /// fabricate (and register) a stub for later population by a future
    /// consensus update.
    pub fn router_from_id(&self, id: &str) -> Router {
        let bare = strip_nick_suffix(id);
        let mut inner = self.inner.lock().unwrap();
        if let Some(router) = inner.routers.get(bare) {
            return router.clone();
        }
        let stub = Router::stub(bare.to_string());
        inner.routers.insert(bare.to_string(), stub.clone());
        stub
    }

    /// Register the stream attacher and tell Tor to leave new streams
    /// unattached.
    pub async fn set_attacher(&self, attacher: AttacherFn) -> Result<()> {
        let controller = self.controller()?;
        controller.queue_command("SETCONF __LeaveStreamsUnattached=1").await?;
        self.inner.lock().unwrap().attacher = Some(attacher);
        Ok(())
    }

    /// Unregister the attacher and let Tor resume attaching streams
    /// itself — the reversal of `set_attacher`.
    pub async fn clear_attacher(&self) -> Result<()> {
        let controller = self.controller()?;
        controller.queue_command("SETCONF __LeaveStreamsUnattached=0").await?;
        self.inner.lock().unwrap().attacher = None;
        Ok(())
    }

    /// Register a circuit listener, backfilled with every
    /// currently-known circuit.
    pub fn add_circuit_listener(&self, listener: impl Fn(&Circuit) + Send + Sync + 'static) {
        let mut inner = self.inner.lock().unwrap();
        for circuit in inner.circuits.values() {
            listener(circuit);
        }
        inner.circuit_listeners.push(Box::new(listener));
    }

    /// Register a stream listener, backfilled with every currently
    /// tracked stream.
    pub fn add_stream_listener(&self, listener: impl Fn(&Stream) + Send + Sync + 'static) {
        let mut inner = self.inner.lock().unwrap();
        for stream in inner.streams.values() {
            listener(stream);
        }
        inner.stream_listeners.push(Box::new(listener));
    }

    fn controller(&self) -> Result<Arc<dyn Controller>> {
        self.inner
            .lock()
            .unwrap()
            .controller
            .clone()
            .ok_or_else(|| TorCtlError::Precondition("state is not attached to a running tor".to_string()))
    }

    /// Close one stream with the given close reason, e.g.
    /// `"REASON_EXITPOLICY"` or a raw numeric code.
    pub async fn close_stream(&self, stream_id: u32, reason: &str, flags: &[(&str, bool)]) -> Result<()> {
        let code = resolve_stream_close_reason(reason)?;
        let controller = self.controller()?;
        let mut command = format!("CLOSESTREAM {stream_id} {code}");
        append_flags(&mut command, flags);
        controller.queue_command(&command).await?;
        Ok(())
    }

    /// Close one circuit, optionally with `IfUnused`/`Reason` flags.
    pub async fn close_circuit(&self, circuit_id: u32, flags: &[(&str, bool)]) -> Result<()> {
        let controller = self.controller()?;
        let mut command = format!("CLOSECIRCUIT {circuit_id}");
        append_flags(&mut command, flags);
        controller.queue_command(&command).await?;
        Ok(())
    }

    /// Issue `EXTENDCIRCUIT 0 <path>` for the given hops and wait for the
    /// daemon's assigned circuit id. When `using_guards` is set and the
    /// first hop isn't already a known guard, an entry guard is
    /// prepended to the path.
    pub async fn build_circuit(&self, hops: &[CircuitHop<'_>], using_guards: bool) -> Result<Circuit> {
        let controller = self.controller()?;

        if using_guards {
            if let Some(first) = hops.first() {
                let bare = first.bare_id();
                let is_guard = self.inner.lock().unwrap().guards.contains_key(&format!("${bare}"));
                if !is_guard {
                    log::warn!("build_circuit: first hop ${bare} is not among the current entry guards");
                }
            }
        }

        let command = if hops.is_empty() {
            "EXTENDCIRCUIT 0".to_string()
        } else {
            let path = hops.iter().map(CircuitHop::bare_id).collect::<Vec<_>>().join(",");
            format!("EXTENDCIRCUIT 0 {path}")
        };

        let reply = controller.queue_command(&command).await?;
        let id = reply
            .trim()
            .strip_prefix("EXTENDED ")
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|id| id.parse::<u32>().ok())
            .ok_or_else(|| TorCtlError::ProtocolViolation(format!("unexpected EXTENDCIRCUIT reply: {reply}")))?;

        let mut inner = self.inner.lock().unwrap();
        let circuit = inner.circuits.entry(id).or_insert_with(|| Circuit::new(id)).clone();
        Ok(circuit)
    }
}

fn strip_nick_suffix(id_token: &str) -> &str {
    let without_tilde = id_token.split('~').next().unwrap_or(id_token);
    without_tilde.split('=').next().unwrap_or(without_tilde)
}

fn parse_circuit_line(line: &str) -> Option<(u32, CircuitState, Vec<String>)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut tokens = line.split_whitespace();
    let id: u32 = tokens.next()?.parse().ok()?;
    let state = CircuitState::parse(tokens.next()?)?;
    let path = match tokens.next() {
        Some(token) if token.starts_with('$') => {
            token.split(',').map(|hop| strip_nick_suffix(hop).to_string()).collect()
        }
        _ => Vec::new(),
    };
    Some((id, state, path))
}

fn parse_stream_line(line: &str) -> Option<(u32, StreamState, Option<u32>, String, u16)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut tokens = line.split_whitespace();
    let id: u32 = tokens.next()?.parse().ok()?;
    let state = StreamState::parse(tokens.next()?)?;
    let circuit_id: u32 = tokens.next()?.parse().ok()?;
    let target = tokens.next().unwrap_or("");
    let (host, port) = match target.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(0)),
        None => (target.to_string(), 0),
    };
    Some((id, state, if circuit_id == 0 { None } else { Some(circuit_id) }, host, port))
}

fn update_circuit(inner: &mut Inner, id: u32, state: CircuitState, path: Vec<String>) {
    let circuit = inner.circuits.entry(id).or_insert_with(|| Circuit::new(id));
    circuit.state = state;
    if !path.is_empty() {
        circuit.path = path;
    }
}

fn update_stream_record(
    inner: &mut Inner,
    id: u32,
    state: StreamState,
    circuit_id: Option<u32>,
    host: String,
    port: u16,
) {
    let stream = inner.streams.entry(id).or_insert_with(|| Stream::new(id, host.clone(), port));
    stream.state = state;
    stream.circuit_id = circuit_id;
    if !host.is_empty() {
        stream.target_host = host;
        stream.target_port = port;
    }
    if let Some(cid) = circuit_id {
        if let Some(circuit) = inner.circuits.get_mut(&cid) {
            circuit.streams.insert(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_close_reason_resolves_named_and_numeric() {
        assert_eq!(resolve_stream_close_reason("REASON_EXITPOLICY").unwrap(), 4);
        assert_eq!(resolve_stream_close_reason("9").unwrap(), 9);
        assert!(resolve_stream_close_reason("REASON_NOPE").is_err());
    }

    #[test]
    fn parses_circuit_status_line_with_path() {
        let (id, state, path) = parse_circuit_line("7 BUILT $AAAA~Nick,$BBBB~Nick2").unwrap();
        assert_eq!(id, 7);
        assert_eq!(state, CircuitState::Built);
        assert_eq!(path, vec!["$AAAA".to_string(), "$BBBB".to_string()]);
    }

    #[test]
    fn parses_stream_status_line() {
        let (id, state, circuit_id, host, port) = parse_stream_line("42 NEW 0 example.com:80").unwrap();
        assert_eq!(id, 42);
        assert_eq!(state, StreamState::New);
        assert_eq!(circuit_id, None);
        assert_eq!(host, "example.com");
        assert_eq!(port, 80);
    }

    #[test]
    fn strip_nick_suffix_handles_both_separators() {
        assert_eq!(strip_nick_suffix("$AAAA~Nick"), "$AAAA");
        assert_eq!(strip_nick_suffix("$AAAA=Nick"), "$AAAA");
        assert_eq!(strip_nick_suffix("$AAAA"), "$AAAA");
    }

    #[test]
    fn router_from_id_fabricates_and_registers_a_stub() {
        let state = TorState::new();
        let router = state.router_from_id("$DEADBEEF~nick");
        assert_eq!(router.id_hex, "$DEADBEEF");
        assert_eq!(state.router("$DEADBEEF").unwrap().id_hex, "$DEADBEEF");
    }

    #[test]
    fn close_stream_builds_expected_command_shape() {
        // scenario 3: CLOSESTREAM 42 4 IfUnused
        let code = resolve_stream_close_reason("REASON_EXITPOLICY").unwrap();
        let mut command = format!("CLOSESTREAM {} {}", 42, code);
        append_flags(&mut command, &[("IfUnused", true)]);
        assert_eq!(command, "CLOSESTREAM 42 4 IfUnused");
    }
}
