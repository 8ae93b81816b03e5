//! Explicit four-state consensus parser.
//!
//! Turns `ns/all` lines into [`Router`] records without buffering the
//! whole reply — `feed_line` is called once per line, whether the
//! lines arrive one at a time (`get_info_incremental`) or all at once
//! (split from a buffered `get_info`); both paths produce the same
//! `finish()` result.

use std::collections::HashMap;

use crate::error::{Result, TorCtlError};
use crate::state::router::Router;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fsm {
    /// Expecting a router header (`r ...`).
    R,
    /// Expecting status flags (`s ...`), with optional `a ...` lines first.
    S,
    /// Expecting bandwidth (`w ...`), optional.
    W,
    /// Expecting a policy summary (`p ...`), optional.
    P,
}

/// Output of a completed consensus parse.
#[derive(Debug, Default)]
pub struct ConsensusResult {
    pub routers: HashMap<String, Router>,
    /// nickname -> id_hex, present only when exactly one router claims
    /// that nickname; absent (not merely `None`) once a second router
    /// claims it.
    pub by_name: HashMap<String, String>,
    /// nickname -> every id_hex that claimed it, duplicates included.
    pub by_name_all: HashMap<String, Vec<String>>,
}

/// Line-incremental FSM; accumulate with [`Self::feed_line`], read the
/// result out with [`Self::finish`].
pub struct ConsensusParser {
    state: Fsm,
    current_id: Option<String>,
    routers: HashMap<String, Router>,
    by_name_nulled: HashMap<String, bool>,
    by_name_all: HashMap<String, Vec<String>>,
}

impl ConsensusParser {
    pub fn new() -> Self {
        Self {
            state: Fsm::R,
            current_id: None,
            routers: HashMap::new(),
            by_name_nulled: HashMap::new(),
            by_name_all: HashMap::new(),
        }
    }

    pub fn feed_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() || line == "." || line == "OK" || line.starts_with("ns/") {
            return Ok(());
        }

        let (tag, rest) = match line.split_once(' ') {
            Some((t, r)) => (t, r),
            None => (line, ""),
        };

        if tag == "r" {
            self.begin_router(rest)?;
            self.state = Fsm::S;
            return Ok(());
        }

        match self.state {
            Fsm::R => Err(TorCtlError::ProtocolViolation(format!(
                "expected router header, got: {line}"
            ))),
            Fsm::S => match tag {
                "s" => {
                    self.record_flags(rest)?;
                    self.state = Fsm::W;
                    Ok(())
                }
                "a" => {
                    self.record_v6_addr(rest)?;
                    Ok(())
                }
                _ => Err(TorCtlError::ProtocolViolation(format!(
                    "expected status flags, got: {line}"
                ))),
            },
            Fsm::W => match tag {
                "w" => {
                    self.record_bandwidth(rest)?;
                    self.state = Fsm::P;
                    Ok(())
                }
                "p" => {
                    // `w` is optional; a policy line may follow `s` directly.
                    self.record_policy(rest)?;
                    self.state = Fsm::R;
                    Ok(())
                }
                _ => {
                    self.state = Fsm::R;
                    Ok(())
                }
            },
            Fsm::P => match tag {
                "p" => {
                    self.record_policy(rest)?;
                    self.state = Fsm::R;
                    Ok(())
                }
                _ => Err(TorCtlError::ProtocolViolation(format!(
                    "expected policy summary, got: {line}"
                ))),
            },
        }
    }

    pub fn finish(self) -> ConsensusResult {
        let mut by_name = HashMap::new();
        for (name, nulled) in &self.by_name_nulled {
            if !*nulled {
                if let Some(ids) = self.by_name_all.get(name) {
                    if let Some(id) = ids.first() {
                        by_name.insert(name.clone(), id.clone());
                    }
                }
            }
        }
        ConsensusResult {
            routers: self.routers,
            by_name,
            by_name_all: self.by_name_all,
        }
    }

    fn begin_router(&mut self, rest: &str) -> Result<()> {
        let fields: Vec<&str> = rest.split(' ').collect();
        if fields.len() < 8 {
            return Err(TorCtlError::ProtocolViolation(format!(
                "malformed router header: r {rest}"
            )));
        }
        let nickname = fields[0].to_string();
        let identity_digest = fields[1].to_string();
        let descriptor_digest = fields[2].to_string();
        let published = format!("{} {}", fields[3], fields[4]);
        let ip = fields[5].to_string();
        let or_port: u16 = fields[6]
            .parse()
            .map_err(|_| TorCtlError::ProtocolViolation(format!("bad ORPort in: r {rest}")))?;
        let dir_port: u16 = fields[7]
            .parse()
            .map_err(|_| TorCtlError::ProtocolViolation(format!("bad DirPort in: r {rest}")))?;

        let id_hex = format!("${identity_digest}");

        self.routers.entry(id_hex.clone()).or_insert_with(|| Router {
            id_hex: id_hex.clone(),
            nickname: nickname.clone(),
            identity_digest,
            descriptor_digest,
            published,
            ip,
            or_port,
            dir_port,
            ipv6_addrs: Vec::new(),
            flags: Default::default(),
            bandwidth: None,
            policy: None,
        });

        let entry = self.by_name_all.entry(nickname.clone()).or_default();
        if !entry.contains(&id_hex) {
            entry.push(id_hex.clone());
        }
        if entry.len() > 1 {
            self.by_name_nulled.insert(nickname.clone(), true);
        } else {
            self.by_name_nulled.entry(nickname).or_insert(false);
        }

        self.current_id = Some(id_hex);
        Ok(())
    }

    fn current_router(&mut self) -> Result<&mut Router> {
        let id = self
            .current_id
            .clone()
            .ok_or_else(|| TorCtlError::ProtocolViolation("no router header seen yet".to_string()))?;
        self.routers
            .get_mut(&id)
            .ok_or_else(|| TorCtlError::ProtocolViolation(format!("unknown router {id}")))
    }

    fn record_flags(&mut self, rest: &str) -> Result<()> {
        let flags = rest.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect();
        self.current_router()?.flags = flags;
        Ok(())
    }

    fn record_v6_addr(&mut self, rest: &str) -> Result<()> {
        let addr = rest.trim().to_string();
        self.current_router()?.ipv6_addrs.push(addr);
        Ok(())
    }

    fn record_bandwidth(&mut self, rest: &str) -> Result<()> {
        let bandwidth = rest
            .split(' ')
            .find_map(|kv| kv.strip_prefix("Bandwidth=").and_then(|v| v.parse::<u64>().ok()));
        self.current_router()?.bandwidth = bandwidth;
        Ok(())
    }

    fn record_policy(&mut self, rest: &str) -> Result<()> {
        let policy = rest.trim().to_string();
        self.current_router()?.policy = Some(policy);
        Ok(())
    }
}

impl Default for ConsensusParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a whole `ns/all` payload in one call, for callers that already
/// have it buffered.
pub fn parse_all(text: &str) -> Result<ConsensusResult> {
    let mut parser = ConsensusParser::new();
    for line in text.lines() {
        parser.feed_line(line)?;
    }
    Ok(parser.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "r Nick AAAA BBBB 2024-05-01 12:00:00 10.0.0.1 9001 0\n\
                           s Guard Fast Running\n\
                           w Bandwidth=1234\n\
                           p accept 80,443\n";

    #[test]
    fn scenario_5_single_router_with_guard_flag() {
        let result = parse_all(SAMPLE).unwrap();
        assert_eq!(result.routers.len(), 1);
        let router = result.routers.get("$AAAA").unwrap();
        assert_eq!(router.nickname, "Nick");
        assert_eq!(router.descriptor_digest, "BBBB");
        assert_eq!(router.published, "2024-05-01 12:00:00");
        assert_eq!(router.ip, "10.0.0.1");
        assert_eq!(router.or_port, 9001);
        assert_eq!(router.dir_port, 0);
        assert_eq!(router.bandwidth, Some(1234));
        assert_eq!(router.policy.as_deref(), Some("accept 80,443"));
        assert!(router.is_guard());
        assert_eq!(result.by_name.get("Nick"), Some(&"$AAAA".to_string()));
    }

    #[test]
    fn line_incremental_matches_bulk_feed() {
        let bulk = parse_all(SAMPLE).unwrap();

        let mut parser = ConsensusParser::new();
        for line in SAMPLE.lines() {
            parser.feed_line(line).unwrap();
        }
        let incremental = parser.finish();

        assert_eq!(bulk.routers, incremental.routers);
        assert_eq!(bulk.by_name, incremental.by_name);
    }

    #[test]
    fn duplicate_nickname_collapses_to_sentinel() {
        let text = "r Nick AAAA BBBB 2024-05-01 12:00:00 10.0.0.1 9001 0\n\
                     s Fast\n\
                     w Bandwidth=1\n\
                     p accept 80\n\
                     r Nick CCCC DDDD 2024-05-01 12:00:00 10.0.0.2 9002 0\n\
                     s Fast\n\
                     w Bandwidth=1\n\
                     p accept 80\n";
        let result = parse_all(text).unwrap();
        assert_eq!(result.routers.len(), 2);
        assert!(!result.by_name.contains_key("Nick"));
        assert_eq!(
            result.by_name_all.get("Nick").unwrap(),
            &vec!["$AAAA".to_string(), "$CCCC".to_string()]
        );
    }

    #[test]
    fn w_and_p_are_optional() {
        let text = "r A AAAA BBBB 2024-05-01 12:00:00 10.0.0.1 9001 0\n\
                     s Fast\n\
                     r B EEEE FFFF 2024-05-01 12:00:00 10.0.0.2 9002 0\n\
                     s Fast\n";
        let result = parse_all(text).unwrap();
        assert_eq!(result.routers.len(), 2);
        assert!(result.routers["$AAAA"].bandwidth.is_none());
    }

    #[test]
    fn out_of_order_line_is_a_protocol_violation() {
        let mut parser = ConsensusParser::new();
        assert!(parser.feed_line("s Fast").is_err());
    }

    #[test]
    fn ignorable_lines_do_not_advance_the_state() {
        let mut parser = ConsensusParser::new();
        parser.feed_line("").unwrap();
        parser.feed_line("ns/all=").unwrap();
        parser.feed_line("OK").unwrap();
        parser.feed_line(".").unwrap();
        assert!(parser.feed_line("r A AAAA BBBB 2024-05-01 12:00:00 10.0.0.1 9001 0").is_ok());
    }
}
