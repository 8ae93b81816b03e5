//! A scriptable [`Controller`] for exercising the rest of the crate
//! without a real `tor` daemon. Exposed under the `testing` feature so
//! both unit tests (`#[cfg(test)]`) and the integration tests in
//! `tests/` can use the same mock (see `Cargo.toml`'s self-referential
//! dev-dependency).
//!
//! A `Mutex`-guarded inner struct holds scripted replies and received
//! commands; a `broadcast` channel fans out injected events the same
//! way a real control-port reader would.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{Result, TorCtlError};
use crate::protocol::{AsyncEvent, ConfEntry, Controller};

struct Inner {
    info: HashMap<String, String>,
    conf: HashMap<String, Option<String>>,
    command_replies: HashMap<String, String>,
    commands_received: Vec<String>,
    owned_pid: Option<u32>,
}

/// A `Controller` driven entirely by values the test sets up front,
/// plus events it chooses to `emit`.
pub struct MockController {
    inner: Mutex<Inner>,
    events_tx: broadcast::Sender<AsyncEvent>,
}

impl MockController {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(Inner {
                info: HashMap::new(),
                conf: HashMap::new(),
                command_replies: HashMap::new(),
                commands_received: Vec::new(),
                owned_pid: None,
            }),
            events_tx,
        }
    }

    /// Set the value `GETINFO <key>` returns.
    pub fn set_info(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.lock().unwrap().info.insert(key.into(), value.into());
    }

    /// Set the value `GETCONF <key>` returns for one option name.
    /// `None` means "at default" (a bare keyword in the real protocol).
    pub fn set_conf(&self, key: impl Into<String>, value: Option<&str>) {
        self.inner.lock().unwrap().conf.insert(key.into(), value.map(str::to_string));
    }

    /// Script the exact reply `queue_command` returns for one exact
    /// command string. Unscripted commands succeed with an empty body.
    pub fn script_command(&self, command: impl Into<String>, reply: impl Into<String>) {
        self.inner.lock().unwrap().command_replies.insert(command.into(), reply.into());
    }

    /// Every command string passed to `queue_command`, in order.
    pub fn commands_received(&self) -> Vec<String> {
        self.inner.lock().unwrap().commands_received.clone()
    }

    /// Push an asynchronous event to every current subscriber.
    pub fn emit(&self, event: AsyncEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Convenience: emit one event built from a single line.
    pub fn emit_line(&self, line: impl Into<String>) {
        self.emit(AsyncEvent::new(vec![line.into()]));
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Controller for MockController {
    async fn get_info(&self, key: &str) -> Result<String> {
        self.inner
            .lock()
            .unwrap()
            .info
            .get(key)
            .cloned()
            .ok_or_else(|| TorCtlError::DaemonRefused(format!("unknown GETINFO key: {key}")))
    }

    async fn get_info_incremental(&self, key: &str, line_sink: &mut (dyn FnMut(&str) + Send)) -> Result<()> {
        let value = self.get_info(key).await?;
        for line in value.lines() {
            line_sink(line);
        }
        Ok(())
    }

    async fn get_conf(&self, key: &str) -> Result<Vec<ConfEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(key
            .split(' ')
            .filter(|name| !name.is_empty())
            .map(|name| (name.to_string(), inner.conf.get(name).cloned().unwrap_or(None)))
            .collect())
    }

    async fn get_conf_raw(&self, key: &str) -> Result<String> {
        let entries = self.get_conf(key).await?;
        let mut body = String::new();
        for (name, value) in entries {
            match value {
                Some(v) => body.push_str(&format!("{name}={v}\n")),
                None => body.push_str(&format!("{name}\n")),
            }
        }
        Ok(body)
    }

    async fn set_conf(&self, pairs: &[(String, String)]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for (name, value) in pairs {
            inner.conf.insert(name.clone(), Some(value.clone()));
        }
        Ok(())
    }

    async fn queue_command(&self, command: &str) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands_received.push(command.to_string());
        Ok(inner.command_replies.get(command).cloned().unwrap_or_default())
    }

    fn subscribe(&self, _event: &str) -> broadcast::Receiver<AsyncEvent> {
        self.events_tx.subscribe()
    }

    fn is_owned(&self) -> Option<u32> {
        self.inner.lock().unwrap().owned_pid
    }

    fn set_owned_pid(&self, pid: u32) {
        self.inner.lock().unwrap().owned_pid = Some(pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_command_reply_round_trips() {
        let mock = MockController::new();
        mock.script_command("EXTENDCIRCUIT 0", "EXTENDED 7");
        let reply = mock.queue_command("EXTENDCIRCUIT 0").await.unwrap();
        assert_eq!(reply, "EXTENDED 7");
        assert_eq!(mock.commands_received(), vec!["EXTENDCIRCUIT 0".to_string()]);
    }

    #[tokio::test]
    async fn unscripted_command_succeeds_with_empty_body() {
        let mock = MockController::new();
        let reply = mock.queue_command("ATTACHSTREAM 1 0").await.unwrap();
        assert_eq!(reply, "");
    }

    #[tokio::test]
    async fn get_conf_reports_absent_keys_as_default() {
        let mock = MockController::new();
        mock.set_conf("SocksPort", Some("9050"));
        let entries = mock.get_conf("SocksPort ControlPort").await.unwrap();
        assert_eq!(entries[0], ("SocksPort".to_string(), Some("9050".to_string())));
        assert_eq!(entries[1], ("ControlPort".to_string(), None));
    }
}
