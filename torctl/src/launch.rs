//! The process supervisor: spawn a `tor` binary, watch it bootstrap,
//! and hand back an authenticated control connection.
//!
//! Stdout/stderr are watched line by line for `STATUS_CLIENT BOOTSTRAP`
//! progress and for early failure. Temp-file lifetime (the generated
//! torrc and, if allocated here, the data directory) is RAII via
//! `tempfile::TempDir`/`NamedTempFile` rather than a manually
//! registered shutdown hook.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::config::TorConfig;
use crate::error::{Result, TorCtlError};
use crate::protocol::Controller;

/// One `STATUS_CLIENT BOOTSTRAP ...` progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapProgress {
    pub progress: u8,
    pub tag: String,
    pub summary: String,
}

pub type ProgressCallback = Arc<dyn Fn(BootstrapProgress) + Send + Sync>;
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Connects a freshly bootstrapped tor's control port to a
/// [`Controller`]. Kept as a trait (rather than a bare async fn) so
/// callers can override it in tests — the line-framed codec and
/// authentication handshake live outside this crate.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, control_port: u16) -> Result<Arc<dyn Controller>>;
}

/// Tunable inputs to [`launch_tor`].
pub struct LaunchOptions {
    pub binary_path: Option<PathBuf>,
    pub progress_callback: Option<ProgressCallback>,
    pub connection_factory: Option<Arc<dyn ConnectionFactory>>,
    pub timeout: Option<Duration>,
    pub kill_on_stderr: bool,
    pub stdout_sink: Option<OutputSink>,
    pub stderr_sink: Option<OutputSink>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            binary_path: None,
            progress_callback: None,
            connection_factory: None,
            timeout: None,
            kill_on_stderr: true,
            stdout_sink: None,
            stderr_sink: None,
        }
    }
}

/// A running, supervised tor daemon. Temp artifacts (torrc, and the
/// data directory if one was allocated for this launch) are removed
/// when this handle is dropped.
pub struct TorProcessHandle {
    child: Child,
    pid: u32,
    controller: Option<Arc<dyn Controller>>,
    _torrc: tempfile::NamedTempFile,
    _data_dir: Option<tempfile::TempDir>,
}

impl TorProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn controller(&self) -> Option<Arc<dyn Controller>> {
        self.controller.clone()
    }

    /// Terminate the daemon. Cleanup of the torrc/data directory still
    /// happens on drop regardless of how this resolves.
    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await.map_err(TorCtlError::Io)
    }
}

fn resolve_binary(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let path_var = env::var_os("PATH").ok_or_else(|| TorCtlError::NotFound("tor".to_string()))?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join("tor");
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(TorCtlError::NotFound("tor".to_string()))
}

/// Shell-lex-split a `STATUS_CLIENT` payload: whitespace-separated
/// tokens, with `KEY="quoted value"` kept as one token.
fn shell_lex_split(payload: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in payload.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_bootstrap_line(line: &str) -> Option<BootstrapProgress> {
    let payload = line.split_once("STATUS_CLIENT ")?.1;
    let payload = payload.strip_prefix("BOOTSTRAP ").or_else(|| payload.strip_prefix("NOTICE BOOTSTRAP "))?;
    let mut progress = None;
    let mut tag = String::new();
    let mut summary = String::new();
    for token in shell_lex_split(payload) {
        if let Some(v) = token.strip_prefix("PROGRESS=") {
            progress = v.parse::<u8>().ok();
        } else if let Some(v) = token.strip_prefix("TAG=") {
            tag = v.trim_matches('"').to_string();
        } else if let Some(v) = token.strip_prefix("SUMMARY=") {
            summary = v.trim_matches('"').to_string();
        }
    }
    progress.map(|progress| BootstrapProgress { progress, tag, summary })
}

/// Spawn a tor binary from `config`, watch it bootstrap, and return a
/// handle holding an authenticated [`Controller`].
pub async fn launch_tor(config: &TorConfig, options: LaunchOptions) -> Result<TorProcessHandle> {
    let binary_path = resolve_binary(options.binary_path.as_deref())?;

    let data_dir = match config.get_string("DataDirectory") {
        Ok(_) => None,
        Err(_) => {
            let dir = tempfile::tempdir().map_err(TorCtlError::Io)?;
            config.set("DataDirectory", dir.path().to_string_lossy().to_string())?;
            Some(dir)
        }
    };

    let control_port: u16 = match config.get_int("ControlPort") {
        Ok(port) => port as u16,
        Err(_) => {
            config.set("ControlPort", 9052i64)?;
            9052
        }
    };

    if control_port != 0 {
        config.set("CookieAuthentication", true)?;
        config.set("__OwningControllerProcess", std::process::id() as i64)?;
    }

    config.save().await.or_else(|e| match e {
        TorCtlError::Precondition(_) => Ok(()), // detached config: nothing to save to a daemon yet
        other => Err(other),
    })?;
    let torrc_body = config.create_torrc();

    let mut torrc = tempfile::NamedTempFile::new().map_err(TorCtlError::Io)?;
    {
        use std::io::Write;
        torrc.write_all(torrc_body.as_bytes()).map_err(TorCtlError::Io)?;
        torrc.flush().map_err(TorCtlError::Io)?;
    }

    let home = data_dir
        .as_ref()
        .map(|d| d.path().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(config.get_string("DataDirectory").unwrap_or_default()));

    let mut child = Command::new(&binary_path)
        .arg("-f")
        .arg(torrc.path())
        .env("HOME", &home)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(TorCtlError::Io)?;

    let pid = child.id().unwrap_or(0);
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let result = watch_bootstrap(&mut child, stdout, stderr, control_port, pid, &options).await;

    match result {
        Ok(controller) => {
            if let Some(controller) = &controller {
                controller.set_owned_pid(pid);
                let _ = controller.queue_command("TAKEOWNERSHIP").await;
                let _ = controller.queue_command("RESETCONF __OwningControllerProcess").await;
            }
            Ok(TorProcessHandle { child, pid, controller, _torrc: torrc, _data_dir: data_dir })
        }
        Err(e) => {
            let _ = child.kill().await;
            Err(e)
        }
    }
}

async fn watch_bootstrap(
    child: &mut Child,
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    control_port: u16,
    pid: u32,
    options: &LaunchOptions,
) -> Result<Option<Arc<dyn Controller>>> {
    if control_port == 0 {
        return Ok(None);
    }

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut connected: Option<Arc<dyn Controller>> = None;
    let mut connection_attempted = false;

    let body = async {
        loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    let Some(line) = line.map_err(TorCtlError::Io)? else {
                        return Err(TorCtlError::BootstrapFailure(format!("tor (pid {pid}) exited before bootstrap completed")));
                    };
                    if let Some(sink) = &options.stdout_sink {
                        sink(&line);
                    }
                    if !connection_attempted && line.contains("Bootstrap") {
                        connection_attempted = true;
                    }
                    if connected.is_none() && line.contains("Bootstrap") {
                        if let Some(factory) = &options.connection_factory {
                            match factory.connect(control_port).await {
                                Ok(controller) => connected = Some(controller),
                                Err(e) => log::debug!("launch_tor: connection attempt failed, will retry: {e}"),
                            }
                        }
                    }
                    if let Some(controller) = &connected {
                        if let Some(progress) = parse_bootstrap_line(&line) {
                            if let Some(cb) = &options.progress_callback {
                                cb(progress.clone());
                            }
                            if progress.progress >= 100 {
                                return Ok(connected.clone());
                            }
                        }
                    }
                }
                line = stderr_lines.next_line() => {
                    let Some(line) = line.map_err(TorCtlError::Io)? else {
                        continue;
                    };
                    if let Some(sink) = &options.stderr_sink {
                        sink(&line);
                    }
                    if options.kill_on_stderr {
                        return Err(TorCtlError::BootstrapFailure(format!("tor (pid {pid}) wrote to stderr: {line}")));
                    }
                }
                status = child.wait() => {
                    let status = status.map_err(TorCtlError::Io)?;
                    return Err(TorCtlError::BootstrapFailure(format!(
                        "tor (pid {pid}) exited before bootstrap completed: {status}"
                    )));
                }
            }
        }
    };

    match options.timeout {
        Some(duration) => match tokio::time::timeout(duration, body).await {
            Ok(result) => result,
            Err(_) => {
                let _ = child.start_kill();
                Err(TorCtlError::BootstrapFailure(format!("tor (pid {pid}) bootstrap timed out")))
            }
        },
        None => body.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_lex_split_keeps_quoted_values_as_one_token() {
        let tokens = shell_lex_split(r#"PROGRESS=10 TAG=handshake SUMMARY="Handshaking with a relay""#);
        assert_eq!(tokens, vec!["PROGRESS=10", "TAG=handshake", r#"SUMMARY="Handshaking with a relay""#]);
    }

    #[test]
    fn parses_bootstrap_progress_line() {
        let line = r#"650 STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS=45 TAG=handshake SUMMARY="Finishing handshake""#;
        let progress = parse_bootstrap_line(line).unwrap();
        assert_eq!(progress.progress, 45);
        assert_eq!(progress.tag, "handshake");
        assert_eq!(progress.summary, "Finishing handshake");
    }

    #[test]
    fn non_bootstrap_line_does_not_parse() {
        assert!(parse_bootstrap_line("Jul 27 12:00:00.000 [notice] Opening Socks listener").is_none());
    }
}
