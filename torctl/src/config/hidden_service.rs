//! Hidden-service descriptors.
//!
//! A directory, a port list, an optional `HiddenServiceAuthorizeClient`
//! line, a version (default 2), and a `group_readable` flag, plus
//! lazily-read `hostname` and `private_key` files that only exist once
//! the daemon has written them.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TorCtlError};

/// One `HiddenServiceDir` block.
///
/// Does not track its own mutations — callers go through
/// `TorConfig::hidden_services()` (see `super::torconfig`), whose list
/// handle marks the owning `HiddenServices` option staged on any edit,
/// the same way a plain list-valued option does.
#[derive(Debug, Clone)]
pub struct HiddenService {
    directory: PathBuf,
    ports: Vec<String>,
    authorize_client: Option<String>,
    version: u32,
    group_readable: bool,
    hostname_cache: RefCell<Option<String>>,
    private_key_cache: RefCell<Option<String>>,
}

impl HiddenService {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ports: Vec::new(),
            authorize_client: None,
            version: 2,
            group_readable: false,
            hostname_cache: RefCell::new(None),
            private_key_cache: RefCell::new(None),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = directory.into();
        self.invalidate_cache();
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut Vec<String> {
        &mut self.ports
    }

    pub fn add_port(&mut self, virtual_port: u16, target: Option<&str>) {
        let line = match target {
            Some(t) => format!("{virtual_port} {t}"),
            None => virtual_port.to_string(),
        };
        self.ports.push(line);
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    pub fn group_readable(&self) -> bool {
        self.group_readable
    }

    pub fn set_group_readable(&mut self, group_readable: bool) {
        self.group_readable = group_readable;
    }

    pub fn authorize_client(&self) -> Option<&str> {
        self.authorize_client.as_deref()
    }

    pub fn set_authorize_client(&mut self, auth: Option<String>) {
        self.authorize_client = auth;
    }

    /// Drop the cached `hostname`/`private_key` reads. Required after
    /// `set_directory`, and useful in tests after writing fixture files.
    pub fn invalidate_cache(&self) {
        *self.hostname_cache.borrow_mut() = None;
        *self.private_key_cache.borrow_mut() = None;
    }

    /// Contents of `<directory>/hostname`, trimmed, read once and cached.
    pub fn hostname(&self) -> Result<String> {
        self.read_cached(&self.hostname_cache, "hostname")
    }

    /// Contents of `<directory>/private_key`, read once and cached.
    pub fn private_key(&self) -> Result<String> {
        self.read_cached(&self.private_key_cache, "private_key")
    }

    fn read_cached(&self, cache: &RefCell<Option<String>>, file_name: &str) -> Result<String> {
        if let Some(cached) = cache.borrow().as_ref() {
            return Ok(cached.clone());
        }
        let contents = fs::read_to_string(self.directory.join(file_name))
            .map_err(TorCtlError::Io)?
            .trim()
            .to_string();
        *cache.borrow_mut() = Some(contents.clone());
        Ok(contents)
    }

    /// The `(keyword, value)` torrc lines this hidden service expands
    /// to, in the order Tor requires: `HiddenServiceDir`, then an
    /// optional `HiddenServiceDirGroupReadable`, then the
    /// `HiddenServicePort` lines, then the optional version and
    /// authorization modifiers.
    ///
    /// `group_readable` is only emitted when the connected daemon
    /// advertises support for it (older Tor versions reject the keyword
    /// outright); `supports_group_readable` carries that fact in from
    /// `TorConfig`.
    pub fn config_lines(&self, supports_group_readable: bool) -> Vec<(String, String)> {
        let mut lines = vec![("HiddenServiceDir".to_string(), self.directory.display().to_string())];
        if self.group_readable && supports_group_readable {
            lines.push(("HiddenServiceDirGroupReadable".to_string(), "1".to_string()));
        }
        for port in &self.ports {
            lines.push(("HiddenServicePort".to_string(), port.clone()));
        }
        if self.version != 0 {
            lines.push(("HiddenServiceVersion".to_string(), self.version.to_string()));
        }
        if let Some(auth) = &self.authorize_client {
            lines.push(("HiddenServiceAuthorizeClient".to_string(), auth.clone()));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_lines_order_and_defaults() {
        let mut hs = HiddenService::new("/var/lib/tor/hidden_service");
        hs.add_port(80, Some("127.0.0.1:8080"));
        hs.add_port(22, None);
        let lines = hs.config_lines(true);
        assert_eq!(
            lines,
            vec![
                ("HiddenServiceDir".to_string(), "/var/lib/tor/hidden_service".to_string()),
                ("HiddenServicePort".to_string(), "80 127.0.0.1:8080".to_string()),
                ("HiddenServicePort".to_string(), "22".to_string()),
                ("HiddenServiceVersion".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn non_default_version_and_auth_are_emitted() {
        let mut hs = HiddenService::new("/hs");
        hs.set_version(3);
        hs.set_authorize_client(Some("stealth alice,bob".to_string()));
        hs.set_group_readable(true);
        let lines = hs.config_lines(true);
        assert!(lines.contains(&("HiddenServiceVersion".to_string(), "3".to_string())));
        assert!(lines.contains(&("HiddenServiceDirGroupReadable".to_string(), "1".to_string())));
        assert!(lines.contains(&(
            "HiddenServiceAuthorizeClient".to_string(),
            "stealth alice,bob".to_string()
        )));
    }

    #[test]
    fn group_readable_suppressed_when_unsupported() {
        let mut hs = HiddenService::new("/hs");
        hs.set_group_readable(true);
        let lines = hs.config_lines(false);
        assert!(!lines.iter().any(|(k, _)| k == "HiddenServiceDirGroupReadable"));
    }

    #[test]
    fn group_readable_line_precedes_port_lines() {
        let mut hs = HiddenService::new("/hs");
        hs.set_group_readable(true);
        hs.add_port(80, None);
        let lines = hs.config_lines(true);
        let gr_pos = lines.iter().position(|(k, _)| k == "HiddenServiceDirGroupReadable").unwrap();
        let port_pos = lines.iter().position(|(k, _)| k == "HiddenServicePort").unwrap();
        assert!(gr_pos < port_pos);
    }

    #[test]
    fn hostname_is_read_once_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join("hostname")).unwrap();
        writeln!(f, "abc123.onion").unwrap();
        let hs = HiddenService::new(dir.path());
        assert_eq!(hs.hostname().unwrap(), "abc123.onion");

        // even after the file disappears, the cached read still answers
        fs::remove_file(dir.path().join("hostname")).unwrap();
        assert_eq!(hs.hostname().unwrap(), "abc123.onion");
    }
}
