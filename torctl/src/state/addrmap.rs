//! The address map: original hostname -> mapped address.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct AddrMapping {
    pub address: String,
    pub expiry: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AddrMap {
    entries: HashMap<String, AddrMapping>,
}

impl AddrMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, original: &str) -> Option<&AddrMapping> {
        self.entries.get(original)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Parse one `address-mappings/all` bootstrap line or one `ADDRMAP`
    /// event line: `original mapped ["expiry"]`.
    pub fn update_from_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let mut parts = line.splitn(3, ' ');
        let original = match parts.next() {
            Some(o) => o.to_string(),
            None => return,
        };
        let mapped = match parts.next() {
            Some(m) => m.to_string(),
            None => return,
        };
        let expiry = parts.next().map(|e| e.trim_matches('"').to_string());

        if mapped == "<error>" {
            self.entries.remove(&original);
            return;
        }
        self.entries.insert(original, AddrMapping { address: mapped, expiry });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mapping_with_expiry() {
        let mut map = AddrMap::new();
        map.update_from_line(r#"example.com 93.184.216.34 "2026-01-01 00:00:00""#);
        let got = map.get("example.com").unwrap();
        assert_eq!(got.address, "93.184.216.34");
        assert_eq!(got.expiry.as_deref(), Some("2026-01-01 00:00:00"));
    }

    #[test]
    fn error_mapping_removes_entry() {
        let mut map = AddrMap::new();
        map.update_from_line("example.com 1.2.3.4");
        map.update_from_line("example.com <error>");
        assert!(map.get("example.com").is_none());
    }
}
