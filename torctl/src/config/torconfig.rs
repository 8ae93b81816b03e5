//! `TorConfig`: a typed, change-tracked mirror of a tor daemon's
//! configuration.
//!
//! A registry of option kinds fetched from `GETINFO config/names`, a
//! committed view fetched from `GETCONF`, a staged view of not-yet-saved
//! edits, and an atomic `save()` that issues one `SETCONF` for everything
//! staged. Detached (no daemon attached yet) use is first-class: a
//! `TorConfig` can be built up before `attach()` is ever called.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::hidden_service::HiddenService;
use crate::config::list::ChangeTrackingList;
use crate::config::types::{ConfigInput, OptionKind, Scalar, ScalarInput};
use crate::error::{Result, TorCtlError};
use crate::protocol::{event_kind, Controller};

/// The stored shape of one option's current value.
#[derive(Debug, Clone)]
pub enum ConfigValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
    HiddenServices(Vec<HiddenService>),
}

const HIDDEN_SERVICES_KEY: &str = "HiddenServices";

struct Inner {
    controller: Option<Arc<dyn Controller>>,
    committed: HashMap<String, ConfigValue>,
    staged: HashMap<String, ConfigValue>,
    kinds: HashMap<String, OptionKind>,
    /// lowercased name -> canonical (as-declared-case) name.
    canonical: HashMap<String, String>,
    supports_hs_group_readable: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            controller: None,
            committed: HashMap::new(),
            staged: HashMap::new(),
            kinds: HashMap::new(),
            canonical: HashMap::new(),
            supports_hs_group_readable: true,
        }
    }

    fn canonical_name(&self, name: &str) -> Option<String> {
        if name == HIDDEN_SERVICES_KEY {
            return Some(HIDDEN_SERVICES_KEY.to_string());
        }
        self.canonical.get(&name.to_lowercase()).cloned()
    }

    fn canonical_name_or_register(&mut self, name: &str) -> String {
        if let Some(existing) = self.canonical_name(name) {
            return existing;
        }
        self.canonical.insert(name.to_lowercase(), name.to_string());
        name.to_string()
    }

    fn kind_for(&self, canonical: &str) -> Option<OptionKind> {
        self.kinds.get(canonical).copied()
    }

    fn kind_for_or_infer(&mut self, canonical: &str, sample: &ScalarInput) -> OptionKind {
        if let Some(kind) = self.kind_for(canonical) {
            return kind;
        }
        let inferred = infer_kind(sample);
        self.kinds.insert(canonical.to_string(), inferred);
        inferred
    }
}

fn infer_kind(sample: &ScalarInput) -> OptionKind {
    match sample {
        ScalarInput::Bool(_) => OptionKind::Boolean,
        ScalarInput::Int(_) => OptionKind::Integer,
        ScalarInput::Float(_) => OptionKind::Float,
        ScalarInput::Str(_) => OptionKind::String,
    }
}

/// A typed, change-tracked mirror of a tor daemon's configuration.
///
/// Cheap to clone (an `Arc` around the shared state), so it can be
/// handed to a process supervisor and an event-loop task at the same
/// time.
#[derive(Clone)]
pub struct TorConfig {
    inner: Arc<Mutex<Inner>>,
}

impl TorConfig {
    /// A config with no daemon attached yet — options can still be set
    /// and read, and `create_torrc()` used to seed a fresh daemon's
    /// startup file.
    pub fn detached() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::new())) }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().unwrap().controller.is_some()
    }

    /// Attach to a live daemon: fetch the option-kind registry, fetch
    /// every known option's current value, and start a background
    /// listener that reconciles `CONF_CHANGED` events into `committed`.
    pub async fn attach(&self, controller: Arc<dyn Controller>) -> Result<()> {
        let names_raw = controller.get_info("config/names").await?;
        let mut kinds = HashMap::new();
        let mut canonical = HashMap::new();
        for line in names_raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((name, kind_name)) = line.split_once(' ') {
                if let Some(kind) = OptionKind::from_wire_name(kind_name.trim()) {
                    canonical.insert(name.to_lowercase(), name.to_string());
                    kinds.insert(name.to_string(), kind);
                }
            }
        }

        let all_names: Vec<&str> = kinds.keys().map(String::as_str).collect();
        let committed = if all_names.is_empty() {
            HashMap::new()
        } else {
            let raw = controller.get_conf_raw(&all_names.join(" ")).await?;
            parse_getconf_reply(&raw, &kinds)?
        };

        {
            let mut inner = self.inner.lock().unwrap();
            inner.kinds = kinds;
            inner.canonical = canonical;
            inner.committed = committed;
            inner.staged.clear();
            inner.controller = Some(controller.clone());
        }

        self.spawn_conf_changed_listener(controller);
        Ok(())
    }

    fn spawn_conf_changed_listener(&self, controller: Arc<dyn Controller>) {
        let mut rx = controller.subscribe(event_kind::CONF_CHANGED);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let mut guard = inner.lock().unwrap();
                        for line in &event.lines {
                            let (key, value) = match line.split_once('=') {
                                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                                None => (line.clone(), None),
                            };
                            let canonical = guard.canonical_name(&key).unwrap_or(key);
                            // staged edits win over the daemon's own notion of the
                            // value until the next save() — see DESIGN.md.
                            if guard.staged.contains_key(&canonical) {
                                continue;
                            }
                            match value {
                                Some(v) => {
                                    let kind = guard.kind_for(&canonical).unwrap_or(OptionKind::String);
                                    match kind.parse_wire_scalar(&v) {
                                        Ok(scalar) => {
                                            guard.committed.insert(canonical, ConfigValue::Scalar(scalar));
                                        }
                                        Err(e) => log::warn!(
                                            "CONF_CHANGED: dropping unparseable value for {canonical}: {e}"
                                        ),
                                    }
                                }
                                None => {
                                    guard.committed.remove(&canonical);
                                }
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("CONF_CHANGED listener lagged, missed {skipped} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub fn get_type(&self, name: &str) -> Result<OptionKind> {
        let inner = self.inner.lock().unwrap();
        let canonical = inner
            .canonical_name(name)
            .ok_or_else(|| TorCtlError::InvalidArgument(format!("unknown option {name}")))?;
        inner
            .kind_for(&canonical)
            .ok_or_else(|| TorCtlError::InvalidArgument(format!("no type registered for {canonical}")))
    }

    pub fn get(&self, name: &str) -> Result<ConfigValue> {
        let inner = self.inner.lock().unwrap();
        let canonical = inner
            .canonical_name(name)
            .ok_or_else(|| TorCtlError::InvalidArgument(format!("unknown option {name}")))?;
        inner
            .staged
            .get(&canonical)
            .or_else(|| inner.committed.get(&canonical))
            .cloned()
            .ok_or_else(|| TorCtlError::InvalidArgument(format!("{canonical} is not set")))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.get(name)? {
            ConfigValue::Scalar(s) => s.as_bool(),
            other => Err(TorCtlError::InvalidArgument(format!("{name} is not a scalar: {other:?}"))),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i64> {
        match self.get(name)? {
            ConfigValue::Scalar(s) => s.as_int(),
            other => Err(TorCtlError::InvalidArgument(format!("{name} is not a scalar: {other:?}"))),
        }
    }

    pub fn get_float(&self, name: &str) -> Result<f64> {
        match self.get(name)? {
            ConfigValue::Scalar(s) => s.as_float(),
            other => Err(TorCtlError::InvalidArgument(format!("{name} is not a scalar: {other:?}"))),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.get(name)? {
            ConfigValue::Scalar(s) => Ok(s.render()),
            other => Err(TorCtlError::InvalidArgument(format!("{name} is not a scalar: {other:?}"))),
        }
    }

    pub fn get_list(&self, name: &str) -> Result<Vec<String>> {
        match self.get(name)? {
            ConfigValue::List(items) => Ok(items.iter().map(Scalar::render).collect()),
            ConfigValue::Scalar(s) => Ok(vec![s.render()]),
            ConfigValue::HiddenServices(_) => {
                Err(TorCtlError::InvalidArgument(format!("{name} is the hidden-service pseudo-option")))
            }
        }
    }

    /// Write one option. A plain scalar stages a `Scalar`; a `Vec`
    /// stages a `List`, regardless of what kind the daemon eventually
    /// turns out to declare for this name — list-valued-ness is
    /// independent of scalar kind (see `ConfigInput`).
    pub fn set(&self, name: &str, value: impl Into<ConfigInput>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let canonical = inner.canonical_name_or_register(name);
        match value.into() {
            ConfigInput::Scalar(s) => {
                let kind = inner.kind_for_or_infer(&canonical, &s);
                let scalar = kind.validate(s)?;
                inner.staged.insert(canonical, ConfigValue::Scalar(scalar));
            }
            ConfigInput::List(items) => {
                let kind = match items.first() {
                    Some(sample) => inner.kind_for_or_infer(&canonical, sample),
                    None => inner.kind_for(&canonical).unwrap_or(OptionKind::String),
                };
                let scalars = items
                    .into_iter()
                    .map(|i| kind.validate(i))
                    .collect::<Result<Vec<_>>>()?;
                inner.staged.insert(canonical, ConfigValue::List(scalars));
            }
        }
        Ok(())
    }

    /// True as soon as anything is staged.
    pub fn needs_save(&self) -> bool {
        !self.inner.lock().unwrap().staged.is_empty()
    }

    /// A mutation handle for a list-valued option: every mutator stages
    /// the option as a side effect.
    pub fn list_handle(&self, name: &str) -> Result<ListHandle> {
        let mut inner = self.inner.lock().unwrap();
        let canonical = inner.canonical_name_or_register(name);
        let kind = inner.kind_for(&canonical).unwrap_or(OptionKind::LineList);
        let current = match inner.staged.get(&canonical).or_else(|| inner.committed.get(&canonical)) {
            Some(ConfigValue::List(v)) => v.clone(),
            Some(ConfigValue::Scalar(s)) => vec![s.clone()],
            Some(ConfigValue::HiddenServices(_)) => {
                return Err(TorCtlError::InvalidArgument(
                    "HiddenServices has its own handle — use hidden_services()".to_string(),
                ))
            }
            None => Vec::new(),
        };
        drop(inner);
        Ok(ListHandle {
            inner: self.inner.clone(),
            name: canonical,
            kind,
            list: ChangeTrackingList::new(current, Arc::new(|| log::trace!("list option mutated"))),
        })
    }

    /// A mutation handle for the `HiddenServices` pseudo-option.
    pub fn hidden_services(&self) -> HiddenServiceListHandle {
        let mut inner = self.inner.lock().unwrap();
        let current = match inner.staged.get(HIDDEN_SERVICES_KEY).or_else(|| inner.committed.get(HIDDEN_SERVICES_KEY)) {
            Some(ConfigValue::HiddenServices(v)) => v.clone(),
            _ => Vec::new(),
        };
        drop(inner);
        HiddenServiceListHandle {
            inner: self.inner.clone(),
            list: ChangeTrackingList::new(current, Arc::new(|| log::trace!("hidden service mutated"))),
        }
    }

    pub fn set_supports_hidden_service_group_readable(&self, supported: bool) {
        self.inner.lock().unwrap().supports_hs_group_readable = supported;
    }

    /// Push every staged option to the daemon as one `SETCONF`. On
    /// success, staged entries become committed; on failure, staged is
    /// left completely untouched.
    pub async fn save(&self) -> Result<()> {
        let (controller, pairs) = {
            let inner = self.inner.lock().unwrap();
            if inner.staged.is_empty() {
                return Ok(());
            }
            let controller = inner
                .controller
                .clone()
                .ok_or_else(|| TorCtlError::Precondition("config is not attached to a running tor".to_string()))?;
            let mut pairs = Vec::new();
            for (name, value) in inner.staged.iter() {
                render_into_setconf_pairs(name, value, &inner, &mut pairs);
            }
            (controller, pairs)
        };

        controller.set_conf(&pairs).await?;

        let mut inner = self.inner.lock().unwrap();
        let staged_keys: Vec<String> = inner.staged.keys().cloned().collect();
        for name in staged_keys {
            if let Some(value) = inner.staged.remove(&name) {
                inner.committed.insert(name, value);
            }
        }
        log::debug!("torconfig: saved {} option(s)", pairs.len());
        Ok(())
    }

    /// Render the effective (committed overlaid with staged) view as a
    /// torrc file body, for seeding a not-yet-running daemon.
    pub fn create_torrc(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let mut effective: HashMap<String, ConfigValue> = inner.committed.clone();
        for (k, v) in inner.staged.iter() {
            effective.insert(k.clone(), v.clone());
        }
        let mut names: Vec<String> = effective.keys().cloned().collect();
        names.sort();

        let mut out = String::new();
        for name in &names {
            match &effective[name] {
                ConfigValue::Scalar(s) => {
                    out.push_str(name);
                    out.push(' ');
                    out.push_str(&s.render());
                    out.push('\n');
                }
                ConfigValue::List(items) => {
                    let kind = inner.kinds.get(name).copied().unwrap_or(OptionKind::LineList);
                    if matches!(
                        kind,
                        OptionKind::CommaList | OptionKind::TimeIntervalCommaList | OptionKind::RouterList
                    ) {
                        out.push_str(name);
                        out.push(' ');
                        out.push_str(&items.iter().map(Scalar::render).collect::<Vec<_>>().join(","));
                        out.push('\n');
                    } else {
                        for item in items {
                            out.push_str(name);
                            out.push(' ');
                            out.push_str(&item.render());
                            out.push('\n');
                        }
                    }
                }
                ConfigValue::HiddenServices(list) => {
                    for hs in list {
                        for (k, v) in hs.config_lines(inner.supports_hs_group_readable) {
                            out.push_str(&k);
                            out.push(' ');
                            out.push_str(&v);
                            out.push('\n');
                        }
                    }
                }
            }
        }
        out
    }
}

fn render_into_setconf_pairs(
    name: &str,
    value: &ConfigValue,
    inner: &Inner,
    pairs: &mut Vec<(String, String)>,
) {
    match value {
        ConfigValue::Scalar(s) => pairs.push((name.to_string(), s.render())),
        ConfigValue::List(items) => {
            let kind = inner.kinds.get(name).copied().unwrap_or(OptionKind::LineList);
            if matches!(
                kind,
                OptionKind::CommaList | OptionKind::TimeIntervalCommaList | OptionKind::RouterList
            ) {
                let joined = items.iter().map(Scalar::render).collect::<Vec<_>>().join(",");
                pairs.push((name.to_string(), joined));
            } else {
                for item in items {
                    pairs.push((name.to_string(), item.render()));
                }
            }
        }
        ConfigValue::HiddenServices(list) => {
            for hs in list {
                for (k, v) in hs.config_lines(inner.supports_hs_group_readable) {
                    pairs.push((k, v));
                }
            }
        }
    }
}

fn parse_getconf_reply(raw: &str, kinds: &HashMap<String, OptionKind>) -> Result<HashMap<String, ConfigValue>> {
    let mut ordered: Vec<(String, Option<String>)> = Vec::new();
    for line in raw.lines() {
        let line = line.trim_start_matches("250-").trim_start_matches("250 ").trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((k, v)) => ordered.push((k.to_string(), Some(v.to_string()))),
            None => ordered.push((line.to_string(), None)),
        }
    }

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (k, v) in ordered {
        if let Some(v) = v {
            grouped.entry(k).or_default().push(v);
        }
    }

    let mut committed = HashMap::new();
    for (name, values) in grouped {
        let kind = kinds.get(&name).copied().unwrap_or(OptionKind::String);
        if values.len() > 1 || kind.is_declared_list() {
            let mut scalars = Vec::new();
            for v in &values {
                for elem in kind.split_wire_value(v) {
                    scalars.push(kind.parse_wire_scalar(&elem)?);
                }
            }
            committed.insert(name, ConfigValue::List(scalars));
        } else if let Some(v) = values.into_iter().next() {
            committed.insert(name, ConfigValue::Scalar(kind.parse_wire_scalar(&v)?));
        }
    }
    Ok(committed)
}

/// Mutation handle for a list-valued option, returned by
/// [`TorConfig::list_handle`]. Every mutator stages the option.
pub struct ListHandle {
    inner: Arc<Mutex<Inner>>,
    name: String,
    kind: OptionKind,
    list: ChangeTrackingList<Scalar>,
}

impl ListHandle {
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<String> {
        self.list.get(index).map(Scalar::render)
    }

    pub fn as_strings(&self) -> Vec<String> {
        self.list.iter().map(Scalar::render).collect()
    }

    pub fn push(&mut self, value: impl Into<ScalarInput>) -> Result<()> {
        let scalar = self.kind.validate(value.into())?;
        self.list.push(scalar);
        self.flush();
        Ok(())
    }

    pub fn insert(&mut self, index: usize, value: impl Into<ScalarInput>) -> Result<()> {
        let scalar = self.kind.validate(value.into())?;
        self.list.insert(index, scalar);
        self.flush();
        Ok(())
    }

    pub fn set(&mut self, index: usize, value: impl Into<ScalarInput>) -> Result<()> {
        let scalar = self.kind.validate(value.into())?;
        self.list.set(index, scalar);
        self.flush();
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> String {
        let removed = self.list.remove(index);
        self.flush();
        removed.render()
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.flush();
    }

    fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .staged
            .insert(self.name.clone(), ConfigValue::List(self.list.as_slice().to_vec()));
    }
}

/// Mutation handle for the `HiddenServices` pseudo-option.
pub struct HiddenServiceListHandle {
    inner: Arc<Mutex<Inner>>,
    list: ChangeTrackingList<HiddenService>,
}

impl HiddenServiceListHandle {
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HiddenService> {
        self.list.get(index)
    }

    pub fn push(&mut self, service: HiddenService) {
        self.list.push(service);
        self.flush();
    }

    pub fn remove(&mut self, index: usize) -> HiddenService {
        let removed = self.list.remove(index);
        self.flush();
        removed
    }

    /// Mutate the service at `index` in place, then stage the result.
    pub fn modify(&mut self, index: usize, edit: impl FnOnce(&mut HiddenService)) {
        self.list.set(index, {
            let mut current = self.list.get(index).cloned().unwrap_or_else(|| HiddenService::new("."));
            edit(&mut current);
            current
        });
        self.flush();
    }

    fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.staged.insert(
            HIDDEN_SERVICES_KEY.to_string(),
            ConfigValue::HiddenServices(self.list.as_slice().to_vec()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_set_and_get_round_trips() {
        let cfg = TorConfig::detached();
        cfg.set("SocksPort", 9050i64).unwrap();
        assert_eq!(cfg.get_int("SocksPort").unwrap(), 9050);
        assert!(cfg.needs_save());
    }

    #[test]
    fn case_insensitive_lookup_shares_one_canonical_name() {
        let cfg = TorConfig::detached();
        cfg.set("SocksPort", 9050i64).unwrap();
        assert_eq!(cfg.get_int("socksport").unwrap(), 9050);
        assert_eq!(cfg.get_type("SOCKSPORT").unwrap(), OptionKind::Integer);
    }

    #[test]
    fn writing_a_vec_stages_a_list_regardless_of_scalar_kind() {
        let cfg = TorConfig::detached();
        cfg.set("SocksPort", vec![9050i64, 1337i64]).unwrap();
        assert_eq!(cfg.get_list("SocksPort").unwrap(), vec!["9050", "1337"]);
    }

    #[test]
    fn list_handle_mutators_stage_the_option() {
        let cfg = TorConfig::detached();
        cfg.set("ExitNodes", vec!["{us}".to_string()]).unwrap();
        assert!(!cfg.needs_save());
        {
            let mut handle = cfg.list_handle("ExitNodes").unwrap();
            handle.push("{uk}".to_string()).unwrap();
        }
        assert!(cfg.needs_save());
        assert_eq!(cfg.get_list("ExitNodes").unwrap(), vec!["{us}", "{uk}"]);
    }

    #[test]
    fn hidden_services_handle_stages_on_push() {
        let cfg = TorConfig::detached();
        assert!(!cfg.needs_save());
        let mut hs = HiddenService::new("/var/lib/tor/hs");
        hs.add_port(80, Some("127.0.0.1:8080"));
        cfg.hidden_services().push(hs);
        assert!(cfg.needs_save());
        match cfg.get(HIDDEN_SERVICES_KEY).unwrap() {
            ConfigValue::HiddenServices(list) => assert_eq!(list.len(), 1),
            other => panic!("expected HiddenServices, got {other:?}"),
        }
    }

    #[test]
    fn create_torrc_renders_comma_lists_joined_and_scalars_plain() {
        let cfg = TorConfig::detached();
        cfg.set("ExitNodes", vec!["{us}".to_string(), "{uk}".to_string()]).unwrap();
        // registered with no declared kind, so it's treated as an ad-hoc
        // list and rendered as repeated lines, not comma-joined.
        let torrc = cfg.create_torrc();
        assert!(torrc.contains("ExitNodes {us}\n"));
        assert!(torrc.contains("ExitNodes {uk}\n"));
    }

    #[test]
    fn unknown_option_read_is_an_error() {
        let cfg = TorConfig::detached();
        assert!(cfg.get("NeverSet").is_err());
    }
}
