//! Configuration loading from TOML files
//!
//! The gateway binary selects the file with `--config <path>`, then the
//! `CONFIG_FILE` environment variable, then `config/dev.toml`.

use crate::domain::types::{
    deserialize_time_of_day, weekday_from_index, DeviceId, DoorId, IdentityId, LocationId,
    OpenHouseWindow,
};
use anyhow::{bail, Context};
use chrono::NaiveTime;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorMode {
    /// Drive doors through their HTTP open/revert URLs
    Http,
    /// Dry run: log door commands without touching hardware
    Log,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "open-house".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Double tap correlation window
    #[serde(default = "default_scan_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_listener_enabled")]
    pub listener_enabled: bool,
    #[serde(default = "default_listener_port")]
    pub listener_port: u16,
    /// Upper bound on a single identity directory lookup
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_secs: default_scan_window_secs(),
            listener_enabled: default_listener_enabled(),
            listener_port: default_listener_port(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

fn default_scan_window_secs() -> u64 {
    10
}

fn default_listener_enabled() -> bool {
    true
}

fn default_listener_port() -> u16 {
    25900
}

fn default_lookup_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_secs: default_maintenance_interval_secs() }
    }
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionsConfig {
    /// Person field holding the open house permission flag
    #[serde(default = "default_permission_attribute")]
    pub attribute: String,
    /// The only field value that grants the permission
    #[serde(default = "default_true_marker")]
    pub true_marker: String,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self { attribute: default_permission_attribute(), true_marker: default_true_marker() }
    }
}

fn default_permission_attribute() -> String {
    "dh_can_open_house".to_string()
}

fn default_true_marker() -> String {
    "True".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default = "default_actuator_mode")]
    pub mode: ActuatorMode,
    #[serde(default = "default_actuator_timeout_ms")]
    pub timeout_ms: u64,
    /// Door command queue depth
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            mode: default_actuator_mode(),
            timeout_ms: default_actuator_timeout_ms(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_actuator_mode() -> ActuatorMode {
    ActuatorMode::Log
}

fn default_actuator_timeout_ms() -> u64 {
    2000
}

fn default_queue_size() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

fn default_prometheus_port() -> u16 {
    9100
}

/// One of the facility's doors and the reader mounted on it
#[derive(Debug, Clone, Deserialize)]
pub struct DoorConfig {
    pub id: DoorId,
    pub name: String,
    pub device: DeviceId,
    pub location: LocationId,
    /// Unlock URL; `{seconds}` is replaced with the unlock duration
    #[serde(default)]
    pub open_url: Option<String>,
    /// URL restoring the door's standing access schedule
    #[serde(default)]
    pub revert_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub day_of_week: u8,
    #[serde(alias = "scan_after_time", deserialize_with = "deserialize_time_of_day")]
    pub scan_after: NaiveTime,
    #[serde(alias = "end_time", deserialize_with = "deserialize_time_of_day")]
    pub end: NaiveTime,
    #[serde(default)]
    pub door_ids: Vec<DoorId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonConfig {
    pub id: IdentityId,
    pub first_name: String,
    pub last_name: String,
    /// User defined fields; non-string values are kept in their TOML spelling
    #[serde(default)]
    pub fields: HashMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub doors: Vec<DoorConfig>,
    #[serde(default)]
    pub open_houses: BTreeMap<String, WindowConfig>,
    #[serde(default)]
    pub people: Vec<PersonConfig>,
}

/// A directory entry for a person, as loaded from config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonEntry {
    pub id: IdentityId,
    pub first_name: String,
    pub last_name: String,
    pub fields: HashMap<String, String>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    config_file: String,
    scan_window_secs: u64,
    listener_enabled: bool,
    listener_port: u16,
    lookup_timeout_ms: u64,
    maintenance_interval_secs: u64,
    permission_attribute: String,
    permission_true_marker: String,
    actuator_mode: ActuatorMode,
    actuator_timeout_ms: u64,
    door_queue_size: usize,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    doors: Vec<DoorConfig>,
    windows: Vec<OpenHouseWindow>,
    people: Vec<PersonEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            config_file: "default".to_string(),
            scan_window_secs: default_scan_window_secs(),
            listener_enabled: default_listener_enabled(),
            listener_port: default_listener_port(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            permission_attribute: default_permission_attribute(),
            permission_true_marker: default_true_marker(),
            actuator_mode: default_actuator_mode(),
            actuator_timeout_ms: default_actuator_timeout_ms(),
            door_queue_size: default_queue_size(),
            metrics_interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
            doors: Vec::new(),
            windows: Vec::new(),
            people: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {source}"))?;

        Self::from_toml(toml_config, source)
            .with_context(|| format!("Invalid config file {source}"))
    }

    fn from_toml(toml_config: TomlConfig, source: &str) -> anyhow::Result<Self> {
        let doors = toml_config.doors;
        let mut door_ids = HashSet::new();
        for door in &doors {
            if !door_ids.insert(door.id) {
                bail!("door {} is defined more than once", door.id);
            }
        }

        let windows = build_windows(toml_config.open_houses)?;
        for window in &windows {
            for door_id in &window.door_ids {
                if !door_ids.contains(door_id) {
                    warn!(window = %window.name, door_id = %door_id, "open_house_unknown_door");
                }
            }
        }

        let mut person_ids = HashSet::new();
        let mut people = Vec::with_capacity(toml_config.people.len());
        for person in toml_config.people {
            if !person_ids.insert(person.id) {
                bail!("person {} is defined more than once", person.id);
            }
            let fields = person
                .fields
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        toml::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect();
            people.push(PersonEntry {
                id: person.id,
                first_name: person.first_name,
                last_name: person.last_name,
                fields,
            });
        }

        Ok(Self {
            site_id: toml_config.site.id,
            config_file: source.to_string(),
            scan_window_secs: toml_config.scan.window_secs,
            listener_enabled: toml_config.scan.listener_enabled,
            listener_port: toml_config.scan.listener_port,
            lookup_timeout_ms: toml_config.scan.lookup_timeout_ms,
            maintenance_interval_secs: toml_config.maintenance.interval_secs,
            permission_attribute: toml_config.permissions.attribute,
            permission_true_marker: toml_config.permissions.true_marker,
            actuator_mode: toml_config.actuator.mode,
            actuator_timeout_ms: toml_config.actuator.timeout_ms,
            door_queue_size: toml_config.actuator.queue_size,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            doors,
            windows,
            people,
        })
    }

    /// Load configuration from a path.
    ///
    /// Only an unreadable file falls back to defaults; a file that fails to
    /// parse or validate is an error.
    pub fn load_from_path(path: &str) -> anyhow::Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(config_file = %path, error = %e, "config_unreadable_using_defaults");
                return Ok(Self::default());
            }
        };
        Self::from_toml_str(&content, path)
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_window_secs)
    }

    pub fn listener_enabled(&self) -> bool {
        self.listener_enabled
    }

    pub fn listener_port(&self) -> u16 {
        self.listener_port
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn permission_attribute(&self) -> &str {
        &self.permission_attribute
    }

    pub fn permission_true_marker(&self) -> &str {
        &self.permission_true_marker
    }

    pub fn actuator_mode(&self) -> &ActuatorMode {
        &self.actuator_mode
    }

    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_millis(self.actuator_timeout_ms)
    }

    pub fn door_queue_size(&self) -> usize {
        self.door_queue_size
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn doors(&self) -> &[DoorConfig] {
        &self.doors
    }

    /// Open house windows, ordered by name
    pub fn windows(&self) -> &[OpenHouseWindow] {
        &self.windows
    }

    pub fn people(&self) -> &[PersonEntry] {
        &self.people
    }

    /// Builder method for tests to replace the open house windows
    #[cfg(test)]
    pub fn with_windows(mut self, windows: Vec<OpenHouseWindow>) -> Self {
        self.windows = windows;
        self
    }

    /// Builder method for tests to replace the directory entries
    #[cfg(test)]
    pub fn with_people(mut self, people: Vec<PersonEntry>) -> Self {
        self.people = people;
        self
    }
}

/// Validate raw window tables and convert them into domain windows
fn build_windows(raw: BTreeMap<String, WindowConfig>) -> anyhow::Result<Vec<OpenHouseWindow>> {
    let mut windows = Vec::with_capacity(raw.len());
    for (name, window) in raw {
        let Some(day_of_week) = weekday_from_index(window.day_of_week) else {
            bail!(
                "open house '{name}' has day_of_week {}, expected 0 (Monday) to 6 (Sunday)",
                window.day_of_week
            );
        };
        if window.end < window.scan_after {
            bail!(
                "open house '{name}' ends at {} before it starts at {}",
                window.end,
                window.scan_after
            );
        }
        windows.push(OpenHouseWindow {
            name,
            day_of_week,
            start: window.scan_after,
            end: window.end,
            door_ids: window.door_ids,
        });
    }
    Ok(windows)
}
