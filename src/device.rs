/*
 *  device.rs
 *
 *  InkSlate - plugins on paper
 *	(c) 2020-26 Stuart Hunter
 *
 *	Durable device state: one JSON record holding device-wide settings
 *	and the per-plugin runtime state that survives restarts.
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::plugin::SettingsMap;

/// Error type for device state persistence.
#[derive(Debug, Error)]
pub enum DeviceStoreError {
    /// Persisted state exists but cannot be parsed. Fatal at load time;
    /// the daemon does not guess at partial recovery.
    #[error("device state file is unreadable: {0}")]
    Corrupt(serde_json::Error),
    #[error("device state encode error: {0}")]
    Encode(serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persisted runtime state of one plugin, keyed by plugin id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRuntimeState {
    pub enabled: bool,
    pub cadence: String,
    #[serde(default)]
    pub settings: SettingsMap,
}

/// Panel orientation as mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// The whole persisted device record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub name: String,
    pub orientation: Orientation,
    /// IANA timezone identifier; cadence expressions are evaluated in it.
    pub timezone: String,
    pub plugin_cycle_interval_seconds: u64,
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginRuntimeState>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            name: "InkSlate".to_string(),
            orientation: Orientation::Horizontal,
            timezone: "America/New_York".to_string(),
            plugin_cycle_interval_seconds: 3600,
            plugins: BTreeMap::new(),
        }
    }
}

/// Shallow patch for the device-wide fields. Option-by-Option merge,
/// same shape the config loader uses for CLI overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceSettingsPatch {
    pub name: Option<String>,
    pub orientation: Option<Orientation>,
    pub timezone: Option<String>,
    pub plugin_cycle_interval_seconds: Option<u64>,
}

/// Partial update for one plugin's persisted state.
#[derive(Debug, Clone, Default)]
pub struct PluginStatePatch {
    pub enabled: Option<bool>,
    pub cadence: Option<String>,
    pub settings: Option<SettingsMap>,
}

/// Owns the backing JSON file. All writes rewrite the full record through
/// one lock, write-to-temp-then-rename, so a crash mid-write cannot leave
/// a torn file behind.
#[derive(Debug)]
pub struct DeviceStore {
    path: PathBuf,
    inner: Mutex<DeviceSettings>,
}

impl DeviceStore {
    /// Loads the record at `path`, falling back to documented defaults if
    /// no file exists yet. A present-but-malformed file is fatal.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DeviceStoreError> {
        let path = path.into();
        let settings = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).map_err(DeviceStoreError::Corrupt)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no device state at {}, using defaults", path.display());
                DeviceSettings::default()
            }
            Err(e) => return Err(DeviceStoreError::Io(e)),
        };
        Ok(DeviceStore {
            path,
            inner: Mutex::new(settings),
        })
    }

    /// Snapshot of the current record.
    pub fn settings(&self) -> DeviceSettings {
        self.inner.lock().unwrap().clone()
    }

    /// Shallow-merges the patch and rewrites the record.
    pub fn save(&self, patch: DeviceSettingsPatch) -> Result<DeviceSettings, DeviceStoreError> {
        let mut guard = self.inner.lock().unwrap();
        let mut next = guard.clone();
        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(orientation) = patch.orientation {
            next.orientation = orientation;
        }
        if let Some(timezone) = patch.timezone {
            next.timezone = timezone;
        }
        if let Some(interval) = patch.plugin_cycle_interval_seconds {
            next.plugin_cycle_interval_seconds = interval;
        }
        write_atomic(&self.path, &next)?;
        *guard = next.clone();
        Ok(next)
    }

    /// Persisted state for one plugin id, if any.
    pub fn plugin_state(&self, id: &str) -> Option<PluginRuntimeState> {
        self.inner.lock().unwrap().plugins.get(id).cloned()
    }

    /// Merges `patch` into the plugin's persisted state (creating it with
    /// the given fields if absent) and rewrites the record. Rides the same
    /// save path as device-wide writes, so the two never interleave.
    pub fn set_plugin_state(
        &self,
        id: &str,
        patch: PluginStatePatch,
    ) -> Result<(), DeviceStoreError> {
        let mut guard = self.inner.lock().unwrap();
        let mut next = guard.clone();
        let entry = next
            .plugins
            .entry(id.to_string())
            .or_insert_with(|| PluginRuntimeState {
                enabled: false,
                cadence: String::new(),
                settings: SettingsMap::new(),
            });
        if let Some(enabled) = patch.enabled {
            entry.enabled = enabled;
        }
        if let Some(cadence) = patch.cadence {
            entry.cadence = cadence;
        }
        if let Some(settings) = patch.settings {
            entry.settings = settings;
        }
        write_atomic(&self.path, &next)?;
        *guard = next;
        Ok(())
    }
}

fn write_atomic(path: &Path, settings: &DeviceSettings) -> Result<(), DeviceStoreError> {
    let data = serde_json::to_string_pretty(settings).map_err(DeviceStoreError::Encode)?;
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
