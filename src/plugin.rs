/*
 *  plugin.rs
 *
 *  InkSlate - plugins on paper
 *	(c) 2020-26 Stuart Hunter
 *
 *	Content plugin capability contract: descriptor, settings schema,
 *	typed setting values and synchronous validation.
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

use async_trait::async_trait;
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::render::{Frame, SvgRenderer};

/// Settings are kept as an ordered map so the persisted JSON stays stable
/// across rewrites.
pub type SettingsMap = BTreeMap<String, SettingValue>;

/// Errors surfaced by registry and plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin not found: {0}")]
    NotFound(String),
    #[error("invalid setting '{key}': {reason}")]
    Validation { key: String, reason: String },
    #[error("render failed: {0}")]
    Render(String),
    #[error("render engine failure: {0}")]
    RenderEngine(String),
    #[error("failed to persist state: {0}")]
    Persistence(#[source] crate::device::DeviceStoreError),
    #[error("plugin '{id}' failed to register: {reason}")]
    Registration { id: String, reason: String },
    #[error("no plugin is currently enabled")]
    NoActivePlugin,
}

/// A single typed setting value.
///
/// Untagged on the wire: booleans, numbers and strings serialize as their
/// JSON primitives, locations as an object. This matches the open-ended
/// settings blob the UI speaks while keeping the in-memory form typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Location(LocationValue),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_location(&self) -> Option<&LocationValue> {
        match self {
            SettingValue::Location(l) => Some(l),
            _ => None,
        }
    }
}

/// A picked point on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationValue {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

/// Type tag for a setting definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    Boolean,
    String,
    Number,
    Select,
    Location,
}

/// One entry in a select setting's choice set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// Validation rules attached to a setting definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingValidation {
    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// UI-facing description of one setting. The schema is introspection and
/// validation only; plugins decode the settings map into their own typed
/// structs before rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingDefinition {
    pub key: String,
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<SettingValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<SettingValidation>,
}

/// Static identity plus mutable runtime state of a registered plugin.
///
/// Invariant: every key in `settings` is declared in `settings_schema`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub enabled: bool,
    /// Five-field cron expression, evaluated in the device timezone.
    pub cadence: String,
    pub icon: String,
    pub settings: SettingsMap,
    pub settings_schema: Vec<SettingDefinition>,
}

impl PluginDescriptor {
    pub fn schema_for(&self, key: &str) -> Option<&SettingDefinition> {
        self.settings_schema.iter().find(|d| d.key == key)
    }
}

/// Validates a partial settings update against the schema.
///
/// The whole update is accepted or rejected: the first violation aborts
/// validation and nothing may be applied by the caller.
pub fn validate_settings(
    schema: &[SettingDefinition],
    update: &SettingsMap,
) -> Result<(), PluginError> {
    for (key, value) in update {
        let def = schema
            .iter()
            .find(|d| d.key == *key)
            .ok_or_else(|| PluginError::Validation {
                key: key.clone(),
                reason: "not declared in the settings schema".to_string(),
            })?;
        validate_value(def, value)?;
    }
    Ok(())
}

fn validate_value(def: &SettingDefinition, value: &SettingValue) -> Result<(), PluginError> {
    let fail = |reason: String| PluginError::Validation {
        key: def.key.clone(),
        reason,
    };
    let rules = def.validation.clone().unwrap_or_default();

    match def.setting_type {
        SettingType::Boolean => {
            value
                .as_bool()
                .ok_or_else(|| fail("expected a boolean".to_string()))?;
        }
        SettingType::Number => {
            let n = value
                .as_number()
                .ok_or_else(|| fail("expected a number".to_string()))?;
            if let Some(min) = rules.min {
                if n < min {
                    return Err(fail(format!("{} is below the minimum of {}", n, min)));
                }
            }
            if let Some(max) = rules.max {
                if n > max {
                    return Err(fail(format!("{} is above the maximum of {}", n, max)));
                }
            }
        }
        SettingType::String => {
            let s = value
                .as_text()
                .ok_or_else(|| fail("expected a string".to_string()))?;
            if rules.required && s.is_empty() {
                return Err(fail("a value is required".to_string()));
            }
            if let Some(pattern) = rules.pattern.as_deref() {
                let re = Regex::new(pattern)
                    .map_err(|e| fail(format!("schema pattern is invalid: {}", e)))?;
                if !re.is_match(s) {
                    return Err(fail(format!("'{}' does not match pattern {}", s, pattern)));
                }
            }
        }
        SettingType::Select => {
            let s = value
                .as_text()
                .ok_or_else(|| fail("expected one of the listed choices".to_string()))?;
            let options = def
                .options
                .as_deref()
                .filter(|o| !o.is_empty())
                .ok_or_else(|| fail("select setting has no choice set".to_string()))?;
            if !options.iter().any(|o| o.value == s) {
                return Err(fail(format!("'{}' is not one of the listed choices", s)));
            }
        }
        SettingType::Location => {
            let loc = value
                .as_location()
                .ok_or_else(|| fail("expected a location".to_string()))?;
            if !(-90.0..=90.0).contains(&loc.latitude) {
                return Err(fail(format!("latitude {} out of range", loc.latitude)));
            }
            if !(-180.0..=180.0).contains(&loc.longitude) {
                return Err(fail(format!("longitude {} out of range", loc.longitude)));
            }
        }
    }
    Ok(())
}

/// Everything a plugin gets handed for one render cycle.
pub struct RenderContext {
    pub renderer: Arc<SvgRenderer>,
    pub timezone: Tz,
}

/// The capability contract every content plugin implements.
///
/// A plugin owns its descriptor; the registry is the only code that
/// mutates `enabled`, `cadence` and `settings` on it.
#[async_trait]
pub trait ContentPlugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    fn descriptor_mut(&mut self) -> &mut PluginDescriptor;

    /// Acquire per-plugin resources. Called once at registration.
    async fn initialize(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Produce one frame reflecting the current settings. Must be safe to
    /// call repeatedly.
    async fn render(&mut self, ctx: &RenderContext) -> Result<Frame, PluginError>;

    /// Hook invoked after the registry has merged and persisted a settings
    /// update. Plugins with derived state (cached coordinates, sessions)
    /// recompute it here; a failure is recoverable and leaves the merged
    /// settings in place.
    async fn settings_applied(&mut self, _merged: &SettingsMap) -> Result<(), PluginError> {
        Ok(())
    }

    /// Release resources. Best effort; failures are logged, not propagated.
    async fn teardown(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}
