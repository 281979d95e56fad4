/*
 *  ops.rs
 *
 *  InkSlate - plugins on paper
 *	(c) 2020-26 Stuart Hunter
 *
 *	Operator-facing surface: everything a UI transport needs to be able
 *	to invoke, with no transport attached. Each mutating operation
 *	returns success or a typed failure.
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

use chrono_tz::{Tz, TZ_VARIANTS};
use std::sync::Arc;

use crate::device::{DeviceSettings, DeviceSettingsPatch, DeviceStore};
use crate::plugin::{PluginDescriptor, PluginError, SettingsMap};
use crate::registry::Registry;
use crate::sink::DisplaySink;

/// The operator facade handed to whatever transport fronts the daemon.
#[derive(Clone)]
pub struct Coordinator {
    registry: Arc<Registry>,
    store: Arc<DeviceStore>,
    sink: Arc<dyn DisplaySink>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<DeviceStore>,
        sink: Arc<dyn DisplaySink>,
    ) -> Self {
        Coordinator {
            registry,
            store,
            sink,
        }
    }

    pub async fn list_plugins(&self) -> Vec<PluginDescriptor> {
        self.registry.get_all().await
    }

    pub async fn get_plugin(&self, id: &str) -> Result<PluginDescriptor, PluginError> {
        self.registry.get_one(id).await
    }

    pub async fn update_plugin_settings(
        &self,
        id: &str,
        settings: SettingsMap,
    ) -> Result<(), PluginError> {
        self.registry.update_settings(id, settings).await
    }

    pub async fn enable_plugin(&self, id: &str) -> Result<(), PluginError> {
        self.registry.enable(id).await
    }

    pub async fn disable_plugin(&self, id: &str) -> Result<(), PluginError> {
        self.registry.disable(id).await
    }

    pub fn device_settings(&self) -> DeviceSettings {
        self.store.settings()
    }

    /// Applies a shallow device-settings patch. The timezone identifier
    /// is validated before anything is written.
    pub fn update_device_settings(
        &self,
        patch: DeviceSettingsPatch,
    ) -> Result<DeviceSettings, PluginError> {
        if let Some(tz) = patch.timezone.as_deref() {
            tz.parse::<Tz>().map_err(|_| PluginError::Validation {
                key: "timezone".to_string(),
                reason: format!("'{}' is not a known timezone identifier", tz),
            })?;
        }
        self.store.save(patch).map_err(PluginError::Persistence)
    }

    /// The current panel frame, PNG-encoded for the UI.
    pub async fn current_image_png(&self) -> Result<Vec<u8>, PluginError> {
        self.sink
            .current()
            .await
            .encode_png()
            .map_err(|e| PluginError::RenderEngine(e.to_string()))
    }

    /// Renders the enabled plugin right now and pushes the result to the
    /// panel. Fails when no plugin is enabled.
    pub async fn refresh_display(&self) -> Result<(), PluginError> {
        let id = self
            .registry
            .enabled_plugin()
            .await
            .ok_or(PluginError::NoActivePlugin)?;
        self.registry.render_and_publish(&id).await
    }

    pub async fn clear_display(&self) -> Result<(), PluginError> {
        self.sink
            .clear()
            .await
            .map_err(|e| PluginError::RenderEngine(e.to_string()))
    }

    /// All supported IANA timezone identifiers.
    pub fn list_timezones(&self) -> Vec<&'static str> {
        TZ_VARIANTS.iter().map(|tz| tz.name()).collect()
    }
}
