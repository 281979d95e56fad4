/*
 *  registry.rs
 *
 *  InkSlate - plugins on paper
 *	(c) 2020-26 Stuart Hunter
 *
 *	The plugin registry: tracks registered content plugins, enforces
 *	the single-enabled-plugin invariant, mediates enable/disable and
 *	settings updates as consistent transactions against the device
 *	store, and owns the one choke point through which every frame
 *	reaches the shared panel.
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

use chrono_tz::Tz;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Mutex as TokMutex;
use tokio::time::timeout;

use crate::cadence::Cadence;
use crate::device::{DeviceStore, PluginStatePatch};
use crate::plugin::{
    validate_settings, ContentPlugin, PluginDescriptor, PluginError, RenderContext, SettingsMap,
};
use crate::render::SvgRenderer;
use crate::scheduler::Scheduler;
use crate::sink::DisplaySink;

/// Wall-clock ceiling for one render cycle. A plugin that blows the
/// budget is skipped for the tick, not unregistered.
const RENDER_BUDGET: Duration = Duration::from_secs(30);

type PluginHandle = Arc<TokMutex<Box<dyn ContentPlugin>>>;

#[derive(Default)]
struct RegistryInner {
    plugins: HashMap<String, PluginHandle>,
    /// Registration order, for stable listings and the enable sweep.
    order: Vec<String>,
}

/// The coordinator core. One instance per process, shared behind `Arc`.
///
/// Locking: `inner` serializes every operation that mutates the plugin
/// set or persisted plugin state; `publish` serializes every path that
/// can write to the panel; `pending` holds the ids with a publish
/// request already queued, so request floods coalesce to "run once more
/// after the current one".
pub struct Registry {
    store: Arc<DeviceStore>,
    sink: Arc<dyn DisplaySink>,
    renderer: Arc<SvgRenderer>,
    scheduler: Scheduler,
    inner: TokMutex<RegistryInner>,
    publish: TokMutex<()>,
    pending: Mutex<HashSet<String>>,
    weak: Weak<Registry>,
}

impl Registry {
    pub fn new(
        store: Arc<DeviceStore>,
        sink: Arc<dyn DisplaySink>,
        renderer: Arc<SvgRenderer>,
    ) -> Arc<Self> {
        Self::build(store, sink, renderer, None)
    }

    /// Like `new`, but with a fixed wait between scheduler ticks instead
    /// of minute-aligned wall-clock ticks. Lets tests drive the cadence
    /// loop without waiting out real minutes.
    pub fn with_tick_interval(
        store: Arc<DeviceStore>,
        sink: Arc<dyn DisplaySink>,
        renderer: Arc<SvgRenderer>,
        tick: Duration,
    ) -> Arc<Self> {
        Self::build(store, sink, renderer, Some(tick))
    }

    fn build(
        store: Arc<DeviceStore>,
        sink: Arc<dyn DisplaySink>,
        renderer: Arc<SvgRenderer>,
        tick: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Registry {
            scheduler: Scheduler::with_tick_interval(Arc::clone(&store), tick),
            store,
            sink,
            renderer,
            inner: TokMutex::new(RegistryInner::default()),
            publish: TokMutex::new(()),
            pending: Mutex::new(HashSet::new()),
            weak: weak.clone(),
        })
    }

    /// Registers a plugin: loads its persisted state, re-checks the
    /// exclusivity invariant, initializes it and schedules it if enabled.
    ///
    /// When two persisted states both claim `enabled`, the plugin that
    /// registered first stays enabled and the later one is corrected to
    /// disabled and persisted as such. The record carries no enable
    /// timestamp, so registration order is the tie-break.
    pub async fn register(&self, mut plugin: Box<dyn ContentPlugin>) -> Result<(), PluginError> {
        let mut inner = self.inner.lock().await;

        let id = plugin.descriptor().id.clone();
        if inner.plugins.contains_key(&id) {
            return Err(PluginError::Registration {
                id,
                reason: "a plugin with this id is already registered".to_string(),
            });
        }

        match self.store.plugin_state(&id) {
            Some(saved) => {
                let desc = plugin.descriptor_mut();
                desc.enabled = saved.enabled;
                if !saved.cadence.is_empty() {
                    desc.cadence = saved.cadence;
                }
                // Key-by-key merge: defaults introduced by an upgrade
                // survive, stale keys no longer in the schema are dropped.
                for (key, value) in saved.settings {
                    if desc.schema_for(&key).is_some() {
                        desc.settings.insert(key, value);
                    } else {
                        warn!("plugin '{}': dropping persisted setting '{}' not in schema", id, key);
                    }
                }
                info!("applied saved state to plugin '{}' (enabled: {})", id, desc.enabled);
            }
            None => {
                let desc = plugin.descriptor_mut();
                desc.enabled = false;
                let initial = PluginStatePatch {
                    enabled: Some(false),
                    cadence: Some(desc.cadence.clone()),
                    settings: Some(desc.settings.clone()),
                };
                self.store
                    .set_plugin_state(&id, initial)
                    .map_err(|e| PluginError::Registration {
                        id: id.clone(),
                        reason: e.to_string(),
                    })?;
                info!("no saved state for plugin '{}', initialized as disabled", id);
            }
        }

        if plugin.descriptor().enabled && !enabled_ids(&inner).await.is_empty() {
            info!("disabling plugin '{}': another plugin is already enabled", id);
            plugin.descriptor_mut().enabled = false;
            self.store
                .set_plugin_state(
                    &id,
                    PluginStatePatch {
                        enabled: Some(false),
                        ..Default::default()
                    },
                )
                .map_err(|e| PluginError::Registration {
                    id: id.clone(),
                    reason: e.to_string(),
                })?;
        }

        plugin
            .initialize()
            .await
            .map_err(|e| PluginError::Registration {
                id: id.clone(),
                reason: e.to_string(),
            })?;

        let enabled = plugin.descriptor().enabled;
        let cadence_expr = plugin.descriptor().cadence.clone();
        let name = plugin.descriptor().name.clone();
        inner.plugins.insert(id.clone(), Arc::new(TokMutex::new(plugin)));
        inner.order.push(id.clone());

        if enabled {
            match Cadence::parse(&cadence_expr) {
                Ok(cadence) => {
                    self.scheduler.start(&id, cadence, self.weak.clone()).await;
                    info!("scheduled plugin '{}' with cadence {}", id, cadence_expr);
                }
                Err(e) => {
                    // Hand-edited state can carry a broken cadence; the
                    // plugin stays registered but will not fire.
                    error!("plugin '{}' has unusable cadence '{}': {}", id, cadence_expr, e);
                }
            }
        }

        info!("plugin '{}' registered successfully", name);
        Ok(())
    }

    /// Enables `id`, first disabling (and persisting and unscheduling)
    /// every other enabled plugin. The only path that turns a plugin on.
    ///
    /// If persisting the target's enable fails after the disable sweep,
    /// the sweep is not undone: the call errors with zero plugins
    /// enabled. In-memory and persisted state still agree at every step,
    /// which is the property the rollback protects.
    pub async fn enable(&self, id: &str) -> Result<(), PluginError> {
        let inner = self.inner.lock().await;
        let target = inner
            .plugins
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;

        for other_id in inner.order.clone() {
            if other_id == id {
                continue;
            }
            let handle = inner.plugins.get(&other_id).cloned();
            let Some(handle) = handle else { continue };
            let mut other = handle.lock().await;
            if !other.descriptor().enabled {
                continue;
            }
            other.descriptor_mut().enabled = false;
            if let Err(e) = self.store.set_plugin_state(
                &other_id,
                PluginStatePatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            ) {
                other.descriptor_mut().enabled = true;
                return Err(PluginError::Persistence(e));
            }
            drop(other);
            self.scheduler.stop(&other_id).await;
            info!("disabled plugin '{}' to enable '{}'", other_id, id);
        }

        let mut plugin = target.lock().await;
        let cadence_expr = plugin.descriptor().cadence.clone();
        let cadence = Cadence::parse(&cadence_expr).map_err(|e| PluginError::Validation {
            key: "cadence".to_string(),
            reason: e.to_string(),
        })?;
        let was_enabled = plugin.descriptor().enabled;
        plugin.descriptor_mut().enabled = true;
        if let Err(e) = self.store.set_plugin_state(
            id,
            PluginStatePatch {
                enabled: Some(true),
                ..Default::default()
            },
        ) {
            plugin.descriptor_mut().enabled = was_enabled;
            return Err(PluginError::Persistence(e));
        }
        drop(plugin);

        self.scheduler.start(id, cadence, self.weak.clone()).await;
        info!("enabled plugin '{}'", id);
        Ok(())
    }

    /// Disables `id` and stops its schedule. No effect on other plugins.
    pub async fn disable(&self, id: &str) -> Result<(), PluginError> {
        let inner = self.inner.lock().await;
        let handle = inner
            .plugins
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;

        let mut plugin = handle.lock().await;
        let was_enabled = plugin.descriptor().enabled;
        plugin.descriptor_mut().enabled = false;
        if let Err(e) = self.store.set_plugin_state(
            id,
            PluginStatePatch {
                enabled: Some(false),
                ..Default::default()
            },
        ) {
            plugin.descriptor_mut().enabled = was_enabled;
            return Err(PluginError::Persistence(e));
        }
        drop(plugin);

        self.scheduler.stop(id).await;
        info!("disabled plugin '{}'", id);
        Ok(())
    }

    /// Merges `partial` into the plugin's settings and persists the
    /// result. Validation covers the whole update before anything is
    /// applied; a persistence failure rolls the merge back.
    pub async fn update_settings(
        &self,
        id: &str,
        partial: SettingsMap,
    ) -> Result<(), PluginError> {
        let inner = self.inner.lock().await;
        let handle = inner
            .plugins
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;

        let mut plugin = handle.lock().await;
        validate_settings(&plugin.descriptor().settings_schema, &partial)?;

        let previous = plugin.descriptor().settings.clone();
        let mut merged = previous.clone();
        for (key, value) in partial {
            merged.insert(key, value);
        }
        plugin.descriptor_mut().settings = merged.clone();

        if let Err(e) = self.store.set_plugin_state(
            id,
            PluginStatePatch {
                settings: Some(merged.clone()),
                ..Default::default()
            },
        ) {
            plugin.descriptor_mut().settings = previous;
            return Err(PluginError::Persistence(e));
        }

        info!("updated settings for plugin '{}'", id);
        // Derived-state recomputation may fail; the merged settings stay
        // applied and the error is surfaced to the caller.
        plugin.settings_applied(&merged).await
    }

    /// One render-and-display cycle for `id`: the single choke point
    /// through which every frame reaches the panel.
    ///
    /// Callers racing an in-flight cycle queue behind it; at most one
    /// request per plugin waits, later ones coalesce into it. Scheduled
    /// callers log the returned error, manual callers surface it; the
    /// panel keeps its previous frame either way.
    pub async fn render_and_publish(&self, id: &str) -> Result<(), PluginError> {
        {
            let mut pending = self.pending.lock().unwrap();
            if !pending.insert(id.to_string()) {
                debug!("render for '{}' already queued, coalescing", id);
                return Ok(());
            }
        }

        let handle = {
            let inner = self.inner.lock().await;
            inner.plugins.get(id).cloned()
        };
        let Some(handle) = handle else {
            self.pending.lock().unwrap().remove(id);
            return Err(PluginError::NotFound(id.to_string()));
        };

        let _publish = self.publish.lock().await;
        // We hold the panel now; the next request may queue again.
        self.pending.lock().unwrap().remove(id);

        let ctx = self.render_context();
        let rendered = {
            let mut plugin = handle.lock().await;
            timeout(RENDER_BUDGET, plugin.render(&ctx)).await
        };
        let frame = match rendered {
            Err(_) => {
                return Err(PluginError::RenderEngine(format!(
                    "render exceeded the {}s budget",
                    RENDER_BUDGET.as_secs()
                )))
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(frame)) => frame,
        };

        self.sink
            .update(frame)
            .await
            .map_err(|e| PluginError::RenderEngine(e.to_string()))?;
        debug!("published frame from plugin '{}'", id);
        Ok(())
    }

    /// Descriptor snapshots in registration order.
    pub async fn get_all(&self) -> Vec<PluginDescriptor> {
        let inner = self.inner.lock().await;
        let mut out = Vec::with_capacity(inner.order.len());
        for id in &inner.order {
            if let Some(handle) = inner.plugins.get(id) {
                out.push(handle.lock().await.descriptor().clone());
            }
        }
        out
    }

    pub async fn get_one(&self, id: &str) -> Result<PluginDescriptor, PluginError> {
        let inner = self.inner.lock().await;
        let handle = inner
            .plugins
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        let plugin = handle.lock().await;
        Ok(plugin.descriptor().clone())
    }

    /// Id of the currently enabled plugin, if any.
    pub async fn enabled_plugin(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        let ids = enabled_ids(&inner).await;
        ids.into_iter().next()
    }

    pub async fn is_scheduled(&self, id: &str) -> bool {
        self.scheduler.is_scheduled(id).await
    }

    /// Best-effort shutdown: stop every schedule, tear every plugin
    /// down (failures logged), clear the registry.
    pub async fn teardown(&self) {
        self.scheduler.stop_all().await;
        let mut inner = self.inner.lock().await;
        for id in inner.order.clone() {
            if let Some(handle) = inner.plugins.get(&id) {
                let mut plugin = handle.lock().await;
                if let Err(e) = plugin.teardown().await {
                    error!("error tearing down plugin '{}': {}", id, e);
                }
            }
        }
        inner.plugins.clear();
        inner.order.clear();
        info!("registry torn down");
    }

    fn render_context(&self) -> RenderContext {
        let tz_name = self.store.settings().timezone;
        let timezone: Tz = match tz_name.parse() {
            Ok(tz) => tz,
            Err(_) => {
                warn!("unknown timezone '{}', rendering in UTC", tz_name);
                Tz::UTC
            }
        };
        RenderContext {
            renderer: Arc::clone(&self.renderer),
            timezone,
        }
    }
}

async fn enabled_ids(inner: &RegistryInner) -> Vec<String> {
    let mut out = Vec::new();
    for id in &inner.order {
        if let Some(handle) = inner.plugins.get(id) {
            if handle.lock().await.descriptor().enabled {
                out.push(id.clone());
            }
        }
    }
    out
}
