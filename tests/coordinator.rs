// Integration tests for the plugin registry and operator facade:
// exclusivity, settings transactions, serialized publishing, and
// restart fidelity, all against a mock panel.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use inkslate::device::{DeviceSettingsPatch, DeviceStore};
use inkslate::ops::Coordinator;
use inkslate::plugin::{
    ContentPlugin, PluginDescriptor, PluginError, RenderContext, SettingDefinition, SettingType,
    SettingValidation, SettingValue, SettingsMap,
};
use inkslate::registry::Registry;
use inkslate::render::{Frame, SvgRenderer};
use inkslate::sink::{DisplaySink, MockSink, VirtualSink};

/// Minimal plugin for exercising the registry. Renders a solid
/// rectangle and counts how often it was asked to.
struct TestPlugin {
    descriptor: PluginDescriptor,
    render_count: Arc<AtomicUsize>,
    render_delay: Duration,
    fail_renders: bool,
}

impl TestPlugin {
    fn new(id: &str) -> Self {
        let settings_schema = vec![
            SettingDefinition {
                key: "label".to_string(),
                setting_type: SettingType::String,
                label: "Label".to_string(),
                description: None,
                default: Some(SettingValue::Text("hello".to_string())),
                options: None,
                validation: None,
            },
            SettingDefinition {
                key: "count".to_string(),
                setting_type: SettingType::Number,
                label: "Count".to_string(),
                description: None,
                default: Some(SettingValue::Number(5.0)),
                options: None,
                validation: Some(SettingValidation {
                    required: true,
                    min: Some(1.0),
                    max: Some(10.0),
                    pattern: None,
                }),
            },
        ];
        let mut settings = SettingsMap::new();
        for def in &settings_schema {
            if let Some(default) = def.default.clone() {
                settings.insert(def.key.clone(), default);
            }
        }
        TestPlugin {
            descriptor: PluginDescriptor {
                id: id.to_string(),
                name: format!("Test {}", id),
                description: "test plugin".to_string(),
                version: "0.0.1".to_string(),
                enabled: false,
                cadence: "* * * * *".to_string(),
                icon: "test".to_string(),
                settings,
                settings_schema,
            },
            render_count: Arc::new(AtomicUsize::new(0)),
            render_delay: Duration::ZERO,
            fail_renders: false,
        }
    }

    fn with_delay(id: &str, delay: Duration) -> Self {
        let mut plugin = Self::new(id);
        plugin.render_delay = delay;
        plugin
    }

    fn render_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.render_count)
    }
}

#[async_trait]
impl ContentPlugin for TestPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn descriptor_mut(&mut self) -> &mut PluginDescriptor {
        &mut self.descriptor
    }

    async fn render(&mut self, ctx: &RenderContext) -> Result<Frame, PluginError> {
        if !self.render_delay.is_zero() {
            tokio::time::sleep(self.render_delay).await;
        }
        self.render_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_renders {
            return Err(PluginError::Render("deliberate test failure".to_string()));
        }
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="60">
            <rect width="100" height="60" fill="#000000"/>
        </svg>"##;
        ctx.renderer
            .render_markup(svg)
            .map_err(|e| PluginError::Render(e.to_string()))
    }
}

struct Fixture {
    registry: Arc<Registry>,
    store: Arc<DeviceStore>,
    sink: Arc<MockSink>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    fixture_with_sink(MockSink::new(100, 60))
}

fn fixture_with_sink(sink: MockSink) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DeviceStore::open(dir.path().join("device.json")).unwrap());
    let sink = Arc::new(sink);
    let renderer = Arc::new(SvgRenderer::new(100, 60));
    let registry = Registry::new(
        Arc::clone(&store),
        sink.clone() as Arc<dyn DisplaySink>,
        renderer,
    );
    Fixture {
        registry,
        store,
        sink,
        _dir: dir,
    }
}

#[tokio::test]
async fn at_most_one_plugin_enabled() {
    let fx = fixture();
    fx.registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();
    fx.registry.register(Box::new(TestPlugin::new("beta"))).await.unwrap();

    fx.registry.enable("alpha").await.unwrap();
    fx.registry.enable("beta").await.unwrap();

    let descriptors = fx.registry.get_all().await;
    let enabled: Vec<_> = descriptors.iter().filter(|d| d.enabled).collect();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].id, "beta");

    // the switch is persisted, not just in memory
    assert!(!fx.store.plugin_state("alpha").unwrap().enabled);
    assert!(fx.store.plugin_state("beta").unwrap().enabled);

    // only the winner keeps a schedule
    assert!(!fx.registry.is_scheduled("alpha").await);
    assert!(fx.registry.is_scheduled("beta").await);
}

#[tokio::test]
async fn conflicting_saved_state_resolves_to_first_registered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.json");
    // A state file claiming both plugins enabled, as a hand-edit or an
    // interrupted write of an older version might leave behind.
    std::fs::write(
        &path,
        r#"{
            "name": "InkSlate",
            "orientation": "horizontal",
            "timezone": "America/New_York",
            "plugin_cycle_interval_seconds": 3600,
            "plugins": {
                "alpha": {"enabled": true, "cadence": "* * * * *", "settings": {}},
                "beta": {"enabled": true, "cadence": "* * * * *", "settings": {}}
            }
        }"#,
    )
    .unwrap();

    let store = Arc::new(DeviceStore::open(&path).unwrap());
    let sink = Arc::new(VirtualSink::new(100, 60, None));
    let registry = Registry::new(
        Arc::clone(&store),
        sink as Arc<dyn DisplaySink>,
        Arc::new(SvgRenderer::new(100, 60)),
    );

    registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();
    registry.register(Box::new(TestPlugin::new("beta"))).await.unwrap();

    assert_eq!(registry.enabled_plugin().await.as_deref(), Some("alpha"));
    // the loser's correction is written back
    assert!(!store.plugin_state("beta").unwrap().enabled);
}

#[tokio::test]
async fn settings_update_merges_partially() {
    let fx = fixture();
    fx.registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();

    let mut patch = SettingsMap::new();
    patch.insert("count".to_string(), SettingValue::Number(9.0));
    fx.registry.update_settings("alpha", patch).await.unwrap();

    let desc = fx.registry.get_one("alpha").await.unwrap();
    assert_eq!(desc.settings.get("count"), Some(&SettingValue::Number(9.0)));
    // untouched keys survive
    assert_eq!(
        desc.settings.get("label"),
        Some(&SettingValue::Text("hello".to_string()))
    );

    let persisted = fx.store.plugin_state("alpha").unwrap();
    assert_eq!(persisted.settings.get("count"), Some(&SettingValue::Number(9.0)));
}

#[tokio::test]
async fn invalid_batch_applies_nothing() {
    let fx = fixture();
    fx.registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();

    let mut patch = SettingsMap::new();
    patch.insert("label".to_string(), SettingValue::Text("changed".to_string()));
    patch.insert("count".to_string(), SettingValue::Number(99.0)); // above max

    let err = fx.registry.update_settings("alpha", patch).await.unwrap_err();
    assert!(matches!(err, PluginError::Validation { .. }));

    // the valid key in the same batch was not applied either
    let desc = fx.registry.get_one("alpha").await.unwrap();
    assert_eq!(
        desc.settings.get("label"),
        Some(&SettingValue::Text("hello".to_string()))
    );
    assert_eq!(desc.settings.get("count"), Some(&SettingValue::Number(5.0)));
}

#[tokio::test]
async fn unknown_setting_key_is_rejected() {
    let fx = fixture();
    fx.registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();

    let mut patch = SettingsMap::new();
    patch.insert("no_such_key".to_string(), SettingValue::Bool(true));
    let err = fx.registry.update_settings("alpha", patch).await.unwrap_err();
    assert!(matches!(err, PluginError::Validation { .. }));
}

#[tokio::test]
async fn concurrent_publishes_serialize_and_coalesce() {
    let mut sink = MockSink::new(100, 60);
    sink.update_delay = Duration::from_millis(100);
    let fx = fixture_with_sink(sink);

    let plugin = TestPlugin::with_delay("alpha", Duration::from_millis(20));
    let renders = plugin.render_counter();
    fx.registry.register(Box::new(plugin)).await.unwrap();
    fx.registry.enable("alpha").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let registry = Arc::clone(&fx.registry);
        handles.push(tokio::spawn(async move {
            registry.render_and_publish("alpha").await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let state = fx.sink.state();
    let state = state.lock().unwrap();
    assert!(!state.overlap_detected, "panel writes interleaved");
    // five requests against one in-flight cycle collapse to at most two
    assert!(state.update_count >= 1 && state.update_count <= 2);
    assert!(renders.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn schedule_keeps_firing_after_failed_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(DeviceStore::open(dir.path().join("device.json")).unwrap());
    let sink = Arc::new(MockSink::new(100, 60));
    // short fixed tick so the cadence loop runs inside the test
    let registry = Registry::with_tick_interval(
        Arc::clone(&store),
        sink.clone() as Arc<dyn DisplaySink>,
        Arc::new(SvgRenderer::new(100, 60)),
        Duration::from_millis(25),
    );

    let mut plugin = TestPlugin::new("alpha");
    plugin.fail_renders = true;
    let renders = plugin.render_counter();
    registry.register(Box::new(plugin)).await.unwrap();
    registry.enable("alpha").await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;

    // a failing tick does not stop the next one from firing
    let fired = renders.load(Ordering::SeqCst);
    assert!(fired >= 2, "expected repeated scheduled renders, got {}", fired);
    assert!(registry.is_scheduled("alpha").await);
    assert_eq!(registry.enabled_plugin().await.as_deref(), Some("alpha"));
    // nothing ever reached the panel
    assert_eq!(sink.state().lock().unwrap().update_count, 0);

    registry.teardown().await;
    tokio::time::sleep(Duration::from_millis(50)).await; // let an in-flight tick settle
    let settled = renders.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(renders.load(Ordering::SeqCst), settled);
}

#[tokio::test]
async fn publish_failure_leaves_plugin_enabled_and_scheduled() {
    let fx = fixture();
    fx.registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();
    fx.registry.enable("alpha").await.unwrap();

    fx.sink.state().lock().unwrap().simulate_update_failure = true;
    let err = fx.registry.render_and_publish("alpha").await.unwrap_err();
    assert!(matches!(err, PluginError::RenderEngine(_)));

    // a failed cycle does not disable or unschedule anything
    assert_eq!(fx.registry.enabled_plugin().await.as_deref(), Some("alpha"));
    assert!(fx.registry.is_scheduled("alpha").await);

    // and the next cycle goes through once the panel recovers
    fx.sink.state().lock().unwrap().simulate_update_failure = false;
    fx.registry.render_and_publish("alpha").await.unwrap();
    assert_eq!(fx.sink.state().lock().unwrap().update_count, 1);
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.json");

    {
        let store = Arc::new(DeviceStore::open(&path).unwrap());
        let sink = Arc::new(VirtualSink::new(100, 60, None));
        let registry = Registry::new(
            store,
            sink as Arc<dyn DisplaySink>,
            Arc::new(SvgRenderer::new(100, 60)),
        );
        registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();
        registry.register(Box::new(TestPlugin::new("beta"))).await.unwrap();
        registry.enable("beta").await.unwrap();

        let mut patch = SettingsMap::new();
        patch.insert("count".to_string(), SettingValue::Number(7.0));
        registry.update_settings("beta", patch).await.unwrap();
        registry.teardown().await;
    }

    // new process, same state file
    let store = Arc::new(DeviceStore::open(&path).unwrap());
    let sink = Arc::new(VirtualSink::new(100, 60, None));
    let registry = Registry::new(
        Arc::clone(&store),
        sink as Arc<dyn DisplaySink>,
        Arc::new(SvgRenderer::new(100, 60)),
    );
    registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();
    registry.register(Box::new(TestPlugin::new("beta"))).await.unwrap();

    assert_eq!(registry.enabled_plugin().await.as_deref(), Some("beta"));
    assert!(registry.is_scheduled("beta").await);
    let desc = registry.get_one("beta").await.unwrap();
    assert_eq!(desc.settings.get("count"), Some(&SettingValue::Number(7.0)));
}

#[tokio::test]
async fn refresh_without_enabled_plugin_fails_cleanly() {
    let fx = fixture();
    fx.registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();

    let coordinator = Coordinator::new(
        Arc::clone(&fx.registry),
        Arc::clone(&fx.store),
        fx.sink.clone() as Arc<dyn DisplaySink>,
    );
    let err = coordinator.refresh_display().await.unwrap_err();
    assert!(matches!(err, PluginError::NoActivePlugin));
    assert_eq!(fx.sink.state().lock().unwrap().update_count, 0);
}

#[tokio::test]
async fn coordinator_round_trip() {
    let fx = fixture();
    fx.registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();
    let coordinator = Coordinator::new(
        Arc::clone(&fx.registry),
        Arc::clone(&fx.store),
        fx.sink.clone() as Arc<dyn DisplaySink>,
    );

    assert_eq!(coordinator.list_plugins().await.len(), 1);
    coordinator.enable_plugin("alpha").await.unwrap();
    coordinator.refresh_display().await.unwrap();
    assert_eq!(fx.sink.state().lock().unwrap().update_count, 1);

    // the published frame is retrievable as PNG
    let png = coordinator.current_image_png().await.unwrap();
    assert_eq!(&png[1..4], b"PNG");

    coordinator.clear_display().await.unwrap();
    assert_eq!(fx.sink.current().await, Frame::blank(100, 60));

    coordinator.disable_plugin("alpha").await.unwrap();
    assert_eq!(fx.registry.enabled_plugin().await, None);
}

#[tokio::test]
async fn device_settings_validate_timezone() {
    let fx = fixture();
    let coordinator = Coordinator::new(
        Arc::clone(&fx.registry),
        Arc::clone(&fx.store),
        fx.sink.clone() as Arc<dyn DisplaySink>,
    );

    let err = coordinator
        .update_device_settings(DeviceSettingsPatch {
            timezone: Some("Mars/Olympus_Mons".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, PluginError::Validation { .. }));

    let updated = coordinator
        .update_device_settings(DeviceSettingsPatch {
            timezone: Some("Europe/London".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(updated.timezone, "Europe/London");
}

#[tokio::test]
async fn unknown_plugin_operations_return_not_found() {
    let fx = fixture();
    assert!(matches!(
        fx.registry.enable("ghost").await.unwrap_err(),
        PluginError::NotFound(_)
    ));
    assert!(matches!(
        fx.registry.get_one("ghost").await.unwrap_err(),
        PluginError::NotFound(_)
    ));
    assert!(matches!(
        fx.registry
            .update_settings("ghost", SettingsMap::new())
            .await
            .unwrap_err(),
        PluginError::NotFound(_)
    ));
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let fx = fixture();
    fx.registry.register(Box::new(TestPlugin::new("alpha"))).await.unwrap();
    let err = fx
        .registry
        .register(Box::new(TestPlugin::new("alpha")))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Registration { .. }));
}
