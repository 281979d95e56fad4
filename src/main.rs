/*
 *  main.rs
 *
 *  InkSlate - plugins on paper
 *	(c) 2020-26 Stuart Hunter
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

use env_logger::Env;
use log::{error, info};
use std::sync::Arc;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use inkslate::config;
use inkslate::device::DeviceStore;
use inkslate::ops::Coordinator;
use inkslate::plugins::{ClockPlugin, WeatherPlugin};
use inkslate::registry::Registry;
use inkslate::render::{SvgRenderer, DISPLAY_HEIGHT, DISPLAY_WIDTH};
use inkslate::sink::{DisplaySink, VirtualSink};
use inkslate::ContentPlugin;

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Waits for SIGINT, SIGTERM, or SIGHUP.
async fn signal_handler() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load()?;

    env_logger::Builder::from_env(
        Env::default().default_filter_or(cfg.log_level.as_deref().unwrap_or("info")),
    )
    .format_timestamp_secs()
    .init();

    info!("{} - plugins on paper", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    // Corrupt state is fatal. An operator must repair or remove the
    // state file rather than have it silently replaced.
    let state_path = config::state_file_path(&cfg);
    if let Some(parent) = state_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(DeviceStore::open(&state_path)?);
    info!("device state loaded from {}", state_path.display());

    let (width, height) = cfg
        .display
        .as_ref()
        .map(|d| {
            (
                d.width.unwrap_or(DISPLAY_WIDTH),
                d.height.unwrap_or(DISPLAY_HEIGHT),
            )
        })
        .unwrap_or((DISPLAY_WIDTH, DISPLAY_HEIGHT));
    let mirror = cfg.display.as_ref().and_then(|d| d.mirror_png.clone());

    let sink: Arc<dyn DisplaySink> = Arc::new(VirtualSink::new(width, height, mirror));
    let renderer = Arc::new(SvgRenderer::new(width, height));
    let registry = Registry::new(Arc::clone(&store), Arc::clone(&sink), renderer);

    // A plugin that fails to register is skipped, not fatal.
    let builtins: Vec<Box<dyn ContentPlugin>> = vec![
        Box::new(ClockPlugin::new()),
        Box::new(WeatherPlugin::new()),
    ];
    for plugin in builtins {
        let id = plugin.descriptor().id.clone();
        if let Err(e) = registry.register(plugin).await {
            error!("failed to register plugin '{}': {}", id, e);
        }
    }

    let coordinator = Coordinator::new(Arc::clone(&registry), Arc::clone(&store), Arc::clone(&sink));
    info!(
        "{} plugin(s) registered, panel {}x{}",
        coordinator.list_plugins().await.len(),
        width,
        height
    );

    // Paint once at startup if something is already enabled.
    if let Err(e) = coordinator.refresh_display().await {
        info!("no initial frame published: {}", e);
    }

    signal_handler().await?;

    info!("Main application exiting. Tearing down plugins.");
    registry.teardown().await;

    Ok(())
}
