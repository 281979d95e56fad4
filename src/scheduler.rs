/*
 *  scheduler.rs
 *
 *  InkSlate - plugins on paper
 *	(c) 2020-26 Stuart Hunter
 *
 *	Cadence-driven timers: one background task per enabled plugin,
 *	ticking at the minute boundary and firing a render-and-publish
 *	cycle whenever the plugin's cadence expression matches.
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

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex as TokMutex};

use crate::cadence::Cadence;
use crate::device::DeviceStore;
use crate::registry::Registry;

/// A running per-plugin timer. Dropping the stop sender wakes the task
/// and ends it; a render already in flight is allowed to complete.
struct ScheduledTask {
    stop: watch::Sender<bool>,
}

/// Starts and stops the per-plugin cadence timers.
///
/// A plugin id is either unscheduled or scheduled, nothing else; the
/// registry drives the transitions on enable/disable.
pub struct Scheduler {
    store: Arc<DeviceStore>,
    /// Overrides the minute-aligned wait between ticks. Tests drive the
    /// loop with a short fixed interval instead of wall-clock minutes.
    tick: Option<Duration>,
    tasks: TokMutex<HashMap<String, ScheduledTask>>,
}

impl Scheduler {
    pub fn new(store: Arc<DeviceStore>) -> Self {
        Self::with_tick_interval(store, None)
    }

    pub fn with_tick_interval(store: Arc<DeviceStore>, tick: Option<Duration>) -> Self {
        Scheduler {
            store,
            tick,
            tasks: TokMutex::new(HashMap::new()),
        }
    }

    /// Spawns the timer task for `id`. Replaces any previous timer for
    /// the same id (the old one winds down cooperatively).
    pub async fn start(&self, id: &str, cadence: Cadence, registry: Weak<Registry>) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let plugin_id = id.to_string();
        let store = Arc::clone(&self.store);
        let tick = self.tick;

        tokio::spawn(async move {
            loop {
                let wait = match tick {
                    Some(interval) => interval,
                    None => delay_until_next_minute(Utc::now()),
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = stop_rx.changed() => {
                        info!("schedule for plugin '{}' stopped", plugin_id);
                        break;
                    }
                }

                let now = zoned_now(&store);
                if !cadence.matches(&now) {
                    continue;
                }
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                info!("running scheduled render for plugin '{}'", plugin_id);
                // A tick failure is logged and must not deschedule the
                // plugin; the previous frame simply stays on the panel.
                if let Err(e) = registry.render_and_publish(&plugin_id).await {
                    error!("scheduled render for plugin '{}' failed: {}", plugin_id, e);
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.insert(id.to_string(), ScheduledTask { stop: stop_tx });
        info!("scheduled plugin '{}'", id);
    }

    /// Stops the timer for `id`, if one is running.
    pub async fn stop(&self, id: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.remove(id) {
            let _ = task.stop.send(true);
        }
    }

    /// Stops every timer. Used at shutdown.
    pub async fn stop_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (id, task) in tasks.drain() {
            let _ = task.stop.send(true);
            info!("schedule for plugin '{}' stopped", id);
        }
    }

    pub async fn is_scheduled(&self, id: &str) -> bool {
        self.tasks.lock().await.contains_key(id)
    }
}

/// Current wall-clock time in the device timezone, falling back to UTC
/// when the persisted identifier does not parse.
fn zoned_now(store: &DeviceStore) -> DateTime<Tz> {
    let tz_name = store.settings().timezone;
    let tz: Tz = match tz_name.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("unknown timezone '{}', falling back to UTC", tz_name);
            Tz::UTC
        }
    };
    Utc::now().with_timezone(&tz)
}

/// Time to sleep until just past the next minute boundary. The 50 ms
/// guard keeps a slightly-early wakeup from landing in the old minute.
fn delay_until_next_minute(now: DateTime<Utc>) -> Duration {
    let ms_into_minute = now.second() as u64 * 1000 + now.timestamp_subsec_millis() as u64;
    Duration::from_millis(60_000u64.saturating_sub(ms_into_minute) + 50)
}
