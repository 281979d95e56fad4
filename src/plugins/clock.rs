/*
 *  plugins/clock.rs
 *
 *  InkSlate - plugins on paper
 *	(c) 2020-26 Stuart Hunter
 *
 *	Clock plugin: the current time, large, in the device timezone.
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
use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::plugin::{
    ContentPlugin, PluginDescriptor, PluginError, RenderContext, SelectOption, SettingDefinition,
    SettingType, SettingValidation, SettingValue, SettingsMap,
};
use crate::render::{xml_escape, Frame};

/// Typed view of the clock's settings map. The schema on the descriptor
/// is what the UI introspects; this is what render consumes.
#[derive(Debug, Clone, PartialEq)]
struct ClockSettings {
    twelve_hour: bool,
    show_seconds: bool,
    font_family: String,
    font_size: f64,
    text_color: String,
}

impl ClockSettings {
    fn from_map(settings: &SettingsMap) -> Self {
        ClockSettings {
            twelve_hour: settings
                .get("time_format")
                .and_then(|v| v.as_text())
                .map(|f| f == "12h")
                .unwrap_or(true),
            show_seconds: settings
                .get("show_seconds")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            font_family: settings
                .get("font_family")
                .and_then(|v| v.as_text())
                .unwrap_or("Arial")
                .to_string(),
            font_size: settings
                .get("font_size")
                .and_then(|v| v.as_number())
                .unwrap_or(48.0),
            text_color: settings
                .get("text_color")
                .and_then(|v| v.as_text())
                .unwrap_or("#000000")
                .to_string(),
        }
    }
}

pub struct ClockPlugin {
    descriptor: PluginDescriptor,
}

impl ClockPlugin {
    pub fn new() -> Self {
        let settings_schema = vec![
            SettingDefinition {
                key: "time_format".to_string(),
                setting_type: SettingType::Select,
                label: "Time Format".to_string(),
                description: Some("Choose 12-hour or 24-hour format".to_string()),
                default: Some(SettingValue::Text("12h".to_string())),
                options: Some(vec![
                    SelectOption { value: "12h".to_string(), label: "12-hour".to_string() },
                    SelectOption { value: "24h".to_string(), label: "24-hour".to_string() },
                ]),
                validation: None,
            },
            SettingDefinition {
                key: "show_seconds".to_string(),
                setting_type: SettingType::Boolean,
                label: "Show Seconds".to_string(),
                description: Some("Display seconds in the time".to_string()),
                default: Some(SettingValue::Bool(true)),
                options: None,
                validation: None,
            },
            SettingDefinition {
                key: "font_family".to_string(),
                setting_type: SettingType::Select,
                label: "Font Family".to_string(),
                description: None,
                default: Some(SettingValue::Text("Arial".to_string())),
                options: Some(vec![
                    SelectOption { value: "Arial".to_string(), label: "Arial".to_string() },
                    SelectOption { value: "Helvetica".to_string(), label: "Helvetica".to_string() },
                    SelectOption { value: "sans-serif".to_string(), label: "Sans Serif".to_string() },
                ]),
                validation: None,
            },
            SettingDefinition {
                key: "font_size".to_string(),
                setting_type: SettingType::Number,
                label: "Font Size".to_string(),
                description: Some("Size of the text in pixels".to_string()),
                default: Some(SettingValue::Number(48.0)),
                options: None,
                validation: Some(SettingValidation {
                    required: true,
                    min: Some(12.0),
                    max: Some(96.0),
                    pattern: None,
                }),
            },
            SettingDefinition {
                key: "text_color".to_string(),
                setting_type: SettingType::String,
                label: "Text Color".to_string(),
                description: Some("Color in hex format (e.g., #000000)".to_string()),
                default: Some(SettingValue::Text("#000000".to_string())),
                options: None,
                validation: Some(SettingValidation {
                    required: false,
                    min: None,
                    max: None,
                    pattern: Some("^#[0-9A-Fa-f]{6}$".to_string()),
                }),
            },
        ];

        let mut settings = SettingsMap::new();
        for def in &settings_schema {
            if let Some(default) = def.default.clone() {
                settings.insert(def.key.clone(), default);
            }
        }

        ClockPlugin {
            descriptor: PluginDescriptor {
                id: "clock".to_string(),
                name: "Clock".to_string(),
                description: "Displays current time".to_string(),
                version: "1.0.0".to_string(),
                enabled: false,
                cadence: "* * * * *".to_string(),
                icon: "clock".to_string(),
                settings,
                settings_schema,
            },
        }
    }

    fn time_string(settings: &ClockSettings, now: &DateTime<Tz>) -> String {
        let mut out = if settings.twelve_hour {
            let hours = match now.hour() % 12 {
                0 => 12,
                h => h,
            };
            format!("{}:{:02}", hours, now.minute())
        } else {
            format!("{:02}:{:02}", now.hour(), now.minute())
        };
        if settings.show_seconds {
            out.push_str(&format!(":{:02}", now.second()));
        }
        if settings.twelve_hour {
            out.push_str(if now.hour() >= 12 { " PM" } else { " AM" });
        }
        out
    }
}

impl Default for ClockPlugin {
    fn default() -> Self {
        ClockPlugin::new()
    }
}

#[async_trait]
impl ContentPlugin for ClockPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn descriptor_mut(&mut self) -> &mut PluginDescriptor {
        &mut self.descriptor
    }

    async fn render(&mut self, ctx: &RenderContext) -> Result<Frame, PluginError> {
        let settings = ClockSettings::from_map(&self.descriptor.settings);
        let now = Utc::now().with_timezone(&ctx.timezone);
        let time = Self::time_string(&settings, &now);
        let date = now.format("%A, %B %-d").to_string();
        let (width, height) = ctx.renderer.dimensions();

        let svg = format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}">
  <rect width="{w}" height="{h}" fill="white"/>
  <text x="50%" y="48%" text-anchor="middle" dominant-baseline="middle"
        font-family="{family}" font-size="{size}" fill="{color}">{time}</text>
  <text x="50%" y="62%" text-anchor="middle" dominant-baseline="middle"
        font-family="{family}" font-size="{date_size}" fill="{color}">{date}</text>
</svg>"##,
            w = width,
            h = height,
            family = xml_escape(&settings.font_family),
            size = settings.font_size,
            date_size = (settings.font_size / 2.5).max(10.0),
            color = xml_escape(&settings.text_color),
            time = xml_escape(&time),
            date = xml_escape(&date),
        );

        ctx.renderer
            .render_markup(&svg)
            .map_err(|e| PluginError::Render(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2026, 8, 29, h, m, s).unwrap()
    }

    #[test]
    fn twelve_hour_formatting() {
        let settings = ClockSettings {
            twelve_hour: true,
            show_seconds: false,
            font_family: "Arial".into(),
            font_size: 48.0,
            text_color: "#000000".into(),
        };
        assert_eq!(ClockPlugin::time_string(&settings, &at(0, 5, 0)), "12:05 AM");
        assert_eq!(ClockPlugin::time_string(&settings, &at(13, 37, 0)), "1:37 PM");
    }

    #[test]
    fn twenty_four_hour_with_seconds() {
        let settings = ClockSettings {
            twelve_hour: false,
            show_seconds: true,
            font_family: "Arial".into(),
            font_size: 48.0,
            text_color: "#000000".into(),
        };
        assert_eq!(ClockPlugin::time_string(&settings, &at(9, 4, 7)), "09:04:07");
    }

    #[test]
    fn defaults_populate_settings_from_schema() {
        let plugin = ClockPlugin::new();
        let desc = plugin.descriptor();
        assert!(!desc.enabled);
        assert_eq!(desc.cadence, "* * * * *");
        for def in &desc.settings_schema {
            assert!(desc.settings.contains_key(&def.key));
        }
        let settings = ClockSettings::from_map(&desc.settings);
        assert!(settings.twelve_hour);
        assert_eq!(settings.font_size, 48.0);
    }
}
