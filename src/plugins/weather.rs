/*
 *  plugins/weather.rs
 *
 *  InkSlate - plugins on paper
 *	(c) 2020-26 Stuart Hunter
 *
 *	Weather plugin: current conditions and forecast from the
 *	OpenWeatherMap One Call API.
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
use chrono::{DateTime, TimeZone, Utc};
use log::{info, warn};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::fmt::Write as _;
use std::time::Duration;

use crate::plugin::{
    ContentPlugin, LocationValue, PluginDescriptor, PluginError, RenderContext, SelectOption,
    SettingDefinition, SettingType, SettingValidation, SettingValue, SettingsMap,
};
use crate::render::{xml_escape, Frame};

const ONECALL_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

/// Typed view of the weather settings map.
#[derive(Debug, Clone)]
struct WeatherSettings {
    location: Option<LocationValue>,
    api_key: String,
    metric: bool,
    show_humidity: bool,
    show_wind: bool,
    show_forecast: bool,
    forecast_days: usize,
    font_family: String,
    font_size: f64,
    text_color: String,
}

impl WeatherSettings {
    fn from_map(settings: &SettingsMap) -> Self {
        WeatherSettings {
            location: settings
                .get("location")
                .and_then(|v| v.as_location())
                .cloned(),
            api_key: settings
                .get("api_key")
                .and_then(|v| v.as_text())
                .unwrap_or("")
                .to_string(),
            metric: settings
                .get("units")
                .and_then(|v| v.as_text())
                .map(|u| u != "imperial")
                .unwrap_or(true),
            show_humidity: settings
                .get("show_humidity")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            show_wind: settings
                .get("show_wind")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            show_forecast: settings
                .get("show_forecast")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            forecast_days: settings
                .get("forecast_days")
                .and_then(|v| v.as_number())
                .map(|n| n as usize)
                .unwrap_or(3),
            font_family: settings
                .get("font_family")
                .and_then(|v| v.as_text())
                .unwrap_or("Arial")
                .to_string(),
            font_size: settings
                .get("font_size")
                .and_then(|v| v.as_number())
                .unwrap_or(16.0),
            text_color: settings
                .get("text_color")
                .and_then(|v| v.as_text())
                .unwrap_or("#000000")
                .to_string(),
        }
    }

    fn units_param(&self) -> &'static str {
        if self.metric { "metric" } else { "imperial" }
    }

    fn temp_suffix(&self) -> &'static str {
        if self.metric { "°C" } else { "°F" }
    }

    fn wind_suffix(&self) -> &'static str {
        if self.metric { "m/s" } else { "mph" }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WeatherCondition {
    #[allow(dead_code)]
    main: String,
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CurrentConditions {
    temp: f64,
    feels_like: f64,
    humidity: f64,
    wind_speed: f64,
    #[serde(default)]
    weather: Vec<WeatherCondition>,
}

#[derive(Debug, Clone, Deserialize)]
struct DailyTemp {
    min: f64,
    max: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct DailyForecast {
    dt: i64,
    temp: DailyTemp,
    #[serde(default)]
    weather: Vec<WeatherCondition>,
}

#[derive(Debug, Clone, Deserialize)]
struct OneCallResponse {
    current: CurrentConditions,
    #[serde(default)]
    daily: Vec<DailyForecast>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

pub struct WeatherPlugin {
    descriptor: PluginDescriptor,
    client: Option<Client>,
    coordinates: Option<(f64, f64)>,
    weather_data: Option<OneCallResponse>,
    error_message: Option<String>,
}

impl WeatherPlugin {
    pub fn new() -> Self {
        let settings_schema = vec![
            SettingDefinition {
                key: "location".to_string(),
                setting_type: SettingType::Location,
                label: "Location".to_string(),
                description: Some("Select your location on the map".to_string()),
                default: None,
                options: None,
                validation: Some(SettingValidation { required: true, ..Default::default() }),
            },
            SettingDefinition {
                key: "api_key".to_string(),
                setting_type: SettingType::String,
                label: "OpenWeatherMap API Key".to_string(),
                description: Some("Enter your OpenWeatherMap API key".to_string()),
                default: Some(SettingValue::Text(String::new())),
                options: None,
                validation: Some(SettingValidation { required: true, ..Default::default() }),
            },
            SettingDefinition {
                key: "units".to_string(),
                setting_type: SettingType::Select,
                label: "Units".to_string(),
                description: Some("Choose your preferred units".to_string()),
                default: Some(SettingValue::Text("metric".to_string())),
                options: Some(vec![
                    SelectOption { value: "metric".to_string(), label: "Metric (°C, m/s)".to_string() },
                    SelectOption { value: "imperial".to_string(), label: "Imperial (°F, mph)".to_string() },
                ]),
                validation: None,
            },
            SettingDefinition {
                key: "show_humidity".to_string(),
                setting_type: SettingType::Boolean,
                label: "Show Humidity".to_string(),
                description: None,
                default: Some(SettingValue::Bool(true)),
                options: None,
                validation: None,
            },
            SettingDefinition {
                key: "show_wind".to_string(),
                setting_type: SettingType::Boolean,
                label: "Show Wind".to_string(),
                description: None,
                default: Some(SettingValue::Bool(true)),
                options: None,
                validation: None,
            },
            SettingDefinition {
                key: "show_forecast".to_string(),
                setting_type: SettingType::Boolean,
                label: "Show Forecast".to_string(),
                description: None,
                default: Some(SettingValue::Bool(true)),
                options: None,
                validation: None,
            },
            SettingDefinition {
                key: "forecast_days".to_string(),
                setting_type: SettingType::Number,
                label: "Forecast Days".to_string(),
                description: Some("Number of days to show in forecast".to_string()),
                default: Some(SettingValue::Number(3.0)),
                options: None,
                validation: Some(SettingValidation {
                    required: true,
                    min: Some(1.0),
                    max: Some(7.0),
                    pattern: None,
                }),
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
                default: Some(SettingValue::Number(16.0)),
                options: None,
                validation: Some(SettingValidation {
                    required: true,
                    min: Some(8.0),
                    max: Some(72.0),
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

        WeatherPlugin {
            descriptor: PluginDescriptor {
                id: "weather".to_string(),
                name: "Weather".to_string(),
                description: "Displays current weather and forecast".to_string(),
                version: "1.0.0".to_string(),
                enabled: false,
                cadence: "*/30 * * * *".to_string(),
                icon: "cloud".to_string(),
                settings,
                settings_schema,
            },
            client: None,
            coordinates: None,
            weather_data: None,
            error_message: None,
        }
    }

    fn build_client() -> Result<Client, PluginError> {
        const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));
        let mut headers = header::HeaderMap::new();
        headers.insert("User-Agent", header::HeaderValue::from_static(VERSION));
        headers.insert("Accept", header::HeaderValue::from_static("application/json"));

        Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .default_headers(headers)
            .build()
            .map_err(|e| PluginError::RenderEngine(format!("HTTP client build failed: {}", e)))
    }

    /// Re-reads coordinates from the location setting. Fails when the
    /// plugin is not yet configured.
    fn update_location(&mut self) -> Result<(), PluginError> {
        let settings = WeatherSettings::from_map(&self.descriptor.settings);
        if settings.api_key.is_empty() {
            return Err(PluginError::Render(
                "Please enter your OpenWeatherMap API key in the settings".to_string(),
            ));
        }
        let location = settings.location.ok_or_else(|| {
            PluginError::Render("Please select a location".to_string())
        })?;
        self.coordinates = Some((location.latitude, location.longitude));
        Ok(())
    }

    async fn fetch_weather_data(&mut self) -> Result<(), PluginError> {
        let settings = WeatherSettings::from_map(&self.descriptor.settings);
        if self.coordinates.is_none() {
            self.update_location()?;
        }
        let (lat, lon) = self
            .coordinates
            .ok_or_else(|| PluginError::Render("Please select a location".to_string()))?;
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| PluginError::Render("plugin not initialized".to_string()))?;

        let response = client
            .get(ONECALL_URL)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("units", settings.units_param().to_string()),
                ("exclude", "minutely,alerts".to_string()),
                ("appid", settings.api_key.clone()),
            ])
            .send()
            .await
            .map_err(|e| PluginError::Render(format!("weather request failed: {}", e)))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                return Err(PluginError::Render(
                    "Invalid OpenWeatherMap API key".to_string(),
                ))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(PluginError::Render(
                    "API rate limit exceeded; the free tier of One Call 3.0 may not be available"
                        .to_string(),
                ))
            }
            status if !status.is_success() => {
                let message = response
                    .json::<ApiErrorBody>()
                    .await
                    .map(|b| b.message)
                    .unwrap_or_default();
                return Err(PluginError::Render(format!(
                    "weather API error ({}): {}",
                    status, message
                )));
            }
            _ => {}
        }

        let data: OneCallResponse = response
            .json()
            .await
            .map_err(|e| PluginError::Render(format!("weather response unreadable: {}", e)))?;
        self.weather_data = Some(data);
        self.error_message = None;
        info!("weather data refreshed for {:.3},{:.3}", lat, lon);
        Ok(())
    }

    fn error_card(
        &self,
        ctx: &RenderContext,
        settings: &WeatherSettings,
        message: &str,
    ) -> Result<Frame, PluginError> {
        let (width, height) = ctx.renderer.dimensions();
        let svg = format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}">
  <rect width="{w}" height="{h}" fill="white"/>
  <text x="50%" y="42%" text-anchor="middle" font-family="{family}"
        font-size="{title_size}" fill="{color}">Weather unavailable</text>
  <text x="50%" y="55%" text-anchor="middle" font-family="{family}"
        font-size="{size}" fill="{color}">{message}</text>
</svg>"##,
            w = width,
            h = height,
            family = xml_escape(&settings.font_family),
            title_size = settings.font_size * 1.8,
            size = settings.font_size,
            color = xml_escape(&settings.text_color),
            message = xml_escape(message),
        );
        ctx.renderer
            .render_markup(&svg)
            .map_err(|e| PluginError::Render(e.to_string()))
    }

    fn weather_card(
        &self,
        ctx: &RenderContext,
        settings: &WeatherSettings,
        data: &OneCallResponse,
    ) -> Result<Frame, PluginError> {
        let (width, height) = ctx.renderer.dimensions();
        let family = xml_escape(&settings.font_family);
        let color = xml_escape(&settings.text_color);
        let place = settings
            .location
            .as_ref()
            .map(|l| l.display_name.clone())
            .unwrap_or_default();
        let summary = data
            .current
            .weather
            .first()
            .map(|w| w.description.clone())
            .unwrap_or_default();

        let mut body = String::new();
        let _ = write!(
            body,
            r##"<text x="40" y="60" font-family="{family}" font-size="{s}" fill="{color}">{place}</text>
  <text x="40" y="150" font-family="{family}" font-size="{temp_s}" fill="{color}">{temp:.0}{suffix}</text>
  <text x="40" y="190" font-family="{family}" font-size="{s}" fill="{color}">feels like {feels:.0}{suffix}, {summary}</text>"##,
            family = family,
            color = color,
            s = settings.font_size * 1.4,
            temp_s = settings.font_size * 4.0,
            place = xml_escape(&place),
            temp = data.current.temp,
            feels = data.current.feels_like,
            suffix = settings.temp_suffix(),
            summary = xml_escape(&summary),
        );

        let mut detail_y = 230.0;
        if settings.show_humidity {
            let _ = write!(
                body,
                r##"<text x="40" y="{y}" font-family="{family}" font-size="{s}" fill="{color}">humidity {h:.0}%</text>"##,
                y = detail_y,
                family = family,
                s = settings.font_size * 1.2,
                color = color,
                h = data.current.humidity,
            );
            detail_y += settings.font_size * 1.6;
        }
        if settings.show_wind {
            let _ = write!(
                body,
                r##"<text x="40" y="{y}" font-family="{family}" font-size="{s}" fill="{color}">wind {w:.1} {suffix}</text>"##,
                y = detail_y,
                family = family,
                s = settings.font_size * 1.2,
                color = color,
                w = data.current.wind_speed,
                suffix = settings.wind_suffix(),
            );
        }

        if settings.show_forecast {
            let mut x = 40.0;
            let column = (width as f64 - 80.0) / settings.forecast_days.max(1) as f64;
            for day in data.daily.iter().take(settings.forecast_days) {
                let when: DateTime<chrono_tz::Tz> = Utc
                    .timestamp_opt(day.dt, 0)
                    .single()
                    .unwrap_or_else(Utc::now)
                    .with_timezone(&ctx.timezone);
                let label = when.format("%a").to_string();
                let desc = day
                    .weather
                    .first()
                    .map(|w| w.description.clone())
                    .unwrap_or_default();
                let _ = write!(
                    body,
                    r##"<text x="{x}" y="{y1}" font-family="{family}" font-size="{s}" fill="{color}">{label}</text>
  <text x="{x}" y="{y2}" font-family="{family}" font-size="{s}" fill="{color}">{max:.0}/{min:.0}{suffix}</text>
  <text x="{x}" y="{y3}" font-family="{family}" font-size="{small}" fill="{color}">{desc}</text>"##,
                    x = x,
                    y1 = height as f64 - 140.0,
                    y2 = height as f64 - 110.0,
                    y3 = height as f64 - 85.0,
                    family = family,
                    s = settings.font_size * 1.2,
                    small = settings.font_size,
                    color = color,
                    label = xml_escape(&label),
                    max = day.temp.max,
                    min = day.temp.min,
                    suffix = settings.temp_suffix(),
                    desc = xml_escape(&desc),
                );
                x += column;
            }
        }

        let svg = format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}">
  <rect width="{w}" height="{h}" fill="white"/>
  {body}
</svg>"##,
            w = width,
            h = height,
            body = body,
        );
        ctx.renderer
            .render_markup(&svg)
            .map_err(|e| PluginError::Render(e.to_string()))
    }
}

impl Default for WeatherPlugin {
    fn default() -> Self {
        WeatherPlugin::new()
    }
}

#[async_trait]
impl ContentPlugin for WeatherPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn descriptor_mut(&mut self) -> &mut PluginDescriptor {
        &mut self.descriptor
    }

    async fn initialize(&mut self) -> Result<(), PluginError> {
        self.client = Some(Self::build_client()?);
        let settings = WeatherSettings::from_map(&self.descriptor.settings);
        if !settings.api_key.is_empty() && settings.location.is_some() {
            self.update_location()?;
            if let Err(e) = self.fetch_weather_data().await {
                // Not fatal at registration; the render shows the error.
                warn!("weather prefetch failed: {}", e);
                self.error_message = Some(e.to_string());
            }
        } else {
            self.error_message = Some(
                "Please configure your OpenWeatherMap API key and location in the settings"
                    .to_string(),
            );
        }
        Ok(())
    }

    async fn render(&mut self, ctx: &RenderContext) -> Result<Frame, PluginError> {
        let settings = WeatherSettings::from_map(&self.descriptor.settings);

        if settings.api_key.is_empty() || settings.location.is_none() {
            return self.error_card(
                ctx,
                &settings,
                "Please configure your OpenWeatherMap API key and location in the settings",
            );
        }

        if let Err(e) = self.fetch_weather_data().await {
            // Keep the panel informative rather than failing the cycle.
            self.error_message = Some(e.to_string());
            if self.weather_data.is_none() {
                return self.error_card(ctx, &settings, &e.to_string());
            }
            warn!("weather refresh failed, rendering cached data: {}", e);
        }

        let data = match self.weather_data.clone() {
            Some(data) => data,
            None => return self.error_card(ctx, &settings, "No weather data available"),
        };
        self.weather_card(ctx, &settings, &data)
    }

    async fn settings_applied(&mut self, merged: &SettingsMap) -> Result<(), PluginError> {
        let settings = WeatherSettings::from_map(merged);
        if settings.api_key.is_empty() || settings.location.is_none() {
            self.coordinates = None;
            self.weather_data = None;
            self.error_message = Some(
                "Please configure your OpenWeatherMap API key and location in the settings"
                    .to_string(),
            );
            return Ok(());
        }

        // Recompute derived state; the merged settings stay applied even
        // when the refetch fails.
        self.update_location()?;
        if let Err(e) = self.fetch_weather_data().await {
            self.error_message = Some(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    async fn teardown(&mut self) -> Result<(), PluginError> {
        self.client = None;
        self.weather_data = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_plugin_reads_defaults() {
        let plugin = WeatherPlugin::new();
        let settings = WeatherSettings::from_map(&plugin.descriptor().settings);
        assert!(settings.location.is_none());
        assert!(settings.api_key.is_empty());
        assert!(settings.metric);
        assert_eq!(settings.forecast_days, 3);
    }

    #[test]
    fn location_change_recomputes_coordinates() {
        let mut plugin = WeatherPlugin::new();
        plugin.descriptor.settings.insert(
            "api_key".to_string(),
            SettingValue::Text("k".to_string()),
        );
        plugin.descriptor.settings.insert(
            "location".to_string(),
            SettingValue::Location(LocationValue {
                latitude: 51.5,
                longitude: -0.12,
                display_name: "London".to_string(),
            }),
        );
        plugin.update_location().unwrap();
        assert_eq!(plugin.coordinates, Some((51.5, -0.12)));
    }

    #[test]
    fn onecall_response_decodes() {
        let json = r#"{
            "current": {
                "temp": 21.4, "feels_like": 20.9, "humidity": 48,
                "wind_speed": 3.2,
                "weather": [{"main": "Clouds", "description": "scattered clouds"}]
            },
            "daily": [
                {"dt": 1767225600, "temp": {"min": 12.0, "max": 22.5},
                 "weather": [{"main": "Clear", "description": "clear sky"}]}
            ]
        }"#;
        let data: OneCallResponse = serde_json::from_str(json).unwrap();
        assert_eq!(data.daily.len(), 1);
        assert_eq!(data.current.weather[0].description, "scattered clouds");
    }
}
