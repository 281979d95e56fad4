//! Built-in content plugins.

pub mod clock;
pub mod weather;

pub use clock::ClockPlugin;
pub use weather::WeatherPlugin;
