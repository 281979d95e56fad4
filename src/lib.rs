/*
 *  lib.rs
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

pub mod cadence;
pub mod config;
pub mod device;
pub mod ops;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod render;
pub mod scheduler;
pub mod sink;

pub use device::{DeviceSettings, DeviceStore};
pub use ops::Coordinator;
pub use plugin::{ContentPlugin, PluginDescriptor, PluginError};
pub use registry::Registry;
pub use sink::DisplaySink;
