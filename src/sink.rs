/*
 *  sink.rs
 *
 *  InkSlate - plugins on paper
 *	(c) 2020-26 Stuart Hunter
 *
 *	Display sink abstraction. The coordinator only needs three
 *	operations from the panel: update, clear, current. The physical
 *	e-paper transport lives behind this trait.
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
use log::{debug, info};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as TokMutex;

use crate::render::Frame;

/// Error type for display sink operations.
#[derive(Debug)]
pub enum SinkError {
    /// Writing the frame to the output medium failed.
    WriteFailed(String),
    /// Encoding the frame for the output medium failed.
    EncodingFailed(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::WriteFailed(msg) => write!(f, "display write failed: {}", msg),
            SinkError::EncodingFailed(msg) => write!(f, "frame encoding failed: {}", msg),
        }
    }
}

impl Error for SinkError {}

/// Shared output device contract.
///
/// `update` must block until the frame is durably the current output
/// state. All three operations are idempotent under repeated identical
/// input; callers (the registry) serialize access.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    /// Panel dimensions as (width, height).
    fn dimensions(&self) -> (u32, u32);

    /// Makes `frame` the current output state.
    async fn update(&self, frame: Frame) -> Result<(), SinkError>;

    /// Resets the panel to the blank reference frame.
    async fn clear(&self) -> Result<(), SinkError>;

    /// The most recently published frame, or the blank reference frame if
    /// nothing has been published yet.
    async fn current(&self) -> Frame;
}

/// In-memory sink holding the current frame, optionally mirroring each
/// publish to a PNG on disk for the UI to fetch. Stands in for real
/// panel hardware on machines without one.
pub struct VirtualSink {
    width: u32,
    height: u32,
    current: TokMutex<Frame>,
    mirror_path: Option<PathBuf>,
}

impl VirtualSink {
    pub fn new(width: u32, height: u32, mirror_path: Option<PathBuf>) -> Self {
        VirtualSink {
            width,
            height,
            current: TokMutex::new(Frame::blank(width, height)),
            mirror_path,
        }
    }

    fn mirror(&self, frame: &Frame) -> Result<(), SinkError> {
        if let Some(path) = self.mirror_path.as_ref() {
            let png = frame
                .encode_png()
                .map_err(|e| SinkError::EncodingFailed(e.to_string()))?;
            std::fs::write(path, png).map_err(|e| SinkError::WriteFailed(e.to_string()))?;
            debug!("mirrored frame to {}", path.display());
        }
        Ok(())
    }
}

#[async_trait]
impl DisplaySink for VirtualSink {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn update(&self, frame: Frame) -> Result<(), SinkError> {
        self.mirror(&frame)?;
        *self.current.lock().await = frame;
        info!("display updated");
        Ok(())
    }

    async fn clear(&self) -> Result<(), SinkError> {
        let blank = Frame::blank(self.width, self.height);
        self.mirror(&blank)?;
        *self.current.lock().await = blank;
        info!("display cleared");
        Ok(())
    }

    async fn current(&self) -> Frame {
        self.current.lock().await.clone()
    }
}

/// Internal state for the mock sink (shared for inspection in tests).
#[derive(Debug, Default)]
pub struct MockSinkState {
    /// Number of times update() completed
    pub update_count: usize,

    /// Number of times clear() was called
    pub clear_count: usize,

    /// True while an update() is executing
    pub in_flight: bool,

    /// Set if two updates ever overlapped
    pub overlap_detected: bool,

    /// Simulate failures (for error testing)
    pub simulate_update_failure: bool,
}

/// Mock sink for tests: records operations and detects interleaved
/// writes, without touching any output medium.
pub struct MockSink {
    width: u32,
    height: u32,
    current: TokMutex<Frame>,
    /// Artificial delay inside update(), to widen race windows in tests.
    pub update_delay: std::time::Duration,
    state: Arc<Mutex<MockSinkState>>,
}

impl MockSink {
    pub fn new(width: u32, height: u32) -> Self {
        MockSink {
            width,
            height,
            current: TokMutex::new(Frame::blank(width, height)),
            update_delay: std::time::Duration::ZERO,
            state: Arc::new(Mutex::new(MockSinkState::default())),
        }
    }

    /// Shared handle onto the mock's recorded state.
    pub fn state(&self) -> Arc<Mutex<MockSinkState>> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl DisplaySink for MockSink {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn update(&self, frame: Frame) -> Result<(), SinkError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.simulate_update_failure {
                return Err(SinkError::WriteFailed("simulated failure".to_string()));
            }
            if state.in_flight {
                state.overlap_detected = true;
            }
            state.in_flight = true;
        }
        if !self.update_delay.is_zero() {
            tokio::time::sleep(self.update_delay).await;
        }
        *self.current.lock().await = frame;
        let mut state = self.state.lock().unwrap();
        state.in_flight = false;
        state.update_count += 1;
        Ok(())
    }

    async fn clear(&self) -> Result<(), SinkError> {
        *self.current.lock().await = Frame::blank(self.width, self.height);
        self.state.lock().unwrap().clear_count += 1;
        Ok(())
    }

    async fn current(&self) -> Frame {
        self.current.lock().await.clone()
    }
}
