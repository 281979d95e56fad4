//! Rendering collaborator: SVG markup in, raster frame out.
//!
//! Plugins describe their layout as SVG; this module uses `usvg` for
//! parsing and `resvg` for rendering into a `tiny_skia::Pixmap` at the
//! panel's fixed dimensions. The e-paper driver downstream only ever sees
//! finished frames.

use resvg::{
    render,
    usvg::{Options as ResvgUsvgOptions, Transform, Tree as ResvgTree},
}; // Use resvg's re-exports for usvg types

use log::debug;
use std::error::Error;
use std::fmt;
use tiny_skia::Pixmap;

/// Default panel geometry (7.3" e-paper).
pub const DISPLAY_WIDTH: u32 = 800;
pub const DISPLAY_HEIGHT: u32 = 480;

/// Custom error type for frame rendering operations.
#[derive(Debug)]
pub enum RenderEngineError {
    /// Error parsing the SVG data.
    SvgParseError(String),
    /// Error creating a pixmap for rendering.
    PixmapCreationError(String),
    /// PNG encoding failed.
    EncodingError(String),
}

impl fmt::Display for RenderEngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderEngineError::SvgParseError(msg) => write!(f, "SVG parse error: {}", msg),
            RenderEngineError::PixmapCreationError(msg) => {
                write!(f, "Pixmap creation error: {}", msg)
            }
            RenderEngineError::EncodingError(msg) => write!(f, "PNG encoding error: {}", msg),
        }
    }
}

impl Error for RenderEngineError {}

/// One finished raster frame, ready for the display sink.
#[derive(Clone, PartialEq)]
pub struct Frame {
    pixmap: Pixmap,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({}x{})", self.width(), self.height())
    }
}

impl Frame {
    /// A blank (all-white) reference frame.
    pub fn blank(width: u32, height: u32) -> Self {
        let mut pixmap =
            Pixmap::new(width, height).expect("frame dimensions must be non-zero");
        pixmap.fill(tiny_skia::Color::WHITE);
        Frame { pixmap }
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Raw RGBA pixel data, row-major.
    pub fn pixel_data(&self) -> &[u8] {
        self.pixmap.data()
    }

    /// Encodes the frame as PNG, e.g. for the UI's current-image fetch.
    pub fn encode_png(&self) -> Result<Vec<u8>, RenderEngineError> {
        self.pixmap
            .encode_png()
            .map_err(|e| RenderEngineError::EncodingError(e.to_string()))
    }
}

/// Escapes text for interpolation into SVG markup.
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders SVG markup to fixed-size frames.
#[derive(Debug, Clone)]
pub struct SvgRenderer {
    target_width: u32,
    target_height: u32,
}

impl SvgRenderer {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        SvgRenderer {
            target_width,
            target_height,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Parses and rasterizes `svg_data`, scaled to fit the target frame
    /// over a white background.
    pub fn render_markup(&self, svg_data: &str) -> Result<Frame, RenderEngineError> {
        let usvg_options = ResvgUsvgOptions::default();
        let tree = ResvgTree::from_str(svg_data, &usvg_options)
            .map_err(|e| RenderEngineError::SvgParseError(format!("failed to parse SVG: {:?}", e)))?;

        let mut pixmap = Pixmap::new(self.target_width, self.target_height).ok_or_else(|| {
            RenderEngineError::PixmapCreationError("failed to create pixmap".to_string())
        })?;
        pixmap.fill(tiny_skia::Color::WHITE);

        // For simple scaling from (0,0), a direct scale transform is sufficient.
        // If the SVG has a viewBox with a non-zero origin, more complex translation might be needed.
        let svg_size = tree.size();
        let scale_x = self.target_width as f32 / svg_size.width();
        let scale_y = self.target_height as f32 / svg_size.height();
        let transform = Transform::from_scale(scale_x, scale_y);

        render(&tree, transform, &mut pixmap.as_mut());

        debug!(
            "SVG rendered to {}x{} frame",
            self.target_width, self.target_height
        );
        Ok(Frame { pixmap })
    }
}

impl Default for SvgRenderer {
    fn default() -> Self {
        SvgRenderer::new(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_frame_is_white_at_full_size() {
        let frame = Frame::blank(DISPLAY_WIDTH, DISPLAY_HEIGHT);
        assert_eq!(frame.width(), DISPLAY_WIDTH);
        assert_eq!(frame.height(), DISPLAY_HEIGHT);
        // RGBA white everywhere
        assert!(frame.pixel_data().iter().all(|b| *b == 255));
    }

    #[test]
    fn renders_simple_markup() {
        let renderer = SvgRenderer::new(100, 60);
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="60">
            <rect x="0" y="0" width="100" height="60" fill="#000000"/>
        </svg>"##;
        let frame = renderer.render_markup(svg).unwrap();
        assert_eq!(frame.width(), 100);
        assert_ne!(frame, Frame::blank(100, 60));
    }

    #[test]
    fn rejects_malformed_markup() {
        let renderer = SvgRenderer::new(100, 60);
        assert!(renderer.render_markup("<svg").is_err());
    }
}
