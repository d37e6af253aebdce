//! Boundary to the compositing engine.
//!
//! The canvas state machine decides which paint operations happen and in
//! which order. The pixel math behind them lives behind [`PaintEngine`], so a
//! native brush engine can be plugged in. [`SoftwareEngine`] is a small
//! portable implementation good enough for tests and headless replay.

mod bitmap;
mod software;

pub use bitmap::{Bitmap, alpha};
pub use software::SoftwareEngine;

use crate::protocol::ClassicDab;
use kurbo::Rect;
use serde::{Deserialize, Serialize};

/// Pixel blending modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BlendMode {
    Erase = 0,
    #[default]
    Normal,
    Multiply,
    Divide,
    Burn,
    Dodge,
    Darken,
    Lighten,
    Subtract,
    Add,
    Recolor,
    Behind,
    ColorErase,
    Replace = 255,
}

impl BlendMode {
    /// Whether the mode can be used to composite a whole layer.
    pub fn is_layer_mode(self) -> bool {
        !matches!(self, BlendMode::Behind | BlendMode::ColorErase | BlendMode::Replace)
    }
}

/// Primitive paint operations applied to a single pixel buffer.
///
/// Every method returns the region it changed, or `None` when nothing was
/// touched. Implementations must be deterministic: the same inputs always
/// produce the same pixels.
pub trait PaintEngine {
    /// Fill a rectangle with a solid color.
    fn fill_rect(
        &self,
        target: &mut Bitmap,
        area: (u32, u32, u32, u32),
        color: u32,
        mode: BlendMode,
    ) -> Option<Rect>;

    /// Draw `image` with its top-left corner at `(x, y)`.
    fn put_image(
        &self,
        target: &mut Bitmap,
        x: i64,
        y: i64,
        image: &Bitmap,
        mode: BlendMode,
        opacity: u8,
    ) -> Option<Rect>;

    /// Stamp a run of classic brush dabs starting at `(x, y)`.
    fn draw_dabs(
        &self,
        target: &mut Bitmap,
        x: i32,
        y: i32,
        color: u32,
        mode: BlendMode,
        dabs: &[ClassicDab],
    ) -> Option<Rect>;

    /// Composite a whole layer onto `target`, used when flattening.
    fn composite(
        &self,
        target: &mut Bitmap,
        layer: &Bitmap,
        opacity: u8,
        mode: BlendMode,
    ) -> Option<Rect> {
        self.put_image(target, 0, 0, layer, mode, opacity)
    }
}
