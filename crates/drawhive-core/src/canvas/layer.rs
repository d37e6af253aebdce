//! Raster layers.

use crate::paint::{BlendMode, Bitmap};
use crate::protocol::{LayerId, layer_attr_flags};

/// A single raster layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub(crate) id: LayerId,
    /// Display title.
    pub title: String,
    /// Layer opacity (255 = opaque).
    pub opacity: u8,
    /// Mode used when compositing the layer onto the ones below.
    pub blend: BlendMode,
    /// Content is hidden from viewers who opted out of censored content.
    pub censored: bool,
    /// Fixed layers are background/foreground layers excluded from animation.
    pub fixed: bool,
    pub(crate) pixels: Bitmap,
}

impl Layer {
    /// Create a layer filled with a solid color.
    pub fn new(id: LayerId, title: impl Into<String>, width: u32, height: u32, fill: u32) -> Self {
        Self::with_pixels(id, title, Bitmap::filled(width, height, fill))
    }

    pub(crate) fn with_pixels(id: LayerId, title: impl Into<String>, pixels: Bitmap) -> Self {
        Self {
            id,
            title: title.into(),
            opacity: 255,
            blend: BlendMode::Normal,
            censored: false,
            fixed: false,
            pixels,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn pixels(&self) -> &Bitmap {
        &self.pixels
    }

    /// Attribute flags in wire form.
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.censored {
            flags |= layer_attr_flags::CENSOR;
        }
        if self.fixed {
            flags |= layer_attr_flags::FIXED;
        }
        flags
    }

    pub(crate) fn set_flags(&mut self, flags: u8) {
        self.censored = flags & layer_attr_flags::CENSOR != 0;
        self.fixed = flags & layer_attr_flags::FIXED != 0;
    }

    /// Whether any attribute differs from a freshly created layer.
    pub fn has_default_attributes(&self) -> bool {
        self.opacity == 255 && self.blend == BlendMode::Normal && self.flags() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut layer = Layer::new(0x0101, "Ink", 4, 4, 0);
        assert!(layer.has_default_attributes());
        layer.set_flags(layer_attr_flags::CENSOR | layer_attr_flags::FIXED);
        assert!(layer.censored && layer.fixed);
        assert_eq!(layer.flags(), 3);
        assert!(!layer.has_default_attributes());
    }
}
