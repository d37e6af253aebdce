//! Plain pixel buffers.

use kurbo::Rect;

/// Extract the alpha channel of an ARGB color.
pub fn alpha(argb: u32) -> u8 {
    (argb >> 24) as u8
}

/// An ARGB (non-premultiplied) pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Bitmap {
    /// Create a fully transparent bitmap.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, 0)
    }

    pub fn filled(width: u32, height: u32, color: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    /// Build a bitmap from big endian ARGB bytes. Returns `None` when the
    /// buffer length does not match the dimensions.
    pub fn from_argb_bytes(width: u32, height: u32, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != width as usize * height as usize * 4 {
            return None;
        }
        let pixels = bytes
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Build a bitmap from RGBA8 bytes (as produced by image decoders).
    pub fn from_rgba8(width: u32, height: u32, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != width as usize * height as usize * 4 {
            return None;
        }
        let pixels = bytes
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[3], c[0], c[1], c[2]]))
            .collect();
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn to_argb_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|p| p.to_be_bytes()).collect()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width as f64, self.height as f64)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Pixel at a position, or transparent outside the bitmap.
    pub fn pixel(&self, x: i64, y: i64) -> u32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 0;
        }
        self.pixels[self.index(x as u32, y as u32)]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: u32) {
        if x < self.width && y < self.height {
            let i = self.index(x, y);
            self.pixels[i] = color;
        }
    }

    /// True if every pixel is fully transparent.
    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|p| alpha(*p) == 0)
    }

    /// Bounding box of the non-transparent pixels as `(x, y, width, height)`.
    pub fn opaque_bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut found = false;
        for y in 0..self.height {
            for x in 0..self.width {
                if alpha(self.pixels[self.index(x, y)]) != 0 {
                    found = true;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        found.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }

    /// Copy a region. Parts outside the bitmap come out transparent.
    pub fn copy(&self, x: i64, y: i64, width: u32, height: u32) -> Bitmap {
        let mut out = Bitmap::new(width, height);
        for oy in 0..height {
            for ox in 0..width {
                let p = self.pixel(x + ox as i64, y + oy as i64);
                out.set_pixel(ox, oy, p);
            }
        }
        out
    }

    /// Grow or shrink the bitmap by the given amounts on each side, keeping
    /// existing content in place relative to the old origin.
    pub fn expanded(&self, top: i32, right: i32, bottom: i32, left: i32) -> Bitmap {
        let width = (self.width as i64 + left as i64 + right as i64).max(0) as u32;
        let height = (self.height as i64 + top as i64 + bottom as i64).max(0) as u32;
        self.copy(-(left as i64), -(top as i64), width, height)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argb_bytes() {
        let bytes = [0xff, 0x10, 0x20, 0x30, 0x00, 0x00, 0x00, 0x00];
        let bmp = Bitmap::from_argb_bytes(2, 1, &bytes).unwrap();
        assert_eq!(bmp.pixel(0, 0), 0xff102030);
        assert_eq!(bmp.to_argb_bytes(), bytes.to_vec());
        assert!(Bitmap::from_argb_bytes(3, 1, &bytes).is_none());
    }

    #[test]
    fn test_rgba8_conversion() {
        let bmp = Bitmap::from_rgba8(1, 1, &[0x10, 0x20, 0x30, 0x80]).unwrap();
        assert_eq!(bmp.pixel(0, 0), 0x80102030);
    }

    #[test]
    fn test_opaque_bounds() {
        let mut bmp = Bitmap::new(10, 10);
        assert_eq!(bmp.opaque_bounds(), None);
        bmp.set_pixel(2, 3, 0xff000000);
        bmp.set_pixel(5, 4, 0xff000000);
        assert_eq!(bmp.opaque_bounds(), Some((2, 3, 4, 2)));
    }

    #[test]
    fn test_expanded_keeps_content() {
        let mut bmp = Bitmap::new(2, 2);
        bmp.set_pixel(0, 0, 0xffffffff);
        let grown = bmp.expanded(1, 0, 0, 3);
        assert_eq!((grown.width(), grown.height()), (5, 3));
        assert_eq!(grown.pixel(3, 1), 0xffffffff);
        assert_eq!(grown.pixel(0, 0), 0);
    }
}
