//! The local user's selection.
//!
//! A selection is a closed shape on the canvas, optionally carrying a pasted
//! image that has not been committed to a layer yet. The canvas model owns
//! at most one selection at a time.

use crate::paint::{BlendMode, Bitmap};
use crate::protocol::{Command, CommandKind, LayerId, UserId};
use kurbo::{BezPath, Point, Rect, Shape, Vec2};

#[derive(Debug, Clone)]
pub struct Selection {
    shape: BezPath,
    paste_image: Option<Bitmap>,
}

impl Selection {
    /// Rectangular selection.
    pub fn from_rect(rect: Rect) -> Self {
        Self {
            shape: rect.to_path(0.1),
            paste_image: None,
        }
    }

    /// Free-form selection. The polygon is closed automatically.
    pub fn from_polygon(points: &[Point]) -> Self {
        let mut shape = BezPath::new();
        if let Some((first, rest)) = points.split_first() {
            shape.move_to(*first);
            for p in rest {
                shape.line_to(*p);
            }
            shape.close_path();
        }
        Self {
            shape,
            paste_image: None,
        }
    }

    /// Selection holding a pasted image centered at `center`.
    pub fn with_image(image: Bitmap, center: Point) -> Self {
        let origin = Point::new(
            (center.x - image.width() as f64 / 2.0).round(),
            (center.y - image.height() as f64 / 2.0).round(),
        );
        let rect = Rect::from_origin_size(origin, (image.width() as f64, image.height() as f64));
        Self {
            shape: rect.to_path(0.1),
            paste_image: Some(image),
        }
    }

    pub fn shape(&self) -> &BezPath {
        &self.shape
    }

    pub fn bounds(&self) -> Rect {
        self.shape.bounding_box()
    }

    pub fn paste_image(&self) -> Option<&Bitmap> {
        self.paste_image.as_ref()
    }

    pub fn contains(&self, point: Point) -> bool {
        self.shape.contains(point)
    }

    /// Move the selection, e.g. after the canvas grew to the left or top.
    pub fn translate(&mut self, offset: Vec2) {
        self.shape.apply_affine(kurbo::Affine::translate(offset));
    }

    /// Integer pixel bounds as `(x, y, width, height)`.
    fn pixel_bounds(&self) -> (i64, i64, u32, u32) {
        let b = self.bounds();
        let x0 = b.x0.floor() as i64;
        let y0 = b.y0.floor() as i64;
        let x1 = b.x1.ceil() as i64;
        let y1 = b.y1.ceil() as i64;
        (x0, y0, (x1 - x0).max(0) as u32, (y1 - y0).max(0) as u32)
    }

    /// Cut the selected pixels out of `source`.
    ///
    /// The result covers the bounding box; pixels outside the shape are
    /// transparent. A pasted image is returned as is.
    pub fn to_image(&self, source: &Bitmap) -> Bitmap {
        if let Some(image) = &self.paste_image {
            return image.clone();
        }
        let (x, y, width, height) = self.pixel_bounds();
        let mut out = source.copy(x, y, width, height);
        for py in 0..height {
            for px in 0..width {
                let center = Point::new(
                    (x + px as i64) as f64 + 0.5,
                    (y + py as i64) as f64 + 0.5,
                );
                if !self.contains(center) {
                    out.set_pixel(px, py, 0);
                }
            }
        }
        out
    }

    /// Command that commits the pasted image to `layer`.
    pub fn paste_command(&self, user: UserId, layer: LayerId) -> Option<Command> {
        let image = self.paste_image.as_ref()?;
        let (x, y, _, _) = self.pixel_bounds();
        // Parts left of or above the canvas are cropped
        let crop_x = (-x).max(0);
        let crop_y = (-y).max(0);
        let width = (image.width() as i64 - crop_x).max(0) as u32;
        let height = (image.height() as i64 - crop_y).max(0) as u32;
        if width == 0 || height == 0 {
            return None;
        }
        let visible = image.copy(crop_x, crop_y, width, height);
        Some(Command::new(
            user,
            CommandKind::PutImage {
                layer,
                mode: BlendMode::Normal,
                x: x.max(0) as u32,
                y: y.max(0) as u32,
                width,
                height,
                pixels: visible.to_argb_bytes(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_bounds_and_translate() {
        let mut sel = Selection::from_rect(Rect::new(1.0, 2.0, 5.0, 6.0));
        assert_eq!(sel.bounds(), Rect::new(1.0, 2.0, 5.0, 6.0));
        sel.translate(Vec2::new(3.0, -1.0));
        assert_eq!(sel.bounds(), Rect::new(4.0, 1.0, 8.0, 5.0));
    }

    #[test]
    fn test_polygon_mask() {
        let source = Bitmap::filled(10, 10, 0xff00ff00);
        let triangle = Selection::from_polygon(&[
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
        ]);
        let cut = triangle.to_image(&source);
        assert_eq!((cut.width(), cut.height()), (10, 10));
        assert_eq!(cut.pixel(1, 1), 0xff00ff00);
        assert_eq!(cut.pixel(9, 9), 0);
    }

    #[test]
    fn test_paste_image_centered() {
        let sel = Selection::with_image(Bitmap::filled(4, 2, 0xffffffff), Point::new(10.0, 10.0));
        assert_eq!(sel.bounds(), Rect::new(8.0, 9.0, 12.0, 11.0));
        let cmd = sel.paste_command(1, 0x0101).unwrap();
        match cmd.kind {
            CommandKind::PutImage {
                x, y, width, height, ..
            } => assert_eq!((x, y, width, height), (8, 9, 4, 2)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_paste_cropped_at_origin() {
        let sel = Selection::with_image(Bitmap::filled(4, 4, 0xffffffff), Point::new(0.0, 0.0));
        let cmd = sel.paste_command(1, 0x0101).unwrap();
        match cmd.kind {
            CommandKind::PutImage {
                x, y, width, height, ..
            } => assert_eq!((x, y, width, height), (0, 0, 2, 2)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(Selection::from_rect(Rect::new(0.0, 0.0, 1.0, 1.0))
            .paste_command(1, 1)
            .is_none());
    }
}
