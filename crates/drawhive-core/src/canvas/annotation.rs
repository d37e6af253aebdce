//! Text annotations floating above the layers.

use crate::protocol::{AnnotationId, annotation_flags};
use kurbo::{Point, Rect};

/// A text box placed on the canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub(crate) id: AnnotationId,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Background color (ARGB).
    pub background: u32,
    /// Protected annotations can only be edited by their owner or operators.
    pub protected: bool,
    /// Rich text content.
    pub text: String,
}

impl Annotation {
    pub fn new(id: AnnotationId, x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            id,
            x,
            y,
            width,
            height,
            background: 0,
            protected: false,
            text: String::new(),
        }
    }

    pub fn id(&self) -> AnnotationId {
        self.id
    }

    pub fn rect(&self) -> Rect {
        Rect::new(
            self.x as f64,
            self.y as f64,
            self.x as f64 + self.width as f64,
            self.y as f64 + self.height as f64,
        )
    }

    pub fn contains(&self, point: Point) -> bool {
        self.rect().contains(point)
    }

    pub fn flags(&self) -> u8 {
        if self.protected {
            annotation_flags::PROTECT
        } else {
            0
        }
    }
}
