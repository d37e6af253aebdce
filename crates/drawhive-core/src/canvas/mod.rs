//! Canvas content: size, background, layers and annotations.
//!
//! [`LayerStack`] is the mutation surface drawing commands act on. It owns
//! *what* changed and in which order; the pixel math itself is delegated to
//! a [`PaintEngine`].

mod annotation;
mod layer;

pub use annotation::Annotation;
pub use layer::Layer;

use crate::paint::{Bitmap, PaintEngine, alpha};
use crate::protocol::{AnnotationId, Command, CommandKind, LayerId, layer_create_flags};
use kurbo::Rect;

/// What applying a command did to the stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StackChange {
    /// Nothing happened (no-op or ignored command).
    Unchanged,
    /// Pixels changed within this region.
    Pixels(Rect),
    /// The canvas was resized. Existing content moved by the offset.
    Resized { offset_x: i32, offset_y: i32 },
    /// Background color changed.
    Background,
    /// Layers were added, removed, reordered or had attributes changed.
    Layers,
    /// Annotations changed.
    Annotations,
}

/// The complete canvas content.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerStack {
    width: u32,
    height: u32,
    /// Background color (ARGB).
    background: u32,
    /// Layers from bottom to top.
    layers: Vec<Layer>,
    annotations: Vec<Annotation>,
}

impl LayerStack {
    /// Create an empty, zero-sized canvas.
    pub fn new() -> Self {
        Self::default()
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

    pub fn background(&self) -> u32 {
        self.background
    }

    /// Layers from bottom to top.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    fn layer_index(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    fn annotation_mut(&mut self, id: AnnotationId) -> Option<&mut Annotation> {
        self.annotations.iter_mut().find(|a| a.id == id)
    }

    /// Whether saving this canvas needs a format that keeps layers apart.
    pub fn needs_multi_layer_format(&self) -> bool {
        self.layers.len() > 1
            || !self.annotations.is_empty()
            || self.layers.iter().any(|l| !l.has_default_attributes())
    }

    /// Apply a drawing command.
    ///
    /// Commands referencing layers or annotations that do not exist are
    /// ignored with a warning, which keeps replay total.
    pub fn apply(&mut self, engine: &dyn PaintEngine, cmd: &Command) -> StackChange {
        match &cmd.kind {
            CommandKind::CanvasResize {
                top,
                right,
                bottom,
                left,
            } => self.resize(*top, *right, *bottom, *left),

            CommandKind::CanvasBackground { color } => {
                self.background = *color;
                StackChange::Background
            }

            CommandKind::LayerCreate {
                layer,
                source,
                fill,
                flags,
                title,
            } => self.create_layer(*layer, *source, *fill, *flags, title),

            CommandKind::LayerAttributes {
                layer,
                flags,
                opacity,
                blend,
            } => match self.layer_mut(*layer) {
                Some(target) => {
                    target.set_flags(*flags);
                    target.opacity = *opacity;
                    target.blend = *blend;
                    StackChange::Layers
                }
                None => missing_layer(cmd, *layer),
            },

            CommandKind::LayerRetitle { layer, title } => match self.layer_mut(*layer) {
                Some(target) => {
                    target.title = title.clone();
                    StackChange::Layers
                }
                None => missing_layer(cmd, *layer),
            },

            CommandKind::LayerOrder { order } => self.reorder(order),

            CommandKind::LayerDelete { layer, merge } => self.delete_layer(engine, cmd, *layer, *merge),

            CommandKind::PutImage {
                layer,
                mode,
                x,
                y,
                width,
                height,
                pixels,
            } => {
                let Some(image) = Bitmap::from_argb_bytes(*width, *height, pixels) else {
                    log::warn!(
                        "PutImage from user {}: {} bytes do not match {}x{}",
                        cmd.context_id,
                        pixels.len(),
                        width,
                        height
                    );
                    return StackChange::Unchanged;
                };
                match self.layer_mut(*layer) {
                    Some(target) => engine
                        .put_image(&mut target.pixels, *x as i64, *y as i64, &image, *mode, 255)
                        .map_or(StackChange::Unchanged, StackChange::Pixels),
                    None => missing_layer(cmd, *layer),
                }
            }

            CommandKind::FillRect {
                layer,
                mode,
                x,
                y,
                width,
                height,
                color,
            } => match self.layer_mut(*layer) {
                Some(target) => engine
                    .fill_rect(&mut target.pixels, (*x, *y, *width, *height), *color, *mode)
                    .map_or(StackChange::Unchanged, StackChange::Pixels),
                None => missing_layer(cmd, *layer),
            },

            CommandKind::DrawDabs {
                layer,
                x,
                y,
                color,
                mode,
                dabs,
            } => match self.layer_mut(*layer) {
                Some(target) => engine
                    .draw_dabs(&mut target.pixels, *x, *y, *color, *mode, dabs)
                    .map_or(StackChange::Unchanged, StackChange::Pixels),
                None => missing_layer(cmd, *layer),
            },

            CommandKind::AnnotationCreate {
                id,
                x,
                y,
                width,
                height,
            } => {
                if self.annotation(*id).is_some() {
                    log::warn!("Annotation {id:#06x} already exists");
                    return StackChange::Unchanged;
                }
                self.annotations
                    .push(Annotation::new(*id, *x, *y, *width, *height));
                StackChange::Annotations
            }

            CommandKind::AnnotationReshape {
                id,
                x,
                y,
                width,
                height,
            } => match self.annotation_mut(*id) {
                Some(a) => {
                    a.x = *x;
                    a.y = *y;
                    a.width = *width;
                    a.height = *height;
                    StackChange::Annotations
                }
                None => missing_annotation(*id),
            },

            CommandKind::AnnotationEdit {
                id,
                background,
                flags,
                text,
            } => match self.annotation_mut(*id) {
                Some(a) => {
                    a.background = *background;
                    a.protected = flags & crate::protocol::annotation_flags::PROTECT != 0;
                    a.text = text.clone();
                    StackChange::Annotations
                }
                None => missing_annotation(*id),
            },

            CommandKind::AnnotationDelete { id } => {
                let before = self.annotations.len();
                self.annotations.retain(|a| a.id != *id);
                if self.annotations.len() == before {
                    missing_annotation(*id)
                } else {
                    StackChange::Annotations
                }
            }

            // Stroke boundaries and undo requests carry no content of their own
            CommandKind::PenUp | CommandKind::Undo { .. } => StackChange::Unchanged,

            other => {
                log::warn!("{} is not a drawing command", other.name());
                StackChange::Unchanged
            }
        }
    }

    fn resize(&mut self, top: i32, right: i32, bottom: i32, left: i32) -> StackChange {
        let width = self.width as i64 + left as i64 + right as i64;
        let height = self.height as i64 + top as i64 + bottom as i64;
        if width <= 0 || height <= 0 || width > u32::MAX as i64 || height > u32::MAX as i64 {
            log::warn!("Ignoring resize to invalid size {width}x{height}");
            return StackChange::Unchanged;
        }
        if top == 0 && right == 0 && bottom == 0 && left == 0 {
            return StackChange::Unchanged;
        }

        self.width = width as u32;
        self.height = height as u32;
        for layer in &mut self.layers {
            layer.pixels = layer.pixels.expanded(top, right, bottom, left);
        }
        for a in &mut self.annotations {
            a.x = a.x.saturating_add(left);
            a.y = a.y.saturating_add(top);
        }

        StackChange::Resized {
            offset_x: left,
            offset_y: top,
        }
    }

    fn create_layer(
        &mut self,
        id: LayerId,
        source: LayerId,
        fill: u32,
        flags: u8,
        title: &str,
    ) -> StackChange {
        if self.layer(id).is_some() {
            log::warn!("Layer {id:#06x} already exists");
            return StackChange::Unchanged;
        }

        let source_index = if source != 0 {
            self.layer_index(source)
        } else {
            None
        };

        let layer = match source_index {
            Some(index) if flags & layer_create_flags::COPY != 0 => {
                let mut copy = self.layers[index].clone();
                copy.id = id;
                copy.title = title.to_string();
                copy
            }
            _ => Layer::new(id, title, self.width, self.height, fill),
        };

        match source_index {
            Some(index) if flags & layer_create_flags::INSERT != 0 => {
                self.layers.insert(index + 1, layer)
            }
            _ => self.layers.push(layer),
        }
        StackChange::Layers
    }

    /// Reorder layers bottom to top. Unknown ids are skipped. Layers missing
    /// from `order` keep their relative order above the listed ones.
    fn reorder(&mut self, order: &[LayerId]) -> StackChange {
        let mut remaining = std::mem::take(&mut self.layers);
        let mut reordered = Vec::with_capacity(remaining.len());
        for id in order {
            if let Some(pos) = remaining.iter().position(|l| l.id == *id) {
                reordered.push(remaining.remove(pos));
            }
        }
        reordered.append(&mut remaining);
        self.layers = reordered;
        StackChange::Layers
    }

    fn delete_layer(
        &mut self,
        engine: &dyn PaintEngine,
        cmd: &Command,
        id: LayerId,
        merge: bool,
    ) -> StackChange {
        let Some(index) = self.layer_index(id) else {
            return missing_layer(cmd, id);
        };
        let removed = self.layers.remove(index);
        if merge {
            if index == 0 {
                log::warn!("Layer {id:#06x} has nothing below it to merge into");
            } else {
                let below = &mut self.layers[index - 1];
                engine.composite(&mut below.pixels, &removed.pixels, removed.opacity, removed.blend);
            }
        }
        StackChange::Layers
    }

    /// Topmost layer with a visible pixel at the given position.
    pub fn layer_at(&self, x: i32, y: i32) -> Option<LayerId> {
        self.layers
            .iter()
            .rev()
            .find(|l| l.opacity > 0 && alpha(l.pixels.pixel(x as i64, y as i64)) > 0)
            .map(|l| l.id)
    }

    /// Composite every layer onto the background.
    pub fn flatten(&self, engine: &dyn PaintEngine) -> Bitmap {
        let mut out = Bitmap::filled(self.width, self.height, self.background);
        for layer in &self.layers {
            engine.composite(&mut out, &layer.pixels, layer.opacity, layer.blend);
        }
        out
    }

    /// Average color of a `diameter` wide square centered at `(x, y)`.
    ///
    /// Samples `layer` when given, otherwise the flattened image. Averaging
    /// is weighted by alpha so transparent pixels do not darken the result.
    pub fn color_at(
        &self,
        engine: &dyn PaintEngine,
        x: i32,
        y: i32,
        layer: Option<LayerId>,
        diameter: u32,
    ) -> Option<u32> {
        let flattened;
        let source = match layer {
            Some(id) => &self.layer(id)?.pixels,
            None => {
                flattened = self.flatten(engine);
                &flattened
            }
        };
        Some(average_color(source, x, y, diameter))
    }
}

fn average_color(source: &Bitmap, x: i32, y: i32, diameter: u32) -> u32 {
    if diameter <= 1 {
        return source.pixel(x as i64, y as i64);
    }
    let radius = (diameter / 2) as i64;
    let (mut a, mut r, mut g, mut b, mut n) = (0u64, 0u64, 0u64, 0u64, 0u64);
    for py in y as i64 - radius..=y as i64 + radius {
        for px in x as i64 - radius..=x as i64 + radius {
            let [pa, pr, pg, pb] = source.pixel(px, py).to_be_bytes();
            let pa = pa as u64;
            a += pa;
            r += pr as u64 * pa;
            g += pg as u64 * pa;
            b += pb as u64 * pa;
            n += 1;
        }
    }
    if a == 0 {
        return 0;
    }
    let ch = |sum: u64| (sum / a) as u8;
    u32::from_be_bytes([(a / n) as u8, ch(r), ch(g), ch(b)])
}

fn missing_layer(cmd: &Command, layer: LayerId) -> StackChange {
    log::warn!(
        "{} from user {}: layer {layer:#06x} not found",
        cmd.name(),
        cmd.context_id
    );
    StackChange::Unchanged
}

fn missing_annotation(id: AnnotationId) -> StackChange {
    log::warn!("Annotation {id:#06x} not found");
    StackChange::Unchanged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::{BlendMode, SoftwareEngine};

    fn cmd(kind: CommandKind) -> Command {
        Command::new(1, kind)
    }

    fn sized(w: i32, h: i32) -> LayerStack {
        let mut stack = LayerStack::new();
        stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::CanvasResize {
                top: 0,
                right: w,
                bottom: h,
                left: 0,
            }),
        );
        stack
    }

    fn create(stack: &mut LayerStack, id: LayerId, fill: u32) {
        stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::LayerCreate {
                layer: id,
                source: 0,
                fill,
                flags: 0,
                title: format!("Layer {id}"),
            }),
        );
    }

    #[test]
    fn test_resize_moves_content() {
        let mut stack = sized(4, 4);
        create(&mut stack, 0x0101, 0);
        stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::FillRect {
                layer: 0x0101,
                mode: BlendMode::Normal,
                x: 0,
                y: 0,
                width: 1,
                height: 1,
                color: 0xffff0000,
            }),
        );
        let change = stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::CanvasResize {
                top: 2,
                right: 0,
                bottom: 0,
                left: 3,
            }),
        );
        assert_eq!(
            change,
            StackChange::Resized {
                offset_x: 3,
                offset_y: 2
            }
        );
        assert_eq!((stack.width(), stack.height()), (7, 6));
        assert_eq!(stack.layer(0x0101).unwrap().pixels().pixel(3, 2), 0xffff0000);
    }

    #[test]
    fn test_invalid_resize_ignored() {
        let mut stack = sized(4, 4);
        let change = stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::CanvasResize {
                top: 0,
                right: -4,
                bottom: 0,
                left: 0,
            }),
        );
        assert_eq!(change, StackChange::Unchanged);
        assert_eq!(stack.width(), 4);
    }

    #[test]
    fn test_layer_create_copy_and_insert() {
        let mut stack = sized(2, 2);
        create(&mut stack, 0x0101, 0xff00ff00);
        create(&mut stack, 0x0102, 0);
        stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::LayerCreate {
                layer: 0x0103,
                source: 0x0101,
                fill: 0,
                flags: layer_create_flags::COPY | layer_create_flags::INSERT,
                title: "Copy".into(),
            }),
        );
        let ids: Vec<_> = stack.layers().iter().map(|l| l.id()).collect();
        assert_eq!(ids, vec![0x0101, 0x0103, 0x0102]);
        assert_eq!(stack.layer(0x0103).unwrap().pixels().pixel(1, 1), 0xff00ff00);
        assert_eq!(stack.layer(0x0103).unwrap().title, "Copy");
    }

    #[test]
    fn test_duplicate_layer_ignored() {
        let mut stack = sized(2, 2);
        create(&mut stack, 0x0101, 0);
        create(&mut stack, 0x0101, 0xffffffff);
        assert_eq!(stack.layers().len(), 1);
        assert_eq!(stack.layer(0x0101).unwrap().pixels().pixel(0, 0), 0);
    }

    #[test]
    fn test_reorder() {
        let mut stack = sized(2, 2);
        for id in [1, 2, 3] {
            create(&mut stack, id, 0);
        }
        stack.apply(&SoftwareEngine, &cmd(CommandKind::LayerOrder { order: vec![3, 99, 1] }));
        let ids: Vec<_> = stack.layers().iter().map(|l| l.id()).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_merge_delete() {
        let mut stack = sized(2, 2);
        create(&mut stack, 1, 0);
        create(&mut stack, 2, 0xff0000ff);
        stack.apply(&SoftwareEngine, &cmd(CommandKind::LayerDelete { layer: 2, merge: true }));
        assert_eq!(stack.layers().len(), 1);
        assert_eq!(stack.layer(1).unwrap().pixels().pixel(0, 0), 0xff0000ff);
    }

    #[test]
    fn test_missing_layer_is_ignored() {
        let mut stack = sized(2, 2);
        let before = stack.clone();
        let change = stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::FillRect {
                layer: 7,
                mode: BlendMode::Normal,
                x: 0,
                y: 0,
                width: 2,
                height: 2,
                color: 0xffffffff,
            }),
        );
        assert_eq!(change, StackChange::Unchanged);
        assert_eq!(stack, before);
    }

    #[test]
    fn test_put_image_size_mismatch() {
        let mut stack = sized(2, 2);
        create(&mut stack, 1, 0);
        let change = stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::PutImage {
                layer: 1,
                mode: BlendMode::Replace,
                x: 0,
                y: 0,
                width: 2,
                height: 2,
                pixels: vec![0; 3],
            }),
        );
        assert_eq!(change, StackChange::Unchanged);
    }

    #[test]
    fn test_annotations() {
        let mut stack = sized(10, 10);
        stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::AnnotationCreate {
                id: 0x0101,
                x: 1,
                y: 1,
                width: 5,
                height: 5,
            }),
        );
        stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::AnnotationEdit {
                id: 0x0101,
                background: 0xffffffff,
                flags: crate::protocol::annotation_flags::PROTECT,
                text: "hello".into(),
            }),
        );
        let a = stack.annotation(0x0101).unwrap();
        assert_eq!(a.text, "hello");
        assert!(a.protected);
        assert!(stack.needs_multi_layer_format());

        stack.apply(&SoftwareEngine, &cmd(CommandKind::AnnotationDelete { id: 0x0101 }));
        assert!(stack.annotations().is_empty());
    }

    #[test]
    fn test_resize_saturates_annotation_position() {
        let mut stack = sized(4, 4);
        stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::AnnotationCreate {
                id: 0x0101,
                x: i32::MAX - 2,
                y: i32::MIN + 1,
                width: 5,
                height: 5,
            }),
        );
        let change = stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::CanvasResize {
                top: -2,
                right: 0,
                bottom: 4,
                left: 8,
            }),
        );
        assert_eq!(
            change,
            StackChange::Resized {
                offset_x: 8,
                offset_y: -2
            }
        );
        let a = stack.annotation(0x0101).unwrap();
        assert_eq!((a.x, a.y), (i32::MAX, i32::MIN));
    }

    #[test]
    fn test_layer_at_and_color_at() {
        let mut stack = sized(4, 4);
        stack.apply(&SoftwareEngine, &cmd(CommandKind::CanvasBackground { color: 0xffffffff }));
        create(&mut stack, 1, 0xff0000ff);
        create(&mut stack, 2, 0);
        stack.apply(
            &SoftwareEngine,
            &cmd(CommandKind::FillRect {
                layer: 2,
                mode: BlendMode::Normal,
                x: 2,
                y: 2,
                width: 2,
                height: 2,
                color: 0xffff0000,
            }),
        );

        assert_eq!(stack.layer_at(3, 3), Some(2));
        assert_eq!(stack.layer_at(0, 0), Some(1));
        assert_eq!(stack.color_at(&SoftwareEngine, 3, 3, None, 1), Some(0xffff0000));
        assert_eq!(stack.color_at(&SoftwareEngine, 0, 0, Some(1), 1), Some(0xff0000ff));
        assert_eq!(stack.color_at(&SoftwareEngine, 0, 0, Some(9), 1), None);
    }
}
