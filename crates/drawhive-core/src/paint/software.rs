//! Reference software implementation of [`PaintEngine`].

use super::{BlendMode, Bitmap, PaintEngine};
use crate::protocol::ClassicDab;
use kurbo::Rect;

/// Straightforward per-pixel compositor working on non-premultiplied ARGB.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareEngine;

impl SoftwareEngine {
    pub fn new() -> Self {
        Self
    }
}

fn channels(argb: u32) -> [f32; 4] {
    let [a, r, g, b] = argb.to_be_bytes();
    [
        a as f32 / 255.0,
        r as f32 / 255.0,
        g as f32 / 255.0,
        b as f32 / 255.0,
    ]
}

fn pack([a, r, g, b]: [f32; 4]) -> u32 {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    if q(a) == 0 {
        return 0;
    }
    u32::from_be_bytes([q(a), q(r), q(g), q(b)])
}

/// Separable blend function applied per color channel.
fn blend_channel(mode: BlendMode, src: f32, dst: f32) -> f32 {
    match mode {
        BlendMode::Multiply => src * dst,
        BlendMode::Divide => {
            if src <= 0.0 {
                1.0
            } else {
                (dst / src).min(1.0)
            }
        }
        BlendMode::Burn => {
            if src <= 0.0 {
                0.0
            } else {
                1.0 - ((1.0 - dst) / src).min(1.0)
            }
        }
        BlendMode::Dodge => {
            if src >= 1.0 {
                1.0
            } else {
                (dst / (1.0 - src)).min(1.0)
            }
        }
        BlendMode::Darken => src.min(dst),
        BlendMode::Lighten => src.max(dst),
        BlendMode::Subtract => (dst - src).max(0.0),
        BlendMode::Add => (dst + src).min(1.0),
        _ => src,
    }
}

/// Blend one source pixel onto one destination pixel with the given
/// coverage (0..=1).
pub(crate) fn blend_pixel(dst: u32, src: u32, coverage: f32, mode: BlendMode) -> u32 {
    if coverage <= 0.0 {
        return dst;
    }
    let d = channels(dst);
    let s = channels(src);
    let sa = s[0] * coverage;

    match mode {
        BlendMode::Erase => {
            let a = d[0] * (1.0 - sa);
            pack([a, d[1], d[2], d[3]])
        }
        BlendMode::ColorErase => {
            let diff = (1..4).map(|i| (s[i] - d[i]).abs()).fold(0.0, f32::max);
            let a = d[0] * (1.0 - sa * (1.0 - diff));
            pack([a, d[1], d[2], d[3]])
        }
        BlendMode::Replace => {
            let mix = |i: usize| d[i] + (s[i] - d[i]) * coverage;
            pack([mix(0), mix(1), mix(2), mix(3)])
        }
        BlendMode::Recolor => {
            let mix = |i: usize| d[i] + (s[i] - d[i]) * sa;
            pack([d[0], mix(1), mix(2), mix(3)])
        }
        BlendMode::Behind => {
            let out_a = d[0] + sa * (1.0 - d[0]);
            if out_a <= 0.0 {
                return 0;
            }
            let c = |i: usize| (d[i] * d[0] + s[i] * sa * (1.0 - d[0])) / out_a;
            pack([out_a, c(1), c(2), c(3)])
        }
        _ => {
            let out_a = sa + d[0] * (1.0 - sa);
            if out_a <= 0.0 {
                return 0;
            }
            let c = |i: usize| {
                let blended = (1.0 - d[0]) * s[i] + d[0] * blend_channel(mode, s[i], d[i]);
                (sa * blended + d[0] * (1.0 - sa) * d[i]) / out_a
            };
            pack([out_a, c(1), c(2), c(3)])
        }
    }
}

fn union(acc: Option<Rect>, r: Rect) -> Option<Rect> {
    Some(match acc {
        Some(a) => a.union(r),
        None => r,
    })
}

impl PaintEngine for SoftwareEngine {
    fn fill_rect(
        &self,
        target: &mut Bitmap,
        (x, y, width, height): (u32, u32, u32, u32),
        color: u32,
        mode: BlendMode,
    ) -> Option<Rect> {
        let x1 = x.saturating_add(width).min(target.width());
        let y1 = y.saturating_add(height).min(target.height());
        if x >= x1 || y >= y1 {
            return None;
        }
        for py in y..y1 {
            for px in x..x1 {
                let dst = target.pixel(px as i64, py as i64);
                target.set_pixel(px, py, blend_pixel(dst, color, 1.0, mode));
            }
        }
        Some(Rect::new(x as f64, y as f64, x1 as f64, y1 as f64))
    }

    fn put_image(
        &self,
        target: &mut Bitmap,
        x: i64,
        y: i64,
        image: &Bitmap,
        mode: BlendMode,
        opacity: u8,
    ) -> Option<Rect> {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + image.width() as i64).min(target.width() as i64);
        let y1 = (y + image.height() as i64).min(target.height() as i64);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        let coverage = opacity as f32 / 255.0;
        for py in y0..y1 {
            for px in x0..x1 {
                let src = image.pixel(px - x, py - y);
                let dst = target.pixel(px, py);
                target.set_pixel(px as u32, py as u32, blend_pixel(dst, src, coverage, mode));
            }
        }
        Some(Rect::new(x0 as f64, y0 as f64, x1 as f64, y1 as f64))
    }

    fn draw_dabs(
        &self,
        target: &mut Bitmap,
        x: i32,
        y: i32,
        color: u32,
        mode: BlendMode,
        dabs: &[ClassicDab],
    ) -> Option<Rect> {
        let mut changed = None;
        let (mut cx, mut cy) = (x as i64, y as i64);

        for dab in dabs {
            cx += dab.x as i64;
            cy += dab.y as i64;

            let radius = (dab.size.max(1) as f32) / 2.0;
            let hardness = dab.hardness as f32 / 255.0;
            let opacity = dab.opacity as f32 / 255.0;
            let reach = radius.ceil() as i64;

            let x0 = (cx - reach).max(0);
            let y0 = (cy - reach).max(0);
            let x1 = (cx + reach + 1).min(target.width() as i64);
            let y1 = (cy + reach + 1).min(target.height() as i64);
            if x0 >= x1 || y0 >= y1 {
                continue;
            }

            for py in y0..y1 {
                for px in x0..x1 {
                    let dx = px as f32 + 0.5 - (cx as f32 + 0.5);
                    let dy = py as f32 + 0.5 - (cy as f32 + 0.5);
                    let dist = (dx * dx + dy * dy).sqrt() / radius;
                    if dist > 1.0 {
                        continue;
                    }
                    let falloff = if dist <= hardness || hardness >= 1.0 {
                        1.0
                    } else {
                        1.0 - (dist - hardness) / (1.0 - hardness)
                    };
                    let dst = target.pixel(px, py);
                    target.set_pixel(
                        px as u32,
                        py as u32,
                        blend_pixel(dst, color, falloff * opacity, mode),
                    );
                }
            }
            changed = union(changed, Rect::new(x0 as f64, y0 as f64, x1 as f64, y1 as f64));
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_over_transparent() {
        assert_eq!(blend_pixel(0, 0xff112233, 1.0, BlendMode::Normal), 0xff112233);
    }

    #[test]
    fn test_erase() {
        assert_eq!(blend_pixel(0xff112233, 0xff000000, 1.0, BlendMode::Erase), 0);
        let half = blend_pixel(0xff112233, 0xff000000, 0.5, BlendMode::Erase);
        assert_eq!(half >> 24, 0x80);
    }

    #[test]
    fn test_behind_keeps_opaque_destination() {
        assert_eq!(blend_pixel(0xff0000ff, 0xffff0000, 1.0, BlendMode::Behind), 0xff0000ff);
    }

    #[test]
    fn test_multiply() {
        let out = blend_pixel(0xff808080, 0xff808080, 1.0, BlendMode::Multiply);
        assert_eq!(out, 0xff404040);
    }

    #[test]
    fn test_fill_rect_clips() {
        let mut bmp = Bitmap::new(4, 4);
        let engine = SoftwareEngine::new();
        let area = engine.fill_rect(&mut bmp, (2, 2, 10, 10), 0xffffffff, BlendMode::Normal);
        assert_eq!(area, Some(Rect::new(2.0, 2.0, 4.0, 4.0)));
        assert_eq!(bmp.pixel(3, 3), 0xffffffff);
        assert_eq!(bmp.pixel(1, 1), 0);
        assert_eq!(engine.fill_rect(&mut bmp, (5, 5, 1, 1), 0xffffffff, BlendMode::Normal), None);
    }

    #[test]
    fn test_hard_dab() {
        let mut bmp = Bitmap::new(20, 20);
        let engine = SoftwareEngine::new();
        let dab = ClassicDab {
            x: 0,
            y: 0,
            size: 6,
            hardness: 255,
            opacity: 255,
        };
        let area = engine.draw_dabs(&mut bmp, 10, 10, 0xff000000, BlendMode::Normal, &[dab]);
        assert!(area.is_some());
        assert_eq!(bmp.pixel(10, 10), 0xff000000);
        assert_eq!(bmp.pixel(0, 0), 0);
    }

    #[test]
    fn test_dabs_are_deterministic() {
        let engine = SoftwareEngine::new();
        let dabs: Vec<ClassicDab> = (0..8)
            .map(|i| ClassicDab {
                x: 2,
                y: i % 3 - 1,
                size: 5 + i as u16,
                hardness: 100,
                opacity: 180,
            })
            .collect();
        let mut a = Bitmap::new(40, 40);
        let mut b = Bitmap::new(40, 40);
        engine.draw_dabs(&mut a, 5, 20, 0xff3366aa, BlendMode::Normal, &dabs);
        engine.draw_dabs(&mut b, 5, 20, 0xff3366aa, BlendMode::Normal, &dabs);
        assert_eq!(a, b);
    }
}
