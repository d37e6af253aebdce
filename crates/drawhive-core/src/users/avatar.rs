//! Avatar decoding and identicon generation.

use crate::paint::Bitmap;
use image::{ImageFormat, RgbaImage, imageops::FilterType};
use sha2::{Digest, Sha256};
use std::io::Cursor;

const IDENTICON_GRID: u32 = 5;
const IDENTICON_BACKGROUND: u32 = 0xfff0f0f0;

/// Build the avatar for a joining user.
///
/// A PNG payload is decoded and scaled to `size`x`size`. An empty payload or
/// one that fails to decode falls back to an identicon derived from `name`.
pub fn avatar_for(name: &str, payload: &[u8], size: u32) -> Bitmap {
    if payload.is_empty() {
        return identicon(name, size);
    }
    match decode(payload, size) {
        Ok(avatar) => avatar,
        Err(err) => {
            log::warn!("Could not decode avatar of {name}: {err}");
            identicon(name, size)
        }
    }
}

fn decode(payload: &[u8], size: u32) -> Result<Bitmap, image::ImageError> {
    let mut decoded = image::load_from_memory_with_format(payload, ImageFormat::Png)?;
    if decoded.width() != size || decoded.height() != size {
        decoded = decoded.resize_exact(size, size, FilterType::Triangle);
    }
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(Bitmap::from_rgba8(width, height, rgba.as_raw()).unwrap_or_else(|| blank_avatar(size)))
}

fn blank_avatar(size: u32) -> Bitmap {
    Bitmap::filled(size, size, IDENTICON_BACKGROUND)
}

/// Deterministic symmetric 5x5 pattern derived from the SHA-256 of `name`.
pub fn identicon(name: &str, size: u32) -> Bitmap {
    let digest = Sha256::digest(name.as_bytes());

    // Keep colors in the middle range so they stand out on the background
    let channel = |b: u8| (b / 2 + 48) as u32;
    let color = 0xff000000
        | channel(digest[0]) << 16
        | channel(digest[1]) << 8
        | channel(digest[2]);

    let cell = (size / (IDENTICON_GRID + 1)).max(1);
    let margin = size.saturating_sub(cell * IDENTICON_GRID) / 2;
    let half = IDENTICON_GRID.div_ceil(2);

    let mut out = blank_avatar(size);
    for row in 0..IDENTICON_GRID {
        for col in 0..half {
            let bit = row * half + col;
            let byte = digest[3 + (bit / 8) as usize];
            if byte >> (bit % 8) & 1 == 0 {
                continue;
            }
            let x0 = margin + col * cell;
            let y0 = margin + row * cell;
            for y in y0..y0 + cell {
                for x in x0..x0 + cell {
                    out.set_pixel(x, y, color);
                    if let Some(mirrored) = size.checked_sub(x + 1) {
                        out.set_pixel(mirrored, y, color);
                    }
                }
            }
        }
    }
    out
}

/// Encode a bitmap as PNG, the avatar wire format.
pub fn encode_png(bitmap: &Bitmap) -> Result<Vec<u8>, image::ImageError> {
    let rgba: Vec<u8> = bitmap
        .pixels()
        .iter()
        .flat_map(|p| {
            let [a, r, g, b] = p.to_be_bytes();
            [r, g, b, a]
        })
        .collect();
    let image = RgbaImage::from_raw(bitmap.width(), bitmap.height(), rgba).ok_or_else(|| {
        image::ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::DimensionMismatch,
        ))
    })?;
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
