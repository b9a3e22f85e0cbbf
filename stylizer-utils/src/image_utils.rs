use anyhow::{Context, Result};
use image::RgbaImage;
use rayon::prelude::*;

/// Row-major 2x3 mapping from destination pixel coordinates to source pixel coordinates.
///
/// Coordinates are continuous with pixel `(i, j)` covering `[i, i + 1) x [j, j + 1)`, so the
/// centre of the destination pixel is fed in as `(i + 0.5, j + 0.5)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelAffine {
    pub m: [f32; 6],
}

impl PixelAffine {
    pub const IDENTITY: PixelAffine = PixelAffine {
        m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
    };

    pub const fn new(m: [f32; 6]) -> Self {
        Self { m }
    }

    /// Map a destination coordinate into the source image.
    #[inline]
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.m;
        (
            m[0].mul_add(x, m[1].mul_add(y, m[2])),
            m[3].mul_add(x, m[4].mul_add(y, m[5])),
        )
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().all(|v| v.is_finite())
    }
}

/// Bilinear sample at continuous source coordinate `(sx, sy)` with a transparent-black border.
///
/// Neighbours that fall outside the image contribute zero, so samples near the edge fade out
/// instead of smearing the border pixels.
pub fn sample_bilinear_zero(src: &RgbaImage, sx: f32, sy: f32) -> [u8; 4] {
    let (width, height) = (src.width() as i64, src.height() as i64);
    let fx = sx - 0.5;
    let fy = sy - 0.5;
    // Bounds the integer casts below.
    if !(fx >= -1.0 && fy >= -1.0 && fx < width as f32 && fy < height as f32) {
        return [0; 4];
    }
    let x0f = fx.floor();
    let y0f = fy.floor();
    let tx = fx - x0f;
    let ty = fy - y0f;
    let (x0, y0) = (x0f as i64, y0f as i64);

    let mut acc = [0.0f32; 4];
    for (dy, wy) in [(0, 1.0 - ty), (1, ty)] {
        let y = y0 + dy;
        if wy == 0.0 || y < 0 || y >= height {
            continue;
        }
        for (dx, wx) in [(0, 1.0 - tx), (1, tx)] {
            let x = x0 + dx;
            if wx == 0.0 || x < 0 || x >= width {
                continue;
            }
            let weight = wx * wy;
            let pixel = src.get_pixel(x as u32, y as u32).0;
            for (slot, value) in acc.iter_mut().zip(pixel) {
                *slot = (value as f32).mul_add(weight, *slot);
            }
        }
    }
    acc.map(|v| v.round().clamp(0.0, 255.0) as u8)
}

/// Warp `src` into a new `out_width x out_height` image using `mapping` (destination → source).
///
/// Pixels whose sample falls outside `src` become transparent black. Rows are filled in parallel.
pub fn warp_affine_rgba(
    src: &RgbaImage,
    mapping: &PixelAffine,
    out_width: u32,
    out_height: u32,
) -> Result<RgbaImage> {
    anyhow::ensure!(
        out_width > 0 && out_height > 0,
        "warp output dimensions must be non-zero (got {out_width}x{out_height})"
    );
    anyhow::ensure!(mapping.is_finite(), "warp mapping contains non-finite values");

    let row_len = out_width as usize * 4;
    let mut buffer = vec![0u8; row_len * out_height as usize];
    if src.width() > 0 && src.height() > 0 {
        buffer
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| {
                let dy = y as f32 + 0.5;
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let (sx, sy) = mapping.apply(x as f32 + 0.5, dy);
                    px.copy_from_slice(&sample_bilinear_zero(src, sx, sy));
                }
            });
    }

    RgbaImage::from_raw(out_width, out_height, buffer)
        .context("warp output buffer does not match requested dimensions")
}
