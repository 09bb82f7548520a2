//! Face canonicalization — crop, resize, lighting normalization, smoothing.
//!
//! Turns a detected face rectangle into a fixed-size [`FaceTemplate`] that is
//! comparable across enrollment and probe images. Every step is deterministic
//! and side-effect-free: identical inputs always produce identical templates.

use crate::types::{FaceRect, FaceTemplate};
use image::GrayImage;
use thiserror::Error;

/// Margin added around the detector rectangle before cropping, in pixels.
pub const PADDING: f32 = 10.0;
/// Side length of the canonical square template.
pub const CANONICAL_SIZE: u32 = 150;

#[derive(Error, Debug)]
pub enum CanonicalizeError {
    #[error("face rectangle is degenerate after clamping to image bounds")]
    NoFaceRegion,
}

/// Canonicalize a detected face region into a [`FaceTemplate`].
///
/// Steps, in order: expand the rectangle by [`PADDING`] on all sides and
/// clamp to image bounds; crop; resize to [`CANONICAL_SIZE`]² with bilinear
/// interpolation; full-range histogram equalization; 3×3 Gaussian smoothing.
pub fn canonicalize(image: &GrayImage, rect: &FaceRect) -> Result<FaceTemplate, CanonicalizeError> {
    let (img_w, img_h) = image.dimensions();

    let x0 = (rect.x - PADDING).floor().max(0.0) as u32;
    let y0 = (rect.y - PADDING).floor().max(0.0) as u32;
    let x1 = ((rect.x + rect.width + PADDING).ceil().max(0.0) as u32).min(img_w);
    let y1 = ((rect.y + rect.height + PADDING).ceil().max(0.0) as u32).min(img_h);

    if x0 >= x1 || y0 >= y1 {
        return Err(CanonicalizeError::NoFaceRegion);
    }

    let region_w = x1 - x0;
    let region_h = y1 - y0;
    let stride = img_w as usize;
    let src = image.as_raw();

    let mut region = Vec::with_capacity((region_w * region_h) as usize);
    for y in y0..y1 {
        let row = y as usize * stride;
        region.extend_from_slice(&src[row + x0 as usize..row + x1 as usize]);
    }

    let mut canonical = resize_bilinear(&region, region_w, region_h, CANONICAL_SIZE, CANONICAL_SIZE);
    equalize_histogram(&mut canonical);
    let smoothed = gaussian_smooth(&canonical, CANONICAL_SIZE, CANONICAL_SIZE);

    Ok(FaceTemplate::new(CANONICAL_SIZE, smoothed))
}

/// Resize a grayscale buffer with bilinear interpolation.
pub(crate) fn resize_bilinear(
    src: &[u8],
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
) -> Vec<u8> {
    let (sw, sh) = (src_w as usize, src_h as usize);
    let (dw, dh) = (dst_w as usize, dst_h as usize);
    let scale_x = sw as f32 / dw as f32;
    let scale_y = sh as f32 / dh as f32;

    let mut dst = vec![0u8; dw * dh];
    for y in 0..dh {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, sh as i32 - 1) as usize;
        let y1 = (y0 + 1).min(sh - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..dw {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, sw as i32 - 1) as usize;
            let x1 = (x0 + 1).min(sw - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * sw + x0] as f32;
            let tr = src[y0 * sw + x1] as f32;
            let bl = src[y1 * sw + x0] as f32;
            let br = src[y1 * sw + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            dst[y * dw + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    dst
}

/// Full-range histogram equalization in-place via CDF remap.
///
/// Stretches the intensity distribution over 0–255 to reduce lighting
/// variance between enrollment photos and probe snapshots.
pub(crate) fn equalize_histogram(gray: &mut [u8]) {
    if gray.is_empty() {
        return;
    }

    let mut hist = [0u32; 256];
    for &p in gray.iter() {
        hist[p as usize] += 1;
    }

    let mut cdf = [0f32; 256];
    cdf[0] = hist[0] as f32;
    for i in 1..256 {
        cdf[i] = cdf[i - 1] + hist[i] as f32;
    }

    let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
    let denom = gray.len() as f32 - cdf_min;
    if denom <= 0.0 {
        // Single-intensity image: nothing to stretch.
        return;
    }

    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((cdf[i] - cdf_min) / denom * 255.0).clamp(0.0, 255.0).round() as u8;
    }

    for p in gray.iter_mut() {
        *p = lut[*p as usize];
    }
}

/// 3×3 Gaussian smoothing pass (kernel 1-2-1 ⊗ 1-2-1, normalized by 16).
///
/// Suppresses sensor noise ahead of pixel-level comparison. Edges are
/// clamp-padded.
pub(crate) fn gaussian_smooth(src: &[u8], width: u32, height: u32) -> Vec<u8> {
    const KERNEL: [[u32; 3]; 3] = [[1, 2, 1], [2, 4, 2], [1, 2, 1]];

    let w = width as usize;
    let h = height as usize;
    let mut dst = vec![0u8; w * h];

    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for (ky, row) in KERNEL.iter().enumerate() {
                let sy = (y as i32 + ky as i32 - 1).clamp(0, h as i32 - 1) as usize;
                for (kx, &weight) in row.iter().enumerate() {
                    let sx = (x as i32 + kx as i32 - 1).clamp(0, w as i32 - 1) as usize;
                    acc += weight * src[sy * w + sx] as u32;
                }
            }
            dst[y * w + x] = ((acc + 8) / 16) as u8;
        }
    }

    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| image::Luma([((x + y) % 256) as u8]))
    }

    #[test]
    fn test_canonicalize_output_shape() {
        let img = gradient_image(200, 200);
        let rect = FaceRect { x: 50.0, y: 50.0, width: 80.0, height: 80.0 };
        let template = canonicalize(&img, &rect).unwrap();
        assert_eq!(template.size(), CANONICAL_SIZE);
        assert!(template.is_well_formed());
    }

    #[test]
    fn test_canonicalize_deterministic() {
        let img = gradient_image(200, 200);
        let rect = FaceRect { x: 30.0, y: 40.0, width: 100.0, height: 90.0 };
        let a = canonicalize(&img, &rect).unwrap();
        let b = canonicalize(&img, &rect).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonicalize_zero_size_rect() {
        let img = gradient_image(100, 100);
        // Width collapses to nothing even after padding once clamped outside.
        let rect = FaceRect { x: 500.0, y: 500.0, width: 0.0, height: 0.0 };
        assert!(matches!(
            canonicalize(&img, &rect),
            Err(CanonicalizeError::NoFaceRegion)
        ));
    }

    #[test]
    fn test_canonicalize_rect_fully_outside() {
        let img = gradient_image(100, 100);
        let rect = FaceRect { x: 200.0, y: 10.0, width: 50.0, height: 50.0 };
        assert!(matches!(
            canonicalize(&img, &rect),
            Err(CanonicalizeError::NoFaceRegion)
        ));
    }

    #[test]
    fn test_canonicalize_clamps_padding_at_border() {
        // Rect flush against the top-left corner: padding must clamp, not wrap.
        let img = gradient_image(120, 120);
        let rect = FaceRect { x: 0.0, y: 0.0, width: 60.0, height: 60.0 };
        let template = canonicalize(&img, &rect).unwrap();
        assert_eq!(template.size(), CANONICAL_SIZE);
    }

    #[test]
    fn test_canonicalize_negative_origin() {
        // Detectors occasionally report slightly negative coordinates.
        let img = gradient_image(120, 120);
        let rect = FaceRect { x: -4.0, y: -2.0, width: 60.0, height: 60.0 };
        assert!(canonicalize(&img, &rect).is_ok());
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let src = vec![128u8; 100 * 100];
        let dst = resize_bilinear(&src, 100, 100, 150, 150);
        assert_eq!(dst.len(), 150 * 150);
        assert!(dst.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_resize_preserves_extremes() {
        // A half-black, half-white image keeps both extremes after resize.
        let mut src = vec![0u8; 10 * 10];
        for row in src.chunks_mut(10) {
            for p in &mut row[5..] {
                *p = 255;
            }
        }
        let dst = resize_bilinear(&src, 10, 10, 20, 20);
        assert_eq!(dst[0], 0);
        assert_eq!(dst[19], 255);
    }

    #[test]
    fn test_equalize_stretches_low_contrast() {
        // Pixels clustered in 100–110 should spread toward the full range.
        let mut gray: Vec<u8> = (0..1024).map(|i| 100 + (i % 11) as u8).collect();
        equalize_histogram(&mut gray);
        let min = *gray.iter().min().unwrap();
        let max = *gray.iter().max().unwrap();
        assert!(min < 30, "min after equalization: {min}");
        assert!(max > 225, "max after equalization: {max}");
    }

    #[test]
    fn test_equalize_flat_image_untouched() {
        let mut gray = vec![42u8; 256];
        equalize_histogram(&mut gray);
        assert!(gray.iter().all(|&p| p == 42));
    }

    #[test]
    fn test_gaussian_uniform_stays_uniform() {
        let src = vec![200u8; 9 * 9];
        let dst = gaussian_smooth(&src, 9, 9);
        assert!(dst.iter().all(|&p| p == 200));
    }

    #[test]
    fn test_gaussian_softens_impulse() {
        // A single bright pixel is spread over its neighborhood.
        let mut src = vec![0u8; 5 * 5];
        src[2 * 5 + 2] = 255;
        let dst = gaussian_smooth(&src, 5, 5);
        assert!(dst[2 * 5 + 2] < 255);
        assert!(dst[1 * 5 + 2] > 0);
        assert!(dst[2 * 5 + 1] > 0);
    }
}
