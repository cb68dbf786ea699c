//! Grayscale conversion, cropping and bilinear resampling shared by the
//! localizer and the descriptor extractor.

use crate::types::Region;
use image::{GrayImage, RgbImage};

// BT.601 luma weights, fixed-point with 14 fractional bits.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

/// Convert an RGB frame to 8-bit grayscale with BT.601 weights.
pub fn to_grayscale(frame: &RgbImage) -> GrayImage {
    let (width, height) = frame.dimensions();
    let data = frame
        .as_raw()
        .chunks_exact(3)
        .map(|px| luma(px[0], px[1], px[2]))
        .collect();
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B;
    ((y + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT).min(255) as u8
}

/// Crop `region` out of an RGB frame and return it as grayscale.
///
/// Returns `None` if the region is empty or does not fit inside the frame.
pub fn crop_grayscale(frame: &RgbImage, region: &Region) -> Option<GrayImage> {
    let (width, height) = frame.dimensions();
    if !region.fits_within(width, height) {
        return None;
    }

    let mut out = GrayImage::new(region.width, region.height);
    for y in 0..region.height {
        for x in 0..region.width {
            let px = frame.get_pixel(region.x + x, region.y + y);
            out.put_pixel(x, y, image::Luma([luma(px[0], px[1], px[2])]));
        }
    }
    Some(out)
}

/// Resize a grayscale image with pixel-center-aligned bilinear interpolation.
pub fn resize_bilinear(src: &GrayImage, new_w: u32, new_h: u32) -> GrayImage {
    let (width, height) = (src.width() as usize, src.height() as usize);
    let (new_w_us, new_h_us) = (new_w as usize, new_h as usize);
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 {
        return GrayImage::new(new_w, new_h);
    }
    if width == new_w_us && height == new_h_us {
        return src.clone();
    }

    let frame = src.as_raw();
    let scale_x = width as f32 / new_w_us as f32;
    let scale_y = height as f32 / new_h_us as f32;

    let mut resized = vec![0u8; new_w_us * new_h_us];
    for y in 0..new_h_us {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);
        let fy = if src_y < 0.0 { 0.0 } else { fy };

        for x in 0..new_w_us {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
            let fx = if src_x < 0.0 { 0.0 } else { fx };

            let tl = frame[y0 * width + x0] as f32;
            let tr = frame[y0 * width + x1] as f32;
            let bl = frame[y1 * width + x0] as f32;
            let br = frame[y1 * width + x1] as f32;

            let top = tl + (tr - tl) * fx;
            let bottom = bl + (br - bl) * fx;
            let val = top + (bottom - top) * fy;

            resized[y * new_w_us + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    GrayImage::from_raw(new_w, new_h, resized).unwrap_or_else(|| GrayImage::new(new_w, new_h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_luma_extremes() {
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 255, 255), 255);
        // Pure green dominates BT.601 luma.
        assert!(luma(0, 255, 0) > luma(255, 0, 0));
        assert!(luma(255, 0, 0) > luma(0, 0, 255));
    }

    #[test]
    fn test_to_grayscale_dimensions() {
        let frame = RgbImage::from_pixel(7, 5, Rgb([10, 20, 30]));
        let gray = to_grayscale(&frame);
        assert_eq!(gray.dimensions(), (7, 5));
        let expected = luma(10, 20, 30);
        assert!(gray.pixels().all(|p| p[0] == expected));
    }

    #[test]
    fn test_crop_grayscale_reads_region() {
        let mut frame = RgbImage::new(10, 10);
        frame.put_pixel(3, 4, Rgb([255, 255, 255]));
        let crop = crop_grayscale(&frame, &Region::new(3, 4, 2, 2)).unwrap();
        assert_eq!(crop.dimensions(), (2, 2));
        assert_eq!(crop.get_pixel(0, 0)[0], 255);
        assert_eq!(crop.get_pixel(1, 1)[0], 0);
    }

    #[test]
    fn test_crop_grayscale_rejects_out_of_bounds() {
        let frame = RgbImage::new(10, 10);
        assert!(crop_grayscale(&frame, &Region::new(5, 5, 6, 2)).is_none());
        assert!(crop_grayscale(&frame, &Region::new(0, 0, 0, 0)).is_none());
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let src = GrayImage::from_pixel(100, 100, image::Luma([128]));
        let up = resize_bilinear(&src, 200, 150);
        assert_eq!(up.dimensions(), (200, 150));
        assert!(up.pixels().all(|p| p[0] == 128));
        let down = resize_bilinear(&src, 13, 31);
        assert!(down.pixels().all(|p| p[0] == 128));
    }

    #[test]
    fn test_resize_same_size_is_identity() {
        let src = GrayImage::from_fn(8, 8, |x, y| image::Luma([(x * 30 + y) as u8]));
        assert_eq!(resize_bilinear(&src, 8, 8), src);
    }

    #[test]
    fn test_resize_downscale_averages() {
        // 2x1 -> 1x1 samples exactly between the two pixels.
        let src = GrayImage::from_raw(2, 1, vec![0, 200]).unwrap();
        let out = resize_bilinear(&src, 1, 1);
        assert_eq!(out.get_pixel(0, 0)[0], 100);
    }
}
