//! Canvas normalization: aspect-preserving resize, white padding, NCHW tensor.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;

const PIXEL_MAX_VALUE: f32 = 255.0;
const PAD_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Fits arbitrary images onto the fixed model canvas.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    width: u32,
    height: u32,
}

impl Normalizer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale `image` to fit inside the canvas and paste it centered on white.
    /// Content is never cropped, only padded.
    pub fn resize_with_padding(&self, image: &RgbImage) -> RgbImage {
        let mut canvas = RgbImage::from_pixel(self.width, self.height, PAD_COLOR);
        let (old_w, old_h) = image.dimensions();
        if old_w == 0 || old_h == 0 {
            return canvas;
        }

        let ratio = (self.width as f64 / old_w as f64).min(self.height as f64 / old_h as f64);
        let new_w = ((old_w as f64 * ratio) as u32).clamp(1, self.width);
        let new_h = ((old_h as f64 * ratio) as u32).clamp(1, self.height);

        let resized = imageops::resize(image, new_w, new_h, FilterType::CatmullRom);
        let paste_x = (self.width - new_w) / 2;
        let paste_y = (self.height - new_h) / 2;
        imageops::overlay(&mut canvas, &resized, paste_x as i64, paste_y as i64);
        canvas
    }

    /// Produce the `(1, 3, H, W)` tensor with values in `[0, 1]`.
    pub fn normalize(&self, image: &RgbImage) -> Array4<f32> {
        let padded = self.resize_with_padding(image);
        let mut tensor = Array4::<f32>::zeros((1, 3, self.height as usize, self.width as usize));
        for (x, y, pixel) in padded.enumerate_pixels() {
            for channel in 0..3 {
                tensor[[0, channel, y as usize, x as usize]] =
                    pixel[channel] as f32 / PIXEL_MAX_VALUE;
            }
        }
        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dark(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([0, 0, 0]))
    }

    #[test]
    fn test_shape_is_fixed() {
        let normalizer = Normalizer::new(1024, 64);
        for (w, h) in [(10, 10), (3000, 40), (50, 900), (1, 1), (1024, 64)] {
            let tensor = normalizer.normalize(&dark(w, h));
            assert_eq!(tensor.shape(), &[1, 3, 64, 1024]);
        }
    }

    #[test]
    fn test_values_in_unit_range() {
        let normalizer = Normalizer::new(64, 32);
        let image = RgbImage::from_fn(20, 10, |x, y| Rgb([(x * 12) as u8, (y * 25) as u8, 128]));
        let tensor = normalizer.normalize(&image);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_aspect_ratio_preserved_with_center_padding() {
        // 200x100 on 1024x64: ratio 0.64 -> 128x64 pasted at x = 448.
        let normalizer = Normalizer::new(1024, 64);
        let padded = normalizer.resize_with_padding(&dark(200, 100));

        let content_columns: Vec<u32> = (0..1024)
            .filter(|&x| padded.get_pixel(x, 32)[0] < 128)
            .collect();
        assert_eq!(content_columns.first(), Some(&448));
        assert_eq!(content_columns.last(), Some(&575));
        assert_eq!(content_columns.len(), 128);

        let tensor = normalizer.normalize(&dark(200, 100));
        assert_eq!(tensor[[0, 0, 32, 100]], 1.0);
        assert_eq!(tensor[[0, 2, 32, 500]], 0.0);
    }

    #[test]
    fn test_tall_image_is_padded_horizontally_only() {
        let normalizer = Normalizer::new(100, 50);
        let padded = normalizer.resize_with_padding(&dark(10, 100));
        // ratio 0.5 -> 5x50 at x = 47
        assert_eq!(padded.get_pixel(46, 25)[0], 255);
        assert_eq!(padded.get_pixel(47, 25)[0], 0);
        assert_eq!(padded.get_pixel(51, 25)[0], 0);
        assert_eq!(padded.get_pixel(52, 25)[0], 255);
    }

    #[test]
    fn test_empty_image_gives_blank_canvas() {
        let normalizer = Normalizer::new(16, 8);
        let tensor = normalizer.normalize(&RgbImage::new(0, 0));
        assert!(tensor.iter().all(|&v| v == 1.0));
    }
}
