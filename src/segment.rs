//! Line segmentation: group detector boxes into text lines and crop them.
//!
//! A single global vertical threshold decides whether two consecutive boxes
//! share a line. No column or rotation handling.

use image::{imageops, RgbImage};
use tracing::{debug, warn};

pub const DEFAULT_LINE_THRESHOLD: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Quadrilateral text region reported by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBox {
    pub points: [Point; 4],
    /// Detector confidence, carried through but not used for grouping.
    pub confidence: f32,
}

impl DetectedBox {
    pub fn new(points: [(f32, f32); 4], confidence: f32) -> Self {
        Self {
            points: points.map(|(x, y)| Point { x, y }),
            confidence,
        }
    }

    /// Axis-aligned box from its top-left and bottom-right corners.
    #[cfg(test)]
    pub fn from_rect(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self::new(
            [(x_min, y_min), (x_max, y_min), (x_max, y_max), (x_min, y_max)],
            1.0,
        )
    }

    pub fn y_min(&self) -> f32 {
        self.points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min)
    }
}

/// Pixel rectangle `[x_min, x_max) x [y_min, y_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRect {
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
}

impl LineRect {
    /// Clip to the image; `None` when nothing of the rectangle remains.
    fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x_min.clamp(0, width as i64);
        let x1 = self.x_max.clamp(0, width as i64);
        let y0 = self.y_min.clamp(0, height as i64);
        let y1 = self.y_max.clamp(0, height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Boxes judged to lie on one text line, in reading order.
#[derive(Debug, Clone)]
pub struct LineGroup {
    pub boxes: Vec<DetectedBox>,
}

impl LineGroup {
    /// Bounding rectangle over every corner of every member box. Coordinates
    /// are truncated toward zero.
    pub fn bounds(&self) -> LineRect {
        let points = self.boxes.iter().flat_map(|b| b.points.iter());
        let (mut x_min, mut y_min) = (f32::INFINITY, f32::INFINITY);
        let (mut x_max, mut y_max) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for p in points {
            x_min = x_min.min(p.x);
            y_min = y_min.min(p.y);
            x_max = x_max.max(p.x);
            y_max = y_max.max(p.y);
        }
        LineRect {
            x_min: x_min as i64,
            y_min: y_min as i64,
            x_max: x_max as i64,
            y_max: y_max as i64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LineGrouper {
    threshold: f32,
}

impl Default for LineGrouper {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_THRESHOLD)
    }
}

impl LineGrouper {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Sort boxes top to bottom and split them wherever consecutive `y_min`
    /// values differ by at least the threshold.
    pub fn group(&self, boxes: &[DetectedBox]) -> Vec<LineGroup> {
        let mut sorted: Vec<(f32, &DetectedBox)> = boxes.iter().map(|b| (b.y_min(), b)).collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut lines = Vec::new();
        let mut current: Vec<DetectedBox> = Vec::new();
        let mut prev_y = 0.0f32;

        for (y_min, bbox) in sorted {
            if !current.is_empty() && (y_min - prev_y).abs() >= self.threshold {
                lines.push(LineGroup {
                    boxes: std::mem::take(&mut current),
                });
            }
            current.push(bbox.clone());
            prev_y = y_min;
        }
        if !current.is_empty() {
            lines.push(LineGroup { boxes: current });
        }
        lines
    }

    /// Crop one image per line group. Empty regions are logged and skipped.
    pub fn crop_lines(&self, image: &RgbImage, boxes: &[DetectedBox]) -> Vec<RgbImage> {
        let groups = self.group(boxes);
        let (width, height) = image.dimensions();
        let mut crops = Vec::with_capacity(groups.len());

        for (idx, group) in groups.iter().enumerate() {
            let rect = group.bounds();
            let Some((x, y, w, h)) = rect.clamp_to(width, height) else {
                warn!("Empty segment at line {} ({:?}) - skipped", idx + 1, rect);
                continue;
            };
            crops.push(imageops::crop_imm(image, x, y, w, h).to_image());
        }

        debug!(
            "LineGrouper: {} boxes -> {} lines -> {} crops",
            boxes.len(),
            groups.len(),
            crops.len()
        );
        crops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn boxed(y: f32) -> DetectedBox {
        DetectedBox::from_rect(10.0, y, 60.0, y + 8.0)
    }

    #[test]
    fn test_close_boxes_merge() {
        let groups = LineGrouper::default().group(&[boxed(100.0), boxed(105.0)]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].boxes.len(), 2);
    }

    #[test]
    fn test_distant_boxes_split() {
        let groups = LineGrouper::default().group(&[boxed(100.0), boxed(115.0)]);
        assert_eq!(groups.len(), 2);

        // exactly at the threshold also splits
        let groups = LineGrouper::default().group(&[boxed(100.0), boxed(110.0)]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_compares_against_previous_box_not_line_start() {
        let boxes = [boxed(100.0), boxed(108.0), boxed(116.0), boxed(124.0)];
        let groups = LineGrouper::default().group(&boxes);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_groups_come_out_top_to_bottom() {
        let boxes = [boxed(300.0), boxed(10.0), boxed(150.0), boxed(14.0)];
        let groups = LineGrouper::default().group(&boxes);
        let starts: Vec<i64> = groups.iter().map(|g| g.bounds().y_min).collect();
        assert_eq!(starts, vec![10, 150, 300]);
    }

    #[test]
    fn test_bounds_cover_all_corners() {
        let group = LineGroup {
            boxes: vec![
                DetectedBox::new([(5.7, 20.0), (40.0, 18.2), (41.0, 30.0), (6.0, 31.9)], 0.9),
                DetectedBox::from_rect(50.0, 19.0, 90.5, 29.0),
            ],
        };
        assert_eq!(
            group.bounds(),
            LineRect {
                x_min: 5,
                y_min: 18,
                x_max: 90,
                y_max: 31
            }
        );
    }

    #[test]
    fn test_no_boxes_no_crops() {
        let image = RgbImage::new(100, 100);
        assert!(LineGrouper::default().crop_lines(&image, &[]).is_empty());
    }

    #[test]
    fn test_crops_match_line_rectangles() {
        let image = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
        let boxes = [
            DetectedBox::from_rect(10.0, 10.0, 80.0, 30.0),
            DetectedBox::from_rect(90.0, 12.0, 150.0, 28.0),
            DetectedBox::from_rect(20.0, 60.0, 120.0, 85.0),
        ];
        let crops = LineGrouper::default().crop_lines(&image, &boxes);
        assert_eq!(crops.len(), 2);
        assert_eq!(crops[0].dimensions(), (140, 20));
        assert_eq!(crops[1].dimensions(), (100, 25));
    }

    #[test]
    fn test_zero_area_crop_is_skipped() {
        let image = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
        let boxes = [
            DetectedBox::from_rect(10.0, 10.0, 10.0, 30.0),
            DetectedBox::from_rect(20.0, 60.0, 120.0, 85.0),
        ];
        let crops = LineGrouper::default().crop_lines(&image, &boxes);
        assert_eq!(crops.len(), 1);
        assert_eq!(crops[0].dimensions(), (100, 25));
    }

    #[test]
    fn test_out_of_bounds_boxes_are_clamped() {
        let image = RgbImage::from_pixel(50, 40, Rgb([255, 255, 255]));
        let boxes = [DetectedBox::from_rect(-5.0, -3.0, 70.0, 20.0)];
        let crops = LineGrouper::default().crop_lines(&image, &boxes);
        assert_eq!(crops[0].dimensions(), (50, 20));
    }
}
