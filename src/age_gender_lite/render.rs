use crate::age_gender_lite::types::BBox;
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

#[derive(Debug, Clone, Copy)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, 255])
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Colors;

impl Colors {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const RED: Color = Color { r: 255, g: 0, b: 0 };
    pub const GREEN: Color = Color { r: 0, g: 255, b: 0 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };
}

/// Draw the unexpanded detection rectangles onto a copy of the source image.
///
/// Purely cosmetic; the pipeline's results do not depend on this.
pub fn draw_detection_boxes(image: &DynamicImage, boxes: &[BBox], color: Color, thickness: u32) -> RgbaImage {
    let mut img = image.to_rgba8();
    let (width, height) = (img.width() as i64, img.height() as i64);
    let rgba = color.to_rgba();

    for bbox in boxes {
        for t in 0..thickness as i64 {
            let left = bbox.xmin as i64 + t;
            let top = bbox.ymin as i64 + t;
            let right = (bbox.xmax as i64 - t).min(width - 1);
            let bottom = (bbox.ymax as i64 - t).min(height - 1);
            if right <= left || bottom <= top {
                break;
            }

            let rect = Rect::at(left as i32, top as i32).of_size((right - left) as u32, (bottom - top) as u32);
            draw_hollow_rect_mut(&mut img, rect, rgba);
        }
    }

    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_detection_boxes() {
        let image = DynamicImage::new_rgb8(100, 100);
        let boxes = vec![BBox::new(10.0, 10.0, 50.0, 50.0)];

        let annotated = draw_detection_boxes(&image, &boxes, Colors::RED, 2);

        assert_eq!(annotated.get_pixel(10, 10), &Rgba([255, 0, 0, 255]));
        assert_eq!(annotated.get_pixel(11, 11), &Rgba([255, 0, 0, 255]));
        // interior untouched
        assert_eq!(annotated.get_pixel(30, 30), &Rgba([0, 0, 0, 255]));
    }
}
