use image::{DynamicImage, Rgb, RgbImage};
use imageproc::{
    drawing::draw_line_segment_mut,
    geometric_transformations::{rotate_about_center, warp_into, Interpolation, Projection},
    point::Point,
};
use tracing::instrument;

use crate::TextBox;

/// Crops taller than `ASPECT_RATIO_THRESHOLD` times their width are treated as vertical text.
const ASPECT_RATIO_THRESHOLD: f32 = 1.5;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

fn distance(a: Point<i32>, b: Point<i32>) -> f32 {
    ((a.x - b.x) as f32).hypot((a.y - b.y) as f32)
}

/// Warp the quadrilateral of `text_box` into an upright rectangle.
///
/// The output size comes from the longer edge of each pair of opposite edges. Crops that come out
/// much taller than wide are turned 90° clockwise so text always runs horizontally. Returns
/// `None` when the quadrilateral is degenerate.
#[instrument(level = "trace", skip(image))]
pub fn rotate_crop_image(image: &DynamicImage, text_box: &TextBox) -> Option<DynamicImage> {
    let [tl, tr, br, bl] = text_box.points;
    let width = distance(tl, tr).max(distance(bl, br)).round() as u32;
    let height = distance(tl, bl).max(distance(tr, br)).round() as u32;
    if width == 0 || height == 0 {
        return None;
    }

    let from = [tl, tr, br, bl].map(|p| (p.x as f32, p.y as f32));
    let to = [
        (0.0, 0.0),
        (width as f32, 0.0),
        (width as f32, height as f32),
        (0.0, height as f32),
    ];
    let projection = Projection::from_control_points(from, to)?;

    let source = image.to_rgb8();
    let mut crop = RgbImage::new(width, height);
    warp_into(&source, &projection, Interpolation::Bilinear, WHITE, &mut crop);
    let crop = DynamicImage::ImageRgb8(crop);

    if height as f32 >= width as f32 * ASPECT_RATIO_THRESHOLD {
        log::trace!("Rotating {width}x{height} crop to horizontal");
        Some(crop.rotate90())
    } else {
        Some(crop)
    }
}

/// Rotate `image` clockwise by `degrees` about its centre, keeping its size. Uncovered pixels are
/// filled white.
#[instrument(level = "debug", skip(image))]
pub fn rotate_page(image: &DynamicImage, degrees: f32) -> DynamicImage {
    let rotated = rotate_about_center(
        &image.to_rgb8(),
        degrees.to_radians(),
        Interpolation::Bilinear,
        WHITE,
    );
    DynamicImage::ImageRgb8(rotated)
}

/// Rotate `point` clockwise (in image coordinates, y pointing down) by `degrees` about `pivot`.
pub fn rotate_point(point: Point<f32>, pivot: Point<f32>, degrees: f32) -> Point<f32> {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let dx = point.x - pivot.x;
    let dy = point.y - pivot.y;
    Point::new(
        pivot.x + dx * cos - dy * sin,
        pivot.y + dx * sin + dy * cos,
    )
}

pub fn image_center(image: &DynamicImage) -> Point<f32> {
    Point::new(image.width() as f32 / 2.0, image.height() as f32 / 2.0)
}

pub fn box_thickness(image: &DynamicImage) -> u32 {
    image.width().min(image.height()) / 1000 + 2
}

/// Outline each box on `image`, widening every edge by `thickness` pixels to the right and down.
#[instrument(level = "debug", skip(image, boxes))]
pub fn draw_text_boxes<'a>(
    image: &mut RgbImage,
    boxes: impl IntoIterator<Item = &'a TextBox>,
    color: Rgb<u8>,
    thickness: u32,
) {
    for text_box in boxes {
        let points = text_box.points.map(|p| (p.x as f32, p.y as f32));
        for i in 0..points.len() {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % points.len()];
            for t in 0..thickness {
                let offset = t as f32;
                draw_line_segment_mut(image, (x0 + offset, y0), (x1 + offset, y1), color);
                draw_line_segment_mut(image, (x0, y0 + offset), (x1, y1 + offset), color);
            }
        }
    }
}
