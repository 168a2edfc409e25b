//! Page-level tilt estimation and correction.
//!
//! The page is rotated once as a whole rather than box by box, so the relative layout that
//! sorting and line joining depend on is preserved.

use float_ord::FloatOrd;
use image::DynamicImage;
use imageproc::point::Point;
use tracing::instrument;

use crate::{
    geometry::{image_center, rotate_page, rotate_point},
    Region, TextBox,
};

/// Orientations steeper than this are vertical text or noise and don't vote.
const MAX_VOTING_ANGLE: f32 = 45.0;

/// Orientation of the box's long edge in degrees, normalized to `(-90, 90]`.
///
/// Positive angles mean the edge descends to the right (image y grows downwards).
pub fn box_angle(text_box: &TextBox) -> f32 {
    let [tl, tr, _, bl] = text_box.points;
    let top = (tr.x - tl.x, tr.y - tl.y);
    let left = (bl.x - tl.x, bl.y - tl.y);
    let (dx, dy) = if top.0.pow(2) + top.1.pow(2) >= left.0.pow(2) + left.1.pow(2) {
        top
    } else {
        left
    };
    normalize_angle((dy as f32).atan2(dx as f32).to_degrees())
}

fn normalize_angle(mut degrees: f32) -> f32 {
    while degrees > 90.0 {
        degrees -= 180.0;
    }
    while degrees <= -90.0 {
        degrees += 180.0;
    }
    degrees
}

/// Median long-edge orientation of `regions`, ignoring boxes steeper than 45°.
#[instrument(level = "debug", skip(regions))]
pub fn text_line_angle(regions: &[Region]) -> f32 {
    if regions.len() < 2 {
        return 0.0;
    }
    let mut angles = regions
        .iter()
        .map(|region| box_angle(&region.text_box))
        .filter(|angle| angle.abs() <= MAX_VOTING_ANGLE)
        .collect::<Vec<_>>();
    if angles.is_empty() {
        return 0.0;
    }
    angles.sort_by_key(|angle| FloatOrd(*angle));
    let mid = angles.len() / 2;
    if angles.len() % 2 == 0 {
        (angles[mid - 1] + angles[mid]) / 2.0
    } else {
        angles[mid]
    }
}

/// Straighten the page by `-line_angle` when the tilt exceeds `angle_threshold` degrees.
#[instrument(level = "debug", skip(image, regions))]
pub fn tilt_correction(
    image: DynamicImage,
    regions: Vec<Region>,
    line_angle: f32,
    angle_threshold: f32,
) -> (DynamicImage, Vec<Region>) {
    if line_angle.abs() <= angle_threshold {
        return (image, regions);
    }
    log::debug!("Correcting page tilt of {line_angle}°");
    let pivot = image_center(&image);
    let rotated = rotate_page(&image, -line_angle);
    let regions = rotate_regions(regions, pivot, -line_angle);
    (rotated, regions)
}

pub fn rotate_regions(regions: Vec<Region>, pivot: Point<f32>, degrees: f32) -> Vec<Region> {
    regions
        .into_iter()
        .map(|region| {
            let points = region.text_box.points.map(|p| {
                let rotated = rotate_point(Point::new(p.x as f32, p.y as f32), pivot, degrees);
                Point::new(rotated.x.round() as i32, rotated.y.round() as i32)
            });
            Region {
                text_box: TextBox {
                    score: region.text_box.score,
                    points,
                },
                center: rotate_point(region.center, pivot, degrees),
            }
        })
        .collect()
}
