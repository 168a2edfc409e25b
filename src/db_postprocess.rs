//! Turns the DB detector's probability map into scored text quadrilaterals.
//!
//! The network is trained on text regions shrunk towards their centre, so every connected
//! component of the binarized map is fitted with a minimum-area rectangle, scored against the
//! raw probabilities and then grown back ("unclipped") by a distance derived from its
//! area/perimeter ratio.

use float_ord::FloatOrd;
use geo::{
    point, Area, BoundingRect, Contains, Coord, EuclideanLength, HasDimensions, LineString,
    MinimumRotatedRect, Polygon, Translate,
};
use geo_clipper::{Clipper, EndType, JoinType};
use imageproc::{
    contours::find_contours,
    contrast::{threshold_mut, ThresholdType},
    distance_transform::Norm,
    morphology::dilate_mut,
    point::Point,
};
use ndarray::{s, ArrayView2};
use tracing::instrument;

use crate::{util::to_luma_image, ScaleParam, TextBox};

const MAX_CANDIDATES: usize = 1000;

/// A decoded quadrilateral at detector resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub score: f32,
    /// Clockwise from the top-left corner.
    pub points: [Coord<f32>; 4],
}

impl Candidate {
    /// Map back to padded-source pixels, clamped to the source bounds.
    pub fn to_text_box(&self, scale: &ScaleParam) -> TextBox {
        let max_x = scale.src_width.saturating_sub(1) as f32;
        let max_y = scale.src_height.saturating_sub(1) as f32;
        TextBox {
            score: self.score,
            points: self.points.map(|c| {
                Point::new(
                    (c.x / scale.ratio_width).round().clamp(0.0, max_x) as i32,
                    (c.y / scale.ratio_height).round().clamp(0.0, max_y) as i32,
                )
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DbPostProcess {
    /// Binarization threshold for the probability map.
    pub box_threshold: f32,
    /// Minimum mean probability inside a candidate.
    pub box_score_threshold: f32,
    pub unclip_ratio: f32,
    /// Candidates whose shorter side is below this many pixels are dropped.
    pub min_size: f32,
}

impl Default for DbPostProcess {
    fn default() -> Self {
        Self {
            box_threshold: 0.3,
            box_score_threshold: 0.5,
            unclip_ratio: 1.6,
            min_size: 3.0,
        }
    }
}

impl DbPostProcess {
    #[instrument(skip(self, pred), level = "debug")]
    pub fn decode(&self, pred: ArrayView2<f32>) -> Vec<Candidate> {
        let mut mask = to_luma_image(pred);
        let threshold = (self.box_threshold * 255.0) as u8;
        threshold_mut(&mut mask, threshold, ThresholdType::Binary);
        dilate_mut(&mut mask, Norm::L1, 2);

        find_contours::<i32>(&mask)
            .into_iter()
            .take(MAX_CANDIDATES)
            .filter(|it| it.points.len() > 2)
            .filter_map(|it| to_geo_poly(&it.points).minimum_rotated_rect())
            .filter(|rect| rect.unsigned_area() > 0.0)
            .filter(|rect| min_side(rect) >= self.min_size)
            .filter_map(|rect| {
                let score = box_score_fast(&rect, pred);
                (score >= self.box_score_threshold).then_some((rect, score))
            })
            .filter_map(|(rect, score)| Some((unclip(&rect, self.unclip_ratio)?, score)))
            .filter(|(rect, _)| min_side(rect) >= self.min_size + 2.0)
            .filter_map(|(rect, score)| {
                Some(Candidate {
                    score,
                    points: order_points_clockwise(&rect)?,
                })
            })
            .collect()
    }
}

fn to_geo_poly(points: &[Point<i32>]) -> Polygon<f32> {
    let points = points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect();
    Polygon::new(LineString::new(points), vec![])
}

fn min_side(rect: &Polygon<f32>) -> f32 {
    rect.exterior()
        .lines()
        .map(|it| FloatOrd(it.euclidean_length()))
        .min()
        .map_or(0.0, |it| it.0)
}

/// Mean probability of the pixels strictly inside `rect`.
fn box_score_fast(rect: &Polygon<f32>, pred: ArrayView2<f32>) -> f32 {
    let Some(bounds) = rect.bounding_rect() else {
        return 0.0;
    };
    let (height, width) = pred.dim();
    let x0 = (bounds.min().x.floor().max(0.0) as usize).min(width);
    let y0 = (bounds.min().y.floor().max(0.0) as usize).min(height);
    let x1 = (bounds.max().x.ceil().max(0.0) as usize + 1).min(width);
    let y1 = (bounds.max().y.ceil().max(0.0) as usize + 1).min(height);
    if x1 <= x0 || y1 <= y0 {
        return 0.0;
    }

    let local_rect = rect.translate(-(x0 as f32), -(y0 as f32));
    let (sum, count) = pred
        .slice(s![y0..y1, x0..x1])
        .indexed_iter()
        .filter(|((y, x), _)| local_rect.contains(&point![x: *x as f32, y: *y as f32]))
        .fold((0.0f32, 0usize), |(sum, count), (_, value)| {
            (sum + *value, count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

fn unclip(rect: &Polygon<f32>, unclip_ratio: f32) -> Option<Polygon<f32>> {
    let perimeter = rect.exterior().euclidean_length();
    if perimeter <= 0.0 {
        return None;
    }
    let distance = rect.unsigned_area() * unclip_ratio / perimeter;

    let expanded = rect.offset(distance, JoinType::Round(0.25), EndType::ClosedPolygon, 1.0);

    if expanded.is_empty() {
        None
    } else {
        expanded.minimum_rotated_rect()
    }
}

/// Order the rectangle's corners as top-left, top-right, bottom-right, bottom-left.
pub(crate) fn order_points_clockwise(rect: &Polygon<f32>) -> Option<[Coord<f32>; 4]> {
    let mut points = rect.exterior().0.iter().take(4).copied().collect::<Vec<_>>();
    if points.len() != 4 {
        return None;
    }
    points.sort_by_key(|p| FloatOrd(p.x));
    let (top_left, bottom_left) = if points[1].y < points[0].y {
        (points[1], points[0])
    } else {
        (points[0], points[1])
    };
    let (top_right, bottom_right) = if points[3].y < points[2].y {
        (points[3], points[2])
    } else {
        (points[2], points[3])
    };
    Some([top_left, top_right, bottom_right, bottom_left])
}
