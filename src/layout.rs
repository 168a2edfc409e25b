//! Page-level decisions taken after recognition and the final transcript.

use tracing::instrument;

use crate::{Angle, TextBlock};

const FLIP_EPSILON: f32 = 0.00001;

/// Whether more than `flip_ratio` of the regions were classified upside down.
pub fn is_page_flipped(angles: &[Angle], flip_ratio: f32) -> bool {
    let flip_count = angles.iter().filter(|angle| angle.is_flipped()).count();
    let ratio = flip_count as f32 / (angles.len() as f32 + FLIP_EPSILON);
    log::debug!("{flip_count} of {} regions flipped", angles.len());
    ratio > flip_ratio
}

/// Keep blocks whose mean character score is strictly above `min_score`.
#[instrument(level = "debug", skip(blocks))]
pub fn filter_blocks(blocks: Vec<TextBlock>, min_score: f32) -> Vec<TextBlock> {
    blocks
        .into_iter()
        .filter(|block| match block.text.mean_score() {
            Some(mean) => mean > min_score,
            None => false,
        })
        .inspect(|block| log::trace!("Keeping {:?}", block.text.text))
        .collect()
}

pub fn unpad_blocks(blocks: &mut [TextBlock], padding: i32) {
    for block in blocks {
        block.bounds = block.bounds.unpad(padding);
        block.center.x -= padding as f32;
        block.center.y -= padding as f32;
    }
}

/// Join block texts into lines.
///
/// A block continues the previous one's line when their centroids are less than
/// `line_tolerance` apart vertically and it lies further along the reading direction, which runs
/// right to left on a flipped page. Everything else starts a new line.
pub fn reconstruct_text(blocks: &[TextBlock], flipped: bool, line_tolerance: f32) -> String {
    let direction = if flipped { -1.0 } else { 1.0 };
    let mut text = String::new();
    let mut previous: Option<&TextBlock> = None;
    for block in blocks {
        if let Some(prev) = previous {
            let same_band = (prev.center.y - block.center.y).abs() < line_tolerance;
            let follows = prev.center.x * direction < block.center.x * direction;
            text.push(if same_band && follows { ' ' } else { '\n' });
        }
        text.push_str(&block.text.text);
        previous = Some(block);
    }
    text
}
