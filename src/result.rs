use std::time::Duration;

use imageproc::point::Point;

/// A detected text region: four corners ordered clockwise from the top-left.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub score: f32,
    pub points: [Point<i32>; 4],
}

impl TextBox {
    pub fn center(&self) -> Point<f32> {
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x as f32, sy + p.y as f32));
        Point::new(sx / 4.0, sy / 4.0)
    }

    pub fn arc_length(&self) -> f32 {
        (0..4)
            .map(|i| {
                let a = self.points[i];
                let b = self.points[(i + 1) % 4];
                ((b.x - a.x) as f32).hypot((b.y - a.y) as f32)
            })
            .sum()
    }

    pub fn unpad(&self, offset: i32) -> TextBox {
        TextBox {
            score: self.score,
            points: self.points.map(|p| Point::new(p.x - offset, p.y - offset)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub text_box: TextBox,
    pub center: Point<f32>,
}

impl From<TextBox> for Region {
    fn from(text_box: TextBox) -> Self {
        let center = text_box.center();
        Self { text_box, center }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Angle {
    /// 0 = upright, 1 = upside down.
    pub index: usize,
    pub score: f32,
    pub time: Duration,
}

impl Angle {
    pub fn upright() -> Self {
        Self {
            index: 0,
            score: 0.0,
            time: Duration::ZERO,
        }
    }

    pub fn is_flipped(&self) -> bool {
        self.index == 1
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextLine {
    pub text: String,
    pub character_scores: Vec<f32>,
    pub time: Duration,
}

impl TextLine {
    /// Mean character confidence, `None` when nothing was recognized.
    pub fn mean_score(&self) -> Option<f32> {
        if self.character_scores.is_empty() {
            return None;
        }
        let sum = self.character_scores.iter().map(|s| *s as f64).sum::<f64>();
        Some((sum / self.character_scores.len() as f64) as f32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub bounds: TextBox,
    pub center: Point<f32>,
    pub angle: Angle,
    pub text: TextLine,
    pub block_time: Duration,
}

impl TextBlock {
    pub fn new(region: Region, angle: Angle, text: TextLine) -> Self {
        Self {
            bounds: region.text_box,
            center: region.center,
            block_time: angle.time + text.time,
            angle,
            text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OcrResult {
    pub detection_time: Duration,
    pub text_blocks: Vec<TextBlock>,
    pub total_time: Duration,
    pub text: String,
}
