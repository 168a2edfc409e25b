use std::{cell::Cell, collections::HashMap, path::PathBuf, time::Duration};

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use imageproc::point::Point;
use rapidocr::{
    geometry::rotate_point, skew::box_angle, Angle, AngleClassifier, DebugOutput,
    DetectionOptions, Detector, OcrError, OcrPipeline, Recognizer, Result, ScaleParam, TextBox,
    TextLine,
};

const PADDING: i32 = 50;

/// An axis-aligned region in original-image coordinates, painted with `shade` so the mocks can
/// tell crops apart.
#[derive(Clone, Copy)]
struct Spot {
    shade: u8,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

impl Spot {
    fn centered(shade: u8, cx: i32, cy: i32) -> Self {
        Self {
            shade,
            x0: cx - 10,
            y0: cy - 5,
            x1: cx + 10,
            y1: cy + 5,
        }
    }

    fn original_box(&self) -> TextBox {
        TextBox {
            score: 0.9,
            points: [
                Point::new(self.x0, self.y0),
                Point::new(self.x1, self.y0),
                Point::new(self.x1, self.y1),
                Point::new(self.x0, self.y1),
            ],
        }
    }
}

fn page(spots: &[Spot]) -> DynamicImage {
    let mut image = RgbImage::from_pixel(400, 300, Rgb([255, 255, 255]));
    for spot in spots {
        for y in spot.y0.max(0)..=spot.y1.min(299) {
            for x in spot.x0.max(0)..=spot.x1.min(399) {
                image.put_pixel(x as u32, y as u32, Rgb([spot.shade; 3]));
            }
        }
    }
    DynamicImage::ImageRgb8(image)
}

/// Centre pixel snapped to a multiple of 10; warping can shave a level or two off a flat fill.
fn shade_of(image: &DynamicImage) -> u8 {
    let value = image.get_pixel(image.width() / 2, image.height() / 2).0[0] as u32;
    ((value + 5) / 10 * 10).min(255) as u8
}

/// A `width`x`height` bar with its top-left corner at `origin`, turned clockwise by `degrees`.
#[derive(Clone, Copy)]
struct Bar {
    shade: u8,
    origin: (f32, f32),
    width: f32,
    height: f32,
    degrees: f32,
}

impl Bar {
    fn corner(&self, u: f32, v: f32) -> Point<i32> {
        let (x, y) = self.origin;
        let p = rotate_point(Point::new(x + u, y + v), Point::new(x, y), self.degrees);
        Point::new(p.x.round() as i32, p.y.round() as i32)
    }

    fn original_box(&self) -> TextBox {
        TextBox {
            score: 0.9,
            points: [
                self.corner(0.0, 0.0),
                self.corner(self.width, 0.0),
                self.corner(self.width, self.height),
                self.corner(0.0, self.height),
            ],
        }
    }

    fn covers(&self, x: f32, y: f32) -> bool {
        let (sin, cos) = self.degrees.to_radians().sin_cos();
        let (dx, dy) = (x - self.origin.0, y - self.origin.1);
        let u = dx * cos + dy * sin;
        let v = -dx * sin + dy * cos;
        (0.0..=self.width).contains(&u) && (0.0..=self.height).contains(&v)
    }
}

fn tilted_page(bars: &[Bar]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(400, 300, |x, y| {
        bars.iter()
            .find(|bar| bar.covers(x as f32, y as f32))
            .map_or(Rgb([255, 255, 255]), |bar| Rgb([bar.shade; 3]))
    }))
}

/// Returns the spots' boxes, shifted into padded coordinates, in the given order.
struct FixedDetector(Vec<Spot>);

impl Detector for FixedDetector {
    fn detect(
        &self,
        image: &DynamicImage,
        scale: ScaleParam,
        _: f32,
        _: f32,
        _: f32,
    ) -> Result<Vec<TextBox>> {
        assert_eq!(image.dimensions(), (scale.src_width, scale.src_height));
        Ok(self
            .0
            .iter()
            .map(|spot| spot.original_box().unpad(-PADDING))
            .collect())
    }
}

/// Same as [`FixedDetector`] for arbitrary quadrilaterals.
struct QuadDetector(Vec<TextBox>);

impl Detector for QuadDetector {
    fn detect(
        &self,
        _: &DynamicImage,
        _: ScaleParam,
        _: f32,
        _: f32,
        _: f32,
    ) -> Result<Vec<TextBox>> {
        Ok(self.0.iter().map(|text_box| text_box.unpad(-PADDING)).collect())
    }
}

struct FailingDetector;

impl Detector for FailingDetector {
    fn detect(
        &self,
        _: &DynamicImage,
        _: ScaleParam,
        _: f32,
        _: f32,
        _: f32,
    ) -> Result<Vec<TextBox>> {
        Err(OcrError::UnexpectedOutput("model not loaded".into()))
    }
}

/// Flags the listed shades as upside down.
#[derive(Default)]
struct ShadeClassifier {
    flipped: Vec<u8>,
    calls: Cell<usize>,
}

impl AngleClassifier for ShadeClassifier {
    fn classify(&self, images: &[DynamicImage], _most_angle: bool) -> Result<Vec<Angle>> {
        self.calls.set(self.calls.get() + 1);
        Ok(images
            .iter()
            .map(|image| Angle {
                index: usize::from(self.flipped.contains(&shade_of(image))),
                score: 0.99,
                time: Duration::from_millis(1),
            })
            .collect())
    }
}

/// Always answers with one angle too few.
struct ShortClassifier;

impl AngleClassifier for ShortClassifier {
    fn classify(&self, images: &[DynamicImage], _: bool) -> Result<Vec<Angle>> {
        Ok(vec![Angle::upright(); images.len().saturating_sub(1)])
    }
}

/// Reads a crop by its shade.
struct ShadeRecognizer(HashMap<u8, (&'static str, Vec<f32>)>);

impl ShadeRecognizer {
    fn new(entries: &[(u8, &'static str, &[f32])]) -> Self {
        Self(
            entries
                .iter()
                .map(|(shade, text, scores)| (*shade, (*text, scores.to_vec())))
                .collect(),
        )
    }
}

impl Recognizer for ShadeRecognizer {
    fn recognize(&self, images: &[DynamicImage]) -> Result<Vec<TextLine>> {
        images
            .iter()
            .map(|image| {
                let shade = shade_of(image);
                let (text, scores) = self.0.get(&shade).ok_or_else(|| {
                    OcrError::UnexpectedOutput(format!("no text for shade {shade}"))
                })?;
                Ok(TextLine {
                    text: text.to_string(),
                    character_scores: scores.clone(),
                    time: Duration::from_millis(2),
                })
            })
            .collect()
    }
}

fn options() -> DetectionOptions {
    DetectionOptions {
        padding: PADDING as u32,
        ..Default::default()
    }
}

fn pipeline(
    spots: Vec<Spot>,
    classifier: ShadeClassifier,
    recognizer: ShadeRecognizer,
) -> OcrPipeline<FixedDetector, ShadeClassifier, ShadeRecognizer> {
    OcrPipeline::new(FixedDetector(spots), Some(classifier), recognizer)
}

#[test]
fn two_regions_on_one_line_join_with_space() {
    let _ = env_logger::builder().is_test(true).try_init();
    let spots = vec![Spot::centered(200, 200, 52), Spot::centered(40, 10, 50)];
    let ocr = pipeline(
        spots.clone(),
        ShadeClassifier::default(),
        ShadeRecognizer::new(&[(40, "Hello", &[0.9, 0.8]), (200, "World", &[0.95])]),
    );
    let result = ocr.run(&page(&spots), options()).unwrap();
    assert_eq!(result.text, "Hello World");
    assert_eq!(result.text_blocks.len(), 2);
    assert!(result.total_time >= result.detection_time);
}

#[test]
fn stacked_regions_become_lines() {
    let spots = vec![Spot::centered(90, 100, 120), Spot::centered(40, 100, 50)];
    let ocr = pipeline(
        spots.clone(),
        ShadeClassifier::default(),
        ShadeRecognizer::new(&[(40, "first", &[0.9]), (90, "second", &[0.9])]),
    );
    let result = ocr.run(&page(&spots), options()).unwrap();
    assert_eq!(result.text, "first\nsecond");
}

#[test]
fn low_confidence_region_is_dropped() {
    let spots = vec![Spot::centered(40, 100, 50)];
    let ocr = pipeline(
        spots.clone(),
        ShadeClassifier::default(),
        ShadeRecognizer::new(&[(40, "noise", &[0.2, 0.4])]),
    );
    let result = ocr.run(&page(&spots), options()).unwrap();
    assert!(result.text_blocks.is_empty());
    assert_eq!(result.text, "");
}

#[test]
fn blocks_stay_wired_to_their_own_region() {
    let spots = vec![
        Spot::centered(160, 300, 200),
        Spot::centered(40, 30, 20),
        Spot::centered(120, 60, 200),
        Spot::centered(80, 250, 21),
    ];
    let ocr = pipeline(
        spots.clone(),
        ShadeClassifier::default(),
        ShadeRecognizer::new(&[
            (40, "a", &[0.9]),
            (80, "b", &[0.3]),
            (120, "c", &[0.7, 0.8]),
            (160, "d", &[]),
        ]),
    );
    let result = ocr.run(&page(&spots), options()).unwrap();

    let by_shade = spots
        .iter()
        .map(|spot| (spot.shade, spot.original_box()))
        .collect::<HashMap<_, _>>();
    let texts = result
        .text_blocks
        .iter()
        .map(|block| block.text.text.as_str())
        .collect::<Vec<_>>();
    assert_eq!(texts, vec!["a", "c"]);
    assert_eq!(result.text_blocks[0].bounds.points, by_shade[&40].points);
    assert_eq!(result.text_blocks[1].bounds.points, by_shade[&120].points);
    assert_eq!(result.text_blocks[1].text.character_scores, vec![0.7, 0.8]);
    assert_eq!(result.text, "a\nc");
}

#[test]
fn block_coordinates_are_unpadded() {
    let spots = vec![Spot::centered(40, 100, 50)];
    let ocr = pipeline(
        spots.clone(),
        ShadeClassifier::default(),
        ShadeRecognizer::new(&[(40, "x", &[0.9])]),
    );
    let result = ocr.run(&page(&spots), options()).unwrap();
    let block = &result.text_blocks[0];
    assert_eq!(block.bounds, spots[0].original_box());
    assert_eq!(block.center, Point::new(100.0, 50.0));
    assert_eq!(block.block_time, Duration::from_millis(3));
}

#[test]
fn upside_down_page_is_read_backwards() {
    let spots = vec![Spot::centered(40, 10, 50), Spot::centered(200, 200, 52)];
    let classifier = ShadeClassifier {
        flipped: vec![40, 200],
        ..Default::default()
    };
    let ocr = pipeline(
        spots.clone(),
        classifier,
        ShadeRecognizer::new(&[(40, "Hello", &[0.9]), (200, "World", &[0.9])]),
    );
    let result = ocr.run(&page(&spots), options()).unwrap();
    assert_eq!(result.text, "World Hello");
    assert!(result.text_blocks.iter().all(|block| block.angle.index == 1));
}

#[test]
fn minority_of_flipped_regions_keeps_page_order() {
    let spots = vec![
        Spot::centered(40, 30, 20),
        Spot::centered(80, 30, 80),
        Spot::centered(120, 30, 140),
    ];
    let classifier = ShadeClassifier {
        flipped: vec![80],
        ..Default::default()
    };
    let ocr = pipeline(
        spots.clone(),
        classifier,
        ShadeRecognizer::new(&[(40, "a", &[0.9]), (80, "b", &[0.9]), (120, "c", &[0.9])]),
    );
    let result = ocr.run(&page(&spots), options()).unwrap();
    assert_eq!(result.text, "a\nb\nc");
    assert_eq!(result.text_blocks[1].angle.index, 1);
}

#[test]
fn disabled_angle_skips_classifier() {
    let spots = vec![Spot::centered(40, 100, 50)];
    let classifier = ShadeClassifier {
        flipped: vec![40],
        ..Default::default()
    };
    let ocr = pipeline(
        spots.clone(),
        classifier,
        ShadeRecognizer::new(&[(40, "x", &[0.9])]),
    );
    let options = DetectionOptions {
        do_angle: false,
        ..options()
    };
    let result = ocr.run(&page(&spots), options).unwrap();
    assert_eq!(ocr.classifier.as_ref().unwrap().calls.get(), 0);
    assert_eq!(result.text_blocks[0].angle, Angle::upright());
}

#[test]
fn missing_classifier_counts_everything_upright() {
    let spots = vec![Spot::centered(40, 100, 50)];
    let ocr = OcrPipeline::<_, ShadeClassifier, _>::new(
        FixedDetector(spots.clone()),
        None,
        ShadeRecognizer::new(&[(40, "x", &[0.9])]),
    );
    let result = ocr.run(&page(&spots), options()).unwrap();
    assert_eq!(result.text_blocks[0].angle, Angle::upright());
}

#[test]
fn blank_page_is_a_valid_result() {
    let ocr = pipeline(Vec::new(), ShadeClassifier::default(), ShadeRecognizer::new(&[]));
    let result = ocr.run(&page(&[]), options()).unwrap();
    assert!(result.text_blocks.is_empty());
    assert_eq!(result.text, "");
}

#[test]
fn zero_size_image_fails() {
    let ocr = pipeline(Vec::new(), ShadeClassifier::default(), ShadeRecognizer::new(&[]));
    let err = ocr
        .run(&DynamicImage::new_rgb8(0, 0), options())
        .unwrap_err();
    assert!(matches!(err, OcrError::EmptyImage { .. }));
}

#[test]
fn detector_failure_aborts_the_image() {
    let ocr = OcrPipeline::new(
        FailingDetector,
        Some(ShadeClassifier::default()),
        ShadeRecognizer::new(&[]),
    );
    assert!(ocr.run(&page(&[]), options()).is_err());
}

#[test]
fn mismatched_classifier_output_is_rejected() {
    let spots = vec![Spot::centered(40, 100, 50), Spot::centered(80, 100, 150)];
    let ocr = OcrPipeline::new(
        FixedDetector(spots.clone()),
        Some(ShortClassifier),
        ShadeRecognizer::new(&[(40, "a", &[0.9]), (80, "b", &[0.9])]),
    );
    let err = ocr.run(&page(&spots), options()).unwrap_err();
    assert!(matches!(err, OcrError::UnexpectedOutput(_)));
}

#[test]
fn unreadable_path_fails() {
    let ocr = pipeline(Vec::new(), ShadeClassifier::default(), ShadeRecognizer::new(&[]));
    let missing = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("does-not-exist.png");
    assert!(matches!(
        ocr.run_path(&missing, options()),
        Err(OcrError::Image(_))
    ));
}

#[test]
fn debug_output_is_written() {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("pipeline-debug");
    let _ = std::fs::remove_dir_all(&dir);
    let spots = vec![Spot::centered(40, 10, 50), Spot::centered(200, 200, 52)];
    let ocr = pipeline(
        spots.clone(),
        ShadeClassifier::default(),
        ShadeRecognizer::new(&[(40, "Hello", &[0.9]), (200, "World", &[0.9])]),
    )
    .with_debug_output(DebugOutput {
        part_images_dir: Some(dir.join("parts")),
        result_text_path: Some(dir.join("result.txt")),
        ..Default::default()
    });
    std::fs::create_dir_all(&dir).unwrap();
    ocr.run(&page(&spots), options()).unwrap();
    ocr.run(&page(&spots), options()).unwrap();

    assert!(dir.join("parts/part-0.png").exists());
    assert!(dir.join("parts/part-1.png").exists());
    let text = std::fs::read_to_string(dir.join("result.txt")).unwrap();
    assert_eq!(text, "Hello World");
}

#[test]
fn result_image_outlines_kept_blocks() {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("pipeline-result-image");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let kept = Spot::centered(40, 200, 52);
    let dropped = Spot::centered(80, 300, 200);
    let spots = vec![kept, dropped];
    let ocr = pipeline(
        spots.clone(),
        ShadeClassifier::default(),
        ShadeRecognizer::new(&[(40, "kept", &[0.9]), (80, "dropped", &[0.1])]),
    )
    .with_debug_output(DebugOutput {
        result_image_path: Some(dir.join("result.png")),
        ..Default::default()
    });
    ocr.run(&page(&spots), options()).unwrap();

    let drawn = image::open(dir.join("result.png")).unwrap().to_rgb8();
    let red = Rgb([255, 0, 0]);
    assert_eq!(drawn.dimensions(), (400, 300));
    assert_eq!(*drawn.get_pixel(kept.x0 as u32, kept.y0 as u32), red);
    assert_eq!(*drawn.get_pixel(200, kept.y1 as u32), red);
    assert_eq!(*drawn.get_pixel(200, 52), Rgb([40; 3]));
    assert_eq!(
        *drawn.get_pixel(dropped.x0 as u32, dropped.y0 as u32),
        Rgb([80; 3])
    );
}

#[test]
fn tilted_page_is_levelled_before_reading() {
    let bars = [
        Bar {
            shade: 40,
            origin: (80.0, 60.0),
            width: 200.0,
            height: 24.0,
            degrees: 8.0,
        },
        Bar {
            shade: 120,
            origin: (80.0, 160.0),
            width: 200.0,
            height: 24.0,
            degrees: 8.0,
        },
    ];
    let ocr = OcrPipeline::new(
        QuadDetector(bars.iter().rev().map(Bar::original_box).collect()),
        Some(ShadeClassifier::default()),
        ShadeRecognizer::new(&[(40, "first", &[0.9]), (120, "second", &[0.9])]),
    );
    let result = ocr.run(&tilted_page(&bars), options()).unwrap();

    assert_eq!(result.text, "first\nsecond");
    assert_eq!(result.text_blocks.len(), 2);
    for block in &result.text_blocks {
        assert!(box_angle(&block.bounds).abs() < 1.0);
    }
    let upper = &result.text_blocks[0];
    let lower = &result.text_blocks[1];
    assert!(upper.center.y < lower.center.y);
    assert!((lower.center.y - upper.center.y - 100.0 * 8f32.to_radians().cos()).abs() < 2.0);
}
