//! The per-image pipeline: plan scale, detect, straighten, sort, crop, classify, recognize,
//! then vote, filter, un-pad and lay the text out.
//!
//! The three models are reached through the [`Detector`], [`AngleClassifier`] and [`Recognizer`]
//! traits so the geometry can run against any implementation.

use std::{path::Path, time::Instant};

use image::{DynamicImage, Rgb};
use tracing::instrument;

use crate::{
    geometry::{box_thickness, draw_text_boxes, rotate_crop_image},
    layout::{filter_blocks, is_page_flipped, reconstruct_text, unpad_blocks},
    skew::{text_line_angle, tilt_correction},
    sort::sort_boxes,
    util::{ensure_not_empty, make_padding, plan_scale, PaddingRect},
    Angle, DetectionOptions, OcrError, OcrResult, Region, Result, ScaleParam, TextBlock, TextBox,
    TextLine,
};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

pub trait Detector {
    /// Text boxes in padded-source pixels, in no particular order.
    fn detect(
        &self,
        image: &DynamicImage,
        scale: ScaleParam,
        box_score_threshold: f32,
        box_threshold: f32,
        unclip_ratio: f32,
    ) -> Result<Vec<TextBox>>;
}

pub trait AngleClassifier {
    /// One angle per image, in input order.
    fn classify(&self, images: &[DynamicImage], most_angle: bool) -> Result<Vec<Angle>>;
}

pub trait Recognizer {
    /// One text line per image, in input order.
    fn recognize(&self, images: &[DynamicImage]) -> Result<Vec<TextLine>>;
}

/// Write-only artefacts useful when tuning thresholds.
#[derive(Debug, Clone, Default)]
pub struct DebugOutput {
    /// Each cropped region is saved here as `part-<i>.png`.
    pub part_images_dir: Option<std::path::PathBuf>,
    /// The reconstructed transcript is written to this file, replacing it on every run.
    pub result_text_path: Option<std::path::PathBuf>,
    /// The page, straightened and without padding, with every kept block outlined.
    pub result_image_path: Option<std::path::PathBuf>,
}

pub struct OcrPipeline<D, A, R> {
    pub detector: D,
    pub classifier: Option<A>,
    pub recognizer: R,
    pub debug: DebugOutput,
}

impl<D, A, R> OcrPipeline<D, A, R>
where
    D: Detector,
    A: AngleClassifier,
    R: Recognizer,
{
    pub fn new(detector: D, classifier: Option<A>, recognizer: R) -> Self {
        Self {
            detector,
            classifier,
            recognizer,
            debug: DebugOutput::default(),
        }
    }

    pub fn with_debug_output(mut self, debug: DebugOutput) -> Self {
        self.debug = debug;
        self
    }

    #[instrument(skip(self))]
    pub fn run_path(&self, path: &Path, options: DetectionOptions) -> Result<OcrResult> {
        let image = image::open(path)?;
        self.run(&image, options)
    }

    #[instrument(skip(self, image))]
    pub fn run(&self, image: &DynamicImage, options: DetectionOptions) -> Result<OcrResult> {
        ensure_not_empty(image)?;
        let start = Instant::now();

        let (scale, padding_rect) = plan_scale(
            image.width(),
            image.height(),
            options.padding,
            options.max_side_len,
            options.downscale_only,
        );
        let page = make_padding(image, options.padding);

        let boxes = self.detector.detect(
            &page,
            scale,
            options.box_score_threshold,
            options.box_threshold,
            options.unclip_ratio,
        )?;
        let detection_time = start.elapsed();
        log::debug!("Detected {} boxes in {detection_time:?}", boxes.len());

        let regions = boxes.into_iter().map(Region::from).collect::<Vec<_>>();
        let line_angle = text_line_angle(&regions);
        log::debug!("Text line angle: {line_angle}");
        let (page, mut regions) =
            tilt_correction(page, regions, line_angle, options.skew_angle_threshold);
        sort_boxes(&mut regions, options.line_tolerance);

        let (regions, mut part_images) = self.part_images(&page, regions)?;

        let angles = match (&self.classifier, options.do_angle) {
            (Some(classifier), true) => {
                let angles = classifier.classify(&part_images, options.most_angle)?;
                check_len("angle classifier", angles.len(), part_images.len())?;
                angles
            }
            _ => vec![Angle::upright(); part_images.len()],
        };
        for (image, angle) in part_images.iter_mut().zip(&angles) {
            if angle.is_flipped() {
                *image = image.rotate180();
            }
        }

        let lines = self.recognizer.recognize(&part_images)?;
        check_len("recognizer", lines.len(), part_images.len())?;

        let flipped = is_page_flipped(&angles, options.flip_ratio);
        log::debug!("Flip sign: {flipped}");
        let mut blocks = regions
            .into_iter()
            .zip(angles)
            .zip(lines)
            .map(|((region, angle), line)| TextBlock::new(region, angle, line))
            .collect::<Vec<_>>();
        if flipped {
            blocks.reverse();
        }

        let mut blocks = filter_blocks(blocks, options.min_mean_char_score);
        unpad_blocks(&mut blocks, padding_rect.x as i32);
        let text = reconstruct_text(&blocks, flipped, options.line_tolerance);

        if let Some(path) = &self.debug.result_text_path {
            std::fs::write(path, &text)?;
        }
        if let Some(path) = &self.debug.result_image_path {
            save_result_image(&page, padding_rect, &blocks, path)?;
        }

        let total_time = start.elapsed();
        log::debug!("Full detection took {total_time:?}");
        Ok(OcrResult {
            detection_time,
            text_blocks: blocks,
            total_time,
            text,
        })
    }

    /// Crop every region out of the page, dropping regions too degenerate to crop.
    #[instrument(level = "debug", skip(self, page, regions))]
    fn part_images(
        &self,
        page: &DynamicImage,
        regions: Vec<Region>,
    ) -> Result<(Vec<Region>, Vec<DynamicImage>)> {
        let mut kept = Vec::with_capacity(regions.len());
        let mut images = Vec::with_capacity(regions.len());
        for region in regions {
            match rotate_crop_image(page, &region.text_box) {
                Some(image) => {
                    kept.push(region);
                    images.push(image);
                }
                None => log::warn!("Dropping degenerate box {:?}", region.text_box.points),
            }
        }

        if let Some(dir) = &self.debug.part_images_dir {
            std::fs::create_dir_all(dir)?;
            for (i, image) in images.iter().enumerate() {
                image.save(dir.join(format!("part-{i}.png")))?;
            }
        }
        Ok((kept, images))
    }
}

fn save_result_image(
    page: &DynamicImage,
    padding_rect: PaddingRect,
    blocks: &[TextBlock],
    path: &Path,
) -> Result<()> {
    let page = page.crop_imm(
        padding_rect.x,
        padding_rect.y,
        padding_rect.width,
        padding_rect.height,
    );
    let thickness = box_thickness(&page);
    let mut canvas = page.to_rgb8();
    draw_text_boxes(
        &mut canvas,
        blocks.iter().map(|block| &block.bounds),
        BOX_COLOR,
        thickness,
    );
    canvas.save(path)?;
    Ok(())
}

fn check_len(stage: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(OcrError::UnexpectedOutput(format!(
            "{stage} returned {actual} results for {expected} regions"
        )));
    }
    Ok(())
}
