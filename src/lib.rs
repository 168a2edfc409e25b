use std::path::{Path, PathBuf};

use angle_net::AngleNet;
use crnn_net::CrnnNet;
use dbnet::DbNet;

mod angle_net;
mod crnn_net;
pub mod db_postprocess;
pub mod dbnet;
mod error;
pub mod geometry;
pub mod layout;
pub mod pipeline;
mod result;
pub mod skew;
pub mod sort;
pub mod util;

use image::DynamicImage;
use tracing::instrument;

pub use error::{OcrError, Result};
pub use pipeline::{AngleClassifier, DebugOutput, Detector, OcrPipeline, Recognizer};
pub use result::*;
pub use util::{PaddingRect, ScaleParam};

pub use ort as runtime;

pub struct RapidOCRBuilder {
    threads: usize,
    gpu_index: Option<u32>,
    det_path: Option<PathBuf>,
    cls_path: Option<PathBuf>,
    rec_paths: Option<(PathBuf, PathBuf)>,
    max_side_len: u32,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
    debug: DebugOutput,
}

impl RapidOCRBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn gpu_index(mut self, index: Option<u32>) -> Self {
        self.gpu_index = index;
        self
    }

    pub fn det_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.det_path = Some(path.into());
        self
    }

    pub fn cls_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.cls_path = Some(path.into());
        self
    }

    pub fn rec_model(
        mut self,
        model_path: impl Into<PathBuf>,
        keys_path: impl Into<PathBuf>,
    ) -> Self {
        self.rec_paths = Some((model_path.into(), keys_path.into()));
        self
    }

    /// Largest detector input side the TensorRT profile accepts. The detector sees the padded
    /// page, so this must cover [`DetectionOptions::max_side_len`] plus twice
    /// [`DetectionOptions::padding`]. With `max_side_len == 0` it must cover the padded long side
    /// of the largest page.
    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.max_side_len = max_side_len;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    /// Save each cropped region as `part-<i>.png` in `dir`.
    pub fn save_part_images(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug.part_images_dir = Some(dir.into());
        self
    }

    /// Write the transcript to `path`, overwriting it on each detection.
    pub fn save_result_text(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug.result_text_path = Some(path.into());
        self
    }

    pub fn save_result_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug.result_image_path = Some(path.into());
        self
    }

    #[instrument(skip(self), level = "debug")]
    fn init_models(&mut self) -> Result<(DbNet, Option<AngleNet>, CrnnNet)> {
        let det_path = self
            .det_path
            .take()
            .unwrap_or_else(|| "models/ch_PP-OCRv4_det_infer/ch_PP-OCRv4_det_infer.onnx".into());
        let cls_path = self.cls_path.take();
        let (rec_path, keys_path) = self.rec_paths.take().unwrap_or_else(|| {
            (
                "models/ch_PP-OCRv4_rec_infer/ch_PP-OCRv4_rec_infer.onnx".into(),
                "models/ppocr_keys_v1.txt".into(),
            )
        });
        Ok((
            DbNet::init(
                det_path,
                self.threads,
                self.gpu_index,
                self.max_side_len,
                &self.execution_providers,
                self.cache_path.clone(),
            )?,
            cls_path
                .map(|cls_path| AngleNet::init(cls_path, self.threads))
                .transpose()?,
            CrnnNet::init(
                rec_path,
                keys_path,
                self.threads,
                self.gpu_index,
                &self.execution_providers,
                self.cache_path.clone(),
            )?,
        ))
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<RapidOCR> {
        let (det_model, cls_model, rec_model) = self.init_models()?;
        let pipeline =
            OcrPipeline::new(det_model, cls_model, rec_model).with_debug_output(self.debug);
        Ok(RapidOCR { pipeline })
    }
}

impl Default for RapidOCRBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            gpu_index: None,
            det_path: None,
            cls_path: None,
            rec_paths: None,
            max_side_len: 1024,
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
            debug: DebugOutput::default(),
        }
    }
}

pub struct RapidOCR {
    pipeline: OcrPipeline<DbNet, AngleNet, CrnnNet>,
}

impl RapidOCR {
    pub fn detect(&self, image: &DynamicImage, options: DetectionOptions) -> Result<OcrResult> {
        self.pipeline.run(image, options)
    }

    pub fn detect_path(
        &self,
        path: impl AsRef<Path>,
        options: DetectionOptions,
    ) -> Result<OcrResult> {
        self.pipeline.run_path(path.as_ref(), options)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectionOptions {
    /// White border added around the page before detection.
    pub padding: u32,
    /// Long side the detector works at; 0 keeps the image's own.
    pub max_side_len: u32,
    pub box_score_threshold: f32,
    pub box_threshold: f32,
    pub unclip_ratio: f32,
    /// Run the rotation classifier. When off every region counts as upright.
    pub do_angle: bool,
    /// Ask the classifier for a single majority decision across regions.
    pub most_angle: bool,
    /// Never scale the page up to reach `max_side_len`.
    pub downscale_only: bool,
    /// Page tilt (degrees) below which no correction is applied.
    pub skew_angle_threshold: f32,
    /// Vertical centroid distance (pixels) for two regions to share a line.
    pub line_tolerance: f32,
    pub min_mean_char_score: f32,
    /// Share of upside-down regions above which the whole page counts as flipped.
    pub flip_ratio: f32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            padding: 50,
            max_side_len: 0,
            box_score_threshold: 0.5,
            box_threshold: 0.3,
            unclip_ratio: 1.6,
            do_angle: true,
            most_angle: true,
            downscale_only: true,
            skew_angle_threshold: 2.0,
            line_tolerance: sort::DEFAULT_LINE_TOLERANCE,
            min_mean_char_score: 0.5,
            flip_ratio: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];
