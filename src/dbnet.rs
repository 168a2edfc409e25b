use std::path::PathBuf;

use image::{imageops::FilterType, DynamicImage};
use ndarray::{Axis, Ix2};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    db_postprocess::DbPostProcess, pipeline::Detector, util::subtract_mean_normalize,
    ExecutionProvider, OcrError, Result, ScaleParam, TextBox,
};

const MEAN_VALUES: [f32; 3] = [0.485, 0.456, 0.406];
const NORM_VALUES: [f32; 3] = [1.0 / 0.229, 1.0 / 0.224, 1.0 / 0.225];

pub struct DbNet {
    session: Session,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf, max_side_len: u32) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes("x:1x3x32x32")
        .with_profile_max_shapes(format!("x:1x3x{max_side_len}x{max_side_len}"))
        .with_profile_opt_shapes(format!("x:1x3x{max_side_len}x{max_side_len}"))
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .with_detailed_build_log(true)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda(gpu_index: Option<u32>) -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    let provider = CUDAExecutionProvider::default();
    match gpu_index {
        Some(index) => provider.with_device_id(index as i32).build(),
        None => provider.build(),
    }
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

impl DbNet {
    #[instrument(level = "debug")]
    #[allow(unused_variables)]
    pub fn init(
        path: PathBuf,
        num_threads: usize,
        gpu_index: Option<u32>,
        max_side_len: u32,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> Result<Self> {
        #[cfg(feature = "directml")]
        let parallel = execution_providers.contains(&ExecutionProvider::DirectML);
        #[cfg(not(feature = "directml"))]
        let parallel = true;

        let execution_providers = execution_providers.iter().filter_map(
            |provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "tensorrt")]
                    ExecutionProvider::TensorRT => Some(setup_tensorrt(
                        cache_path.clone().unwrap_or_else(|| {
                            path.parent()
                                .map(|parent| parent.join(".cache"))
                                .unwrap_or_else(|| PathBuf::from(".cache"))
                        }),
                        max_side_len,
                    )),
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(setup_cuda(gpu_index)),
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => Some(setup_coreml()),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => Some(setup_directml()),
                }
            },
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_memory_pattern(parallel)?
            .with_parallel_execution(parallel)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(path)?;

        Ok(Self { session })
    }

    #[instrument(skip(self, image), level = "debug")]
    pub fn get_text_boxes(
        &self,
        image: &DynamicImage,
        scale: ScaleParam,
        box_score_thresh: f32,
        box_thresh: f32,
        unclip_ratio: f32,
    ) -> Result<Vec<TextBox>> {
        let resized = image.resize_exact(scale.dst_width, scale.dst_height, FilterType::Nearest);
        let input_values =
            subtract_mean_normalize(&resized, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => input_values]?)?;
        let (_, pred) = outputs
            .first_key_value()
            .ok_or_else(|| OcrError::UnexpectedOutput("detector produced no outputs".into()))?;
        let pred = pred.try_extract_tensor::<f32>()?;

        // [1, 1, H, W] -> [H, W]
        let pred = pred
            .remove_axis(Axis(0))
            .remove_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(|err| OcrError::UnexpectedOutput(format!("detector map: {err}")))?;

        let decoder = DbPostProcess {
            box_threshold: box_thresh,
            box_score_threshold: box_score_thresh,
            unclip_ratio,
            ..Default::default()
        };
        let boxes = decoder
            .decode(pred)
            .iter()
            .map(|candidate| candidate.to_text_box(&scale))
            .collect();
        Ok(boxes)
    }
}

impl Detector for DbNet {
    fn detect(
        &self,
        image: &DynamicImage,
        scale: ScaleParam,
        box_score_threshold: f32,
        box_threshold: f32,
        unclip_ratio: f32,
    ) -> Result<Vec<TextBox>> {
        self.get_text_boxes(image, scale, box_score_threshold, box_threshold, unclip_ratio)
    }
}
