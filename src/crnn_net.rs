use std::{path::PathBuf, time::Instant};

use float_ord::FloatOrd;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{ArrayView2, Axis, Ix2};
use ort::ExecutionProviderDispatch;
use ort::{inputs, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    pipeline::Recognizer, util::subtract_mean_normalize, ExecutionProvider, OcrError, Result,
    TextLine,
};

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];
const DEST_HEIGHT: u32 = 48;

pub struct CrnnNet {
    session: Session,
    keys: Vec<String>,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes("x:1x3x48x1")
        .with_profile_max_shapes(format!("x:1x3x48x{}", u16::MAX))
        .with_profile_opt_shapes("x:1x3x48x256")
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

/// Dictionary lines framed by the CTC blank at index 0 and a trailing space.
pub(crate) fn load_keys(dictionary: &str) -> Vec<String> {
    ["#".to_string()]
        .into_iter()
        .chain(dictionary.lines().map(|line| line.to_string()))
        .chain([" ".to_string()])
        .collect()
}

impl CrnnNet {
    #[instrument(level = "debug")]
    #[allow(unused_variables)]
    pub fn init(
        model_path: PathBuf,
        keys_path: PathBuf,
        num_threads: usize,
        gpu_index: Option<u32>,
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
                    ExecutionProvider::TensorRT => {
                        Some(setup_tensorrt(cache_path.clone().unwrap_or_else(|| {
                            model_path
                                .parent()
                                .map(|parent| parent.join(".cache"))
                                .unwrap_or_else(|| PathBuf::from(".cache"))
                        })))
                    }
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
            .with_parallel_execution(parallel)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(&model_path)?;

        let dictionary = std::fs::read_to_string(&keys_path).map_err(|source| OcrError::Keys {
            path: keys_path.clone(),
            source,
        })?;
        let keys = load_keys(&dictionary);

        log::debug!("CRNN Inputs: {:?}", session.inputs);
        log::debug!("CRNN Outputs: {:?}", session.outputs);
        log::debug!("Loaded {} keys from {keys_path:?}", keys.len());

        Ok(Self { session, keys })
    }

    #[instrument(level = "debug", skip(self, images))]
    pub fn get_text_lines(&self, images: &[DynamicImage]) -> Result<Vec<TextLine>> {
        images
            .iter()
            .map(|image| self.get_text_line(image))
            .collect()
    }

    #[instrument(level = "trace", skip(self, image))]
    fn get_text_line(&self, image: &DynamicImage) -> Result<TextLine> {
        let start = Instant::now();
        let scale = DEST_HEIGHT as f32 / image.height() as f32;
        let dest_width = ((image.width() as f32 * scale) as u32).clamp(1, u16::MAX as u32);
        let image = image.resize_exact(dest_width, DEST_HEIGHT, FilterType::Nearest);

        let tensor_values =
            subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => tensor_values]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| OcrError::UnexpectedOutput("recognizer produced no outputs".into()))?;
        let output_tensor = output.try_extract_tensor::<f32>()?;
        log::trace!("Output tensor size: {:?}", output_tensor.dim());

        // [1, T, classes] -> [T, classes]
        let output = output_tensor
            .remove_axis(Axis(0))
            .into_dimensionality::<Ix2>()
            .map_err(|err| OcrError::UnexpectedOutput(format!("recognizer scores: {err}")))?;

        let mut line = score_to_text_line(&self.keys, output);
        line.time = start.elapsed();
        Ok(line)
    }
}

/// Greedy CTC decode: best class per step, blanks dropped, repeats collapsed.
pub(crate) fn score_to_text_line(keys: &[String], data: ArrayView2<f32>) -> TextLine {
    let mut text = String::new();
    let mut character_scores = Vec::new();
    let mut last_index = 0;
    for step in data.outer_iter() {
        let Some((index, score)) = step
            .indexed_iter()
            .max_by_key(|(_, value)| FloatOrd(**value))
            .map(|(index, score)| (index, *score))
        else {
            continue;
        };
        if index > 0 && index < keys.len() && index != last_index {
            text.push_str(&keys[index]);
            character_scores.push(score);
        }
        last_index = index;
    }

    TextLine {
        text,
        character_scores,
        ..Default::default()
    }
}

impl Recognizer for CrnnNet {
    fn recognize(&self, images: &[DynamicImage]) -> Result<Vec<TextLine>> {
        self.get_text_lines(images)
    }
}
