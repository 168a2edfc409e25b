use std::{path::PathBuf, time::Instant};

use float_ord::FloatOrd;
use image::DynamicImage;
use ndarray::Axis;
use ort::{inputs, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    pipeline::AngleClassifier, util::subtract_mean_normalize, Angle, OcrError, Result,
};

const DEST_WIDTH: u32 = 192;
const DEST_HEIGHT: u32 = 48;

const MEAN_VALUES: [f32; 3] = [0.5, 0.5, 0.5];
const NORM_VALUES: [f32; 3] = [2.0, 2.0, 2.0];

pub struct AngleNet {
    session: Session,
}

impl AngleNet {
    #[instrument(level = "debug")]
    pub fn init(path: PathBuf, num_threads: usize) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_parallel_execution(true)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .commit_from_file(path)?;

        log::debug!("Angle session inputs: {:?}", session.inputs);
        log::debug!("Angle session outputs: {:?}", session.outputs);

        Ok(Self { session })
    }

    #[instrument(level = "debug", skip(self, images))]
    pub fn get_angles(&self, images: &[DynamicImage], most_angle: bool) -> Result<Vec<Angle>> {
        let mut angles = images
            .iter()
            .map(|image| self.get_angle(image))
            .collect::<Result<Vec<_>>>()?;

        if most_angle {
            apply_most_angle(&mut angles);
        }

        Ok(angles)
    }

    #[instrument(level = "trace", skip(self, image))]
    fn get_angle(&self, image: &DynamicImage) -> Result<Angle> {
        let start = Instant::now();
        let image = image.resize_exact(
            DEST_WIDTH,
            DEST_HEIGHT,
            image::imageops::FilterType::Nearest,
        );
        let image =
            subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES).insert_axis(Axis(0));
        let outputs = self.session.run(inputs!["x" => image]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| OcrError::UnexpectedOutput("classifier produced no outputs".into()))?;
        let output = output.try_extract_tensor::<f32>()?;

        let (index, score) = output
            .iter()
            .enumerate()
            .max_by_key(|(_, score)| FloatOrd(**score))
            .ok_or_else(|| OcrError::UnexpectedOutput("classifier output is empty".into()))?;

        Ok(Angle {
            index,
            score: *score,
            time: start.elapsed(),
        })
    }
}

/// Replace every index with the majority index. Ties go to upside down.
pub(crate) fn apply_most_angle(angles: &mut [Angle]) {
    let sum = angles.iter().map(|angle| angle.index).sum::<usize>() as f32;
    let half_percent = angles.len() as f32 / 2.0;
    let most_angle_index = if sum < half_percent { 0 } else { 1 };

    for angle in angles.iter_mut() {
        angle.index = most_angle_index;
    }
}

impl AngleClassifier for AngleNet {
    fn classify(&self, images: &[DynamicImage], most_angle: bool) -> Result<Vec<Angle>> {
        self.get_angles(images, most_angle)
    }
}
