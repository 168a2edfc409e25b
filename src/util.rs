use image::{imageops, DynamicImage, GrayImage, ImageBuffer, Pixel, Rgb, RgbImage};
use ndarray::{Array3, ArrayView2, Axis};
use tracing::instrument;

use crate::{OcrError, Result};

#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &DynamicImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    let mut image = image.to_rgb32f();
    let norm = Rgb::<f32>(*norm_vals);
    let mean_vals = Rgb::<f32>(*mean_vals).map2(&norm, |c1, c2| c1 * c2);
    for pixel in image.pixels_mut() {
        *pixel = pixel
            .map2(&norm, |c1, c2| c1 * c2)
            .map2(&mean_vals, |c1, c2| c1 - c2);
    }
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

pub(crate) fn to_luma_image(data: ArrayView2<f32>) -> GrayImage {
    let height = data.len_of(Axis(0)) as u32;
    let width = data.len_of(Axis(1)) as u32;
    ImageBuffer::from_fn(width, height, |x, y| {
        let p = data[[y as usize, x as usize]].clamp(0.0, 1.0);
        image::Luma([(p * 255.0) as u8])
    })
}

/// Mapping from the padded source image to the resolution the detector runs at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleParam {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    pub ratio_width: f32,
    pub ratio_height: f32,
}

impl ScaleParam {
    /// Scale `src` so its long side becomes `target_size`, with each side floored to a
    /// multiple of 32 (minimum 32) as the detector requires.
    pub fn new(src_width: u32, src_height: u32, target_size: u32) -> Self {
        let ratio = if src_width > src_height {
            target_size as f32 / src_width as f32
        } else {
            target_size as f32 / src_height as f32
        };
        let mut dst_width = (src_width as f32 * ratio) as u32;
        let mut dst_height = (src_height as f32 * ratio) as u32;
        if dst_width % 32 != 0 {
            let new_width = (dst_width / 32 * 32).max(32);
            log::debug!(
                "Target width of {dst_width} wasn't a multiple of 32, flooring to {new_width}."
            );
            dst_width = new_width;
        }
        if dst_height % 32 != 0 {
            let new_height = (dst_height / 32 * 32).max(32);
            log::debug!(
                "Target height of {dst_height} wasn't a multiple of 32, flooring to {new_height}."
            );
            dst_height = new_height;
        }
        let ratio_width = dst_width as f32 / src_width as f32;
        let ratio_height = dst_height as f32 / src_height as f32;
        log::debug!("Resize will change image dimensions from (w: {src_width}, h: {src_height}) to (w: {dst_width}, h: {dst_height}) with ratio ({ratio_width}, {ratio_height}).");
        Self {
            src_width,
            src_height,
            dst_width,
            dst_height,
            ratio_width,
            ratio_height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddingRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Plan the detector resolution for an image of `width`x`height` that will be padded by
/// `padding` on every side.
///
/// `max_side_len == 0` keeps the original long side. With `downscale_only` a larger request is
/// clamped to the original long side.
pub fn plan_scale(
    width: u32,
    height: u32,
    padding: u32,
    max_side_len: u32,
    downscale_only: bool,
) -> (ScaleParam, PaddingRect) {
    let origin_max_side = width.max(height);
    let resize = if max_side_len == 0 || (downscale_only && max_side_len > origin_max_side) {
        origin_max_side
    } else {
        max_side_len
    };
    let padding_rect = PaddingRect {
        x: padding,
        y: padding,
        width,
        height,
    };
    let scale = ScaleParam::new(
        width + 2 * padding,
        height + 2 * padding,
        resize + 2 * padding,
    );
    (scale, padding_rect)
}

#[instrument(level = "debug", skip(image))]
pub fn make_padding(image: &DynamicImage, padding: u32) -> DynamicImage {
    if padding == 0 {
        return image.clone();
    }
    let mut padded = RgbImage::from_pixel(
        image.width() + 2 * padding,
        image.height() + 2 * padding,
        Rgb([255, 255, 255]),
    );
    imageops::overlay(&mut padded, &image.to_rgb8(), padding as i64, padding as i64);
    DynamicImage::ImageRgb8(padded)
}

pub(crate) fn ensure_not_empty(image: &DynamicImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(OcrError::EmptyImage {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(())
}
