//! Image → NCHW float tensor conversion for vision encoders.

use anyhow::Result;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::value::Tensor;

/// Resize/crop/normalize parameters for one vision model.
#[derive(Debug, Clone, Copy)]
pub struct ImageNorm {
    /// Shorter side is resized to this before cropping.
    pub resize: u32,
    /// Side of the square centre crop fed to the model.
    pub crop: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

pub const CLIP_NORM: ImageNorm = ImageNorm {
    resize: 224,
    crop: 224,
    mean: [0.481_454_66, 0.457_827_5, 0.408_210_73],
    std: [0.268_629_54, 0.261_302_58, 0.275_777_11],
};

pub const IMAGENET_NORM: ImageNorm = ImageNorm {
    resize: 256,
    crop: 224,
    mean: [0.485, 0.456, 0.406],
    std: [0.229, 0.224, 0.225],
};

/// Produce a `[1, 3, crop, crop]` array normalized per channel.
pub fn to_nchw(image: &DynamicImage, norm: &ImageNorm) -> Array4<f32> {
    let filled = image.resize_to_fill(norm.resize, norm.resize, FilterType::CatmullRom);
    let offset = norm.resize.saturating_sub(norm.crop) / 2;
    let rgb = filled.crop_imm(offset, offset, norm.crop, norm.crop).to_rgb8();

    let side = norm.crop as usize;
    let mut array = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            array[[0, c, y as usize, x as usize]] = (value - norm.mean[c]) / norm.std[c];
        }
    }
    array
}

/// Convert an image straight into an ONNX input tensor.
pub fn to_tensor(image: &DynamicImage, norm: &ImageNorm) -> Result<Tensor<f32>> {
    let array = to_nchw(image, norm);
    let shape: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
    let (data, _) = array.into_raw_vec_and_offset();
    Ok(Tensor::from_array((shape, data.into_boxed_slice()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn output_shape_is_square_crop() {
        let array = to_nchw(&solid(640, 480, [10, 20, 30]), &IMAGENET_NORM);
        assert_eq!(array.shape(), &[1, 3, 224, 224]);

        let array = to_nchw(&solid(100, 300, [10, 20, 30]), &CLIP_NORM);
        assert_eq!(array.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn channels_are_normalized_with_mean_and_std() {
        let array = to_nchw(&solid(64, 64, [255, 0, 128]), &CLIP_NORM);
        let red = (1.0 - CLIP_NORM.mean[0]) / CLIP_NORM.std[0];
        let green = (0.0 - CLIP_NORM.mean[1]) / CLIP_NORM.std[1];
        assert!((array[[0, 0, 100, 100]] - red).abs() < 1e-3);
        assert!((array[[0, 1, 5, 7]] - green).abs() < 1e-3);
    }
}
