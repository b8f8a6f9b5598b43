//! Turns an uploaded raster image into the `[1, H, W, 3]` tensor the
//! network was trained on.

use image::{DynamicImage, ImageReader, RgbImage, imageops};
use ndarray::Array4;
use std::path::Path;

use crate::error::ClassifyError;
use crate::model_config::{ImageSize, ResampleFilter};

#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    size: ImageSize,
    resample: ResampleFilter,
}

impl Preprocessor {
    pub fn new(size: ImageSize, resample: ResampleFilter) -> Self {
        Self { size, resample }
    }

    /// Decodes an in-memory upload. The format is sniffed from the bytes,
    /// never from the client supplied filename.
    pub fn tensor_from_bytes(&self, bytes: &[u8]) -> Result<Array4<f32>, ClassifyError> {
        let image = image::load_from_memory(bytes)?;
        Ok(self.tensor_from_image(&image))
    }

    /// Decodes a staged upload from disk.
    pub fn tensor_from_path(&self, path: &Path) -> Result<Array4<f32>, ClassifyError> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Ok(self.tensor_from_image(&image))
    }

    /// RGB conversion happens before the resize so alpha and palette data
    /// never bleed into the interpolation.
    pub fn tensor_from_image(&self, image: &DynamicImage) -> Array4<f32> {
        let rgb: RgbImage = image.to_rgb8();
        let width = self.size.width as u32;
        let height = self.size.height as u32;
        let resized = if rgb.dimensions() == (width, height) {
            rgb
        } else {
            imageops::resize(&rgb, width, height, self.resample.into())
        };

        Array4::from_shape_fn(
            (1, self.size.height, self.size.width, 3),
            |(_, y, x, c)| resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn preprocessor() -> Preprocessor {
        Preprocessor::new(ImageSize { height: 150, width: 150 }, ResampleFilter::CatmullRom)
    }

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    fn assert_normalized(tensor: &Array4<f32>) {
        assert_eq!(tensor.shape(), &[1, 150, 150, 3]);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn rgb_png_of_any_size_becomes_fixed_shape() {
        for (w, h) in [(1, 1), (37, 512), (640, 480), (150, 150)] {
            let image = RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
            let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);
            let tensor = preprocessor().tensor_from_bytes(&bytes).unwrap();
            assert_normalized(&tensor);
        }
    }

    #[test]
    fn grayscale_is_expanded_to_three_equal_channels() {
        let image = GrayImage::from_pixel(300, 200, Luma([51]));
        let bytes = encode(DynamicImage::ImageLuma8(image), ImageFormat::Png);
        let tensor = preprocessor().tensor_from_bytes(&bytes).unwrap();
        assert_normalized(&tensor);
        for c in 0..3 {
            assert!((tensor[[0, 75, 75, c]] - 0.2).abs() < 1e-6);
        }
    }

    #[test]
    fn alpha_channel_is_discarded() {
        let image = RgbaImage::from_pixel(64, 64, Rgba([255, 0, 0, 0]));
        let bytes = encode(DynamicImage::ImageRgba8(image), ImageFormat::Png);
        let tensor = preprocessor().tensor_from_bytes(&bytes).unwrap();
        assert_normalized(&tensor);
        assert_eq!(tensor[[0, 10, 10, 0]], 1.0);
        assert_eq!(tensor[[0, 10, 10, 1]], 0.0);
        assert_eq!(tensor[[0, 10, 10, 2]], 0.0);
    }

    #[test]
    fn sixteen_bit_images_stay_in_unit_range() {
        let image = image::ImageBuffer::<image::Rgb<u16>, _>::from_pixel(20, 10, image::Rgb([65535, 0, 32768]));
        let bytes = encode(DynamicImage::ImageRgb16(image), ImageFormat::Png);
        let tensor = preprocessor().tensor_from_bytes(&bytes).unwrap();
        assert_normalized(&tensor);
        assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
    }

    #[test]
    fn jpeg_uploads_decode() {
        let image = RgbImage::from_pixel(200, 100, Rgb([10, 200, 30]));
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg);
        assert_normalized(&preprocessor().tensor_from_bytes(&bytes).unwrap());
    }

    #[test]
    fn values_are_pixel_over_255() {
        let image = RgbImage::from_pixel(150, 150, Rgb([0, 128, 255]));
        let tensor = preprocessor().tensor_from_image(&DynamicImage::ImageRgb8(image));
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 0, 0, 1]], 128.0_f32 / 255.0);
        assert_eq!(tensor[[0, 149, 149, 2]], 1.0);
    }

    #[test]
    fn non_square_target_uses_height_then_width() {
        let pre = Preprocessor::new(ImageSize { height: 20, width: 40 }, ResampleFilter::Triangle);
        let image = RgbImage::from_pixel(7, 9, Rgb([1, 2, 3]));
        let tensor = pre.tensor_from_image(&DynamicImage::ImageRgb8(image));
        assert_eq!(tensor.shape(), &[1, 20, 40, 3]);
    }

    #[test]
    fn text_bytes_are_a_decode_error() {
        let err = preprocessor()
            .tensor_from_bytes(b"definitely not a picture")
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
    }

    #[test]
    fn truncated_png_is_a_decode_error() {
        let image = RgbImage::from_pixel(64, 64, Rgb([9, 9, 9]));
        let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);
        let err = preprocessor().tensor_from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, ClassifyError::Decode(_)));
    }

    #[test]
    fn missing_file_is_a_filesystem_error() {
        let path = std::env::temp_dir().join(format!("missing-{}.png", uuid::Uuid::new_v4()));
        let err = preprocessor().tensor_from_path(&path).unwrap_err();
        assert!(matches!(err, ClassifyError::Filesystem(_)));
    }
}
