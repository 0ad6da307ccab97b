//! 画像の前処理
//!
//! 任意サイズの画像を固定サイズにリサイズし、ImageNetの平均と標準偏差で
//! 正規化した (C, H, W) 順の f32 テンソルに変換します。

use image::{imageops::FilterType, DynamicImage, GenericImageView};

use crate::error::ImageProcessingError;

/// チャネル数（RGB）
pub const NUM_CHANNELS: usize = 3;

/// モデル入力サイズ（正方形）
pub const IMAGE_SIZE: u32 = 224;

/// ImageNetのチャネル平均
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNetのチャネル標準偏差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 1画像分の正規化済みテンソル
///
/// 値は R, G, B の順にチャネルごとに連続して並びます（各チャネル内は行優先）。
/// 生成後は変更できません。
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

impl NormalizedTensor {
    /// [C, H, W]
    pub fn shape(&self) -> [usize; 3] {
        [NUM_CHANNELS, self.height, self.width]
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// 1チャネル分の値（範囲外なら `None`）
    pub fn channel(&self, channel: usize) -> Option<&[f32]> {
        if channel >= NUM_CHANNELS {
            return None;
        }
        let plane = self.width * self.height;
        self.data.get(channel * plane..(channel + 1) * plane)
    }
}

/// 画像正規化器
#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    target_width: u32,
    target_height: u32,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::square(IMAGE_SIZE)
    }
}

impl ImageNormalizer {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// エンコード済みバイト列（PNG, JPEG など）から画像をデコード
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ImageProcessingError> {
        Ok(image::load_from_memory(bytes)?)
    }

    /// 設定済みのサイズで正規化
    pub fn apply(&self, image: &DynamicImage) -> Result<NormalizedTensor, ImageProcessingError> {
        normalize(image, self.target_width, self.target_height)
    }
}

/// 画像をリサイズして正規化
///
/// アスペクト比は保持せず、指定サイズに引き伸ばします。
/// アルファチャネルは破棄されます。
///
/// # 戻り値
/// - 正規化されたRGB画像データ (C, H, W) の順で平坦化
pub fn normalize(
    image: &DynamicImage,
    target_width: u32,
    target_height: u32,
) -> Result<NormalizedTensor, ImageProcessingError> {
    if target_width == 0 || target_height == 0 {
        return Err(ImageProcessingError::InvalidTargetSize {
            width: target_width,
            height: target_height,
        });
    }

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ImageProcessingError::EmptyImage { width, height });
    }

    let img = image
        .resize_exact(target_width, target_height, FilterType::Triangle)
        .to_rgb8();
    let (width, height) = img.dimensions();

    let mut data = Vec::with_capacity(NUM_CHANNELS * width as usize * height as usize);

    for channel in 0..NUM_CHANNELS {
        for y in 0..height {
            for x in 0..width {
                let pixel = img.get_pixel(x, y);
                let value = pixel[channel] as f32 / 255.0;
                let normalized = (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
                data.push(normalized);
            }
        }
    }

    if let Some(offset) = data.iter().position(|v| !v.is_finite()) {
        return Err(ImageProcessingError::NonFiniteValue { offset });
    }

    Ok(NormalizedTensor {
        data,
        width: width as usize,
        height: height as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn uniform_rgb(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb)))
    }

    #[test]
    fn test_output_length_and_shape() {
        let img = uniform_rgb(640, 480, [10, 200, 30]);
        let tensor = normalize(&img, 224, 224).unwrap();

        assert_eq!(tensor.len(), 3 * 224 * 224);
        assert_eq!(tensor.shape(), [3, 224, 224]);
        assert!(tensor.as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_gray_pixel_values() {
        let img = uniform_rgb(4, 4, [128, 128, 128]);
        let tensor = normalize(&img, 4, 4).unwrap();

        for &v in tensor.channel(0).unwrap() {
            assert!((v - 0.074).abs() < 1e-3, "R = {}", v);
        }
        for &v in tensor.channel(1).unwrap() {
            assert!((v - 0.205).abs() < 1e-3, "G = {}", v);
        }
        for &v in tensor.channel(2).unwrap() {
            assert!((v - 0.427).abs() < 1e-3, "B = {}", v);
        }
        assert!(tensor.channel(3).is_none());
    }

    #[test]
    fn test_planar_layout() {
        // 左半分が赤、右半分が青の2x1画像
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 0, 255]));
        let tensor = normalize(&DynamicImage::ImageRgb8(img), 2, 1).unwrap();

        let r_max = (1.0 - 0.485) / 0.229;
        let r_min = (0.0 - 0.485) / 0.229;
        let b_max = (1.0 - 0.406) / 0.225;
        let b_min = (0.0 - 0.406) / 0.225;

        let data = tensor.as_slice();
        assert!((data[0] - r_max).abs() < 1e-6);
        assert!((data[1] - r_min).abs() < 1e-6);
        assert!((data[4] - b_min).abs() < 1e-6);
        assert!((data[5] - b_max).abs() < 1e-6);
    }

    #[test]
    fn test_alpha_is_discarded() {
        let opaque = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([50, 100, 150, 255])));
        let transparent = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([50, 100, 150, 0])));

        let a = normalize(&opaque, 4, 4).unwrap();
        let b = normalize(&transparent, 4, 4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stretch_non_square() {
        let img = uniform_rgb(300, 100, [0, 0, 0]);
        let tensor = normalize(&img, 6, 5).unwrap();
        assert_eq!(tensor.width(), 6);
        assert_eq!(tensor.height(), 5);
        assert_eq!(tensor.len(), 3 * 6 * 5);
    }

    #[test]
    fn test_deterministic() {
        let mut img = RgbImage::new(17, 9);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 13) as u8, (y * 29) as u8, ((x + y) * 7) as u8]);
        }
        let img = DynamicImage::ImageRgb8(img);
        assert_eq!(normalize(&img, 8, 8).unwrap(), normalize(&img, 8, 8).unwrap());
    }

    #[test]
    fn test_empty_image_rejected() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 10));
        let err = normalize(&img, 224, 224).unwrap_err();
        assert!(matches!(err, ImageProcessingError::EmptyImage { width: 0, height: 10 }));
    }

    #[test]
    fn test_zero_target_rejected() {
        let img = uniform_rgb(4, 4, [1, 2, 3]);
        let err = normalize(&img, 0, 224).unwrap_err();
        assert!(matches!(err, ImageProcessingError::InvalidTargetSize { .. }));
    }

    #[test]
    fn test_decode_garbage() {
        let err = ImageNormalizer::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ImageProcessingError::Decode(_)));
    }

    #[test]
    fn test_decode_png() {
        let img = uniform_rgb(3, 2, [9, 8, 7]);
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let decoded = ImageNormalizer::decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(ImageNormalizer::default().apply(&decoded).unwrap().len(), 3 * 224 * 224);
    }
}
