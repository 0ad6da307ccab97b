//! バッチテンソルの組み立て
//!
//! 正規化済みテンソルを1つの連続したバッファにまとめます。
//! 画像 i の値はオフセット `i * C*H*W .. (i+1) * C*H*W` に格納されます。

use tracing::trace;

use crate::error::ImageProcessingError;
use crate::ml::normalizer::NormalizedTensor;

/// N画像分の連続バッファ
///
/// 所有者が1つだけのバッファで、推論が成功しても失敗しても
/// スコープを抜けた時点で1度だけ解放されます。
#[derive(Debug)]
pub struct BatchBuffer {
    data: Vec<f32>,
    image_count: usize,
    /// [C, H, W]
    image_shape: [usize; 3],
}

impl BatchBuffer {
    pub fn image_count(&self) -> usize {
        self.image_count
    }

    pub fn image_shape(&self) -> [usize; 3] {
        self.image_shape
    }

    /// 1画像あたりの要素数
    pub fn image_len(&self) -> usize {
        self.image_shape.iter().product()
    }

    /// [N, C, H, W]
    pub fn dims(&self) -> [usize; 4] {
        let [c, h, w] = self.image_shape;
        [self.image_count, c, h, w]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.image_count == 0
    }

    /// 画像 i の区間
    pub fn segment(&self, index: usize) -> Option<&[f32]> {
        if index >= self.image_count {
            return None;
        }
        let len = self.image_len();
        Some(&self.data[index * len..(index + 1) * len])
    }
}

impl Drop for BatchBuffer {
    fn drop(&mut self) {
        trace!(
            "[Batch] バッファ解放: {}画像, {}要素",
            self.image_count,
            self.data.len()
        );
    }
}

/// テンソル列を入力順に連結
///
/// 各テンソルはコピー後にすぐ破棄されます。
/// 形状が揃っていない場合はエラーを返し、部分的なバッファは返しません。
pub fn assemble(tensors: Vec<NormalizedTensor>) -> Result<BatchBuffer, ImageProcessingError> {
    let image_count = tensors.len();
    let image_shape = match tensors.first() {
        Some(first) => first.shape(),
        None => {
            return Ok(BatchBuffer {
                data: Vec::new(),
                image_count: 0,
                image_shape: [0, 0, 0],
            })
        }
    };

    for (index, tensor) in tensors.iter().enumerate() {
        if tensor.shape() != image_shape {
            return Err(ImageProcessingError::ShapeMismatch {
                index,
                expected: image_shape,
                actual: tensor.shape(),
            });
        }
    }

    let image_len: usize = image_shape.iter().product();
    let mut data = Vec::with_capacity(image_count * image_len);

    for tensor in tensors {
        data.extend_from_slice(tensor.as_slice());
    }

    debug_assert_eq!(data.len(), image_count * image_len);
    trace!("[Batch] バッファ確保: {}画像, {}要素", image_count, data.len());

    Ok(BatchBuffer {
        data,
        image_count,
        image_shape,
    })
}

#[cfg(test)]
pub(crate) fn batch_from_raw(data: Vec<f32>, image_count: usize, image_shape: [usize; 3]) -> BatchBuffer {
    BatchBuffer {
        data,
        image_count,
        image_shape,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::normalizer::normalize;
    use image::{DynamicImage, Rgb, RgbImage};

    fn tensor_of(rgb: [u8; 3], size: u32) -> NormalizedTensor {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(size, size, Rgb(rgb)));
        normalize(&img, size, size).unwrap()
    }

    #[test]
    fn test_assemble_layout() {
        let tensors = vec![
            tensor_of([0, 0, 0], 4),
            tensor_of([255, 255, 255], 4),
            tensor_of([12, 34, 56], 4),
        ];
        let expected: Vec<NormalizedTensor> = tensors.clone();

        let batch = assemble(tensors).unwrap();
        assert_eq!(batch.image_count(), 3);
        assert_eq!(batch.dims(), [3, 3, 4, 4]);
        assert_eq!(batch.as_slice().len(), 3 * 3 * 4 * 4);

        for (i, tensor) in expected.iter().enumerate() {
            let segment = batch.segment(i).unwrap();
            let same_bits = segment
                .iter()
                .zip(tensor.as_slice())
                .all(|(a, b)| a.to_bits() == b.to_bits());
            assert!(same_bits, "segment {} differs", i);
        }
        assert!(batch.segment(3).is_none());
    }

    #[test]
    fn test_assemble_empty() {
        let batch = assemble(Vec::new()).unwrap();
        assert!(batch.is_empty());
        assert!(batch.as_slice().is_empty());
    }

    #[test]
    fn test_assemble_shape_mismatch() {
        let err = assemble(vec![tensor_of([1, 2, 3], 4), tensor_of([1, 2, 3], 5)]).unwrap_err();
        match err {
            ImageProcessingError::ShapeMismatch {
                index,
                expected,
                actual,
            } => {
                assert_eq!(index, 1);
                assert_eq!(expected, [3, 4, 4]);
                assert_eq!(actual, [3, 5, 5]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
