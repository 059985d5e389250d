//! Fully connected layer over per-patch feature vectors.

use ndarray::{Array1, Array2, Array3, ArrayView3, Ix1, Ix2};

use crate::error::{ModelError, ModelResult};
use crate::params::Params;

/// Affine map `x · kernel + bias`, with `kernel` stored `[in, out]`.
#[derive(Debug, Clone)]
pub struct Dense {
    kernel: Array2<f32>,
    bias: Array1<f32>,
}

impl Dense {
    pub fn new(kernel: Array2<f32>, bias: Array1<f32>) -> ModelResult<Self> {
        if kernel.ncols() != bias.len() {
            return Err(ModelError::Shape(format!(
                "dense kernel has {} outputs but bias has {}",
                kernel.ncols(),
                bias.len()
            )));
        }
        Ok(Self { kernel, bias })
    }

    /// Load `{scope}.kernel` and `{scope}.bias` from a parameter tree.
    pub fn from_params(params: &Params, scope: &str) -> ModelResult<Self> {
        let kernel_path = format!("{scope}.kernel");
        let bias_path = format!("{scope}.bias");

        let kernel = params
            .tensor_at(&kernel_path)?
            .clone()
            .into_dimensionality::<Ix2>()
            .map_err(|e| ModelError::Shape(format!("{kernel_path}: {e}")))?;
        let bias = params
            .tensor_at(&bias_path)?
            .clone()
            .into_dimensionality::<Ix1>()
            .map_err(|e| ModelError::Shape(format!("{bias_path}: {e}")))?;

        Self::new(kernel, bias)
    }

    pub fn in_dim(&self) -> usize {
        self.kernel.nrows()
    }

    pub fn out_dim(&self) -> usize {
        self.kernel.ncols()
    }

    /// Apply to `[batch, tokens, in]`, producing `[batch, tokens, out]`.
    pub fn forward(&self, x: ArrayView3<'_, f32>) -> ModelResult<Array3<f32>> {
        let (b, p, d) = x.dim();
        if d != self.in_dim() {
            return Err(ModelError::Shape(format!(
                "dense layer expects {} input features, got {}",
                self.in_dim(),
                d
            )));
        }

        let flat = x.to_shape((b * p, d))?;
        let mut out = flat.dot(&self.kernel);
        out += &self.bias;
        Ok(out.into_shape_with_order((b, p, self.out_dim()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_forward_applies_kernel_and_bias() {
        let dense = Dense::new(array![[1.0, 0.0], [0.0, 2.0], [1.0, 1.0]], array![0.5, -1.0]).unwrap();
        let x = Array3::from_shape_vec((1, 2, 3), vec![1.0, 2.0, 3.0, 0.0, 0.0, 1.0]).unwrap();

        let y = dense.forward(x.view()).unwrap();
        assert_eq!(y.dim(), (1, 2, 2));
        assert_eq!(y[[0, 0, 0]], 4.5); // 1 + 3 + 0.5
        assert_eq!(y[[0, 0, 1]], 6.0); // 4 + 3 - 1
        assert_eq!(y[[0, 1, 0]], 1.5);
        assert_eq!(y[[0, 1, 1]], 0.0);
    }

    #[test]
    fn test_forward_rejects_wrong_width() {
        let dense = Dense::new(Array2::zeros((4, 2)), Array1::zeros(2)).unwrap();
        let x = Array3::<f32>::zeros((1, 2, 3));
        assert!(matches!(dense.forward(x.view()), Err(ModelError::Shape(_))));
    }

    #[test]
    fn test_new_rejects_bias_mismatch() {
        let err = Dense::new(Array2::zeros((4, 2)), Array1::zeros(3)).unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)));
    }

    #[test]
    fn test_from_params_reports_missing_path() {
        let err = Dense::from_params(&Params::tree(), "class_head.dense0").unwrap_err();
        assert!(err.to_string().contains("class_head.dense0.kernel"));
    }
}
