//! Box regression: a small MLP plus the grid prior, squashed into (0, 1).

use ndarray::{Array3, ArrayView3, ArrayView4};

use crate::box_bias::{compute_box_bias, BoxBiasKind};
use crate::error::{ModelError, ModelResult};
use crate::math::{gelu, sigmoid};
use crate::params::Params;

use super::dense::Dense;

/// Number of dense layers in the box MLP.
pub const BOX_HEAD_LAYERS: usize = 3;

/// Box coordinates per patch: cx, cy, w, h.
pub const BOX_COORDS: usize = 4;

/// Predicts one normalized box per patch.
#[derive(Debug, Clone)]
pub struct BoxHead {
    layers: Vec<Dense>,
    bias_kind: BoxBiasKind,
}

impl BoxHead {
    /// Load `{scope}.Dense_0` … `{scope}.Dense_{num_layers - 1}`.
    pub fn from_params(
        params: &Params,
        scope: &str,
        num_layers: usize,
        bias_kind: BoxBiasKind,
    ) -> ModelResult<Self> {
        if num_layers == 0 {
            return Err(ModelError::InvalidArgument(
                "box head needs at least one layer".to_string(),
            ));
        }

        let layers = (0..num_layers)
            .map(|i| Dense::from_params(params, &format!("{scope}.Dense_{i}")))
            .collect::<ModelResult<Vec<_>>>()?;

        for pair in layers.windows(2) {
            if pair[0].out_dim() != pair[1].in_dim() {
                return Err(ModelError::Shape(format!(
                    "{scope}: layer widths do not chain ({} -> {})",
                    pair[0].out_dim(),
                    pair[1].in_dim()
                )));
            }
        }
        let out_dim = layers.last().map(Dense::out_dim).unwrap_or_default();
        if out_dim != BOX_COORDS {
            return Err(ModelError::Shape(format!(
                "{scope} must output {BOX_COORDS} coordinates, got {out_dim}"
            )));
        }

        Ok(Self { layers, bias_kind })
    }

    pub fn bias_kind(&self) -> BoxBiasKind {
        self.bias_kind
    }

    /// Raw regression output before bias and sigmoid, `[batch, num_patches, 4]`.
    pub fn regress(&self, image_features: ArrayView3<'_, f32>) -> ModelResult<Array3<f32>> {
        let Some((first, rest)) = self.layers.split_first() else {
            return Err(ModelError::InvalidArgument("box head has no layers".to_string()));
        };
        let mut x = first.forward(image_features)?;
        for layer in rest {
            x.mapv_inplace(gelu);
            x = layer.forward(x.view())?;
        }
        Ok(x)
    }

    /// Boxes as (cx, cy, w, h), each in (0, 1), `[batch, num_patches, 4]`.
    pub fn predict(
        &self,
        image_features: ArrayView3<'_, f32>,
        feature_map: ArrayView4<'_, f32>,
    ) -> ModelResult<Array3<f32>> {
        let (b, p, _) = image_features.dim();
        let (fb, h, w, _) = feature_map.dim();
        if fb != b || h * w != p {
            return Err(ModelError::Shape(format!(
                "feature map [{fb}, {h}, {w}, _] does not match {p} patches in a batch of {b}"
            )));
        }

        let mut boxes = self.regress(image_features)?;
        boxes += &compute_box_bias(feature_map, self.bias_kind);
        // f32 sigmoid saturates to exactly 0 or 1 past |x| ~ 16.6.
        boxes.mapv_inplace(|v| sigmoid(v).clamp(f32::EPSILON, 1.0 - f32::EPSILON));
        Ok(boxes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{box_head_params, features};
    use ndarray::{Array4, Axis};

    const IN_DIM: usize = 6;

    fn head(kind: BoxBiasKind) -> BoxHead {
        let params = box_head_params(IN_DIM, 2);
        BoxHead::from_params(&params, "obj_box_head", BOX_HEAD_LAYERS, kind).unwrap()
    }

    fn feature_map(b: usize, h: usize, w: usize) -> Array4<f32> {
        features(b, h * w, IN_DIM, 9)
            .into_shape_with_order((b, h, w, IN_DIM))
            .unwrap()
    }

    #[test]
    fn test_boxes_in_open_unit_interval() {
        for kind in [BoxBiasKind::Location, BoxBiasKind::Size, BoxBiasKind::Both] {
            let fm = feature_map(2, 3, 4);
            let x = fm.to_shape((2, 12, IN_DIM)).unwrap().to_owned();
            let boxes = head(kind).predict(x.view(), fm.view()).unwrap();
            assert_eq!(boxes.dim(), (2, 12, 4));
            assert!(boxes.iter().all(|&v| v > 0.0 && v < 1.0), "{kind}");
        }
    }

    #[test]
    fn test_zero_regression_recovers_prior() {
        let mut params = box_head_params(IN_DIM, 2);
        for leaf in ["kernel", "bias"] {
            let path = format!("obj_box_head.Dense_2.{leaf}");
            let zeros = params.tensor_at(&path).unwrap().mapv(|_| 0.0);
            params.insert_path(&path, Params::Tensor(zeros)).unwrap();
        }
        let head =
            BoxHead::from_params(&params, "obj_box_head", BOX_HEAD_LAYERS, BoxBiasKind::Both)
                .unwrap();

        let fm = feature_map(1, 2, 2);
        let x = fm.to_shape((1, 4, IN_DIM)).unwrap().to_owned();
        let boxes = head.predict(x.view(), fm.view()).unwrap();
        let boxes = boxes.index_axis(Axis(0), 0);

        // Last patch (x=1, y=1) sits at the far corner, one half-grid cell in size.
        let last = boxes.row(3);
        assert!((last[0] - 1.0).abs() < 1e-3);
        assert!((last[1] - 1.0).abs() < 1e-3);
        assert!((last[2] - 0.5).abs() < 1e-3);
        assert!((last[3] - 0.5).abs() < 1e-3);
        // First patch at (0.5, 0.5).
        assert!((boxes[[0, 0]] - 0.5).abs() < 1e-3);
        assert!((boxes[[0, 1]] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_saturated_boxes_stay_inside_unit_interval() {
        let mut params = box_head_params(IN_DIM, 2);
        let path = "obj_box_head.Dense_2.bias";
        let large = params.tensor_at(path).unwrap().mapv(|_| 40.0);
        params.insert_path(path, Params::Tensor(large)).unwrap();
        let head =
            BoxHead::from_params(&params, "obj_box_head", BOX_HEAD_LAYERS, BoxBiasKind::Both)
                .unwrap();

        let fm = feature_map(1, 1, 1);
        let x = fm.to_shape((1, 1, IN_DIM)).unwrap().to_owned();
        let boxes = head.predict(x.view(), fm.view()).unwrap();
        assert!(boxes.iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn test_patch_count_mismatch_is_shape_error() {
        let fm = feature_map(1, 3, 3);
        let x = features(1, 8, IN_DIM, 1);
        let err = head(BoxBiasKind::Both).predict(x.view(), fm.view()).unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)));
    }

    #[test]
    fn test_wrong_output_width_rejected() {
        let mut params = box_head_params(IN_DIM, 2);
        let bad = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[IN_DIM, 5]));
        params
            .insert_path("obj_box_head.Dense_2.kernel", Params::Tensor(bad))
            .unwrap();
        let bias = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[5]));
        params
            .insert_path("obj_box_head.Dense_2.bias", Params::Tensor(bias))
            .unwrap();

        let err = BoxHead::from_params(&params, "obj_box_head", 3, BoxBiasKind::Both).unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)));
    }

    #[test]
    fn test_predict_is_deterministic() {
        let head = head(BoxBiasKind::Both);
        let fm = feature_map(1, 2, 3);
        let x = fm.to_shape((1, 6, IN_DIM)).unwrap().to_owned();
        let a = head.predict(x.view(), fm.view()).unwrap();
        let b = head.predict(x.view(), fm.view()).unwrap();
        assert_eq!(a, b);
    }
}
